//! The database stores Build-Info from previous runs, used to determine
//! which nodes are up to date.
//!
//! `DiskStore` is an append-only log: a header followed by one
//! length-prefixed record per `put`.  Later records for a name supersede
//! earlier ones, so reading the whole log and keeping the last record per
//! name reconstructs the table.

use crate::error::Error;
use crate::info::{BuildInfo, NodeInfo};
use crate::sig::Digest;
use dashmap::DashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

/// Persisted Build-Info, keyed by node name.
pub trait Store: Sync {
    fn get(&self, name: &str) -> Option<BuildInfo>;
    fn put(&self, name: &str, info: BuildInfo) -> Result<(), Error>;
}

/// A store that lasts as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, BuildInfo>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn remove(&self, name: &str) {
        self.entries.remove(name);
    }
}

impl Store for MemoryStore {
    fn get(&self, name: &str) -> Option<BuildInfo> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    fn put(&self, name: &str, info: BuildInfo) -> Result<(), Error> {
        self.entries.insert(name.to_owned(), info);
        Ok(())
    }
}

const SIGNATURE: &[u8] = b"tenddb";
const VERSION: u32 = 1;

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

#[derive(Default)]
struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn u8(&mut self, n: u8) {
        self.buf.push(n);
    }

    fn u32(&mut self, n: u32) {
        self.buf.extend_from_slice(&n.to_le_bytes());
    }

    fn u64(&mut self, n: u64) {
        self.buf.extend_from_slice(&n.to_le_bytes());
    }

    fn len(&mut self, n: usize) {
        // Names and lists longer than u32::MAX can't come out of a graph
        // that fits in memory.
        self.u32(n as u32);
    }

    fn str(&mut self, s: &str) {
        self.len(s.len());
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn digest(&mut self, d: &Option<Digest>) {
        match d {
            Some(d) => {
                self.u8(1);
                self.buf.extend_from_slice(&d.0);
            }
            None => self.u8(0),
        }
    }

    fn opt_u64(&mut self, n: Option<u64>) {
        match n {
            Some(n) => {
                self.u8(1);
                self.u64(n);
            }
            None => self.u8(0),
        }
    }

    fn ninfo(&mut self, info: &NodeInfo) {
        self.digest(&info.csig);
        self.opt_u64(info.timestamp);
        self.opt_u64(info.size);
        self.digest(&info.bsig);
    }

    fn names(&mut self, names: &Option<Vec<String>>) {
        match names {
            Some(names) => {
                self.u8(1);
                self.len(names.len());
                for name in names {
                    self.str(name);
                }
            }
            None => self.u8(0),
        }
    }

    fn sigs(&mut self, sigs: &Option<Vec<NodeInfo>>) {
        match sigs {
            Some(sigs) => {
                self.u8(1);
                self.len(sigs.len());
                for sig in sigs {
                    self.ninfo(sig);
                }
            }
            None => self.u8(0),
        }
    }

    fn binfo(&mut self, info: &BuildInfo) {
        self.ninfo(&info.ninfo);
        self.names(&info.bsources);
        self.sigs(&info.bsourcesigs);
        self.names(&info.bdepends);
        self.sigs(&info.bdependsigs);
        self.names(&info.bimplicit);
        self.sigs(&info.bimplicitsigs);
        match &info.bact {
            Some(act) => {
                self.u8(1);
                self.str(act);
            }
            None => self.u8(0),
        }
        self.digest(&info.bactsig);
    }
}

struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    fn take(&mut self, n: usize) -> std::io::Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(invalid("truncated record"));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self) -> std::io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> std::io::Result<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }

    fn u64(&mut self) -> std::io::Result<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    fn present(&mut self) -> std::io::Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(invalid("bad presence tag")),
        }
    }

    fn str(&mut self) -> std::io::Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| invalid("name is not utf-8"))
    }

    fn digest(&mut self) -> std::io::Result<Option<Digest>> {
        if !self.present()? {
            return Ok(None);
        }
        let mut d = [0u8; 32];
        d.copy_from_slice(self.take(32)?);
        Ok(Some(Digest(d)))
    }

    fn opt_u64(&mut self) -> std::io::Result<Option<u64>> {
        if !self.present()? {
            return Ok(None);
        }
        Ok(Some(self.u64()?))
    }

    fn ninfo(&mut self) -> std::io::Result<NodeInfo> {
        Ok(NodeInfo {
            csig: self.digest()?,
            timestamp: self.opt_u64()?,
            size: self.opt_u64()?,
            bsig: self.digest()?,
        })
    }

    fn names(&mut self) -> std::io::Result<Option<Vec<String>>> {
        if !self.present()? {
            return Ok(None);
        }
        let n = self.u32()?;
        (0..n).map(|_| self.str()).collect::<Result<_, _>>().map(Some)
    }

    fn sigs(&mut self) -> std::io::Result<Option<Vec<NodeInfo>>> {
        if !self.present()? {
            return Ok(None);
        }
        let n = self.u32()?;
        (0..n)
            .map(|_| self.ninfo())
            .collect::<Result<_, _>>()
            .map(Some)
    }

    fn binfo(&mut self) -> std::io::Result<BuildInfo> {
        Ok(BuildInfo {
            ninfo: self.ninfo()?,
            bsources: self.names()?,
            bsourcesigs: self.sigs()?,
            bdepends: self.names()?,
            bdependsigs: self.sigs()?,
            bimplicit: self.names()?,
            bimplicitsigs: self.sigs()?,
            bact: if self.present()? {
                Some(self.str()?)
            } else {
                None
            },
            bactsig: self.digest()?,
        })
    }
}

/// Read the log into `entries`.  Returns the file offset just past the
/// last complete record; a torn trailing record (from a crash mid-write) is
/// dropped.
fn read_log(f: &mut File, entries: &DashMap<String, BuildInfo>) -> std::io::Result<Option<u64>> {
    let mut r = BufReader::new(f);
    let mut header = [0u8; SIGNATURE.len() + 4];
    match r.read_exact(&mut header) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    if &header[..SIGNATURE.len()] != SIGNATURE {
        return Err(invalid("unexpected db signature"));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&header[SIGNATURE.len()..]);
    if u32::from_le_bytes(version) != VERSION {
        tracing::warn!("db version mismatch; discarding previous build info");
        return Ok(None);
    }

    let mut end = header.len() as u64;
    let mut buf = Vec::new();
    loop {
        let mut len = [0u8; 4];
        match r.read_exact(&mut len) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err),
        }
        let len = u32::from_le_bytes(len) as usize;
        buf.resize(len, 0);
        match r.read_exact(&mut buf) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::warn!("db: dropping truncated trailing record");
                break;
            }
            Err(err) => return Err(err),
        }
        let mut dec = Decoder { buf: &buf };
        let name = dec.str()?;
        let info = dec.binfo()?;
        entries.insert(name, info);
        end += 4 + len as u64;
    }
    Ok(Some(end))
}

fn append(w: &mut BufWriter<File>, record: &[u8]) -> std::io::Result<()> {
    w.write_all(&(record.len() as u32).to_le_bytes())?;
    w.write_all(record)?;
    w.flush()
}

/// A store persisted to a file.
pub struct DiskStore {
    path: String,
    entries: DashMap<String, BuildInfo>,
    w: Mutex<BufWriter<File>>,
}

impl DiskStore {
    /// Open or create the store at `path`.
    pub fn open(path: &str) -> Result<Self, Error> {
        let io_err = |source| Error::Io {
            path: path.to_owned(),
            source,
        };
        let mut f = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;
        let entries = DashMap::new();
        let end = read_log(&mut f, &entries).map_err(io_err)?;
        let mut w = match end {
            Some(end) => {
                f.set_len(end).map_err(io_err)?;
                f.seek(SeekFrom::Start(end)).map_err(io_err)?;
                BufWriter::new(f)
            }
            None => {
                entries.clear();
                f.set_len(0).map_err(io_err)?;
                f.seek(SeekFrom::Start(0)).map_err(io_err)?;
                let mut w = BufWriter::new(f);
                w.write_all(SIGNATURE).map_err(io_err)?;
                w.write_all(&VERSION.to_le_bytes()).map_err(io_err)?;
                w
            }
        };
        w.flush().map_err(io_err)?;
        tracing::debug!(path, entries = entries.len(), "opened db");
        Ok(DiskStore {
            path: path.to_owned(),
            entries,
            w: Mutex::new(w),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Store for DiskStore {
    fn get(&self, name: &str) -> Option<BuildInfo> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    fn put(&self, name: &str, info: BuildInfo) -> Result<(), Error> {
        let mut enc = Encoder::default();
        enc.str(name);
        enc.binfo(&info);
        let record = enc.buf;
        let mut w = self.w.lock().unwrap_or_else(|e| e.into_inner());
        append(&mut w, &record).map_err(|source| Error::Io {
            path: self.path.clone(),
            source,
        })?;
        drop(w);
        self.entries.insert(name.to_owned(), info);
        Ok(())
    }
}
