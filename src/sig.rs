//! Signatures: the fingerprints compared to tell whether an input changed.
//!
//! A node's own signature lives in a `NodeInfo`.  Which of its fields are
//! filled in depends on the calculator's mode: timestamps and sizes for
//! `Timestamp`, content digests for `Content`, both for `Custom`.  Whatever
//! cannot be computed stays `None`, and `None` never compares equal, so an
//! unreadable input always reads as changed.

use crate::fs::{FileSystem, Stat};
use crate::info::NodeInfo;
use rayon::prelude::*;
use sha2::Digest as _;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// A SHA-256 digest over some content.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn of(bytes: &[u8]) -> Self {
        Digest(sha2::Sha256::digest(bytes).into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..12])
    }
}

/// Rewrites content before it is digested, so that changes which don't
/// matter (comments, whitespace) don't cause rebuilds.
pub trait Normalizer: Send + Sync {
    fn normalize<'a>(&self, name: &str, content: &'a [u8]) -> Cow<'a, [u8]>;
}

/// A user-supplied staleness criterion.
pub trait Decider: Send + Sync {
    /// Returns true if `cur` should be considered a change from `prev`.
    fn changed(&self, prev: &NodeInfo, cur: &NodeInfo) -> bool;
}

#[derive(Clone, Default)]
pub enum SigMode {
    /// Compare modification times and sizes.
    Timestamp,
    /// Compare content digests; timestamps are ignored.
    #[default]
    Content,
    /// Collect both and let the decider compare.
    Custom(Arc<dyn Decider>),
}

impl std::fmt::Debug for SigMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigMode::Timestamp => f.write_str("Timestamp"),
            SigMode::Content => f.write_str("Content"),
            SigMode::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Computes and compares signatures.
#[derive(Clone, Default)]
pub struct Calculator {
    pub mode: SigMode,
    /// How much earlier than recorded an mtime may look before it counts as
    /// a change, in timestamp mode.  A later mtime is always a change.
    pub max_drift: Duration,
    pub normalizer: Option<Arc<dyn Normalizer>>,
}

const UNIT_SEPARATOR: u8 = 0x1F;

fn stamp(mtime: SystemTime) -> Option<u64> {
    let since = mtime.duration_since(SystemTime::UNIX_EPOCH).ok()?;
    u64::try_from(since.as_nanos()).ok()
}

impl Calculator {
    pub fn new(mode: SigMode) -> Self {
        Calculator {
            mode,
            ..Default::default()
        }
    }

    fn wants_content(&self) -> bool {
        !matches!(self.mode, SigMode::Timestamp)
    }

    fn wants_stat(&self) -> bool {
        !matches!(self.mode, SigMode::Content)
    }

    /// Content signature of some bytes, after normalization.
    pub fn csig(&self, name: &str, content: &[u8]) -> Digest {
        match &self.normalizer {
            Some(n) => Digest::of(&n.normalize(name, content)),
            None => Digest::of(content),
        }
    }

    /// Signature fields for a file as it currently is.  Never fails: fields
    /// that can't be computed are left unset.
    pub fn file_info(&self, name: &str, fs: &dyn FileSystem) -> NodeInfo {
        let mut info = NodeInfo::default();
        if self.wants_stat() {
            match fs.stat(name) {
                Ok(Stat::Present { mtime, size }) => {
                    info.timestamp = stamp(mtime);
                    info.size = Some(size);
                }
                Ok(Stat::Missing) => {}
                Err(err) => tracing::warn!("stat {}: {}", name, err),
            }
        }
        if self.wants_content() {
            match fs.read(name) {
                Ok(bytes) => info.csig = Some(self.csig(name, &bytes)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => tracing::warn!("read {}: {}", name, err),
            }
        }
        info
    }

    /// Signature fields for content that isn't a file (aliases); only the
    /// digest is meaningful, in every mode.
    pub fn contents_info(&self, name: &str, content: &[u8]) -> NodeInfo {
        NodeInfo {
            csig: Some(self.csig(name, content)),
            ..Default::default()
        }
    }

    /// file_info() for many files at once, in parallel.
    pub fn file_infos(&self, names: &[&str], fs: &dyn FileSystem) -> Vec<NodeInfo> {
        names
            .par_iter()
            .map(|name| self.file_info(name, fs))
            .collect()
    }

    /// Whether `cur` differs from the recorded `prev`.
    pub fn changed(&self, prev: &NodeInfo, cur: &NodeInfo) -> bool {
        match &self.mode {
            SigMode::Content => csig_changed(prev, cur),
            SigMode::Timestamp => self.timestamp_changed(prev, cur),
            SigMode::Custom(decider) => decider.changed(prev, cur),
        }
    }

    fn timestamp_changed(&self, prev: &NodeInfo, cur: &NodeInfo) -> bool {
        match (prev.timestamp, cur.timestamp) {
            (Some(p), Some(c)) => {
                if c > p {
                    return true;
                }
                let drift = u64::try_from(self.max_drift.as_nanos()).unwrap_or(u64::MAX);
                if p - c > drift {
                    return true;
                }
                prev.size != cur.size
            }
            // Aliases carry no timestamp.
            (None, None) => csig_changed(prev, cur),
            _ => true,
        }
    }

    /// The build signature: changes whenever any input's signature or the
    /// action changes.
    pub fn bsig<'a>(
        &self,
        inputs: impl IntoIterator<Item = (&'a str, &'a NodeInfo)>,
        action: &Digest,
    ) -> Digest {
        let mut hasher = sha2::Sha256::new();
        for (name, info) in inputs {
            hasher.update(name.as_bytes());
            hasher.update([UNIT_SEPARATOR]);
            write_info(&mut hasher, info);
        }
        hasher.update([UNIT_SEPARATOR]);
        hasher.update(action.0);
        Digest(hasher.finalize().into())
    }
}

fn csig_changed(prev: &NodeInfo, cur: &NodeInfo) -> bool {
    match (prev.csig, cur.csig) {
        (Some(a), Some(b)) => a != b,
        _ => true,
    }
}

fn write_info(hasher: &mut sha2::Sha256, info: &NodeInfo) {
    match info.csig {
        Some(d) => {
            hasher.update([1]);
            hasher.update(d.0);
        }
        None => hasher.update([0]),
    }
    for field in [info.timestamp, info.size] {
        match field {
            Some(n) => {
                hasher.update([1]);
                hasher.update(n.to_le_bytes());
            }
            None => hasher.update([0]),
        }
    }
    hasher.update([UNIT_SEPARATOR]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(timestamp: u64, size: u64) -> NodeInfo {
        NodeInfo {
            timestamp: Some(timestamp),
            size: Some(size),
            ..Default::default()
        }
    }

    fn cs(content: &str) -> NodeInfo {
        NodeInfo {
            csig: Some(Digest::of(content.as_bytes())),
            ..Default::default()
        }
    }

    #[test]
    fn digest_hex() {
        assert_eq!(
            Digest::of(b"hello world").to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn content_ignores_timestamps() {
        let calc = Calculator::new(SigMode::Content);
        let mut a = cs("x");
        let mut b = cs("x");
        a.timestamp = Some(1);
        b.timestamp = Some(99);
        assert!(!calc.changed(&a, &b));
        assert!(calc.changed(&a, &cs("y")));
    }

    #[test]
    fn unknown_is_changed() {
        let calc = Calculator::new(SigMode::Content);
        assert!(calc.changed(&cs("x"), &NodeInfo::default()));
        assert!(calc.changed(&NodeInfo::default(), &NodeInfo::default()));
        let calc = Calculator::new(SigMode::Timestamp);
        assert!(calc.changed(&ts(5, 1), &NodeInfo::default()));
    }

    #[test]
    fn timestamp_drift() {
        let mut calc = Calculator::new(SigMode::Timestamp);
        assert!(!calc.changed(&ts(1_000, 3), &ts(1_000, 3)));
        // Later is always stale.
        assert!(calc.changed(&ts(1_000, 3), &ts(1_001, 3)));
        // Earlier is stale without tolerance...
        assert!(calc.changed(&ts(1_000, 3), &ts(999, 3)));
        // ...but tolerated within the drift.
        calc.max_drift = Duration::from_nanos(10);
        assert!(!calc.changed(&ts(1_000, 3), &ts(995, 3)));
        assert!(calc.changed(&ts(1_000, 3), &ts(989, 3)));
        assert!(calc.changed(&ts(1_000, 3), &ts(1_005, 3)));
        // Size still matters.
        assert!(calc.changed(&ts(1_000, 3), &ts(1_000, 4)));
    }

    #[test]
    fn custom_decider() {
        struct Never;
        impl Decider for Never {
            fn changed(&self, _prev: &NodeInfo, _cur: &NodeInfo) -> bool {
                false
            }
        }
        let calc = Calculator::new(SigMode::Custom(Arc::new(Never)));
        assert!(!calc.changed(&cs("a"), &cs("b")));
    }

    #[test]
    fn normalizer() {
        struct StripHash;
        impl Normalizer for StripHash {
            fn normalize<'a>(&self, _name: &str, content: &'a [u8]) -> Cow<'a, [u8]> {
                let text = String::from_utf8_lossy(content);
                let kept: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
                Cow::Owned(kept.join("\n").into_bytes())
            }
        }
        let mut calc = Calculator::new(SigMode::Content);
        calc.normalizer = Some(Arc::new(StripHash));
        assert_eq!(
            calc.csig("f", b"# one\ncode"),
            calc.csig("f", b"# two\ncode")
        );
        assert_ne!(calc.csig("f", b"code"), calc.csig("f", b"other"));
    }

    #[test]
    fn bsig_covers_inputs_and_action() {
        let calc = Calculator::default();
        let a = cs("a");
        let b = cs("b");
        let act = Digest::of(b"cc -c");
        let base = calc.bsig([("x", &a)], &act);
        assert_eq!(base, calc.bsig([("x", &a)], &act));
        assert_ne!(base, calc.bsig([("x", &b)], &act));
        assert_ne!(base, calc.bsig([("y", &a)], &act));
        assert_ne!(base, calc.bsig([("x", &a)], &Digest::of(b"cc -O2 -c")));
        assert_ne!(base, calc.bsig([("x", &a), ("y", &a)], &act));
    }
}
