//! The content reader boundary: how the engine sees artifacts on disk.

use std::time::SystemTime;

/// Stat info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stat {
    Missing,
    Present { mtime: SystemTime, size: u64 },
}

impl Stat {
    pub fn exists(&self) -> bool {
        matches!(self, Stat::Present { .. })
    }
}

/// Access to artifact content.  Implementations must be side-effect-free for
/// `read` and `stat`, and must tolerate concurrent calls for different paths.
pub trait FileSystem: Sync {
    fn read(&self, path: &str) -> std::io::Result<Vec<u8>>;
    /// stat() an on-disk path, producing its Stat.
    fn stat(&self, path: &str) -> std::io::Result<Stat>;
    /// Remove an artifact.  Removing an absent path is not an error.
    fn remove(&self, path: &str) -> std::io::Result<()>;
}

pub struct RealFileSystem {}
impl RealFileSystem {
    pub fn new() -> Self {
        RealFileSystem {}
    }
}

impl Default for RealFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for RealFileSystem {
    fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn stat(&self, path: &str) -> std::io::Result<Stat> {
        Ok(match std::fs::metadata(path) {
            Ok(meta) => Stat::Present {
                mtime: meta.modified()?,
                size: meta.len(),
            },
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    Stat::Missing
                } else {
                    return Err(err);
                }
            }
        })
    }

    fn remove(&self, path: &str) -> std::io::Result<()> {
        match std::fs::remove_file(path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            r => r,
        }
    }
}
