//! Test doubles shared by the unit tests.

use crate::builder::{Action, Env, Invocation};
use crate::fs::{FileSystem, Stat};
use crate::scan::Scanner;
use crate::task::TaskResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

#[derive(Default)]
struct Files {
    content: HashMap<String, (Vec<u8>, SystemTime)>,
    unreadable: Vec<String>,
    unstatable: Vec<String>,
    clock: u64,
}

/// An in-memory FileSystem.  Every write advances a fake clock by one
/// second, so mtimes are distinct and increasing.
#[derive(Clone, Default)]
pub struct MemFs(Arc<Mutex<Files>>);

impl MemFs {
    pub fn write(&self, path: &str, content: &str) {
        let mut files = self.0.lock().unwrap();
        files.clock += 1;
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(files.clock);
        files
            .content
            .insert(path.to_owned(), (content.as_bytes().to_vec(), mtime));
    }

    pub fn set_unreadable(&self, path: &str) {
        self.0.lock().unwrap().unreadable.push(path.to_owned());
    }

    /// Makes stat() of `path` fail.
    pub fn set_unstatable(&self, path: &str) {
        self.0.lock().unwrap().unstatable.push(path.to_owned());
    }
}

impl FileSystem for MemFs {
    fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        let files = self.0.lock().unwrap();
        if files.unreadable.iter().any(|p| p == path) {
            return Err(std::io::ErrorKind::PermissionDenied.into());
        }
        match files.content.get(path) {
            Some((content, _)) => Ok(content.clone()),
            None => Err(std::io::ErrorKind::NotFound.into()),
        }
    }

    fn stat(&self, path: &str) -> std::io::Result<Stat> {
        let files = self.0.lock().unwrap();
        if files.unstatable.iter().any(|p| p == path) {
            return Err(std::io::ErrorKind::PermissionDenied.into());
        }
        Ok(match files.content.get(path) {
            Some((content, mtime)) => Stat::Present {
                mtime: *mtime,
                size: content.len() as u64,
            },
            None => Stat::Missing,
        })
    }

    fn remove(&self, path: &str) -> std::io::Result<()> {
        self.0.lock().unwrap().content.remove(path);
        Ok(())
    }
}

/// An action that succeeds without doing anything; its contents are the
/// given text.
pub struct Touch {
    text: String,
}

impl Touch {
    pub fn new(text: &str) -> Self {
        Touch {
            text: text.to_owned(),
        }
    }
}

impl Action for Touch {
    fn execute(&self, _inv: &Invocation) -> anyhow::Result<TaskResult> {
        Ok(TaskResult::success())
    }

    fn contents(&self, _inv: &Invocation) -> String {
        self.text.clone()
    }
}

/// A scanner that treats file content as a whitespace-separated list of
/// dependency names.
#[derive(Default)]
pub struct Includes {
    fixed: Option<Vec<String>>,
    skip: Option<fn(&str) -> bool>,
}

impl Includes {
    /// Returns the same names for anything it scans.
    pub fn fixed(names: &[&str]) -> Self {
        Includes {
            fixed: Some(names.iter().map(|n| n.to_string()).collect()),
            skip: None,
        }
    }

    /// Doesn't recurse into names matching `skip`.
    pub fn skipping(skip: fn(&str) -> bool) -> Self {
        Includes {
            fixed: None,
            skip: Some(skip),
        }
    }
}

impl Scanner for Includes {
    fn scan(&self, name: &str, _env: &Env, fs: &dyn FileSystem) -> anyhow::Result<Vec<String>> {
        if let Some(fixed) = &self.fixed {
            return Ok(fixed.clone());
        }
        let content = fs.read(name)?;
        Ok(String::from_utf8(content)?
            .split_whitespace()
            .map(|s| s.to_owned())
            .collect())
    }

    fn recurse(&self, name: &str) -> bool {
        !self.skip.map_or(false, |skip| skip(name))
    }
}
