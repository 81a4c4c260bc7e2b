//! Static Policy Loader (C6).
//!
//! Parses the YAML policy file at startup and re-parses it whenever its
//! mtime changes, polled at a configurable interval. Mirrors the teacher's
//! preference for "leave the previous good state in effect on error" over
//! crashing — a malformed edit to the file on disk must never take the
//! service down.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::types::StaticPolicyFile;

pub struct StaticPolicyLoader {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
}

impl StaticPolicyLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StaticPolicyLoader {
            path: path.into(),
            last_mtime: None,
        }
    }

    /// Load the file unconditionally, regardless of mtime tracking. Used at
    /// startup; a missing file is treated as an empty policy rather than a
    /// fatal error, since a fresh deployment may not have one yet.
    pub fn load(&mut self) -> anyhow::Result<StaticPolicyFile> {
        let (file, mtime) = read(&self.path)?;
        self.last_mtime = mtime;
        Ok(file)
    }

    /// Check the file's mtime and reparse only if it changed since the last
    /// successful load. Returns `Ok(None)` when nothing changed, `Ok(Some)`
    /// with the freshly parsed document when it did, and `Err` on a parse
    /// failure — the caller MUST keep using its previous snapshot on `Err`
    /// (§4.6).
    pub fn poll(&mut self) -> anyhow::Result<Option<StaticPolicyFile>> {
        let current_mtime = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        if current_mtime == self.last_mtime {
            return Ok(None);
        }
        let (file, mtime) = read(&self.path)?;
        self.last_mtime = mtime;
        Ok(Some(file))
    }
}

fn read(path: &Path) -> anyhow::Result<(StaticPolicyFile, Option<SystemTime>)> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let file: StaticPolicyFile = serde_yaml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("failed to parse policy file {:?}: {e}", path))?;
            let mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
            Ok((file, mtime))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((StaticPolicyFile::default(), None)),
        Err(e) => Err(anyhow::anyhow!("failed to read policy file {:?}: {e}", path)),
    }
}
