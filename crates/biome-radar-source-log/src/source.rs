//! LogSource trait and FsLogSource (directory-backed implementation).
//! The trait is the IO boundary so detector logic can run against fakes.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::LogSourceError;

/// A log file in the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileEntry {
    pub path: PathBuf,
    pub modified_at: DateTime<Utc>,
}

/// Read access to the game client's log files.
pub trait LogSource: Send + Sync {
    /// All regular files that may be client logs, newest first.
    fn list_candidate_files(&self) -> Result<Vec<LogFileEntry>, LogSourceError>;

    /// Up to `max_bytes` from the start of the file.
    fn read_head(&self, path: &Path, max_bytes: u64) -> Result<Vec<u8>, LogSourceError>;

    /// Up to the last `max_bytes` of the file.
    fn read_tail(&self, path: &Path, max_bytes: u64) -> Result<Vec<u8>, LogSourceError>;
}

impl<T: LogSource + ?Sized> LogSource for &T {
    fn list_candidate_files(&self) -> Result<Vec<LogFileEntry>, LogSourceError> {
        (**self).list_candidate_files()
    }

    fn read_head(&self, path: &Path, max_bytes: u64) -> Result<Vec<u8>, LogSourceError> {
        (**self).read_head(path, max_bytes)
    }

    fn read_tail(&self, path: &Path, max_bytes: u64) -> Result<Vec<u8>, LogSourceError> {
        (**self).read_tail(path, max_bytes)
    }
}

/// Default client log directory: `<home>/AppData/Local/Roblox/logs`.
pub fn default_log_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .map(|home| {
            PathBuf::from(home)
                .join("AppData")
                .join("Local")
                .join("Roblox")
                .join("logs")
        })
}

/// Log source reading plain files from one directory (non-recursive).
#[derive(Debug, Clone)]
pub struct FsLogSource {
    log_dir: PathBuf,
}

impl FsLogSource {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

impl LogSource for FsLogSource {
    fn list_candidate_files(&self) -> Result<Vec<LogFileEntry>, LogSourceError> {
        let read_dir = std::fs::read_dir(&self.log_dir).map_err(|source| LogSourceError::List {
            dir: self.log_dir.clone(),
            source,
        })?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(dir = %self.log_dir.display(), error = %e, "skipping unreadable dir entry");
                    continue;
                }
            };
            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "skipping entry without metadata");
                    continue;
                }
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            entries.push(LogFileEntry {
                path: entry.path(),
                modified_at: DateTime::<Utc>::from(modified),
            });
        }

        entries.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then(a.path.cmp(&b.path)));
        Ok(entries)
    }

    fn read_head(&self, path: &Path, max_bytes: u64) -> Result<Vec<u8>, LogSourceError> {
        let file = File::open(path).map_err(|e| LogSourceError::io(path, e))?;
        let mut buf = Vec::new();
        file.take(max_bytes)
            .read_to_end(&mut buf)
            .map_err(|e| LogSourceError::io(path, e))?;
        Ok(buf)
    }

    fn read_tail(&self, path: &Path, max_bytes: u64) -> Result<Vec<u8>, LogSourceError> {
        let mut file = File::open(path).map_err(|e| LogSourceError::io(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| LogSourceError::io(path, e))?
            .len();
        let start = len.saturating_sub(max_bytes);
        file.seek(SeekFrom::Start(start))
            .map_err(|e| LogSourceError::io(path, e))?;

        let mut buf = Vec::new();
        file.take(max_bytes)
            .read_to_end(&mut buf)
            .map_err(|e| LogSourceError::io(path, e))?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn read_tail_returns_last_bytes_only() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("client.log");
        fs::write(&path, "0123456789").expect("test");

        let source = FsLogSource::new(dir.path());
        assert_eq!(source.read_tail(&path, 4).expect("test"), b"6789");
        assert_eq!(source.read_tail(&path, 100).expect("test"), b"0123456789");
    }

    #[test]
    fn read_head_returns_first_bytes_only() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("client.log");
        fs::write(&path, "0123456789").expect("test");

        let source = FsLogSource::new(dir.path());
        assert_eq!(source.read_head(&path, 3).expect("test"), b"012");
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let dir = tempfile::tempdir().expect("test");
        let source = FsLogSource::new(dir.path());
        let err = source
            .read_tail(&dir.path().join("nope.log"), 16)
            .expect_err("missing file");
        assert!(err.is_not_found());
    }

    #[test]
    fn list_skips_directories() {
        let dir = tempfile::tempdir().expect("test");
        fs::write(dir.path().join("a.log"), "a").expect("test");
        fs::create_dir(dir.path().join("nested")).expect("test");

        let source = FsLogSource::new(dir.path());
        let files = source.list_candidate_files().expect("test");
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("a.log"));
    }

    #[test]
    fn list_missing_dir_is_an_error() {
        let source = FsLogSource::new("/nonexistent/biome-radar-logs");
        assert!(matches!(
            source.list_candidate_files(),
            Err(LogSourceError::List { .. })
        ));
    }

    #[test]
    fn blanket_ref_impl() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("client.log");
        fs::write(&path, "abc").expect("test");

        let source = FsLogSource::new(dir.path());
        let r: &FsLogSource = &source;
        assert_eq!(r.read_head(&path, 8).expect("ok"), b"abc");
    }
}
