//! Error types for the log source.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogSourceError {
    #[error("log file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to list log directory {}: {source}", .dir.display())]
    List {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("log io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LogSourceError {
    /// Wrap an IO error for `path`, mapping `NotFound` to its own variant.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Io { path, source }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
