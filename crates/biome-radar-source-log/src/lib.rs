//! biome-radar-source-log: game client log files as detector input.
//! Lists recent log files, binds each to the account that wrote it, and
//! scans the trailing window of a file for event records and disconnects.
//! The filesystem sits behind the [`LogSource`] trait.

pub mod discovery;
pub mod error;
pub mod record;
pub mod source;
pub mod tail;

pub use discovery::{LogBinding, discover_bindings, scan_candidates};
pub use error::LogSourceError;
pub use source::{FsLogSource, LogFileEntry, LogSource, default_log_dir};
pub use tail::{TailScan, parse_tail};
