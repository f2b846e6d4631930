//! biome-radar-runtime: configuration, join verification and the command
//! handlers behind the `biome-radar` binary.

pub mod cli;
pub mod cmd_history;
pub mod cmd_scan;
pub mod cmd_verify;
pub mod cmd_watch;
pub mod config;
pub mod context;
pub mod join;
pub mod join_store;
pub mod lookup;
