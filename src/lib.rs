//! Reassembles chunked telemetry reports from rotating rsyslog files.
//!
//! Managed devices stream telemetry through a syslog relay that splits each
//! report into numbered chunks and interleaves them across shared log files.
//! The agent discovers those files by glob, tails each one concurrently,
//! reassembles reports per device in chunk order, and persists every
//! completed report as a JSON artifact.

pub mod config;
pub mod output_writer;
pub mod parser;
pub mod reassembly;
pub mod tailer;
pub mod watcher;
