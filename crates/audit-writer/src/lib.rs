//! Non-blocking audit log writer.
//!
//! Producers hand off `(path, line)` pairs to a bounded queue. A single background
//! worker drains the queue in order and appends each line to the file at its path,
//! keeping recently used files open in a cache that closes handles once they have gone
//! unwritten for a configurable idle period.
//!
//! Producers never block. If the queue is full the line is dropped and the failure is
//! logged and counted. Failures on one destination never affect the others.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod cache;
mod config;
mod error;
pub mod memory;
mod opener;
mod stats;
mod worker;
mod writer;

pub use cache::HandleCache;
pub use config::{
    AuditLogWriterConfig, AuditLogWriterConfigBuilder, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_MAINTENANCE_GRACE, DEFAULT_QUEUE_CAPACITY,
};
pub use error::{Error, Result};
pub use opener::{AppendHandle, AppendOpener, FsHandle, FsOpener};
pub use stats::{StatsSnapshot, WriterStats};
pub use worker::LINE_SEPARATOR;
pub use writer::{AuditLogWriter, LogEntry};
