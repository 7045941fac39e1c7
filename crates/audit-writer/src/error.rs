use thiserror::Error;

/// Result type for audit writer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
///
/// None of these are fatal to the worker. Each one ends only the operation that
/// produced it.
#[derive(Debug, Error)]
pub enum Error {
    /// Entry could not be enqueued for a reason other than a full queue.
    #[error("unknown error adding entry to queue: {0}")]
    Enqueue(String),

    /// Failed to close a handle while releasing it from the cache.
    #[error("failed to close {path}: {source}")]
    Close {
        /// Destination whose handle failed to close.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration rejected by validation.
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    /// `start` was called outside of a tokio runtime.
    #[error("no tokio runtime available to spawn the writer worker")]
    NoRuntime,

    /// Failed to open a destination for append.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Destination that failed to open.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Queue is saturated and the entry was dropped.
    #[error("queue full while capacity is {capacity}")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// Unexpected fault caught while processing a single entry.
    #[error("unknown error in writer worker: {0}")]
    Unknown(String),

    /// Failed to write to an already-open handle.
    #[error("failed to write to {path}: {source}")]
    Write {
        /// Destination that failed to write.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}
