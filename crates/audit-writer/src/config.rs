//! Tunables for the audit log writer.

use crate::error::{Error, Result};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of entries the hand-off queue can hold.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default idle period after which a cached handle is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default extra wait on top of the idle timeout before a sweep runs.
pub const DEFAULT_MAINTENANCE_GRACE: Duration = Duration::from_secs(1);

/// Configuration for [`AuditLogWriter`](crate::AuditLogWriter).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct AuditLogWriterConfig {
    /// Maximum number of entries waiting for the worker.
    pub queue_capacity: usize,

    /// Handles idle for at least this long are evicted and closed.
    pub idle_timeout: Duration,

    /// Added to `idle_timeout` to get the worker's receive timeout. A sweep that runs
    /// after a timed-out wait therefore always sees handles that went idle before the
    /// wait started as expired.
    pub maintenance_grace: Duration,
}

impl Default for AuditLogWriterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            maintenance_grace: DEFAULT_MAINTENANCE_GRACE,
        }
    }
}

impl AuditLogWriterConfig {
    /// Create a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> AuditLogWriterConfigBuilder {
        AuditLogWriterConfigBuilder::default()
    }

    /// How long the worker waits for an entry before sweeping the cache.
    #[must_use]
    pub fn maintenance_interval(&self) -> Duration {
        self.idle_timeout + self.maintenance_grace
    }

    /// Check the config for values the writer cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the queue capacity or idle timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue_capacity must be non-zero"));
        }

        if self.idle_timeout.is_zero() {
            return Err(Error::InvalidConfig("idle_timeout must be non-zero"));
        }

        Ok(())
    }
}

/// Builder for [`AuditLogWriterConfig`].
#[derive(Debug, Default)]
pub struct AuditLogWriterConfigBuilder {
    config: AuditLogWriterConfig,
}

impl AuditLogWriterConfigBuilder {
    /// Set the queue capacity.
    #[must_use]
    pub const fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set the idle timeout for cached handles.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the grace period added to the idle timeout for the receive wait.
    #[must_use]
    pub const fn maintenance_grace(mut self, grace: Duration) -> Self {
        self.config.maintenance_grace = grace;
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> AuditLogWriterConfig {
        self.config
    }
}
