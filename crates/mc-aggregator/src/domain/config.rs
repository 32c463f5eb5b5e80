//! # Aggregator Configuration
//!
//! Tunables consumed by the engine. The runtime fills them from CLI flags and
//! environment variables; tests use `Default` plus the `with_*` setters.

use crate::domain::errors::ConfigError;
use crate::domain::expiry::{ExpiryPolicy, FixedExpiry, HeaderExpiry};
use std::time::Duration;

/// Upper bound on any group timeout (24 hours).
pub const MAX_GROUP_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on concurrent workers.
pub const MAX_WORKER_POOL_SIZE: usize = 1024;

/// Upper bound on live groups.
pub const MAX_PENDING_GROUPS_LIMIT: usize = 1_000_000;

/// Configuration for the aggregation engine.
///
/// All values have sensible defaults for a single-process deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// How long a processed message id is remembered (default: 10 minutes).
    pub dedup_retention: Duration,

    /// Default group expiry, measured from group creation (default: 30 seconds).
    pub group_timeout: Duration,

    /// Header carrying a per-group timeout override in milliseconds.
    ///
    /// Read from the message that creates the group. `None` disables overrides.
    pub group_timeout_header: Option<String>,

    /// Maximum concurrent `submit` calls (default: 8).
    pub worker_pool_size: usize,

    /// Delay between expiry sweeps (default: 1 second).
    pub sweep_interval: Duration,

    /// Caller-side lock acquisition timeout. `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,

    /// Maximum number of live groups (default: 10 000).
    ///
    /// SECURITY: Bounds memory usage. New groups beyond the limit are discarded.
    pub max_pending_groups: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            dedup_retention: Duration::from_secs(10 * 60),
            group_timeout: Duration::from_secs(30),
            group_timeout_header: None,
            worker_pool_size: 8,
            sweep_interval: Duration::from_secs(1),
            lock_timeout: None,
            max_pending_groups: 10_000,
        }
    }
}

impl AggregatorConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dedup retention window.
    pub fn with_dedup_retention(mut self, retention: Duration) -> Self {
        self.dedup_retention = retention;
        self
    }

    /// Set the default group timeout.
    pub fn with_group_timeout(mut self, timeout: Duration) -> Self {
        self.group_timeout = timeout;
        self
    }

    /// Enable per-group timeout overrides read from a header.
    pub fn with_group_timeout_header(mut self, header: impl Into<String>) -> Self {
        self.group_timeout_header = Some(header.into());
        self
    }

    /// Set the worker pool size.
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the caller-side lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Set the live group limit.
    pub fn with_max_pending_groups(mut self, limit: usize) -> Self {
        self.max_pending_groups = limit;
        self
    }

    /// Check every setting against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("dedup_retention", self.dedup_retention),
            ("group_timeout", self.group_timeout),
            ("sweep_interval", self.sweep_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }

        if self.lock_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroDuration {
                field: "lock_timeout",
            });
        }

        if self.group_timeout > MAX_GROUP_TIMEOUT {
            return Err(ConfigError::OutOfRange {
                field: "group_timeout",
                value: duration_millis(self.group_timeout),
                max: duration_millis(MAX_GROUP_TIMEOUT),
            });
        }

        check_range("worker_pool_size", self.worker_pool_size, MAX_WORKER_POOL_SIZE)?;
        check_range(
            "max_pending_groups",
            self.max_pending_groups,
            MAX_PENDING_GROUPS_LIMIT,
        )?;

        if self
            .group_timeout_header
            .as_deref()
            .is_some_and(|h| h.trim().is_empty())
        {
            return Err(ConfigError::BlankHeader {
                field: "group_timeout_header",
            });
        }

        Ok(())
    }

    /// Build the expiry policy these settings describe.
    pub fn expiry_policy(&self) -> Box<dyn ExpiryPolicy> {
        let fixed = FixedExpiry::new(self.group_timeout);
        match &self.group_timeout_header {
            Some(header) => Box::new(HeaderExpiry::new(header.clone(), fixed, MAX_GROUP_TIMEOUT)),
            None => Box::new(fixed),
        }
    }
}

fn check_range(field: &'static str, value: usize, max: usize) -> Result<(), ConfigError> {
    if value == 0 || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value: value as u64,
            max: max as u64,
        });
    }
    Ok(())
}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
