//! Options for the session engine.

use std::path::PathBuf;
use std::time::Duration;

use crate::expiry::ExpiryPolicy;

/// Default idle timeout: four hours.
pub const DEFAULT_TIMEOUT_SECS: u64 = 14_400;

/// Default maximum lifetime: one day.
pub const DEFAULT_LIFETIME_SECS: u64 = 86_400;

/// Default number of idle sessions kept in memory.
pub const DEFAULT_CACHE_LIMIT: usize = 128;

/// Upper bound on the cache limit.
pub const MAX_CACHE_LIMIT: usize = 4096;

/// Default period between background sweeps of expired files.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Directory holding one file per session.
    pub path: PathBuf,

    /// Cookie name callers use to carry the session id.
    pub name: String,

    /// Idle timeout in seconds. Zero disables it.
    pub timeout: u64,

    /// Lifetime in seconds since creation. Zero disables it.
    pub lifetime: u64,

    /// Soft capacity of the session cache. Zero disables caching.
    pub cache_limit: usize,

    /// Period of the background expiry sweep, if any.
    pub sweep_interval: Option<Duration>,
}

impl SessionOptions {
    /// Options for `path` with defaults for everything else.
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            timeout: DEFAULT_TIMEOUT_SECS,
            lifetime: DEFAULT_LIFETIME_SECS,
            cache_limit: DEFAULT_CACHE_LIMIT,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn with_lifetime(mut self, secs: u64) -> Self {
        self.lifetime = secs;
        self
    }

    /// Set the cache limit, clamped to [`MAX_CACHE_LIMIT`].
    pub fn with_cache_limit(mut self, limit: usize) -> Self {
        self.cache_limit = limit.min(MAX_CACHE_LIMIT);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Disable the periodic sweep; expired files are then only removed on request.
    pub fn without_sweep(mut self) -> Self {
        self.sweep_interval = None;
        self
    }

    pub fn policy(&self) -> ExpiryPolicy {
        ExpiryPolicy::new(self.lifetime, self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = SessionOptions::new("/var/lib/keeper", "SID");
        assert_eq!(opts.timeout, 14_400);
        assert_eq!(opts.lifetime, 86_400);
        assert_eq!(opts.cache_limit, 128);
        assert_eq!(opts.sweep_interval, Some(Duration::from_secs(60)));
        assert_eq!(opts.policy(), ExpiryPolicy::new(86_400, 14_400));
    }

    #[test]
    fn test_cache_limit_is_clamped() {
        let opts = SessionOptions::new("/tmp", "SID").with_cache_limit(1_000_000);
        assert_eq!(opts.cache_limit, MAX_CACHE_LIMIT);
        let opts = opts.with_cache_limit(0);
        assert_eq!(opts.cache_limit, 0);
    }

    #[test]
    fn test_builder() {
        let opts = SessionOptions::new("/tmp", "SID")
            .with_timeout(30)
            .with_lifetime(0)
            .without_sweep();
        assert_eq!(opts.policy(), ExpiryPolicy::new(0, 30));
        assert!(opts.sweep_interval.is_none());
    }
}
