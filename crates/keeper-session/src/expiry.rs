//! Lifetime and idle-timeout checks.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::record::SessionRecord;

/// Current time in whole seconds since the epoch.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Seconds since the epoch for a filesystem timestamp.
pub(crate) fn epoch_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// Expiry limits in seconds. A zero limit is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpiryPolicy {
    /// Maximum age since creation.
    pub lifetime: u64,
    /// Maximum idle time since last open.
    pub timeout: u64,
}

impl ExpiryPolicy {
    pub fn new(lifetime: u64, timeout: u64) -> Self {
        Self { lifetime, timeout }
    }

    /// A policy under which nothing expires.
    pub fn never() -> Self {
        Self::default()
    }

    fn exceeds(limit: u64, since: i64, now: i64) -> bool {
        limit > 0 && now.saturating_sub(since) > i64::try_from(limit).unwrap_or(i64::MAX)
    }

    /// True if a session created at `created_at` and last opened at
    /// `opened_at` is past either limit at `now`.
    pub fn is_expired_at(&self, created_at: i64, opened_at: i64, now: i64) -> bool {
        Self::exceeds(self.lifetime, created_at, now) || Self::exceeds(self.timeout, opened_at, now)
    }

    pub fn record_expired_at(&self, record: &SessionRecord, now: i64) -> bool {
        self.is_expired_at(record.created_at, record.opened_at, now)
    }

    /// Sweep check: both limits are measured from the file's mtime.
    pub fn file_expired_at(&self, mtime: i64, now: i64) -> bool {
        self.is_expired_at(mtime, mtime, now)
    }
}
