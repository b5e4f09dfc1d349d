//! Removal of expired session files.
//!
//! The sweep trusts only the filesystem: a file's mtime is its last save,
//! and any file that cannot be stat'ed is treated as garbage.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::expiry::{epoch_secs, now};
use crate::record::is_valid_id;
use crate::store::FileStore;

/// Outcome of one pass over the session directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Session files examined.
    pub scanned: usize,
    /// Files removed (or that would be, on a dry run).
    pub deleted: usize,
    /// Expired files that could not be removed.
    pub failed: usize,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

/// Delete every expired session file in the store's directory.
pub fn delete_expired(store: &FileStore) -> SweepReport {
    sweep_at(store, now(), false)
}

/// Report what [`delete_expired`] would remove without touching anything.
pub fn preview_expired(store: &FileStore) -> SweepReport {
    sweep_at(store, now(), true)
}

pub(crate) fn sweep_at(store: &FileStore, now: i64, dry_run: bool) -> SweepReport {
    let mut report = SweepReport {
        dry_run,
        ..Default::default()
    };
    let policy = store.policy();

    let entries = match fs::read_dir(store.dir()) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %store.dir().display(), error = %e, "Failed to read session directory");
            return report;
        }
    };

    for entry in entries.flatten() {
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str().filter(|n| is_valid_id(n)) else {
            continue;
        };
        report.scanned += 1;

        let expired = match entry.metadata().and_then(|m| m.modified()) {
            Ok(mtime) => policy.file_expired_at(epoch_secs(mtime), now),
            Err(e) => {
                debug!(session_id = name, error = %e, "Cannot stat session file");
                true
            }
        };
        if !expired {
            continue;
        }

        if dry_run {
            report.deleted += 1;
            continue;
        }

        match remove_if_expired(store, &entry.path(), now) {
            Removal::Deleted => {
                debug!(session_id = name, "Deleted expired session file");
                report.deleted += 1;
            }
            Removal::Refreshed => {
                debug!(session_id = name, "Session file was saved during the sweep, keeping it");
            }
            Removal::Gone => {}
            Removal::Failed(e) => {
                warn!(session_id = name, error = %e, "Failed to delete expired session file");
                report.failed += 1;
            }
        }
    }

    if report.deleted > 0 || report.failed > 0 {
        info!(
            scanned = report.scanned,
            deleted = report.deleted,
            failed = report.failed,
            dry_run,
            "Expired session sweep finished"
        );
    }
    report
}

#[derive(Debug)]
pub(crate) enum Removal {
    Deleted,
    /// Saved again since the scan looked at it.
    Refreshed,
    /// Already removed by someone else.
    Gone,
    Failed(io::Error),
}

/// Re-check `path` and unlink it while holding the store I/O lock, so a save
/// that lands between the scan and the unlink is never deleted.
pub(crate) fn remove_if_expired(store: &FileStore, path: &Path, now: i64) -> Removal {
    let _io = store.lock_io();
    let expired = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(mtime) => store.policy().file_expired_at(epoch_secs(mtime), now),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Removal::Gone,
        Err(_) => true,
    };
    if !expired {
        return Removal::Refreshed;
    }
    match fs::remove_file(path) {
        Ok(()) => Removal::Deleted,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Removal::Gone,
        Err(e) => Removal::Failed(e),
    }
}
