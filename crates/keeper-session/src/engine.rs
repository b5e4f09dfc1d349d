//! Session lifecycle: start, validate, close.
//!
//! [`SessionEngine`] owns the record pool, the file store and the cache. It
//! is built once at startup, shared behind an `Arc`, and every request-path
//! operation takes `&self`.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{CacheStats, FlushReport, SessionCache};
use crate::config::SessionOptions;
use crate::error::Result;
use crate::expiry::now;
use crate::pool::Pool;
use crate::record::{SessionId, SessionRecord, SessionState};
use crate::session::Session;
use crate::store::FileStore;
use crate::sweeper::{self, SweepReport};

/// Shared session context for all worker threads.
#[derive(Debug)]
pub struct SessionEngine {
    options: SessionOptions,
    store: Arc<FileStore>,
    cache: SessionCache,
}

impl SessionEngine {
    /// Validate the session directory and build the engine.
    ///
    /// Fails with [`Error::Directory`](crate::Error::Directory) if the
    /// directory is missing, not a directory, or not writable.
    pub fn new(options: SessionOptions) -> Result<Self> {
        let pool = Arc::new(Pool::with_prefill(options.cache_limit));
        let store = Arc::new(FileStore::open(&options.path, options.policy(), pool)?);
        let cache = SessionCache::new(options.cache_limit, store.clone());

        info!(
            path = %options.path.display(),
            name = %options.name,
            cache_limit = options.cache_limit,
            timeout = options.timeout,
            lifetime = options.lifetime,
            "Session engine initialized"
        );

        Ok(Self {
            options,
            store,
            cache,
        })
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Cookie name configured for session ids.
    pub fn session_name(&self) -> &str {
        &self.options.name
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.is_enabled()
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Create a session. A valid `id` is kept, anything else gets a fresh one.
    pub fn new_session(&self, id: Option<&str>) -> Session {
        let mut record: SessionRecord = self.store.pool().acquire();
        record.id = id
            .and_then(|raw| SessionId::parse(raw).ok())
            .unwrap_or_else(SessionId::generate);
        let now = now();
        record.created_at = now;
        record.opened_at = now;
        record.timeout = self.options.timeout as i64;
        record.lifetime = self.options.lifetime as i64;
        record.state = SessionState::CREATED;
        debug!(session_id = %record.id, "Created session");
        Session::new(record)
    }

    /// Resume the session named by `id` from the cache or disk, or create a
    /// new one under a fresh id.
    pub fn start(&self, id: Option<&str>) -> Session {
        let Some(id) = id.and_then(|raw| SessionId::parse(raw).ok()) else {
            return self.new_session(None);
        };

        if let Some(session) = self.cache.lookup(&id) {
            return session;
        }
        if let Some(record) = self.store.load(&id) {
            return Session::new(record);
        }
        self.new_session(None)
    }

    /// Hand a session back at the end of a request.
    pub fn close(&self, session: Session) {
        let state = session.state();

        if !self.cache.is_enabled() {
            if state.contains(SessionState::CHANGED) {
                let mut record = session.lock();
                match self.store.save(&record) {
                    Ok(()) => record.state.insert(SessionState::SAVED),
                    Err(e) => {
                        warn!(session_id = %record.id, error = %e, "Failed to save session on close");
                    }
                }
            }
            self.free(session);
            return;
        }

        if state.contains(SessionState::CHANGED) || state.contains(SessionState::CACHED) {
            self.cache.insert_or_touch(&session);
        } else {
            self.free(session);
        }
    }

    /// Return the record to the pool if this is the last handle.
    pub fn free(&self, session: Session) {
        if let Some(record) = session.into_record() {
            self.store.pool().release(record);
        }
    }

    /// Bind a freshly created session to `addr` and `user_agent`, or check
    /// that an existing one was bound to the same IP and user agent.
    ///
    /// The full address is stored, but only the IP is compared: clients
    /// reconnect from new source ports.
    pub fn is_valid_client(&self, session: &Session, addr: SocketAddr, user_agent: u32) -> bool {
        let mut record = session.lock();
        if record.state.contains(SessionState::CREATED) {
            record.client = Some(addr);
            record.user_agent = user_agent;
            return true;
        }
        let valid =
            record.client.map(|c| c.ip()) == Some(addr.ip()) && record.user_agent == user_agent;
        if !valid {
            debug!(session_id = %record.id, client = %addr, "Session presented by a different client");
        }
        valid
    }

    /// Remove the session file for `id`. Invalid ids are rejected.
    pub fn delete_file(&self, id: &str) -> bool {
        match SessionId::parse(id) {
            Ok(id) => self.store.delete(&id),
            Err(e) => {
                debug!(error = %e, "Refusing to delete session file");
                false
            }
        }
    }

    /// Save every resident session to disk.
    pub fn cache_save_all(&self) -> FlushReport {
        self.cache.flush_all()
    }

    /// Remove expired session files.
    pub fn delete_expired(&self) -> SweepReport {
        sweeper::delete_expired(&self.store)
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Checkpoint the cache before the process exits.
    pub fn shutdown(&self) -> FlushReport {
        let report = self.cache_save_all();
        info!(saved = report.saved, failed = report.failed, "Session engine shut down");
        report
    }
}
