//! The shared handle callers hold between `start` and `close`.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::record::{SessionId, SessionRecord, SessionState};
use crate::tree::{Node, Value};

struct Shared {
    id: SessionId,
    record: Mutex<SessionRecord>,
}

/// A live session.
///
/// Clones share the same record. The cache keeps one clone while the session
/// is resident; all field access goes through the per-session lock.
#[derive(Clone)]
pub struct Session(Arc<Shared>);

impl Session {
    pub(crate) fn new(record: SessionRecord) -> Self {
        Self(Arc::new(Shared {
            id: record.id,
            record: Mutex::new(record),
        }))
    }

    /// Take the record back if this is the last handle.
    pub(crate) fn into_record(self) -> Option<SessionRecord> {
        Arc::into_inner(self.0).map(|shared| shared.record.into_inner())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionRecord> {
        self.0.record.lock()
    }

    pub fn id(&self) -> SessionId {
        self.0.id
    }

    /// True if both handles refer to the same live session.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn created_at(&self) -> i64 {
        self.lock().created_at
    }

    pub fn opened_at(&self) -> i64 {
        self.lock().opened_at
    }

    /// Address the session is bound to, if it has been validated once.
    pub fn client(&self) -> Option<SocketAddr> {
        self.lock().client
    }

    pub fn user_id(&self) -> u32 {
        self.lock().user_id
    }

    pub fn set_user_id(&self, user_id: u32) {
        let mut record = self.lock();
        record.user_id = user_id;
        record.state.insert(SessionState::CHANGED);
    }

    /// Run `f` against the value tree.
    pub fn with_tree<R>(&self, f: impl FnOnce(&Node) -> R) -> R {
        f(&self.lock().tree)
    }

    fn update(&self, f: impl FnOnce(&mut Node) -> bool) -> bool {
        let mut record = self.lock();
        let applied = f(&mut record.tree);
        if applied {
            record.state.insert(SessionState::CHANGED);
        }
        applied
    }

    fn assign(&self, path: &str, value: Value) -> bool {
        self.update(|tree| tree.set(path, value))
    }

    // ───────────────────────────────────────────────────────────────────────
    // Setters. Each marks the session changed when the path resolves.
    // ───────────────────────────────────────────────────────────────────────

    pub fn set_bool(&self, path: &str, value: bool) -> bool {
        self.assign(path, Value::Bool(value))
    }

    pub fn set_int(&self, path: &str, value: i64) -> bool {
        self.assign(path, Value::Int(value))
    }

    pub fn set_double(&self, path: &str, value: f64) -> bool {
        self.assign(path, Value::Double(value))
    }

    pub fn set_string(&self, path: &str, value: &str) -> bool {
        self.assign(path, Value::String(value.to_string()))
    }

    pub fn set_blob(&self, path: &str, value: &[u8]) -> bool {
        self.assign(path, Value::Blob(value.to_vec()))
    }

    /// Store seconds since the epoch with an optional display format.
    pub fn set_timestamp(&self, path: &str, secs: i64, format: Option<&str>) -> bool {
        self.assign(
            path,
            Value::Timestamp {
                secs,
                format: format.map(str::to_string),
            },
        )
    }

    /// Graft a prepared subtree at `path`. The node keeps the path's key.
    pub fn set_node(&self, path: &str, node: Node) -> bool {
        self.assign(path, node.value)
    }

    /// Remove the node at `path`. Returns false if nothing was there.
    pub fn remove(&self, path: &str) -> bool {
        self.update(|tree| tree.remove(path).is_some())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Getters
    // ───────────────────────────────────────────────────────────────────────

    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        self.lock().tree.get_bool(path).unwrap_or(default)
    }

    pub fn get_int(&self, path: &str, default: i64) -> i64 {
        self.lock().tree.get_int(path).unwrap_or(default)
    }

    pub fn get_double(&self, path: &str, default: f64) -> f64 {
        self.lock().tree.get_double(path).unwrap_or(default)
    }

    pub fn get_string(&self, path: &str) -> Option<String> {
        self.lock().tree.get_str(path).map(str::to_string)
    }

    pub fn get_blob(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().tree.get_blob(path).map(<[u8]>::to_vec)
    }

    pub fn get_timestamp(&self, path: &str) -> Option<(i64, Option<String>)> {
        self.lock()
            .tree
            .get_timestamp(path)
            .map(|(secs, fmt)| (secs, fmt.map(str::to_string)))
    }

    /// Clone of the subtree at `path`.
    pub fn get_node(&self, path: &str) -> Option<Node> {
        self.lock().tree.get(path).cloned()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.0.id)
            .field("state", &self.state())
            .finish()
    }
}
