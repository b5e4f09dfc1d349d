//! Bounded LRU of resident sessions.
//!
//! Slots form a doubly linked recency list (head is most recent) and each
//! slot owns one cell in a hash chain. Chains are bucketed first by the class
//! of the id's first character, then by the id hash modulo capacity. Both
//! live in slab arenas so links are plain indices.
//!
//! A session stays resident while any caller holds it checked out; only idle
//! slots are eviction candidates, and a victim is saved to disk before it is
//! dropped.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::expiry::now;
use crate::pool::{Recycle, Slab};
use crate::record::{ID_CLASSES, SessionId, SessionState};
use crate::session::Session;
use crate::store::FileStore;

#[derive(Default)]
struct Slot {
    session: Option<Session>,
    cell: u32,
    prev: Option<u32>,
    next: Option<u32>,
    /// Outstanding check-outs.
    in_use: usize,
}

impl Recycle for Slot {
    fn recycle(&mut self) {
        *self = Self::default();
    }
}

#[derive(Default)]
struct Cell {
    slot: u32,
    bucket: usize,
    prev: Option<u32>,
    next: Option<u32>,
}

impl Recycle for Cell {
    fn recycle(&mut self) {
        *self = Self::default();
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Sessions currently resident.
    pub resident: usize,
    /// Configured soft capacity.
    pub capacity: usize,
    /// Resident sessions checked out by at least one caller.
    pub in_use: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Outcome of saving every resident session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub saved: usize,
    pub failed: usize,
}

struct Inner {
    slots: Slab<Slot>,
    cells: Slab<Cell>,
    /// Chain heads, `ID_CLASSES` groups of `per_class` buckets.
    buckets: Vec<Option<u32>>,
    per_class: usize,
    head: Option<u32>,
    tail: Option<u32>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    fn new(capacity: usize) -> Self {
        let per_class = capacity.max(1);
        Self {
            slots: Slab::with_capacity(capacity + 1),
            cells: Slab::with_capacity(capacity + 1),
            buckets: vec![None; ID_CLASSES * per_class],
            per_class,
            head: None,
            tail: None,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn bucket_of(&self, id: &SessionId) -> usize {
        id.class() * self.per_class + id.hash32() as usize % self.per_class
    }

    fn session(&self, idx: u32) -> Option<&Session> {
        self.slots.get(idx)?.session.as_ref()
    }

    fn find(&self, id: &SessionId) -> Option<u32> {
        let mut cursor = self.buckets[self.bucket_of(id)];
        while let Some(c) = cursor {
            let cell = self.cells.get(c)?;
            if self.session(cell.slot).is_some_and(|s| s.id() == *id) {
                return Some(cell.slot);
            }
            cursor = cell.next;
        }
        None
    }

    /// Slot indices from most to least recently used.
    fn iter_recent(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::successors(self.head, |&i| self.slots.get(i).and_then(|s| s.next))
    }

    /// Slot indices from least to most recently used.
    fn iter_stale(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::successors(self.tail, |&i| self.slots.get(i).and_then(|s| s.prev))
    }

    fn chain_insert(&mut self, slot: u32, bucket: usize) -> u32 {
        let c = self.cells.alloc();
        let first = self.buckets[bucket];
        if let Some(cell) = self.cells.get_mut(c) {
            cell.slot = slot;
            cell.bucket = bucket;
            cell.prev = None;
            cell.next = first;
        }
        if let Some(old) = first.and_then(|f| self.cells.get_mut(f)) {
            old.prev = Some(c);
        }
        self.buckets[bucket] = Some(c);
        c
    }

    fn chain_remove(&mut self, c: u32) {
        let Some(cell) = self.cells.get(c) else {
            return;
        };
        let (bucket, prev, next) = (cell.bucket, cell.prev, cell.next);
        match prev.and_then(|p| self.cells.get_mut(p)) {
            Some(p) => p.next = next,
            None => self.buckets[bucket] = next,
        }
        if let Some(n) = next.and_then(|n| self.cells.get_mut(n)) {
            n.prev = prev;
        }
        self.cells.free(c);
    }

    fn link_front(&mut self, idx: u32) {
        let old = self.head;
        if let Some(slot) = self.slots.get_mut(idx) {
            slot.prev = None;
            slot.next = old;
        }
        match old.and_then(|h| self.slots.get_mut(h)) {
            Some(h) => h.prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn unlink(&mut self, idx: u32) {
        let Some(slot) = self.slots.get(idx) else {
            return;
        };
        let (prev, next) = (slot.prev, slot.next);
        match prev.and_then(|p| self.slots.get_mut(p)) {
            Some(p) => p.next = next,
            None => self.head = next,
        }
        match next.and_then(|n| self.slots.get_mut(n)) {
            Some(n) => n.prev = prev,
            None => self.tail = prev,
        }
        if let Some(slot) = self.slots.get_mut(idx) {
            slot.prev = None;
            slot.next = None;
        }
    }

    fn move_to_front(&mut self, idx: u32) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.link_front(idx);
        }
    }

    fn attach(&mut self, session: Session) -> u32 {
        let bucket = self.bucket_of(&session.id());
        let idx = self.slots.alloc();
        let cell = self.chain_insert(idx, bucket);
        if let Some(slot) = self.slots.get_mut(idx) {
            slot.session = Some(session);
            slot.cell = cell;
            slot.in_use = 0;
        }
        self.link_front(idx);
        idx
    }

    fn detach(&mut self, idx: u32) -> Option<Session> {
        let cell = self.slots.get(idx)?.cell;
        self.unlink(idx);
        self.chain_remove(cell);
        let session = self.slots.get_mut(idx)?.session.take();
        self.slots.free(idx);
        session
    }
}

/// Resident sessions, bounded by a soft capacity.
pub struct SessionCache {
    capacity: usize,
    inner: Mutex<Inner>,
    store: Arc<FileStore>,
}

impl SessionCache {
    /// Create a cache holding up to `capacity` idle sessions. Zero disables it.
    pub fn new(capacity: usize, store: Arc<FileStore>) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner::new(capacity)),
            store,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is resident. Does not affect recency.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.is_enabled() && self.inner.lock().find(id).is_some()
    }

    /// Check out a resident session, marking it most recently used.
    pub fn lookup(&self, id: &SessionId) -> Option<Session> {
        if !self.is_enabled() {
            return None;
        }
        let mut inner = self.inner.lock();
        let Some(idx) = inner.find(id) else {
            inner.misses += 1;
            return None;
        };
        inner.move_to_front(idx);
        inner.hits += 1;

        let slot = inner.slots.get_mut(idx)?;
        slot.in_use += 1;
        let session = slot.session.clone()?;
        {
            let mut record = session.lock();
            record
                .state
                .remove(SessionState::CHANGED | SessionState::SAVED | SessionState::CREATED);
            record.state.insert(SessionState::CACHED);
            record.opened_at = now();
        }
        trace!(session_id = %id, "Cache hit");
        Some(session)
    }

    /// Check a session back in, or make it resident if it is not.
    ///
    /// Returns false only when the cache is disabled. A second handle for an
    /// id that is already resident replaces the resident one.
    pub fn insert_or_touch(&self, session: &Session) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let id = session.id();
        let mut inner = self.inner.lock();

        let back_ref = session.lock().slot;
        if let Some(slot) = back_ref.and_then(|idx| inner.slots.get_mut(idx)) {
            if slot.session.as_ref().is_some_and(|s| s.ptr_eq(session)) {
                slot.in_use = slot.in_use.saturating_sub(1);
                trace!(session_id = %id, in_use = slot.in_use, "Checked in cached session");
                return true;
            }
        }

        if let Some(idx) = inner.find(&id) {
            let replaced = inner
                .slots
                .get_mut(idx)
                .and_then(|slot| slot.session.replace(session.clone()));
            inner.move_to_front(idx);
            Self::mark_resident(session, idx);
            if let Some(old) = replaced {
                old.lock().slot = None;
                self.release(old);
            }
            debug!(session_id = %id, "Replaced resident session with newer handle");
            return true;
        }

        let idx = inner.attach(session.clone());
        Self::mark_resident(session, idx);
        trace!(session_id = %id, resident = inner.slots.len(), "Cached session");

        if inner.slots.len() > self.capacity {
            self.evict_one(&mut inner, idx);
        }
        true
    }

    fn mark_resident(session: &Session, idx: u32) {
        let mut record = session.lock();
        record.slot = Some(idx);
        record.state.insert(SessionState::CACHED);
    }

    fn release(&self, session: Session) {
        if let Some(record) = session.into_record() {
            self.store.pool().release(record);
        }
    }

    /// Save and drop the least recently used idle session other than `keep`.
    fn evict_one(&self, inner: &mut Inner, keep: u32) {
        let victim = inner
            .iter_stale()
            .find(|&i| i != keep && inner.slots.get(i).is_some_and(|s| s.in_use == 0));
        let Some(victim) = victim else {
            debug!(
                resident = inner.slots.len(),
                capacity = self.capacity,
                "Cache over capacity with no idle session to evict"
            );
            return;
        };
        let Some(session) = inner.session(victim).cloned() else {
            return;
        };

        {
            let mut record = session.lock();
            if let Err(e) = self.store.save(&record) {
                error!(
                    session_id = %record.id,
                    error = %e,
                    "Failed to save evicted session, keeping it resident"
                );
                return;
            }
            record.state.insert(SessionState::SAVED);
            record.state.remove(SessionState::CACHED);
            record.slot = None;
        }

        drop(inner.detach(victim));
        inner.evictions += 1;
        debug!(session_id = %session.id(), "Evicted session");
        self.release(session);
    }

    /// Save every resident session without evicting any.
    pub fn flush_all(&self) -> FlushReport {
        let inner = self.inner.lock();
        let mut report = FlushReport::default();

        for idx in inner.iter_recent() {
            let Some(session) = inner.session(idx) else {
                continue;
            };
            let mut record = session.lock();
            match self.store.save(&record) {
                Ok(()) => {
                    record.state.insert(SessionState::SAVED);
                    report.saved += 1;
                }
                Err(e) => {
                    warn!(session_id = %record.id, error = %e, "Failed to save cached session");
                    report.failed += 1;
                }
            }
        }

        if report.saved > 0 || report.failed > 0 {
            info!(saved = report.saved, failed = report.failed, "Flushed session cache");
        }
        report
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let in_use = inner
            .iter_recent()
            .filter(|&i| inner.slots.get(i).is_some_and(|s| s.in_use > 0))
            .count();
        CacheStats {
            resident: inner.slots.len(),
            capacity: self.capacity,
            in_use,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCache")
            .field("capacity", &self.capacity)
            .field("resident", &self.len())
            .finish()
    }
}
