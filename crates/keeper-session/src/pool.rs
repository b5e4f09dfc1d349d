//! Free-list recycling for the structures churned on every request.
//!
//! [`Pool`] is a thread-safe idle list for values handed between threads
//! (session records). [`Slab`] is an index-addressed arena with its own free
//! list, used for the cache's slots and hash chain cells; it is not locked
//! and lives inside the cache's mutex.

use parking_lot::Mutex;

/// Default number of idle instances a pool keeps before dropping releases.
pub const DEFAULT_IDLE_LIMIT: usize = 4096;

/// Types that can be reset to a logically fresh state for reuse.
///
/// `recycle` must release anything the value owns that should not survive
/// into the next `acquire`, while keeping allocations worth reusing.
pub trait Recycle: Default {
    fn recycle(&mut self);
}

/// A mutex-guarded idle list of recycled `T` instances.
#[derive(Debug)]
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    limit: usize,
}

impl<T: Recycle> Pool<T> {
    /// Create an empty pool with the default idle limit.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_IDLE_LIMIT)
    }

    /// Create an empty pool keeping at most `limit` idle instances.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            limit,
        }
    }

    /// Create a pool pre-filled with `count` default instances.
    pub fn with_prefill(count: usize) -> Self {
        let pool = Self::with_limit(DEFAULT_IDLE_LIMIT.max(count));
        {
            let mut idle = pool.idle.lock();
            idle.reserve(count);
            idle.extend(std::iter::repeat_with(T::default).take(count));
        }
        pool
    }

    /// Take a recycled instance, or allocate a fresh one if none are idle.
    pub fn acquire(&self) -> T {
        self.idle.lock().pop().unwrap_or_default()
    }

    /// Reset `item` and return it to the idle list.
    pub fn release(&self, mut item: T) {
        item.recycle();
        let mut idle = self.idle.lock();
        if idle.len() < self.limit {
            idle.push(item);
        }
    }

    /// Number of instances currently idle.
    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }
}

impl<T: Recycle> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Index-addressed arena. Freed indices are recycled before the arena grows.
#[derive(Debug)]
pub struct Slab<T> {
    entries: Vec<T>,
    live: Vec<bool>,
    free: Vec<u32>,
}

impl<T: Recycle> Slab<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            live: Vec::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    /// Claim a slot, reusing a freed one when available.
    pub fn alloc(&mut self) -> u32 {
        if let Some(idx) = self.free.pop() {
            self.live[idx as usize] = true;
            return idx;
        }
        let idx = self.entries.len() as u32;
        self.entries.push(T::default());
        self.live.push(true);
        idx
    }

    /// Recycle the value at `idx` and make the index available again.
    ///
    /// Freeing an index that is not live is a no-op.
    pub fn free(&mut self, idx: u32) {
        let i = idx as usize;
        if !self.live.get(i).copied().unwrap_or(false) {
            return;
        }
        self.entries[i].recycle();
        self.live[i] = false;
        self.free.push(idx);
    }

    pub fn get(&self, idx: u32) -> Option<&T> {
        let i = idx as usize;
        if self.live.get(i).copied().unwrap_or(false) {
            self.entries.get(i)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, idx: u32) -> Option<&mut T> {
        let i = idx as usize;
        if self.live.get(i).copied().unwrap_or(false) {
            self.entries.get_mut(i)
        } else {
            None
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Scratch {
        buf: Vec<u8>,
        tag: u32,
    }

    impl Recycle for Scratch {
        fn recycle(&mut self) {
            self.buf.clear();
            self.tag = 0;
        }
    }

    #[test]
    fn test_acquire_prefers_released() {
        let pool: Pool<Scratch> = Pool::new();
        let mut item = pool.acquire();
        item.buf.extend_from_slice(b"hello");
        item.tag = 7;
        let cap = item.buf.capacity();
        pool.release(item);

        assert_eq!(pool.idle_len(), 1);
        let reused = pool.acquire();
        assert!(reused.buf.is_empty());
        assert_eq!(reused.tag, 0);
        assert_eq!(reused.buf.capacity(), cap);
        assert_eq!(pool.idle_len(), 0);
    }

    #[test]
    fn test_prefill_and_limit() {
        let pool: Pool<Scratch> = Pool::with_prefill(3);
        assert_eq!(pool.idle_len(), 3);

        let small: Pool<Scratch> = Pool::with_limit(1);
        small.release(Scratch::default());
        small.release(Scratch::default());
        assert_eq!(small.idle_len(), 1);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = std::sync::Arc::new(Pool::<Scratch>::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let mut s = pool.acquire();
                        s.tag = 1;
                        pool.release(s);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(pool.idle_len() <= 4);
    }

    #[test]
    fn test_slab_reuses_freed_indices() {
        let mut slab: Slab<Scratch> = Slab::with_capacity(4);
        let a = slab.alloc();
        let b = slab.alloc();
        slab.get_mut(a).unwrap().tag = 9;
        assert_eq!(slab.len(), 2);

        slab.free(a);
        assert!(slab.get(a).is_none());
        assert_eq!(slab.len(), 1);

        let c = slab.alloc();
        assert_eq!(c, a);
        assert_eq!(slab.get(c).unwrap().tag, 0);
        assert!(slab.get(b).is_some());

        // double free is ignored
        slab.free(b);
        slab.free(b);
        assert_eq!(slab.len(), 1);
    }
}
