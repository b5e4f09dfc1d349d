//! Session storage for Keeper.
//!
//! Sessions carry a small fixed record (id, client binding, timestamps) plus
//! a typed value tree. This crate provides:
//! - A sharded LRU cache of resident sessions with check-out counting
//! - One binary file per session, validated on every load
//! - Lifetime and idle-timeout expiry, with a sweep for stale files
//! - A background thread for sweeps and cache checkpoints
//!
//! # Example
//!
//! ```rust,ignore
//! use keeper_session::{SessionEngine, SessionOptions};
//!
//! let engine = SessionEngine::new(SessionOptions::new("/var/lib/keeper", "SID"))?;
//!
//! let session = engine.start(cookie.as_deref());
//! if engine.is_valid_client(&session, peer_addr, ua_hash) {
//!     session.set_int("cart/items", 3);
//! }
//! engine.close(session);
//! ```

pub mod codec;
pub mod store;
pub mod tree;

mod cache;
mod config;
mod engine;
mod error;
mod expiry;
mod jobs;
mod pool;
mod record;
mod session;
mod sweeper;

pub use cache::{CacheStats, FlushReport, SessionCache};
pub use config::{
    DEFAULT_CACHE_LIMIT, DEFAULT_LIFETIME_SECS, DEFAULT_SWEEP_INTERVAL, DEFAULT_TIMEOUT_SECS,
    MAX_CACHE_LIMIT, SessionOptions,
};
pub use engine::SessionEngine;
pub use error::{Error, Result};
pub use expiry::{ExpiryPolicy, now};
pub use jobs::{DEFAULT_SHUTDOWN_TIMEOUT, Job, JobWorker, ShutdownOutcome};
pub use pool::{Pool, Recycle, Slab};
pub use record::{ID_LEN, RECORD_SIZE, SessionId, SessionRecord, SessionState, is_valid_id};
pub use session::Session;
pub use store::FileStore;
pub use sweeper::{SweepReport, delete_expired, preview_expired};
pub use tree::{Node, Tag, Value};
