//! Locker - an expiring key-value cache
//!
//! Stores typed values under string keys in a pluggable backend, with TTL
//! expiry, read-triggered refresh, size-bounded eviction of soon-to-expire
//! entries and a background sweep for entries that already expired.

pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod logger;
mod tasks;

pub use backend::{Backend, BackendInit, FileBackend, MemoryBackend, Operation};
pub use cache::{CacheItem, CacheStats, DecodedItem, Locker, LockerBuilder, SetOptions, Value, ValueType};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LockerConfig;
pub use error::{LockerError, Result};
pub use logger::{init_tracing, Logger};
