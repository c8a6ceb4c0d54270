//! Cache Module
//!
//! Provides the locker engine: typed values under string keys with TTL
//! expiry, size-bounded eviction and background garbage collection.

mod accountant;
mod codec;
mod engine;
mod eviction;
mod item;
mod stats;


// Re-export public types
pub use accountant::{SizeAccountant, DEFAULT_REFRESH_DEBOUNCE};
pub use codec::{decode, encode, Value, ValueType};
pub use engine::{Locker, LockerBuilder, SetOptions};
pub use eviction::{clear_data_by_size, make_room, select_victims, Reclaimed};
pub use item::{namespace_prefix, qualified_key, CacheItem, DecodedItem, INTERNAL_PREFIX, KEY_DELIMITER};
pub use stats::CacheStats;

pub(crate) use engine::LockerState;
