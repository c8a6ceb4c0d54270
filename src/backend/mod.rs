//! Storage Backend Module
//!
//! The capability contract every storage medium satisfies, plus the
//! in-memory and file-system implementations.
//!
//! Backends are plain key/value stores of [`CacheItem`] envelopes. Expiry,
//! eviction and size accounting all live in the engine, so every backend
//! gets the same capacity policy.

mod file;
mod memory;

use std::fmt;

use async_trait::async_trait;

use crate::cache::{CacheItem, SizeAccountant};
use crate::error::Result;
use crate::logger::Logger;

pub use file::FileBackend;
pub use memory::MemoryBackend;

// == Operation ==
/// Engine operations whose availability a backend reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SetItem,
    GetItem,
    RemoveItem,
    Clear,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::SetItem => "setItem",
            Operation::GetItem => "getItem",
            Operation::RemoveItem => "removeItem",
            Operation::Clear => "clear",
        };
        f.write_str(name)
    }
}

// == Initialization ==
/// Everything a backend receives when its engine starts.
#[derive(Debug, Clone)]
pub struct BackendInit {
    /// Namespace prefix shared by every key this engine writes
    pub prefix: String,
    /// Capacity limit in bytes, 0 = unbounded
    pub maximum_bytes: u64,
    /// The owning engine's logger
    pub logger: Logger,
    /// Handle for requesting an occupancy rescan
    pub accountant: SizeAccountant,
}

// == Backend Trait ==
/// A pluggable storage medium.
///
/// Every method may suspend on I/O. `remove` must be idempotent and
/// `get_all_data` must only return items under the engine's prefix.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Backend-specific setup, called once before any other operation.
    async fn initialize(&self, init: BackendInit) -> Result<()>;

    /// Whether `operation` is supported right now.
    fn validate(&self, operation: Operation) -> bool;

    /// Stores `item` under `item.key`, replacing any previous envelope.
    async fn set(&self, item: CacheItem) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<CacheItem>>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Every item owned by this engine. May be expensive.
    async fn get_all_data(&self) -> Result<Vec<CacheItem>>;

    /// Releases the medium. Must be safe to call more than once.
    async fn destroy(&self) -> Result<()>;
}
