//! In-memory backend backed by a HashMap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::{Backend, BackendInit, Operation};
use crate::cache::CacheItem;
use crate::error::Result;
use crate::locker_debug;

/// Stores envelopes in process memory. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, CacheItem>>,
    destroyed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored envelopes, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn initialize(&self, init: BackendInit) -> Result<()> {
        self.destroyed.store(false, Ordering::SeqCst);
        let entries = self.len().await;
        locker_debug!(
            init.logger,
            maximum_bytes = init.maximum_bytes,
            entries,
            "memory backend initialized"
        );
        Ok(())
    }

    fn validate(&self, _operation: Operation) -> bool {
        !self.destroyed.load(Ordering::SeqCst)
    }

    async fn set(&self, item: CacheItem) -> Result<()> {
        self.entries.write().await.insert(item.key.clone(), item);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheItem>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn get_all_data(&self) -> Result<Vec<CacheItem>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        self.entries.write().await.clear();
        Ok(())
    }
}
