//! Locker Engine Module
//!
//! The public cache surface: item lifecycle on top of a pluggable backend,
//! with TTL expiry, read-triggered refresh, capacity enforcement and a
//! background garbage collector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::backend::{Backend, BackendInit, Operation};
use crate::cache::accountant::SizeAccountant;
use crate::cache::codec::{self, Value};
use crate::cache::eviction::{self, Reclaimed};
use crate::cache::item::{namespace_prefix, qualified_key, CacheItem, DecodedItem, KEY_DELIMITER};
use crate::cache::stats::CacheStats;
use crate::clock::{Clock, SystemClock};
use crate::config::LockerConfig;
use crate::error::{LockerError, Result};
use crate::locker_debug;
use crate::logger::Logger;
use crate::tasks::{spawn_gc_task, GcHandle};

// == Set Options ==
/// Per-write overrides. `None` inherits from the existing item, then from
/// the locker's configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// TTL in milliseconds, `Some(0)` makes the item permanent
    pub expires: Option<u64>,
    pub auto_read_refresh: Option<bool>,
}

impl SetOptions {
    pub fn expires(expires_ms: u64) -> Self {
        Self {
            expires: Some(expires_ms),
            ..Self::default()
        }
    }

    pub fn permanent() -> Self {
        Self::expires(0)
    }

    pub fn with_auto_read_refresh(mut self, refresh: bool) -> Self {
        self.auto_read_refresh = Some(refresh);
        self
    }
}

// == Shared State ==
/// State shared between the locker and its garbage collector.
#[derive(Debug)]
pub(crate) struct LockerState {
    pub(crate) prefix: String,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) accountant: SizeAccountant,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) logger: Logger,
    stats: Mutex<CacheStats>,
}

impl LockerState {
    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    // == Clear Garbage ==
    /// Removes every expired item and returns what was freed.
    ///
    /// Occupancy is only rescanned when something was actually removed.
    pub(crate) async fn clear_garbage(&self) -> Result<Reclaimed> {
        let now = self.clock.now_ms();
        let expired: Vec<CacheItem> = self
            .backend
            .get_all_data()
            .await?
            .into_iter()
            .filter(|item| item.is_expired(now))
            .collect();

        let results = join_all(expired.iter().map(|item| self.backend.remove(&item.key))).await;

        let mut reclaimed = Reclaimed::default();
        for (item, result) in expired.iter().zip(results) {
            match result {
                Ok(()) => {
                    reclaimed.bytes += item.size;
                    reclaimed.items += 1;
                }
                Err(e) => {
                    warn!(parent: self.logger.span(), key = %item.key, error = %e, "failed to collect expired item");
                }
            }
        }

        self.record(|stats| stats.record_gc(reclaimed.items, reclaimed.bytes));
        if reclaimed.items > 0 {
            self.accountant.request_refresh();
        }
        Ok(reclaimed)
    }
}

// == Builder ==
/// Configures and starts a [`Locker`].
pub struct LockerBuilder {
    backend: Arc<dyn Backend>,
    config: LockerConfig,
    clock: Arc<dyn Clock>,
    on_created: Option<Box<dyn FnOnce() + Send>>,
}

impl LockerBuilder {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            config: LockerConfig::default(),
            clock: Arc::new(SystemClock),
            on_created: None,
        }
    }

    pub fn config(mut self, config: LockerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Called once, after the backend is initialized and GC has started.
    pub fn on_created(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_created = Some(Box::new(callback));
        self
    }

    // == Build ==
    /// Initializes the backend, measures occupancy and starts GC.
    pub async fn build(self) -> Result<Locker> {
        let config = self.config;
        config.validate()?;

        let logger = Logger::new(&config.locker_key, config.debug);
        let prefix = namespace_prefix(&config.locker_key);
        let accountant = SizeAccountant::new(&self.backend, logger.clone());

        self.backend
            .initialize(BackendInit {
                prefix: prefix.clone(),
                maximum_bytes: config.maximum_bytes,
                logger: logger.clone(),
                accountant: accountant.clone(),
            })
            .await?;
        let buffer_size = accountant.refresh_now().await?;
        locker_debug!(logger, buffer_size, maximum_bytes = config.maximum_bytes, "initial occupancy");

        let state = Arc::new(LockerState {
            prefix,
            backend: self.backend,
            accountant,
            clock: self.clock,
            logger,
            stats: Mutex::new(CacheStats::new()),
        });

        let gc = if config.clear_garbage_interval > 0 {
            Some(spawn_gc_task(
                state.clone(),
                Duration::from_millis(config.clear_garbage_interval),
            ))
        } else {
            None
        };

        if let Some(callback) = self.on_created {
            callback();
        }
        info!(parent: state.logger.span(), "locker ready");

        Ok(Locker {
            config,
            state,
            gc: Mutex::new(gc),
            destroyed: AtomicBool::new(false),
        })
    }
}

// == Locker ==
/// An expiring key-value cache over one storage backend.
///
/// All keys are namespaced by the configured `locker_key`, so several
/// lockers can share one storage medium.
#[derive(Debug)]
pub struct Locker {
    config: LockerConfig,
    state: Arc<LockerState>,
    gc: Mutex<Option<GcHandle>>,
    destroyed: AtomicBool,
}

impl Locker {
    /// Shorthand for `LockerBuilder::new(backend).config(config).build()`.
    pub async fn new(config: LockerConfig, backend: Arc<dyn Backend>) -> Result<Self> {
        LockerBuilder::new(backend).config(config).build().await
    }

    pub fn builder(backend: Arc<dyn Backend>) -> LockerBuilder {
        LockerBuilder::new(backend)
    }

    pub fn config(&self) -> &LockerConfig {
        &self.config
    }

    /// Namespace prefix of every stored key.
    pub fn prefix(&self) -> &str {
        &self.state.prefix
    }

    fn full_key(&self, key: &str) -> String {
        qualified_key(&self.state.prefix, key)
    }

    fn ensure_available(&self, operation: Operation) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(LockerError::Validation(format!(
                "{} called on a destroyed locker",
                operation
            )));
        }
        if !self.state.backend.validate(operation) {
            error!(parent: self.state.logger.span(), %operation, "operation not supported by backend");
            return Err(LockerError::Validation(format!(
                "backend does not support {}",
                operation
            )));
        }
        Ok(())
    }

    fn validate_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(LockerError::Validation("key must not be empty".to_string()));
        }
        let length = key.chars().count();
        if length > self.config.max_key_length {
            return Err(LockerError::Validation(format!(
                "key length {} exceeds maximum of {}",
                length, self.config.max_key_length
            )));
        }
        if key.contains(KEY_DELIMITER) {
            return Err(LockerError::Validation(format!(
                "key must not contain the delimiter '{}'",
                KEY_DELIMITER
            )));
        }
        Ok(())
    }

    // == Set Item ==
    /// Stores `value` under `key`.
    ///
    /// TTL and read-refresh come from `options`, else from the live item
    /// being replaced, else from the config defaults. `created_at` survives
    /// overwrites. Fails with `CapacityExceeded` when eviction cannot make
    /// the write fit; the previous value is then left in place.
    ///
    /// Writes to the same key are not serialized against each other: two
    /// concurrent calls may both inherit from the same previous item and the
    /// last write wins. Callers needing per-key ordering must provide it.
    pub async fn set_item(&self, key: &str, value: impl Into<Value>, options: SetOptions) -> Result<()> {
        self.validate_key(key)?;
        self.ensure_available(Operation::SetItem)?;

        let (value_type, encoded) = codec::encode(&value.into())?;
        let full_key = self.full_key(key);
        let now = self.state.clock.now_ms();
        let previous = self
            .state
            .backend
            .get(&full_key)
            .await?
            .filter(|item| !item.is_expired(now));

        let mut item = CacheItem {
            key: full_key,
            value: encoded,
            value_type,
            expires: options
                .expires
                .or(previous.as_ref().map(|p| p.expires))
                .unwrap_or(self.config.default_expires),
            auto_read_refresh: options
                .auto_read_refresh
                .or(previous.as_ref().map(|p| p.auto_read_refresh))
                .unwrap_or(self.config.auto_read_refresh),
            size: 0,
            created_at: previous.as_ref().map_or(now, |p| p.created_at),
            updated_at: now,
        };
        item.refresh_size()?;

        let reclaimed = eviction::make_room(
            self.state.backend.as_ref(),
            &item,
            self.config.maximum_bytes,
            &self.state.logger,
        )
        .await
        .inspect_err(|e| {
            warn!(parent: self.state.logger.span(), key, error = %e, "write rejected");
        })?;
        if reclaimed.items > 0 {
            self.state
                .record(|stats| stats.record_eviction(reclaimed.items, reclaimed.bytes));
        }

        locker_debug!(self.state.logger, key, size = item.size, expires = item.expires, "set item");
        self.state.backend.set(item).await?;
        self.state.accountant.request_refresh();
        Ok(())
    }

    /// Serializes any serde value and stores it.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: SetOptions) -> Result<()> {
        let value = Value::from_serialize(value)?;
        self.set_item(key, value, options).await
    }

    // == Get Item ==
    /// Returns the full decoded item for `key`.
    ///
    /// Expired items are deleted and reported as absent. A live item with
    /// `auto_read_refresh` is rewritten with `updated_at = now` first.
    pub async fn get_item_full(&self, key: &str) -> Result<Option<DecodedItem>> {
        self.ensure_available(Operation::GetItem)?;

        let Some(mut item) = self.state.backend.get(&self.full_key(key)).await? else {
            self.state.record(CacheStats::record_miss);
            locker_debug!(self.state.logger, key, "get item: not found");
            return Ok(None);
        };

        let now = self.state.clock.now_ms();
        if item.is_expired(now) {
            self.state.backend.remove(&item.key).await?;
            self.state.accountant.request_refresh();
            self.state.record(CacheStats::record_expired_read);
            locker_debug!(self.state.logger, key, "get item: expired");
            return Ok(None);
        }

        if item.auto_read_refresh {
            item.updated_at = now;
            item.refresh_size()?;
            self.state.backend.set(item.clone()).await?;
            self.state.accountant.request_refresh();
        }

        self.state.record(CacheStats::record_hit);
        locker_debug!(self.state.logger, key, "get item");
        item.decode().map(Some)
    }

    /// Returns the decoded value for `key`.
    pub async fn get_item(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get_item_full(key).await?.map(|item| item.value))
    }

    /// Reads `key` and deserializes it into `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_item(key).await? {
            Some(value) => value.deserialize_into().map(Some),
            None => Ok(None),
        }
    }

    // == Remove Item ==
    /// Deletes `key`. Removing a missing key is not an error.
    pub async fn remove_item(&self, key: &str) -> Result<()> {
        self.ensure_available(Operation::RemoveItem)?;
        self.state.backend.remove(&self.full_key(key)).await?;
        self.state.accountant.request_refresh();
        locker_debug!(self.state.logger, key, "remove item");
        Ok(())
    }

    // == Clear ==
    /// Deletes every item of this locker and returns how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        self.ensure_available(Operation::Clear)?;
        let items = self.state.backend.get_all_data().await?;
        try_join_all(items.iter().map(|item| self.state.backend.remove(&item.key))).await?;
        self.state.accountant.request_refresh();
        locker_debug!(self.state.logger, removed = items.len(), "clear all items");
        Ok(items.len())
    }

    /// Runs a garbage collection sweep now.
    pub async fn clear_garbage(&self) -> Result<Reclaimed> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(LockerError::Validation(
                "clearGarbage called on a destroyed locker".to_string(),
            ));
        }
        self.state.clear_garbage().await
    }

    // == Destroy ==
    /// Stops garbage collection and releases the backend. Idempotent.
    pub async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let gc = self.gc.lock().ok().and_then(|mut gc| gc.take());
        if let Some(mut gc) = gc {
            gc.shutdown().await;
        }
        self.state.backend.destroy().await?;
        info!(parent: self.state.logger.span(), "locker destroyed");
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Whether the garbage collector is running.
    pub fn gc_running(&self) -> bool {
        self.gc
            .lock()
            .map(|gc| gc.as_ref().is_some_and(|gc| !gc.is_finished()))
            .unwrap_or(false)
    }

    // == Occupancy ==
    /// Last known occupancy in bytes; may lag behind recent writes.
    pub fn buffer_size(&self) -> u64 {
        self.state.accountant.buffer_size()
    }

    /// Occupancy in bytes once pending refreshes have completed.
    pub async fn occupancy(&self) -> u64 {
        self.state.accountant.settled().await
    }

    pub fn stats(&self) -> CacheStats {
        self.state
            .stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }
}
