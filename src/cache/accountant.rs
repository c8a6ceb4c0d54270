//! Size Accountant Module
//!
//! Caches the total occupied size of a backend. A full rescan means
//! enumerating every item, so refresh requests are coalesced: a burst of
//! requests inside the debounce window costs one rescan, plus at most one
//! more if a request lands while that rescan is running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use crate::backend::Backend;
use crate::error::{LockerError, Result};
use crate::locker_debug;
use crate::logger::Logger;

/// Quiet period before a requested rescan runs.
pub const DEFAULT_REFRESH_DEBOUNCE: Duration = Duration::from_millis(20);

// == Size Accountant ==
/// Cheaply cloneable handle to one backend's occupancy figure.
#[derive(Debug, Clone)]
pub struct SizeAccountant {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    /// Held weakly so a backend may keep this handle without a cycle
    backend: Weak<dyn Backend>,
    logger: Logger,
    debounce: Duration,
    buffer_size: AtomicU64,
    rescans: AtomicU64,
    schedule: Mutex<Schedule>,
    /// True while a refresh task is scheduled or running
    busy: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct Schedule {
    scheduled: bool,
    requested: bool,
}

impl SizeAccountant {
    pub fn new(backend: &Arc<dyn Backend>, logger: Logger) -> Self {
        Self::with_debounce(backend, logger, DEFAULT_REFRESH_DEBOUNCE)
    }

    pub fn with_debounce(backend: &Arc<dyn Backend>, logger: Logger, debounce: Duration) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                backend: Arc::downgrade(backend),
                logger,
                debounce,
                buffer_size: AtomicU64::new(0),
                rescans: AtomicU64::new(0),
                schedule: Mutex::new(Schedule::default()),
                busy,
            }),
        }
    }

    /// Last computed occupancy in bytes. Eventually consistent.
    pub fn buffer_size(&self) -> u64 {
        self.inner.buffer_size.load(Ordering::SeqCst)
    }

    /// Number of full rescans performed so far.
    pub fn rescans(&self) -> u64 {
        self.inner.rescans.load(Ordering::SeqCst)
    }

    // == Request Refresh ==
    /// Asks for a rescan without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn request_refresh(&self) {
        {
            let Ok(mut schedule) = self.inner.schedule.lock() else {
                return;
            };
            schedule.requested = true;
            if schedule.scheduled {
                return;
            }
            schedule.scheduled = true;
            self.inner.busy.send_replace(true);
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(inner.debounce).await;
                inner.take_request();

                if let Err(e) = inner.rescan().await {
                    warn!(parent: inner.logger.span(), error = %e, "size refresh failed, keeping last value");
                }

                if !inner.finish_or_repeat() {
                    break;
                }
            }
        });
    }

    // == Refresh Now ==
    /// Rescans immediately and returns the new occupancy.
    pub async fn refresh_now(&self) -> Result<u64> {
        self.inner.rescan().await
    }

    /// Waits until no requested refresh is pending, then returns the occupancy.
    pub async fn settled(&self) -> u64 {
        let mut busy = self.inner.busy.subscribe();
        // The sender lives in `inner`, so this only ends when idle
        let _ = busy.wait_for(|busy| !*busy).await;
        self.buffer_size()
    }
}

impl Inner {
    fn take_request(&self) {
        if let Ok(mut schedule) = self.schedule.lock() {
            schedule.requested = false;
        }
    }

    /// Returns true if another request arrived during the rescan.
    /// Otherwise marks the accountant idle.
    fn finish_or_repeat(&self) -> bool {
        let Ok(mut schedule) = self.schedule.lock() else {
            self.busy.send_replace(false);
            return false;
        };
        if schedule.requested {
            return true;
        }
        schedule.scheduled = false;
        self.busy.send_replace(false);
        false
    }

    async fn rescan(&self) -> Result<u64> {
        let backend = self
            .backend
            .upgrade()
            .ok_or_else(|| LockerError::Backend("backend dropped".to_string()))?;
        let total = backend
            .get_all_data()
            .await?
            .iter()
            .map(|item| item.size)
            .sum();
        self.buffer_size.store(total, Ordering::SeqCst);
        self.rescans.fetch_add(1, Ordering::SeqCst);
        locker_debug!(self.logger, buffer_size = total, "occupancy refreshed");
        Ok(total)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::cache::{CacheItem, ValueType};

    fn item(key: &str, size: u64) -> CacheItem {
        CacheItem {
            key: key.to_string(),
            value: "0".to_string(),
            value_type: ValueType::Number,
            expires: 0,
            auto_read_refresh: false,
            size,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn setup() -> (Arc<MemoryBackend>, SizeAccountant) {
        let backend = Arc::new(MemoryBackend::new());
        let dyn_backend: Arc<dyn Backend> = backend.clone();
        let accountant = SizeAccountant::new(&dyn_backend, Logger::new("test", false));
        (backend, accountant)
    }

    #[tokio::test]
    async fn test_refresh_now_sums_sizes() {
        let (backend, accountant) = setup();
        backend.set(item("a", 100)).await.unwrap();
        backend.set(item("b", 250)).await.unwrap();

        assert_eq!(accountant.refresh_now().await.unwrap(), 350);
        assert_eq!(accountant.buffer_size(), 350);
    }

    #[tokio::test]
    async fn test_burst_of_requests_coalesces() {
        let (backend, accountant) = setup();

        for i in 0..20u64 {
            backend.set(item(&format!("k{}", i), 10)).await.unwrap();
            accountant.request_refresh();
        }

        assert_eq!(accountant.settled().await, 200);
        // One rescan for the burst, at most one more for a late request
        assert!(accountant.rescans() <= 2, "rescans = {}", accountant.rescans());
        assert!(accountant.rescans() >= 1);
    }

    #[tokio::test]
    async fn test_later_request_sees_new_data() {
        let (backend, accountant) = setup();
        backend.set(item("a", 10)).await.unwrap();
        accountant.request_refresh();

        tokio::time::sleep(DEFAULT_REFRESH_DEBOUNCE * 2).await;
        backend.set(item("b", 5)).await.unwrap();
        accountant.request_refresh();

        assert_eq!(accountant.settled().await, 15);
    }

    #[tokio::test]
    async fn test_settled_without_requests_returns_immediately() {
        let (_backend, accountant) = setup();
        assert_eq!(accountant.settled().await, 0);
        assert_eq!(accountant.rescans(), 0);
    }

    #[tokio::test]
    async fn test_dropped_backend_keeps_last_value() {
        let (backend, accountant) = setup();
        backend.set(item("a", 42)).await.unwrap();
        accountant.refresh_now().await.unwrap();

        drop(backend);
        assert!(accountant.refresh_now().await.is_err());

        accountant.request_refresh();
        assert_eq!(accountant.settled().await, 42);
    }
}
