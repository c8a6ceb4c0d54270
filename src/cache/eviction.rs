//! Eviction Policy Module
//!
//! Frees space ahead of a write that would exceed the capacity limit by
//! removing the items closest to expiring. Permanent items are never chosen.

use crate::backend::Backend;
use crate::cache::CacheItem;
use crate::error::{LockerError, Result};
use crate::locker_debug;
use crate::logger::Logger;

/// Outcome of an eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reclaimed {
    /// Bytes freed
    pub bytes: u64,
    /// Items removed
    pub items: usize,
}

// == Select Victims ==
/// Picks the items to evict to free `target` bytes.
///
/// Candidates are every item with a TTL, except `exclude`, ordered by
/// `updated_at + expires` ascending. Ties keep enumeration order. Items are
/// taken greedily until their sizes add up to `target`; the result may fall
/// short when there are not enough candidates.
pub fn select_victims(items: Vec<CacheItem>, target: u64, exclude: Option<&str>) -> Vec<CacheItem> {
    if target == 0 {
        return Vec::new();
    }
    let mut candidates: Vec<CacheItem> = items
        .into_iter()
        .filter(|item| !item.is_permanent() && Some(item.key.as_str()) != exclude)
        .collect();
    candidates.sort_by_key(|item| item.updated_at.saturating_add(item.expires));

    let mut freed = 0u64;
    candidates
        .into_iter()
        .take_while(|item| {
            let take = freed < target;
            freed = freed.saturating_add(item.size);
            take
        })
        .collect()
}

async fn evict(
    backend: &dyn Backend,
    items: Vec<CacheItem>,
    target: u64,
    exclude: Option<&str>,
) -> Result<Reclaimed> {
    let mut reclaimed = Reclaimed::default();
    for victim in select_victims(items, target, exclude) {
        backend.remove(&victim.key).await?;
        reclaimed.bytes += victim.size;
        reclaimed.items += 1;
    }
    Ok(reclaimed)
}

// == Clear Data By Size ==
/// Removes soonest-to-expire items until `target` bytes are freed, or no
/// candidates remain. Returns what was actually freed.
pub async fn clear_data_by_size(backend: &dyn Backend, target: u64) -> Result<Reclaimed> {
    if target == 0 {
        return Ok(Reclaimed::default());
    }
    let items = backend.get_all_data().await?;
    evict(backend, items, target, None).await
}

// == Make Room ==
/// Ensures `item` fits under `maximum` bytes, evicting if needed.
///
/// Occupancy is measured live from the backend, excluding the envelope that
/// `item` replaces. The accountant's cached figure lags recent writes, so it
/// is only reported to callers and never used to admit a write.
///
/// When eviction cannot free the overflow the write must not happen and
/// `CapacityExceeded` is returned; items already evicted by the attempt stay
/// evicted.
pub async fn make_room(
    backend: &dyn Backend,
    item: &CacheItem,
    maximum: u64,
    logger: &Logger,
) -> Result<Reclaimed> {
    if maximum == 0 {
        return Ok(Reclaimed::default());
    }

    let items = backend.get_all_data().await?;
    let live: u64 = items
        .iter()
        .filter(|other| other.key != item.key)
        .map(|other| other.size)
        .sum();
    let projected = live.saturating_add(item.size);
    if projected <= maximum {
        return Ok(Reclaimed::default());
    }

    let needed = projected - maximum;
    if item.size > maximum {
        return Err(LockerError::CapacityExceeded {
            requested: needed,
            reclaimed: 0,
        });
    }

    locker_debug!(logger, live, needed, maximum, "capacity exceeded, evicting");
    let reclaimed = evict(backend, items, needed, Some(&item.key)).await?;
    if reclaimed.bytes < needed {
        return Err(LockerError::CapacityExceeded {
            requested: needed,
            reclaimed: reclaimed.bytes,
        });
    }
    Ok(reclaimed)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::cache::ValueType;

    fn item(key: &str, size: u64, expires: u64, updated_at: u64) -> CacheItem {
        CacheItem {
            key: key.to_string(),
            value: "0".to_string(),
            value_type: ValueType::Number,
            expires,
            auto_read_refresh: false,
            size,
            created_at: updated_at,
            updated_at,
        }
    }

    async fn backend_with(items: Vec<CacheItem>) -> MemoryBackend {
        let backend = MemoryBackend::new();
        for item in items {
            backend.set(item).await.unwrap();
        }
        backend
    }

    async fn occupancy(backend: &MemoryBackend) -> u64 {
        backend
            .get_all_data()
            .await
            .unwrap()
            .iter()
            .map(|i| i.size)
            .sum()
    }

    fn logger() -> Logger {
        Logger::new("eviction", true)
    }

    #[test]
    fn test_select_orders_by_expiry_and_skips_permanent() {
        let items = vec![
            item("late", 100, 5_000, 0),
            item("forever", 100, 0, 0),
            item("soon", 100, 1_000, 0),
            item("middle", 100, 500, 1_000),
        ];
        let victims: Vec<String> = select_victims(items, 300, None)
            .into_iter()
            .map(|i| i.key)
            .collect();
        assert_eq!(victims, vec!["soon", "middle", "late"]);
    }

    #[test]
    fn test_select_stops_once_target_reached() {
        let items = vec![
            item("a", 100, 10, 0),
            item("b", 100, 20, 0),
            item("c", 100, 30, 0),
        ];
        let victims = select_victims(items, 150, None);
        assert_eq!(victims.len(), 2);
    }

    #[test]
    fn test_select_exact_target_takes_no_extra() {
        let items = vec![item("a", 100, 10, 0), item("b", 100, 20, 0)];
        assert_eq!(select_victims(items, 100, None).len(), 1);
    }

    #[test]
    fn test_select_ties_keep_enumeration_order() {
        let items = vec![item("first", 10, 100, 0), item("second", 10, 100, 0)];
        let victims = select_victims(items, 10, None);
        assert_eq!(victims[0].key, "first");
    }

    #[tokio::test]
    async fn test_clear_data_by_size_reports_reclaimed() {
        let backend = backend_with(vec![item("a", 100, 10, 0), item("b", 300, 0, 0)]).await;

        let reclaimed = clear_data_by_size(&backend, 1_000).await.unwrap();
        assert_eq!(reclaimed, Reclaimed { bytes: 100, items: 1 });
        assert!(backend.get("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unbounded_never_evicts() {
        let mut items = Vec::new();
        for i in 0..10 {
            items.push(item(&format!("k{}", i), 1_000, 10, 0));
        }
        let backend = backend_with(items).await;

        let incoming = item("new", 1_000, 10, 0);
        let reclaimed = make_room(&backend, &incoming, 0, &logger()).await.unwrap();
        assert_eq!(reclaimed, Reclaimed::default());
        assert_eq!(backend.len().await, 10);
    }

    #[tokio::test]
    async fn test_permanent_items_block_write() {
        let backend = backend_with(vec![
            item("p1", 1_000, 0, 0),
            item("p2", 1_000, 0, 0),
        ])
        .await;

        let incoming = item("ttl", 500, 1_000, 0);
        let result = make_room(&backend, &incoming, 1_500, &logger()).await;

        assert!(matches!(
            result,
            Err(LockerError::CapacityExceeded { reclaimed: 0, .. })
        ));
        assert_eq!(backend.len().await, 2);
    }

    #[tokio::test]
    async fn test_evicts_only_evictable_candidate() {
        let backend = backend_with(vec![
            item("ttl", 1_000, 100, 0),
            item("forever", 500, 0, 0),
        ])
        .await;

        let incoming = item("incoming", 600, 10_000, 50);
        let reclaimed = make_room(&backend, &incoming, 1_500, &logger()).await.unwrap();
        assert_eq!(reclaimed.bytes, 1_000);

        backend.set(incoming).await.unwrap();
        assert_eq!(occupancy(&backend).await, 1_100);
        assert!(backend.get("ttl").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replaced_item_is_not_counted_or_evicted() {
        let backend = backend_with(vec![item("same", 900, 100, 0), item("other", 100, 0, 0)]).await;

        // Rewriting "same" at the same size fits without eviction
        let rewrite = item("same", 900, 100, 10);
        let reclaimed = make_room(&backend, &rewrite, 1_000, &logger()).await.unwrap();
        assert_eq!(reclaimed, Reclaimed::default());
        assert!(backend.get("same").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_item_larger_than_capacity_fails_without_evicting() {
        let backend = backend_with(vec![item("ttl", 100, 10, 0)]).await;

        let huge = item("huge", 2_000, 10, 0);
        let result = make_room(&backend, &huge, 1_500, &logger()).await;
        assert!(matches!(result, Err(LockerError::CapacityExceeded { .. })));
        assert_eq!(backend.len().await, 1);
    }
}
