//! File-system backend: one JSON envelope per file.
//!
//! Entries survive process restarts. Several lockers may share a directory;
//! each only sees envelopes whose key starts with its own namespace prefix.
//! Files are named by the SHA-256 digest of the key, so any valid key maps
//! to a fixed-length file name.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::backend::{Backend, BackendInit, Operation};
use crate::cache::{CacheItem, KEY_DELIMITER};
use crate::error::{LockerError, Result};
use crate::locker_debug;
use crate::logger::Logger;

const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Stores envelopes as files in a directory.
#[derive(Debug)]
pub struct FileBackend {
    directory: PathBuf,
    /// Optional limit on the bytes this namespace may occupy on disk
    quota_bytes: Option<u64>,
    state: RwLock<Option<Scope>>,
    /// Set by `initialize`, cleared by `destroy` or when the directory vanishes
    ready: AtomicBool,
}

#[derive(Debug, Clone)]
struct Scope {
    prefix: String,
    logger: Logger,
}

/// An envelope read from disk and its size on disk.
struct Entry {
    item: CacheItem,
    bytes: u64,
}

impl FileBackend {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            quota_bytes: None,
            state: RwLock::new(None),
            ready: AtomicBool::new(false),
        }
    }

    /// Rejects writes once the namespace would exceed `quota_bytes` on disk,
    /// independently of the engine's own capacity limit.
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn scope(&self) -> Result<Scope> {
        self.state
            .read()
            .map_err(|e| LockerError::Backend(e.to_string()))?
            .clone()
            .ok_or_else(|| LockerError::Backend("file backend not initialized".to_string()))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.directory
            .join(format!("{}.{}", hex::encode(digest), ENTRY_EXTENSION))
    }

    /// Marks the backend unavailable when the directory itself is gone.
    fn check_io(&self, err: std::io::Error) -> LockerError {
        if err.kind() == ErrorKind::NotFound {
            self.ready.store(false, Ordering::SeqCst);
        }
        err.into()
    }

    async fn read_entry(&self, path: &Path, logger: &Logger) -> Result<Option<Entry>> {
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<CacheItem>(&text) {
            Ok(item) => Ok(Some(Entry {
                item,
                bytes: text.len() as u64,
            })),
            Err(e) => {
                warn!(parent: logger.span(), path = %path.display(), error = %e, "skipping corrupt entry");
                Ok(None)
            }
        }
    }

    /// Every readable envelope under this namespace.
    async fn namespace_entries(&self, scope: &Scope) -> Result<Vec<Entry>> {
        let owned = format!("{}{}", scope.prefix, KEY_DELIMITER);
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.directory)
            .await
            .map_err(|e| self.check_io(e))?;
        while let Some(dir_entry) = dir.next_entry().await? {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if let Some(entry) = self.read_entry(&path, &scope.logger).await? {
                if entry.item.key.starts_with(&owned) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    async fn check_quota(&self, item: &CacheItem, scope: &Scope, incoming: u64) -> Result<()> {
        let Some(quota) = self.quota_bytes else {
            return Ok(());
        };
        let used: u64 = self
            .namespace_entries(scope)
            .await?
            .iter()
            .filter(|entry| entry.item.key != item.key)
            .map(|entry| entry.bytes)
            .sum();
        if used + incoming > quota {
            return Err(LockerError::Backend(format!(
                "disk quota of {} bytes exceeded ({} used, {} incoming)",
                quota, used, incoming
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn initialize(&self, init: BackendInit) -> Result<()> {
        fs::create_dir_all(&self.directory).await?;
        let scope = Scope {
            prefix: init.prefix.clone(),
            logger: init.logger.clone(),
        };
        *self
            .state
            .write()
            .map_err(|e| LockerError::Backend(e.to_string()))? = Some(scope.clone());
        self.ready.store(true, Ordering::SeqCst);

        let existing = self.namespace_entries(&scope).await?.len();
        locker_debug!(
            init.logger,
            directory = %self.directory.display(),
            existing,
            "file backend initialized"
        );
        if existing > 0 {
            init.accountant.request_refresh();
        }
        Ok(())
    }

    fn validate(&self, _operation: Operation) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn set(&self, item: CacheItem) -> Result<()> {
        let scope = self.scope()?;
        let body = serde_json::to_vec(&item)?;
        self.check_quota(&item, &scope, body.len() as u64).await?;

        // Each write stages its own file, so concurrent writers to one key
        // never rename each other's temp file away
        let path = self.entry_path(&item.key);
        let temp = path.with_extension(format!("{}.{}", Uuid::new_v4().simple(), TEMP_EXTENSION));
        fs::write(&temp, body).await.map_err(|e| self.check_io(e))?;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(self.check_io(e));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheItem>> {
        let scope = self.scope()?;
        let entry = self.read_entry(&self.entry_path(key), &scope.logger).await?;
        Ok(entry.map(|e| e.item).filter(|item| item.key == key))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all_data(&self) -> Result<Vec<CacheItem>> {
        let scope = self.scope()?;
        Ok(self
            .namespace_entries(&scope)
            .await?
            .into_iter()
            .map(|entry| entry.item)
            .collect())
    }

    async fn destroy(&self) -> Result<()> {
        // Files are the persistent medium and stay on disk
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{namespace_prefix, qualified_key, SizeAccountant, ValueType};
    use futures::future::join_all;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn item(prefix: &str, key: &str) -> CacheItem {
        CacheItem {
            key: qualified_key(prefix, key),
            value: "\"value\"".to_string(),
            value_type: ValueType::String,
            expires: 0,
            auto_read_refresh: false,
            size: 64,
            created_at: 1,
            updated_at: 1,
        }
    }

    async fn init(backend: &Arc<FileBackend>, namespace: &str) -> String {
        let prefix = namespace_prefix(namespace);
        let logger = Logger::new(namespace, true);
        let dyn_backend: Arc<dyn Backend> = backend.clone();
        let accountant = SizeAccountant::new(&dyn_backend, logger.clone());
        backend
            .initialize(BackendInit {
                prefix: prefix.clone(),
                maximum_bytes: 0,
                logger,
                accountant,
            })
            .await
            .unwrap();
        prefix
    }

    fn file_name_len(path: &Path) -> usize {
        path.file_name().unwrap().len()
    }

    #[test]
    fn test_entry_names_have_fixed_length() {
        let backend = FileBackend::new("/tmp/locker");
        let short = backend.entry_path("locker―default―a");
        let long = backend.entry_path(&format!("locker―default―{}", "é".repeat(255)));

        // 64 hex digits plus ".json"
        assert_eq!(file_name_len(&short), 69);
        assert_eq!(file_name_len(&long), 69);
        assert_ne!(short, long);
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(FileBackend::new(dir.path()));
        let prefix = init(&backend, "files").await;

        let stored = item(&prefix, "a");
        backend.set(stored.clone()).await.unwrap();
        assert_eq!(backend.get(&stored.key).await.unwrap(), Some(stored.clone()));

        backend.remove(&stored.key).await.unwrap();
        backend.remove(&stored.key).await.unwrap();
        assert_eq!(backend.get(&stored.key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_max_length_keys_are_stored() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(FileBackend::new(dir.path()));
        let prefix = init(&backend, "long").await;

        let ascii = item(&prefix, &"k".repeat(255));
        let multibyte = item(&prefix, &"ж".repeat(255));
        backend.set(ascii.clone()).await.unwrap();
        backend.set(multibyte.clone()).await.unwrap();

        assert_eq!(backend.get(&ascii.key).await.unwrap(), Some(ascii));
        assert_eq!(backend.get(&multibyte.key).await.unwrap(), Some(multibyte));
        assert_eq!(backend.get_all_data().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_one_key() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(FileBackend::new(dir.path()));
        let prefix = init(&backend, "race").await;

        for round in 0..50 {
            let writes = (0..4).map(|writer| {
                let backend = backend.clone();
                let mut next = item(&prefix, "same");
                next.value = format!("\"{}-{}\"", round, writer);
                tokio::spawn(async move { backend.set(next).await })
            });
            for result in join_all(writes).await {
                result.unwrap().unwrap();
            }
        }

        let stored = backend.get(&qualified_key(&prefix, "same")).await.unwrap().unwrap();
        assert!(stored.value.starts_with("\"49-"));

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().unwrap() == TEMP_EXTENSION)
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_namespaces_share_directory() {
        let dir = tempdir().unwrap();
        let first = Arc::new(FileBackend::new(dir.path()));
        let second = Arc::new(FileBackend::new(dir.path()));
        let first_prefix = init(&first, "one").await;
        let second_prefix = init(&second, "two").await;

        first.set(item(&first_prefix, "a")).await.unwrap();
        second.set(item(&second_prefix, "b")).await.unwrap();

        let first_items = first.get_all_data().await.unwrap();
        assert_eq!(first_items.len(), 1);
        assert_eq!(first_items[0].key, qualified_key(&first_prefix, "a"));
    }

    #[tokio::test]
    async fn test_namespace_prefix_is_not_a_namespace_match() {
        let dir = tempdir().unwrap();
        let short = Arc::new(FileBackend::new(dir.path()));
        let long = Arc::new(FileBackend::new(dir.path()));
        let short_prefix = init(&short, "app").await;
        let long_prefix = init(&long, "app2").await;

        long.set(item(&long_prefix, "k")).await.unwrap();
        assert!(short.get_all_data().await.unwrap().is_empty());
        assert!(short.get(&qualified_key(&short_prefix, "k")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(FileBackend::new(dir.path()));
        let prefix = init(&backend, "persist").await;
        backend.set(item(&prefix, "a")).await.unwrap();
        backend.destroy().await.unwrap();
        assert!(!backend.validate(Operation::GetItem));

        let reopened = Arc::new(FileBackend::new(dir.path()));
        init(&reopened, "persist").await;
        assert!(reopened.validate(Operation::GetItem));
        assert_eq!(reopened.get_all_data().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_skipped() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(FileBackend::new(dir.path()));
        let prefix = init(&backend, "corrupt").await;

        let key = qualified_key(&prefix, "broken");
        std::fs::write(backend.entry_path(&key), b"{not json").unwrap();

        assert_eq!(backend.get(&key).await.unwrap(), None);
        assert!(backend.get_all_data().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quota_rejects_oversized_write() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(FileBackend::new(dir.path()).with_quota(300));
        let prefix = init(&backend, "quota").await;

        backend.set(item(&prefix, "a")).await.unwrap();
        let mut big = item(&prefix, "b");
        big.value = format!("\"{}\"", "x".repeat(400));

        let result = backend.set(big).await;
        assert!(matches!(result, Err(LockerError::Backend(_))));
        assert_eq!(backend.get_all_data().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_vanished_directory_disables_backend() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("entries");
        let backend = Arc::new(FileBackend::new(&root));
        let prefix = init(&backend, "gone").await;
        assert!(backend.validate(Operation::SetItem));

        std::fs::remove_dir_all(&root).unwrap();

        let result = backend.set(item(&prefix, "a")).await;
        assert!(matches!(result, Err(LockerError::Backend(_))));
        assert!(!backend.validate(Operation::SetItem));
    }

    #[tokio::test]
    async fn test_uninitialized_backend_errors() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        assert!(!backend.validate(Operation::GetItem));
        assert!(matches!(
            backend.get("anything").await,
            Err(LockerError::Backend(_))
        ));
    }
}
