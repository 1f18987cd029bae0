pub mod tables;

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::Utc;
use redb::{Database, ReadableTable};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{FileMetadata, StoredFile};
use crate::store::{KvStore, PutOptions};

/// Database handle type (Arc-wrapped for sharing across handlers)
pub type Db = Arc<Database>;

/// Open or create the redb database at the given path
///
/// Creates all required tables on first run.
pub fn open_database(path: impl AsRef<Path>) -> Result<Db> {
    tracing::info!("Opening database at: {:?}", path.as_ref());

    // Create parent directory if it doesn't exist
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                tracing::error!("Failed to create database directory: {}", e);
                AppError::Internal(format!("cannot create {:?}: {}", parent, e))
            })?;
        }
    }

    let db = Database::create(path)?;

    // Initialize tables on first run
    let write_txn = db.begin_write()?;
    {
        let _ = write_txn.open_table(tables::ENTRIES)?;
        let _ = write_txn.open_table(tables::QUOTAS)?;
    }
    write_txn.commit()?;

    tracing::info!("Database initialized successfully");

    Ok(Arc::new(db))
}

/// A stored value with its expiration and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRecord {
    pub value: Vec<u8>,
    /// Unix seconds; `None` never expires
    pub expiration: Option<i64>,
    pub metadata: FileMetadata,
}

impl EntryRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expiration, Some(expiration) if expiration <= now)
    }
}

/// `KvStore` backed by a local redb file
#[derive(Clone)]
pub struct RedbStore {
    db: Db,
}

impl RedbStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Live record stored at `key`, including its expiration
    pub async fn read_entry(&self, key: &str) -> Result<Option<EntryRecord>> {
        let db = self.db.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<EntryRecord>> {
            let read_txn = db.begin_read()?;
            let entries = read_txn.open_table(tables::ENTRIES)?;

            let record: Option<EntryRecord> = entries
                .get(key.as_str())?
                .map(|bytes| bincode::deserialize(bytes.value()))
                .transpose()?;

            Ok(record.filter(|r| !r.is_expired(Utc::now().timestamp())))
        })
        .await?
    }
}

#[async_trait]
impl KvStore for RedbStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.read_entry(key).await?.map(|r| Bytes::from(r.value)))
    }

    async fn get_with_metadata(&self, key: &str) -> Result<Option<StoredFile>> {
        Ok(self.read_entry(key).await?.map(|r| StoredFile {
            body: Bytes::from(r.value),
            metadata: r.metadata,
        }))
    }

    async fn put(&self, key: &str, value: Bytes, options: PutOptions) -> Result<()> {
        let db = self.db.clone();
        let key = key.to_string();
        let record = EntryRecord {
            value: value.to_vec(),
            expiration: options.expiration,
            metadata: options.metadata,
        };

        tokio::task::spawn_blocking(move || -> Result<()> {
            let bytes = bincode::serialize(&record)?;

            let write_txn = db.begin_write()?;
            {
                let mut entries = write_txn.open_table(tables::ENTRIES)?;
                entries.insert(key.as_str(), bytes.as_slice())?;
            }
            write_txn.commit()?;

            Ok(())
        })
        .await?
    }

    async fn put_counted(
        &self,
        key: &str,
        value: Bytes,
        options: PutOptions,
        counter_key: &str,
        limit: u64,
    ) -> Result<u64> {
        let db = self.db.clone();
        let key = key.to_string();
        let counter_key = counter_key.to_string();
        let size = value.len() as u64;
        let record = EntryRecord {
            value: value.to_vec(),
            expiration: options.expiration,
            metadata: options.metadata,
        };

        tokio::task::spawn_blocking(move || -> Result<u64> {
            let now = Utc::now().timestamp();

            // Write transactions are exclusive: no upload interleaves with this one
            let write_txn = db.begin_write()?;
            let total = {
                let mut entries = write_txn.open_table(tables::ENTRIES)?;

                let counter: Option<EntryRecord> = entries
                    .get(counter_key.as_str())?
                    .map(|bytes| bincode::deserialize(bytes.value()))
                    .transpose()?;
                let prior = match counter.filter(|c| !c.is_expired(now)) {
                    Some(counter) => std::str::from_utf8(&counter.value)
                        .ok()
                        .and_then(|s| s.parse::<u64>().ok())
                        .ok_or_else(|| {
                            AppError::Internal(format!("corrupt counter at {}", counter_key))
                        })?,
                    None => 0,
                };

                let total = prior + size;
                if total > limit {
                    return Err(AppError::PayloadTooLarge(format!(
                        "Site size would be {} bytes, exceeding the limit of {} bytes",
                        total, limit
                    )));
                }

                let counter = EntryRecord {
                    value: total.to_string().into_bytes(),
                    expiration: record.expiration,
                    metadata: FileMetadata::default(),
                };
                entries.insert(counter_key.as_str(), bincode::serialize(&counter)?.as_slice())?;
                entries.insert(key.as_str(), bincode::serialize(&record)?.as_slice())?;
                total
            };
            write_txn.commit()?;

            Ok(total)
        })
        .await?
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let db = self.db.clone();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let now = Utc::now().timestamp();
            let read_txn = db.begin_read()?;
            let entries = read_txn.open_table(tables::ENTRIES)?;

            let mut keys = Vec::new();
            for item in entries.range(prefix.as_str()..)? {
                let (key, value) = item?;
                let key = key.value();
                if !key.starts_with(prefix.as_str()) {
                    break;
                }

                let record: EntryRecord = bincode::deserialize(value.value())?;
                if !record.is_expired(now) {
                    keys.push(key.to_string());
                }
            }

            Ok(keys)
        })
        .await?
    }

    async fn purge_expired(&self) -> Result<u64> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || -> Result<u64> {
            let now = Utc::now().timestamp();
            let write_txn = db.begin_write()?;
            let purged = {
                let mut entries = write_txn.open_table(tables::ENTRIES)?;

                let mut expired = Vec::new();
                for item in entries.iter()? {
                    let (key, value) = item?;
                    let record: EntryRecord = bincode::deserialize(value.value())?;
                    if record.is_expired(now) {
                        expired.push(key.value().to_string());
                    }
                }

                for key in &expired {
                    entries.remove(key.as_str())?;
                }
                expired.len() as u64
            };
            write_txn.commit()?;

            Ok(purged)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store(temp_dir: &TempDir) -> RedbStore {
        let db = open_database(temp_dir.path().join("test.db")).unwrap();
        RedbStore::new(db)
    }

    fn options(expiration: Option<i64>, content_type: Option<&str>, size: u64) -> PutOptions {
        PutOptions {
            expiration,
            metadata: FileMetadata {
                content_type: content_type.map(str::to_string),
                size,
            },
        }
    }

    #[tokio::test]
    async fn test_put_then_get_with_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let expiration = Utc::now().timestamp() + 60;

        store
            .put(
                "site:abc:/index.html",
                Bytes::from_static(b"<h1>hi</h1>"),
                options(Some(expiration), Some("text/html"), 11),
            )
            .await
            .unwrap();

        let file = store
            .get_with_metadata("site:abc:/index.html")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&file.body[..], b"<h1>hi</h1>");
        assert_eq!(file.metadata.content_type.as_deref(), Some("text/html"));
        assert_eq!(file.metadata.size, 11);
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        assert!(store.get("site:nope:/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_returned() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let past = Utc::now().timestamp() - 1;

        store
            .put("site:abc:/old.txt", Bytes::from_static(b"old"), options(Some(past), None, 3))
            .await
            .unwrap();

        assert!(store.get("site:abc:/old.txt").await.unwrap().is_none());
        assert!(store.list("site:abc:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_is_prefix_scoped_and_ordered() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        for key in ["site:abc:/b.txt", "site:abc:/a.txt", "site:abd:/a.txt", "size:abc"] {
            store
                .put(key, Bytes::from_static(b"x"), options(None, None, 1))
                .await
                .unwrap();
        }

        let keys = store.list("site:abc:").await.unwrap();
        assert_eq!(keys, vec!["site:abc:/a.txt", "site:abc:/b.txt"]);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store
            .put("k", Bytes::from_static(b"one"), options(None, None, 3))
            .await
            .unwrap();
        store
            .put("k", Bytes::from_static(b"two!"), options(None, None, 4))
            .await
            .unwrap();

        assert_eq!(&store.get("k").await.unwrap().unwrap()[..], b"two!");
    }

    #[tokio::test]
    async fn test_purge_expired_removes_only_expired() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let now = Utc::now().timestamp();

        store
            .put("gone", Bytes::from_static(b"x"), options(Some(now - 5), None, 1))
            .await
            .unwrap();
        store
            .put("kept", Bytes::from_static(b"y"), options(Some(now + 600), None, 1))
            .await
            .unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.list("").await.unwrap(), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_put_counted_accumulates_and_limits() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let expiration = Some(Utc::now().timestamp() + 600);

        let total = store
            .put_counted("f1", Bytes::from(vec![0u8; 60]), options(expiration, None, 60), "size:s", 100)
            .await
            .unwrap();
        assert_eq!(total, 60);

        let total = store
            .put_counted("f2", Bytes::from(vec![0u8; 40]), options(expiration, None, 40), "size:s", 100)
            .await
            .unwrap();
        assert_eq!(total, 100);

        let rejected = store
            .put_counted("f3", Bytes::from(vec![0u8; 1]), options(expiration, None, 1), "size:s", 100)
            .await;
        assert!(matches!(rejected, Err(AppError::PayloadTooLarge(_))));

        // A rejected write stores neither the value nor a new total
        assert!(store.get("f3").await.unwrap().is_none());
        assert_eq!(&store.get("size:s").await.unwrap().unwrap()[..], b"100");
    }

    #[tokio::test]
    async fn test_put_counted_corrupt_counter_is_internal() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store
            .put("size:s", Bytes::from_static(b"lots"), options(None, None, 4))
            .await
            .unwrap();

        let result = store
            .put_counted("f", Bytes::from_static(b"x"), options(None, None, 1), "size:s", 100)
            .await;
        assert!(matches!(result, Err(AppError::Internal(_))));
        assert!(store.get("f").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_put_counted_concurrent_writers_respect_limit() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .put_counted(
                            &format!("site:s:/{}.bin", i),
                            Bytes::from(vec![0u8; 200]),
                            options(None, None, 200),
                            "size:s",
                            1000,
                        )
                        .await
                })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 5);
        assert_eq!(store.list("site:s:").await.unwrap().len(), 5);
        assert_eq!(&store.get("size:s").await.unwrap().unwrap()[..], b"1000");
    }
}
