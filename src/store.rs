//! Key-value store contract used by the site engine.
//!
//! Keys are opaque strings. Files and the metadata record live under
//! `site:{public_key}:{path}` where `path` always begins with `/`.

use async_trait::async_trait;
use axum::body::Bytes;

use crate::error::Result;
use crate::models::{FileMetadata, StoredFile};

/// Options attached to a write
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Absolute expiration as Unix seconds; the key is unreadable from then on
    pub expiration: Option<i64>,
    pub metadata: FileMetadata,
}

/// TTL-capable key-value store with prefix listing
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn get_with_metadata(&self, key: &str) -> Result<Option<StoredFile>>;

    async fn put(&self, key: &str, value: Bytes, options: PutOptions) -> Result<()>;

    /// Write `value` and add its size to the byte counter at `counter_key`
    /// in one atomic step, returning the new total
    ///
    /// Fails with `PayloadTooLarge`, writing nothing, when the total would
    /// exceed `limit`. The counter shares the value's expiration.
    async fn put_counted(
        &self,
        key: &str,
        value: Bytes,
        options: PutOptions,
        counter_key: &str,
        limit: u64,
    ) -> Result<u64>;

    /// Live keys starting with `prefix`, in lexicographic order
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove expired entries, returning how many were dropped
    async fn purge_expired(&self) -> Result<u64>;
}

/// Store key for a file (or the metadata record) of a site
pub fn site_key(public_key: &str, path: &str) -> String {
    format!("{}{}", site_prefix(public_key), path)
}

/// Prefix shared by every key of a site
pub fn site_prefix(public_key: &str) -> String {
    format!("site:{}:", public_key)
}

/// Store key holding the cumulative uploaded bytes of a site
pub fn size_key(public_key: &str) -> String {
    format!("size:{}", public_key)
}
