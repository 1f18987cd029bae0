//! Per-fingerprint site creation quota.
//!
//! Two implementations: an HTTP client for an external quota service and an
//! embedded ledger in the local redb file.

use async_trait::async_trait;
use chrono::Utc;
use redb::ReadableTable;
use serde::Serialize;
use std::time::Duration;

use crate::constants::QUOTA_ALLOWED_STATUSES;
use crate::db::{tables, Db};
use crate::error::{AppError, Result};
use crate::models::CreationLog;

#[async_trait]
pub trait QuotaService: Send + Sync {
    /// Sites created by `auth_key` in the trailing 24h
    async fn recent_sites(&self, auth_key: &str) -> Result<u64>;

    /// Record one more creation for `auth_key`
    async fn record_site(&self, public_key: &str, auth_key: &str) -> Result<()>;

    /// Fail with `RateLimited` when the recent count exceeds `ceiling`,
    /// otherwise record the creation and return the count seen before it
    async fn check_and_record(&self, public_key: &str, auth_key: &str, ceiling: u64) -> Result<u64> {
        let recent = self.recent_sites(auth_key).await?;
        if recent > ceiling {
            tracing::warn!(
                "Creation limit exceeded for {}: {}/{}",
                auth_key,
                recent,
                ceiling
            );
            return Err(AppError::RateLimited { limit: ceiling });
        }

        self.record_site(public_key, auth_key).await?;
        Ok(recent)
    }
}

// =============================================================================
// External quota service
// =============================================================================

#[derive(Serialize)]
struct NewSite<'a> {
    public_key: &'a str,
    auth_key: &'a str,
}

/// Client for the external quota service
///
/// `GET {root}/recent_sites?auth_key=..` returns an integer,
/// `POST {root}/sites` records a creation.
#[derive(Clone)]
pub struct HttpQuotaService {
    client: reqwest::Client,
    root: String,
    api_key: Option<String>,
}

impl HttpQuotaService {
    pub fn new(root: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            root: root.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn with_api_key(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key),
            None => request,
        }
    }

    async fn check_status(response: reqwest::Response, method: &str, url: &str) -> Result<reqwest::Response> {
        let status = response.status().as_u16();
        if QUOTA_ALLOWED_STATUSES.contains(&status) {
            return Ok(response);
        }

        let response_text = response.text().await.unwrap_or_default();
        tracing::error!(
            "Error making {} request to quota service: url={} status={} response={}",
            method,
            url,
            status,
            response_text
        );
        Err(AppError::BadGateway(format!(
            "error making request to quota service, response {}",
            status
        )))
    }
}

#[async_trait]
impl QuotaService for HttpQuotaService {
    async fn recent_sites(&self, auth_key: &str) -> Result<u64> {
        let url = format!("{}/recent_sites", self.root);
        let response = self
            .with_api_key(self.client.get(&url).query(&[("auth_key", auth_key)]))
            .send()
            .await
            .map_err(|e| AppError::BadGateway(format!("quota service unreachable: {}", e)))?;

        let response = Self::check_status(response, "GET", &url).await?;
        response
            .json::<u64>()
            .await
            .map_err(|e| AppError::BadGateway(format!("invalid quota service response: {}", e)))
    }

    async fn record_site(&self, public_key: &str, auth_key: &str) -> Result<()> {
        let url = format!("{}/sites", self.root);
        let response = self
            .with_api_key(self.client.post(&url).json(&NewSite {
                public_key,
                auth_key,
            }))
            .send()
            .await
            .map_err(|e| AppError::BadGateway(format!("quota service unreachable: {}", e)))?;

        Self::check_status(response, "POST", &url).await?;
        Ok(())
    }
}

// =============================================================================
// Embedded quota ledger
// =============================================================================

/// Quota ledger kept in the local database
#[derive(Clone)]
pub struct RedbQuota {
    db: Db,
}

impl RedbQuota {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn load(
        table: &impl ReadableTable<&'static str, &'static [u8]>,
        auth_key: &str,
    ) -> Result<CreationLog> {
        Ok(table
            .get(auth_key)?
            .map(|bytes| bincode::deserialize::<CreationLog>(bytes.value()))
            .transpose()?
            .unwrap_or_default())
    }

    /// Shared write path; `ceiling` of `None` records unconditionally
    async fn record(&self, public_key: &str, auth_key: &str, ceiling: Option<u64>) -> Result<u64> {
        let db = self.db.clone();
        let public_key = public_key.to_string();
        let auth_key = auth_key.to_string();

        tokio::task::spawn_blocking(move || -> Result<u64> {
            let now = Utc::now().timestamp();

            let write_txn = db.begin_write()?;
            let recent = {
                let mut quotas = write_txn.open_table(tables::QUOTAS)?;
                let mut log = Self::load(&quotas, &auth_key)?;
                log.prune(now);

                let recent = log.recent(now);
                if let Some(ceiling) = ceiling {
                    if recent > ceiling {
                        tracing::warn!(
                            "Creation limit exceeded for {}: {}/{}",
                            auth_key,
                            recent,
                            ceiling
                        );
                        return Err(AppError::RateLimited { limit: ceiling });
                    }
                }

                log.record(&public_key, now);
                let bytes = bincode::serialize(&log)?;
                quotas.insert(auth_key.as_str(), bytes.as_slice())?;
                recent
            };
            write_txn.commit()?;

            Ok(recent)
        })
        .await?
    }
}

#[async_trait]
impl QuotaService for RedbQuota {
    async fn recent_sites(&self, auth_key: &str) -> Result<u64> {
        let db = self.db.clone();
        let auth_key = auth_key.to_string();

        tokio::task::spawn_blocking(move || -> Result<u64> {
            let read_txn = db.begin_read()?;
            let quotas = read_txn.open_table(tables::QUOTAS)?;
            let log = Self::load(&quotas, &auth_key)?;
            Ok(log.recent(Utc::now().timestamp()))
        })
        .await?
    }

    async fn record_site(&self, public_key: &str, auth_key: &str) -> Result<()> {
        self.record(public_key, auth_key, None).await.map(|_| ())
    }

    /// Check and record inside one write transaction
    async fn check_and_record(&self, public_key: &str, auth_key: &str, ceiling: u64) -> Result<u64> {
        self.record(public_key, auth_key, Some(ceiling)).await
    }
}
