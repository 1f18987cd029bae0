//! Ephemeral Sites Library
//!
//! Short-lived self-service websites: a caller creates a site, receives a
//! public key and a signed upload token, then uploads files that expire
//! together with the site.

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod files;
pub mod models;
pub mod quota;
pub mod routes;
pub mod security;
pub mod sites;
pub mod store;

pub use config::Config;
pub use db::{open_database, Db, RedbStore};
pub use error::{AppError, Result};
pub use security::TokenCodec;

use std::sync::Arc;

use quota::{HttpQuotaService, QuotaService, RedbQuota};
use store::KvStore;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub store: Arc<dyn KvStore>,
    pub quota: Arc<dyn QuotaService>,
    pub tokens: TokenCodec,
    pub config: Config,
}

impl AppState {
    /// Create a new AppState with the given database and configuration
    ///
    /// Uses the external quota service when `quota_service_url` is set,
    /// otherwise the embedded ledger.
    pub fn new(db: Db, config: Config) -> Result<Self> {
        let quota: Arc<dyn QuotaService> = match &config.quota_service_url {
            Some(url) => {
                tracing::info!("Using quota service at {}", url);
                Arc::new(HttpQuotaService::new(
                    url,
                    config.quota_service_api_key.clone(),
                )?)
            }
            None => Arc::new(RedbQuota::new(db.clone())),
        };

        Ok(Self {
            store: Arc::new(RedbStore::new(db.clone())),
            tokens: TokenCodec::new(&config.app_secret_key),
            db,
            quota,
            config,
        })
    }
}
