//! Site lifecycle: creation and summaries.

use axum::{body::Bytes, http::HeaderMap};
use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::constants::{ERR_MISSING_USER_AGENT, INFO_FILE_NAME, PUBLIC_KEY_LENGTH};
use crate::error::{AppError, Result};
use crate::models::{FileMetadata, SiteCreated, SiteInfo, SiteSummary};
use crate::security::create_random_string;
use crate::store::{site_key, site_prefix, KvStore, PutOptions};
use crate::AppState;

/// Format an instant the way site metadata exposes it
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Store expiration (Unix seconds, rounded) for an instant in milliseconds
pub fn expiration_secs(instant_ms: i64) -> i64 {
    (instant_ms + 500).div_euclid(1000)
}

/// Create a new site
///
/// Verifies the create credential, checks the quota, signs an upload token
/// and persists the site metadata with the site's expiration.
///
/// # Arguments
/// * `state` - Application state (store, quota service, token codec, TTLs)
/// * `headers` - Request headers carrying the create key and `User-Agent`
/// * `origin` - Scheme and host site URLs are built from
///
/// # Errors
/// * `Unauthorized` / `Forbidden` - missing or invalid create key
/// * `InvalidInput` - no `User-Agent`
/// * `Conflict` - the generated public key already has metadata
/// * `RateLimited` - the caller's 24h creation count exceeds `sites_per_day`;
///   nothing is written in that case
/// * `BadGateway` - the external quota service failed
///
/// # Security Note
/// The public key comes from the OS CSPRNG and is the only way to address
/// a site, so it must stay unpredictable.
pub async fn create_site(state: &AppState, headers: &HeaderMap, origin: &str) -> Result<SiteCreated> {
    let auth_key = state.tokens.verify_create(headers)?;

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::InvalidInput(ERR_MISSING_USER_AGENT.to_string()))?;
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("unknown");

    let public_key = create_random_string(PUBLIC_KEY_LENGTH);
    let info_key = site_key(&public_key, INFO_FILE_NAME);

    // Not atomic with the write below; a hit here means the key space collided
    if state.store.get(&info_key).await?.is_some() {
        tracing::error!("Generated public key {} already exists", public_key);
        return Err(AppError::Conflict);
    }

    let sites_created_24h = state
        .quota
        .check_and_record(&public_key, &auth_key, state.config.sites_per_day)
        .await?;

    tracing::info!(
        "Creating new site public_key={} sites_created_24h={} auth_key={} user_agent={:?} ip={}",
        public_key,
        sites_created_24h,
        auth_key,
        user_agent,
        ip_address
    );

    let creation_ms = Utc::now().timestamp_millis();
    let creation = DateTime::<Utc>::from_timestamp_millis(creation_ms)
        .ok_or_else(|| AppError::Internal("current time out of range".to_string()))?;
    let site_expiration = creation + Duration::milliseconds(state.config.site_ttl_ms());
    let upload_expiration = creation + Duration::milliseconds(state.config.upload_ttl_ms());

    let secret_key = state.tokens.sign_upload(&public_key, creation_ms)?;

    let info = SiteInfo {
        url: format!("{}/{}/", origin.trim_end_matches('/'), public_key),
        site_creation: format_instant(creation),
        site_expiration: format_instant(site_expiration),
    };
    let info_json = serde_json::to_vec_pretty(&info)?;

    state
        .store
        .put(
            &info_key,
            Bytes::from(info_json.clone()),
            PutOptions {
                expiration: Some(expiration_secs(site_expiration.timestamp_millis())),
                metadata: FileMetadata {
                    content_type: Some("application/json".to_string()),
                    size: info_json.len() as u64,
                },
            },
        )
        .await?;

    Ok(SiteCreated {
        message: "New site created successfully".to_string(),
        sites_created_24h,
        secret_key,
        upload_expiration: format_instant(upload_expiration),
        info,
    })
}

/// Site metadata plus every stored path, excluding the metadata path itself
///
/// An expired site and one that never existed both give `NotFound`.
pub async fn site_summary(store: &dyn KvStore, public_key: &str) -> Result<SiteSummary> {
    let raw = store
        .get(&site_key(public_key, INFO_FILE_NAME))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Site \"{}\" not found", public_key)))?;
    let info: SiteInfo = serde_json::from_slice(&raw)?;

    let prefix = site_prefix(public_key);
    let files = store
        .list(&prefix)
        .await?
        .into_iter()
        .filter_map(|key| key.strip_prefix(prefix.as_str()).map(str::to_string))
        .filter(|path| path != INFO_FILE_NAME)
        .collect();

    Ok(SiteSummary { info, files })
}
