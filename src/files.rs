//! Serving and uploading site files.

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;

use crate::constants::{INFO_FILE_NAME, NOT_FOUND_PAGES};
use crate::error::{AppError, Result};
use crate::models::{FileMetadata, SiteSummary, StoredFile, UploadResult};
use crate::sites::{expiration_secs, site_summary};
use crate::store::{site_key, size_key, KvStore, PutOptions};
use crate::AppState;

/// Outcome of resolving a GET request against a site
#[derive(Debug)]
pub enum Resolution {
    /// The reserved metadata path was requested
    Summary(SiteSummary),
    /// `/` was requested and the site has no index file
    IndexFallback { message: String, summary: SiteSummary },
    /// A stored file; status is 404 when it is a custom not-found page
    File { file: StoredFile, status: StatusCode },
}

/// Index candidates tried for a directory path, in order
pub fn index_candidates(path: &str) -> Vec<String> {
    let Some(stem) = path.strip_suffix('/') else {
        return Vec::new();
    };

    vec![
        format!("{}index.html", path),
        format!("{}.html", stem),
        format!("{}index.json", path),
    ]
}

/// Resolve `path` within a site
///
/// Order: metadata path, direct hit, index candidates (directory paths only),
/// summary fallback for `/`, then the site's custom 404 pages.
pub async fn resolve(store: &dyn KvStore, public_key: &str, path: &str) -> Result<Resolution> {
    if path == INFO_FILE_NAME {
        return Ok(Resolution::Summary(site_summary(store, public_key).await?));
    }

    if let Some(file) = first_hit(store, public_key, vec![path.to_string()]).await? {
        return Ok(Resolution::File {
            file,
            status: StatusCode::OK,
        });
    }

    if path.ends_with('/') {
        if let Some(file) = first_hit(store, public_key, index_candidates(path)).await? {
            return Ok(Resolution::File {
                file,
                status: StatusCode::OK,
            });
        }

        if path == "/" {
            return Ok(Resolution::IndexFallback {
                message: format!(
                    "The site \"{}\" has no index file, hence this summary response",
                    public_key
                ),
                summary: site_summary(store, public_key).await?,
            });
        }
    }

    let not_found_pages: Vec<String> = NOT_FOUND_PAGES.iter().map(|page| page.to_string()).collect();
    match first_hit(store, public_key, not_found_pages).await? {
        Some(file) => Ok(Resolution::File {
            file,
            status: StatusCode::NOT_FOUND,
        }),
        None => Err(AppError::NotFound(format!(
            "File \"{}\" not found in site \"{}\"",
            path, public_key
        ))),
    }
}

/// Look up candidate paths in order, stopping at the first stored file
async fn first_hit(
    store: &dyn KvStore,
    public_key: &str,
    candidates: Vec<String>,
) -> Result<Option<StoredFile>> {
    for candidate in candidates {
        if let Some(file) = store.get_with_metadata(&site_key(public_key, &candidate)).await? {
            return Ok(Some(file));
        }
    }
    Ok(None)
}

/// Check that the caller may upload `path` to the site
///
/// Runs before the request body is read, so callers without a valid token
/// never get to stream a payload.
///
/// # Arguments
/// * `state` - Application state holding the token codec and upload TTL
/// * `public_key` - Site taken from the request path
/// * `path` - Site-relative path the file would be stored at
/// * `headers` - Request headers carrying the upload token
///
/// # Returns
/// The site creation instant (Unix milliseconds) embedded in the token.
///
/// # Errors
/// * `Unauthorized` / `Forbidden` / `Expired` from token verification
/// * `Forbidden` when `path` is the reserved metadata path
pub fn authorize_upload(
    state: &AppState,
    public_key: &str,
    path: &str,
    headers: &HeaderMap,
) -> Result<i64> {
    let creation_ms = state.tokens.verify_upload(
        public_key,
        headers,
        state.config.upload_ttl_ms(),
        Utc::now().timestamp_millis(),
    )?;

    if path == INFO_FILE_NAME {
        return Err(AppError::Forbidden(format!(
            "Overwriting \"{}\" is forbidden",
            INFO_FILE_NAME
        )));
    }

    Ok(creation_ms)
}

/// Store an uploaded file for an authorized caller
///
/// The file expires with the site at `creation + site_ttl`, so re-uploads
/// never extend a site's life. The file write and the size ledger update
/// commit together; a rejected or failed upload leaves the ledger untouched.
///
/// # Arguments
/// * `state` - Application state holding the store and size limit
/// * `public_key` - Site the file belongs to
/// * `path` - Site-relative path, always starting with `/`
/// * `creation_ms` - Site creation instant from [`authorize_upload`]
/// * `headers` - Request headers; `Content-Type` is recorded with the file
/// * `body` - File contents
///
/// # Errors
/// * `PayloadTooLarge` when the site total would exceed `max_site_size_bytes`
pub async fn upload(
    state: &AppState,
    public_key: &str,
    path: &str,
    creation_ms: i64,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<UploadResult> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let size = body.len() as u64;
    let expiration = expiration_secs(creation_ms + state.config.site_ttl_ms());

    let total_site_size = state
        .store
        .put_counted(
            &site_key(public_key, path),
            body,
            PutOptions {
                expiration: Some(expiration),
                metadata: FileMetadata {
                    content_type: content_type.clone(),
                    size,
                },
            },
            &size_key(public_key),
            state.config.max_site_size_bytes,
        )
        .await
        .map_err(|e| {
            if matches!(e, AppError::PayloadTooLarge(_)) {
                tracing::warn!("Site {} rejected upload of {}: {}", public_key, path, e);
            }
            e
        })?;

    tracing::info!(
        "Stored {} in site {}: {} bytes (site total {})",
        path,
        public_key,
        size,
        total_site_size
    );

    Ok(UploadResult {
        path: path.to_string(),
        content_type,
        size,
        total_site_size,
    })
}
