use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header::CONTENT_TYPE, HeaderValue, Method},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::constants::{PUBLIC_KEY_ALPHABET, PUBLIC_KEY_LENGTH};
use crate::error::{AppError, Result};
use crate::files::{self, Resolution};
use crate::AppState;

/// Append a trailing slash to extension-less paths, so `/docs` and `/docs/` match
pub fn normalize_path(path: &str) -> String {
    if !path.contains('.') && !path.ends_with('/') {
        format!("{}/", path)
    } else {
        path.to_string()
    }
}

/// Split `/{public_key}/{path...}` into the key and the site-relative path
pub fn split_site_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix('/')?;
    let slash = rest.find('/')?;
    let (public_key, site_path) = rest.split_at(slash);

    let valid = public_key.len() == PUBLIC_KEY_LENGTH
        && public_key.bytes().all(|c| PUBLIC_KEY_ALPHABET.contains(&c));
    valid.then_some((public_key, site_path))
}

/// GET and POST on `/{public_key}/{path...}`
pub async fn site_request(State(state): State<AppState>, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let computed_path = normalize_path(parts.uri.path());

    let (public_key, path) = split_site_path(&computed_path).ok_or_else(|| {
        AppError::NotFound(format!("Page not found for \"{}\"", parts.uri.path()))
    })?;

    match parts.method {
        Method::GET | Method::HEAD => get_file(&state, public_key, path).await,
        Method::POST => post_file(&state, public_key, path, &parts.headers, body).await,
        _ => Err(AppError::MethodNotAllowed),
    }
}

async fn get_file(state: &AppState, public_key: &str, path: &str) -> Result<Response> {
    let response = match files::resolve(state.store.as_ref(), public_key, path).await? {
        Resolution::Summary(summary) => Json(summary).into_response(),
        Resolution::IndexFallback { message, summary } => Json(json!({
            "message": message,
            "summary": summary,
        }))
        .into_response(),
        Resolution::File { file, status } => {
            let mut response = (status, file.body).into_response();
            let headers = response.headers_mut();
            headers.remove(CONTENT_TYPE);
            if let Some(value) = file
                .metadata
                .content_type
                .as_deref()
                .and_then(|ct| HeaderValue::from_str(ct).ok())
            {
                headers.insert(CONTENT_TYPE, value);
            }
            response
        }
    };

    Ok(response)
}

async fn post_file(
    state: &AppState,
    public_key: &str,
    path: &str,
    headers: &axum::http::HeaderMap,
    body: Body,
) -> Result<Response> {
    // Credentials are checked before any of the body is buffered
    let creation_ms = files::authorize_upload(state, public_key, path, headers)?;

    let limit = usize::try_from(state.config.max_site_size_bytes).unwrap_or(usize::MAX);
    let body = to_bytes(body, limit).await.map_err(|e| {
        tracing::warn!("Failed to read upload body for {}: {}", public_key, e);
        AppError::PayloadTooLarge(format!(
            "Request body could not be read within the {} byte limit",
            limit
        ))
    })?;

    let result = files::upload(state, public_key, path, creation_ms, headers, body).await?;
    Ok(Json(result).into_response())
}
