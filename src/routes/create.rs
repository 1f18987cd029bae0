use axum::{extract::State, http::HeaderMap, Json};

use crate::error::Result;
use crate::models::SiteCreated;
use crate::{sites, AppState, Config};

/// Create a new site
///
/// POST /create/
///
/// Requires a create key in the `Authorization` header and a `User-Agent`.
/// Returns the site URL, its expiration and the `secret_key` used to upload
/// files until `upload_expiration`.
pub async fn create_site(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SiteCreated>> {
    let origin = request_origin(&state.config, &headers);
    let created = sites::create_site(&state, &headers, &origin).await?;
    Ok(Json(created))
}

/// Scheme and host that site URLs are built from
pub fn request_origin(config: &Config, headers: &HeaderMap) -> String {
    if let Some(origin) = &config.public_origin {
        return origin.clone();
    }

    let scheme = header(headers, "x-forwarded-proto").unwrap_or("http");
    match header(headers, "host") {
        Some(host) => format!("{}://{}", scheme, host),
        None => format!("{}://{}", scheme, config.server_address()),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
