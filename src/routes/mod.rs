pub mod create;
pub mod health;
pub mod site;

pub use create::create_site;
pub use health::health_check;
pub use site::site_request;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::any::Any;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any as AnyHeaders, CorsLayer},
    trace::TraceLayer,
};

use crate::error::{AppError, ErrorDetail};
use crate::AppState;

/// Build the application router
pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/create", post(create_site))
        .route("/create/", post(create_site))
        .fallback(site_request);

    with_layers(routes, state)
}

/// Wrap routes in the tracing, CORS, error-detail and panic layers
fn with_layers(routes: Router<AppState>, state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    routes
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    expose_error_detail,
                ))
                .layer(CatchPanicLayer::custom(handle_panic)),
        )
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid allowed origin: {}", o);
                        None
                    }
                })
                .collect::<Vec<_>>(),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AnyHeaders)
}

async fn index() -> Html<&'static str> {
    Html(
        r#"<h1>Ephemeral Sites</h1>

<p>Create a site with <code>POST /create/</code>, then upload files to the returned URL
using the <code>secret_key</code> as the <code>Authorization</code> header.</p>
"#,
    )
}

/// Turn a handler panic into an opaque 500
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    AppError::Internal(format!("panic while handling request: {}", message)).into_response()
}

/// Render internal error detail into 500 bodies when debug mode is on
async fn expose_error_detail(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if !state.config.debug {
        return response;
    }

    match response.extensions().get::<ErrorDetail>().cloned() {
        Some(ErrorDetail(detail)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Internal server error",
                "detail": detail,
            })),
        )
            .into_response(),
        None => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::open_database, Config};
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(temp_dir: &TempDir, debug: bool) -> AppState {
        let config = Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            database_path: String::new(),
            allowed_origins: vec!["*".to_string()],
            environment: "test".to_string(),
            app_secret_key: "test-secret-key".to_string(),
            public_origin: None,
            quota_service_url: None,
            quota_service_api_key: None,
            sites_per_day: 50,
            max_site_size_bytes: 1024,
            site_ttl_secs: 3600,
            upload_ttl_secs: 600,
            purge_interval_secs: 300,
            debug,
        };
        let db = open_database(temp_dir.path().join("routes.db")).unwrap();
        AppState::new(db, config).unwrap()
    }

    async fn explode() -> &'static str {
        panic!("handler blew up")
    }

    async fn panic_response(debug: bool) -> (StatusCode, serde_json::Value) {
        let temp_dir = TempDir::new().unwrap();
        let routes = Router::new().route("/boom", get(explode));
        let app = with_layers(routes, test_state(&temp_dir, debug));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/boom")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_panic_is_opaque_500() {
        let (status, body) = panic_response(false).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert!(body.get("detail").is_none());
    }

    #[tokio::test]
    async fn test_panic_detail_shown_in_debug_mode() {
        let (status, body) = panic_response(true).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .contains("handler blew up"));
    }
}
