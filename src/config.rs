use std::env;
use std::str::FromStr;

use crate::constants::{
    DEFAULT_MAX_SITE_SIZE_BYTES, DEFAULT_PURGE_INTERVAL_SECS, DEFAULT_SITES_PER_DAY,
    DEFAULT_SITE_TTL_SECS, DEFAULT_UPLOAD_TTL_SECS,
};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_path: String,
    pub allowed_origins: Vec<String>,
    pub environment: String,
    pub app_secret_key: String,
    /// Scheme and host used when building site URLs (e.g. `https://sites.example.com`)
    pub public_origin: Option<String>,
    pub quota_service_url: Option<String>,
    pub quota_service_api_key: Option<String>,
    pub sites_per_day: u64,
    pub max_site_size_bytes: u64,
    pub site_ttl_secs: i64,
    pub upload_ttl_secs: i64,
    pub purge_interval_secs: u64,
    /// Include internal error detail in 500 responses
    pub debug: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists (development)
        dotenvy::dotenv().ok();

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = parse_var("SERVER_PORT", 8080)?;

        let database_path = env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "./data/ephemeral-sites.db".to_string());

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let app_secret_key = env::var("APP_SECRET_KEY")
            .map_err(|_| "APP_SECRET_KEY must be set for signing site tokens")?;

        Ok(Config {
            server_host,
            server_port,
            database_path,
            allowed_origins,
            environment,
            app_secret_key,
            public_origin: optional_var("PUBLIC_ORIGIN")
                .map(|origin| origin.trim_end_matches('/').to_string()),
            quota_service_url: optional_var("QUOTA_SERVICE_URL"),
            quota_service_api_key: optional_var("QUOTA_SERVICE_API_KEY"),
            sites_per_day: parse_var("SITES_PER_DAY", DEFAULT_SITES_PER_DAY)?,
            max_site_size_bytes: parse_var("MAX_SITE_SIZE_BYTES", DEFAULT_MAX_SITE_SIZE_BYTES)?,
            site_ttl_secs: parse_var("SITE_TTL_SECS", DEFAULT_SITE_TTL_SECS)?,
            upload_ttl_secs: parse_var("UPLOAD_TTL_SECS", DEFAULT_UPLOAD_TTL_SECS)?,
            purge_interval_secs: parse_var("PURGE_INTERVAL_SECS", DEFAULT_PURGE_INTERVAL_SECS)?,
            debug: parse_var("DEBUG", false)?,
        })
    }

    /// Get server address as string
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn site_ttl_ms(&self) -> i64 {
        self.site_ttl_secs * 1000
    }

    pub fn upload_ttl_ms(&self) -> i64 {
        self.upload_ttl_secs * 1000
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}
