use axum::body::Bytes;
use serde::{Deserialize, Serialize};

/// Small record stored alongside every value in the key-value store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub content_type: Option<String>,
    pub size: u64,
}

/// A value read back from the store together with its metadata
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub body: Bytes,
    pub metadata: FileMetadata,
}

/// Public site metadata, persisted as JSON at the reserved info path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteInfo {
    pub url: String,
    pub site_creation: String,
    pub site_expiration: String,
}

/// Site metadata plus the relative paths of every stored file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSummary {
    #[serde(flatten)]
    pub info: SiteInfo,
    pub files: Vec<String>,
}

/// Response returned to the caller after a site is created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteCreated {
    pub message: String,
    pub sites_created_24h: u64,
    pub secret_key: String,
    pub upload_expiration: String,
    #[serde(flatten)]
    pub info: SiteInfo,
}

/// Response returned after a file upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResult {
    pub path: String,
    pub content_type: Option<String>,
    pub size: u64,
    pub total_site_size: u64,
}
