pub mod rate_limit;
pub mod site;

pub use rate_limit::CreationLog;
pub use site::{FileMetadata, SiteCreated, SiteInfo, SiteSummary, StoredFile, UploadResult};
