/// Reserved path of the site metadata file, never writable by uploads
pub const INFO_FILE_NAME: &str = "/.site.json";

/// Length of a generated public key
pub const PUBLIC_KEY_LENGTH: usize = 20;

/// Characters a public key is drawn from
pub const PUBLIC_KEY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Width of the trailing creation window used for quota accounting
pub const QUOTA_WINDOW_SECS: i64 = 86_400;

/// Status codes accepted from the quota service
pub const QUOTA_ALLOWED_STATUSES: [u16; 2] = [200, 201];

/// Custom not-found pages, tried in order
pub const NOT_FOUND_PAGES: [&str; 2] = ["/404.html", "/404.txt"];

// =============================================================================
// Defaults
// =============================================================================

pub const DEFAULT_SITES_PER_DAY: u64 = 50;

/// 20 MiB
pub const DEFAULT_MAX_SITE_SIZE_BYTES: u64 = 20 * 1024 * 1024;

/// 30 days
pub const DEFAULT_SITE_TTL_SECS: i64 = 30 * 24 * 3600;

/// 1 hour
pub const DEFAULT_UPLOAD_TTL_SECS: i64 = 3600;

pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 300;

// =============================================================================
// Error Messages
// =============================================================================

pub const ERR_MISSING_CREDENTIAL: &str = "Authorization header required";

pub const ERR_MALFORMED_TOKEN: &str = "Invalid authorization token";

pub const ERR_INVALID_SIGNATURE: &str = "Invalid authorization signature";

pub const ERR_MISSING_USER_AGENT: &str = "No \"User-Agent\" header found";
