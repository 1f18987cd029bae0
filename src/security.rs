use axum::http::HeaderMap;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;

use crate::constants::{
    ERR_INVALID_SIGNATURE, ERR_MALFORMED_TOKEN, ERR_MISSING_CREDENTIAL, PUBLIC_KEY_ALPHABET,
};
use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Headers a caller may carry its credential in
const CREDENTIAL_HEADERS: [&str; 2] = ["authorization", "authorisation"];

/// Hex length of an HMAC-SHA256 tag
const SIGNATURE_HEX_LENGTH: usize = 64;

// =============================================================================
// HMAC primitives
// =============================================================================

/// Compute the hex-encoded HMAC-SHA256 of `data`
pub fn sign_hmac(data: &str, secret: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| AppError::Internal("Failed to create HMAC instance".to_string()))?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify HMAC-SHA256 signature
///
/// The comparison is constant-time.
///
/// # Arguments
/// * `data` - The data that was signed
/// * `signature` - The hex-encoded HMAC signature
/// * `secret` - The signing secret
pub fn verify_hmac(data: &str, signature: &str, secret: &[u8]) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(m) => m,
        Err(_) => {
            tracing::error!("Failed to create HMAC instance");
            return false;
        }
    };

    mac.update(data.as_bytes());

    let sig_bytes = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => {
            tracing::warn!("Invalid hex signature format");
            return false;
        }
    };

    mac.verify_slice(&sig_bytes).is_ok()
}

/// Random string drawn from the public key alphabet using the OS CSPRNG
pub fn create_random_string(length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| PUBLIC_KEY_ALPHABET[rng.gen_range(0..PUBLIC_KEY_ALPHABET.len())] as char)
        .collect()
}

// =============================================================================
// Capability tokens
// =============================================================================

/// What a token authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    /// Create sites; subject is the quota fingerprint
    Create,
    /// Upload files; subject is the site public key
    Upload,
}

/// Signed token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub scope: TokenScope,
    pub subject: String,
    /// Unix milliseconds
    pub creation: i64,
}

/// Failure decoding a token (constrained to only possible errors)
#[derive(Debug, PartialEq, Eq)]
pub enum TokenError {
    Missing,
    Malformed,
    InvalidSignature,
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Missing => AppError::Unauthorized(ERR_MISSING_CREDENTIAL.to_string()),
            TokenError::Malformed => AppError::Unauthorized(ERR_MALFORMED_TOKEN.to_string()),
            TokenError::InvalidSignature => AppError::Forbidden(ERR_INVALID_SIGNATURE.to_string()),
        }
    }
}

/// Signs and verifies stateless capability tokens
///
/// Token layout: `base64url(json(claims)) + "." + hex(hmac_sha256(secret, encoded_claims))`.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Arc<[u8]>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl TokenCodec {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::from(secret.as_bytes()),
        }
    }

    pub fn sign(&self, claims: &TokenClaims) -> Result<String> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signature = sign_hmac(&payload, &self.secret)?;
        Ok(format!("{}.{}", payload, signature))
    }

    /// Check the signature and return the embedded claims
    pub fn decode(&self, token: &str) -> std::result::Result<TokenClaims, TokenError> {
        let (payload, signature) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        if payload.is_empty() || !is_hex_digest(signature) {
            return Err(TokenError::Malformed);
        }

        if !verify_hmac(payload, signature, &self.secret) {
            return Err(TokenError::InvalidSignature);
        }

        let raw = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        serde_json::from_slice(&raw).map_err(|_| TokenError::Malformed)
    }

    /// Upload token (`secret_key`) bound to a site and its creation instant
    pub fn sign_upload(&self, public_key: &str, creation_ms: i64) -> Result<String> {
        self.sign(&TokenClaims {
            scope: TokenScope::Upload,
            subject: public_key.to_string(),
            creation: creation_ms,
        })
    }

    /// Mint a create credential for a quota fingerprint
    pub fn issue_create_key(&self, subject: &str) -> Result<String> {
        self.sign(&TokenClaims {
            scope: TokenScope::Create,
            subject: subject.to_string(),
            creation: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Validate the caller's create credential, returning its quota fingerprint
    pub fn verify_create(&self, headers: &HeaderMap) -> Result<String> {
        let token = credential(headers).ok_or(TokenError::Missing)?;
        let claims = self.decode(token)?;

        if claims.scope != TokenScope::Create || claims.subject.is_empty() {
            tracing::warn!("Create attempted with a non-create token");
            return Err(AppError::Forbidden(
                "Token is not authorized to create sites".to_string(),
            ));
        }

        Ok(claims.subject)
    }

    /// Validate an upload token against the target site
    ///
    /// # Arguments
    /// * `public_key` - Site named in the request path
    /// * `headers` - Request headers; the token is read from `Authorization`
    ///   (or the `Authorisation` spelling)
    /// * `upload_ttl_ms` - Length of the upload window after site creation
    /// * `now_ms` - Current time in Unix milliseconds
    ///
    /// # Returns
    /// The site creation instant (Unix milliseconds) embedded in the token.
    ///
    /// # Errors
    /// * `Unauthorized` - token missing or malformed
    /// * `Forbidden` - bad signature, wrong scope, or a token for another site
    /// * `Expired` - the upload window has closed
    ///
    /// # Security Note
    /// Tokens are stateless and cannot be revoked; the upload window is the
    /// only thing that ends upload rights. The signature is checked in
    /// constant time before any claim is trusted.
    pub fn verify_upload(
        &self,
        public_key: &str,
        headers: &HeaderMap,
        upload_ttl_ms: i64,
        now_ms: i64,
    ) -> Result<i64> {
        let token = credential(headers).ok_or(TokenError::Missing)?;
        let claims = self.decode(token)?;

        if claims.scope != TokenScope::Upload || claims.subject != public_key {
            tracing::warn!("Upload token does not match site {}", public_key);
            return Err(AppError::Forbidden(format!(
                "Token is not valid for site \"{}\"",
                public_key
            )));
        }

        if now_ms >= claims.creation + upload_ttl_ms {
            return Err(AppError::Expired);
        }

        Ok(claims.creation)
    }
}

/// Shape of a hex-encoded SHA-256 MAC
fn is_hex_digest(signature: &str) -> bool {
    signature.len() == SIGNATURE_HEX_LENGTH && signature.bytes().all(|c| c.is_ascii_hexdigit())
}

fn credential(headers: &HeaderMap) -> Option<&str> {
    CREDENTIAL_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PUBLIC_KEY_LENGTH;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret-key";
    const HOUR_MS: i64 = 3_600_000;

    fn headers_with(name: &'static str, token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(token).unwrap());
        headers
    }

    // =========================================================================
    // HMAC Tests
    // =========================================================================

    #[test]
    fn test_verify_hmac_valid() {
        let signature = sign_hmac("test data", SECRET.as_bytes()).unwrap();
        assert!(verify_hmac("test data", &signature, SECRET.as_bytes()));
    }

    #[test]
    fn test_verify_hmac_invalid_signature() {
        let wrong_signature = "0".repeat(64);
        assert!(!verify_hmac("test data", &wrong_signature, SECRET.as_bytes()));
    }

    #[test]
    fn test_verify_hmac_wrong_secret() {
        let signature = sign_hmac("test data", SECRET.as_bytes()).unwrap();
        assert!(!verify_hmac("test data", &signature, b"wrong-secret"));
    }

    #[test]
    fn test_verify_hmac_non_hex() {
        assert!(!verify_hmac("test data", "not-hex!", SECRET.as_bytes()));
    }

    #[test]
    fn test_random_string_shape() {
        let a = create_random_string(PUBLIC_KEY_LENGTH);
        let b = create_random_string(PUBLIC_KEY_LENGTH);

        assert_eq!(a.len(), PUBLIC_KEY_LENGTH);
        assert!(a.bytes().all(|c| PUBLIC_KEY_ALPHABET.contains(&c)));
        assert_ne!(a, b);
    }

    // =========================================================================
    // Token Tests
    // =========================================================================

    #[test]
    fn test_sign_is_deterministic() {
        let codec = TokenCodec::new(SECRET);
        let claims = TokenClaims {
            scope: TokenScope::Upload,
            subject: "abc".to_string(),
            creation: 1_700_000_000_000,
        };

        assert_eq!(codec.sign(&claims).unwrap(), codec.sign(&claims).unwrap());
        assert_eq!(codec.decode(&codec.sign(&claims).unwrap()).unwrap(), claims);
    }

    #[test]
    fn test_decode_rejects_tampered_payload() {
        let codec = TokenCodec::new(SECRET);
        let token = codec.sign_upload("aaaa", 1_000).unwrap();
        let (_, signature) = token.split_once('.').unwrap();

        let forged_payload = URL_SAFE_NO_PAD
            .encode(br#"{"scope":"upload","subject":"bbbb","creation":1000}"#);
        let forged = format!("{}.{}", forged_payload, signature);

        assert_eq!(codec.decode(&forged), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_decode_rejects_other_secret() {
        let token = TokenCodec::new("other-secret").sign_upload("aaaa", 1_000).unwrap();
        assert_eq!(
            TokenCodec::new(SECRET).decode(&token),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_decode_malformed() {
        let codec = TokenCodec::new(SECRET);
        assert_eq!(codec.decode("no-dot-here"), Err(TokenError::Malformed));
        assert_eq!(codec.decode(".abc"), Err(TokenError::Malformed));
        assert_eq!(codec.decode("abc.zz"), Err(TokenError::Malformed));
        assert_eq!(codec.decode("abc."), Err(TokenError::Malformed));
        assert_eq!(
            codec.decode(&format!("abc.{}", "g".repeat(SIGNATURE_HEX_LENGTH))),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_verify_upload_non_hex_signature_is_unauthorized() {
        let codec = TokenCodec::new(SECRET);
        let headers = headers_with("authorization", "abc.zz");

        let result = codec.verify_upload("site1", &headers, HOUR_MS, 0);
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_verify_upload_accepts_fresh_token() {
        let codec = TokenCodec::new(SECRET);
        let creation = 1_700_000_000_000;
        let token = codec.sign_upload("site1", creation).unwrap();
        let headers = headers_with("authorization", &token);

        let result = codec.verify_upload("site1", &headers, HOUR_MS, creation + 1_000);
        assert_eq!(result.unwrap(), creation);
    }

    #[test]
    fn test_verify_upload_accepts_british_header() {
        let codec = TokenCodec::new(SECRET);
        let token = codec.sign_upload("site1", 0).unwrap();
        let headers = headers_with("authorisation", &token);

        assert!(codec.verify_upload("site1", &headers, HOUR_MS, 10).is_ok());
    }

    #[test]
    fn test_verify_upload_wrong_site_is_forbidden() {
        let codec = TokenCodec::new(SECRET);
        let token = codec.sign_upload("site1", 0).unwrap();
        let headers = headers_with("authorization", &token);

        let result = codec.verify_upload("site2", &headers, HOUR_MS, 10);
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn test_verify_upload_expired() {
        let codec = TokenCodec::new(SECRET);
        let token = codec.sign_upload("site1", 0).unwrap();
        let headers = headers_with("authorization", &token);

        let result = codec.verify_upload("site1", &headers, HOUR_MS, HOUR_MS);
        assert!(matches!(result, Err(AppError::Expired)));
    }

    #[test]
    fn test_verify_upload_missing_header() {
        let codec = TokenCodec::new(SECRET);
        let result = codec.verify_upload("site1", &HeaderMap::new(), HOUR_MS, 0);
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_create_token_cannot_upload() {
        let codec = TokenCodec::new(SECRET);
        let token = codec.issue_create_key("site1").unwrap();
        let headers = headers_with("authorization", &token);

        let result = codec.verify_upload("site1", &headers, HOUR_MS, 0);
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn test_verify_create_returns_fingerprint() {
        let codec = TokenCodec::new(SECRET);
        let token = codec.issue_create_key("ci-runner").unwrap();
        let headers = headers_with("authorization", &token);

        assert_eq!(codec.verify_create(&headers).unwrap(), "ci-runner");
    }

    #[test]
    fn test_upload_token_cannot_create() {
        let codec = TokenCodec::new(SECRET);
        let token = codec.sign_upload("site1", 0).unwrap();
        let headers = headers_with("authorization", &token);

        assert!(matches!(
            codec.verify_create(&headers),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_codec_debug_redacts_secret() {
        let rendered = format!("{:?}", TokenCodec::new(SECRET));
        assert!(!rendered.contains(SECRET));
    }
}
