//! Request signing.
//!
//! Every authenticated request carries the bearer token, a millisecond
//! timestamp and a signature binding both to the body:
//!
//! ```text
//! signature = base64(sha256(token + secret + timestamp + base64(sha256(body))))
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use beacon_transport::HeaderList;
use sha2::{Digest, Sha256};

/// Bearer token header.
pub const AUTHORIZATION: &str = "Authorization";
/// Millisecond Unix timestamp header.
pub const TIMESTAMP_HEADER: &str = "X-Beacon-Timestamp";
/// Request signature header.
pub const SIGNATURE_HEADER: &str = "X-Beacon-Signature";

/// `base64(sha256(body))`.
pub fn body_checksum(body: &str) -> String {
    STANDARD.encode(Sha256::digest(body.as_bytes()))
}

/// Signature over token, secret, timestamp and body checksum.
pub fn sign(token: &str, secret: &str, timestamp: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(secret.as_bytes());
    hasher.update(timestamp.as_bytes());
    hasher.update(body_checksum(body).as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// The three authentication headers for one request.
pub fn signed_headers(token: &str, secret: &str, timestamp: &str, body: &str) -> HeaderList {
    vec![
        (AUTHORIZATION.to_string(), format!("Bearer {token}")),
        (TIMESTAMP_HEADER.to_string(), timestamp.to_string()),
        (SIGNATURE_HEADER.to_string(), sign(token, secret, timestamp, body)),
    ]
}
