//! Bearer token inspection.
//!
//! The client never verifies the token's signature; it only reads the `exp`
//! claim to schedule proactive re-authentication.

use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

/// Expiration instant of a JWT, `None` when it cannot be read.
pub fn decode_expiration(token: &str) -> Option<DateTime<Utc>> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    match decode::<ExpiryClaim>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(data) => DateTime::from_timestamp(data.claims.exp, 0),
        Err(e) => {
            debug!(error = %e, "token expiration unreadable");
            None
        }
    }
}
