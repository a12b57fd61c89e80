//! # beacon-auth
//!
//! Authentication for the beacon dispatcher.
//!
//! - [`AuthManager`]: login, re-authentication and two-step challenges
//! - [`SecretProvider`]: host hook for obtaining a fresh secret
//! - [`signing`]: bearer token plus body signature headers
//! - [`token`]: reading the token's expiration claim
//!
//! The app secret, token and signing secret live only in memory and are
//! redacted from every `Debug` output.

#![deny(unsafe_code)]

pub mod errors;
pub mod manager;
pub mod signing;
mod state;
pub mod token;
pub mod types;

pub use errors::AuthError;
pub use manager::{AuthManager, CONFIG_PATH, LOGIN_PATH, SecretProvider};
pub use types::{
    AuthChallenge, AuthIdentity, AuthOutcome, AuthPhase, Credentials, EnvironmentMetadata,
    GeoLocation,
};
