//! # beacon-settings
//!
//! Dispatch configuration for the beacon dispatcher.
//!
//! Settings are loaded from `~/.beacon/settings.json` with a layered approach:
//! 1. **Compiled defaults** ([`DispatchSettings::default()`])
//! 2. **User file** (deep-merged over defaults)
//! 3. **Environment variables** (`BEACON_*` overrides, highest priority)
//!
//! After authentication the collection service may push a [`RemoteConfig`];
//! it is merged into the live [`SettingsHandle`] the dispatcher reads every
//! cycle.

#![deny(unsafe_code)]

pub mod errors;
pub mod handle;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use handle::SettingsHandle;
pub use loader::{load_settings, load_settings_from_path, overlay, settings_path};
pub use types::*;
