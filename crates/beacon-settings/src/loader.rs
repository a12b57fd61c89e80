//! Reading [`DispatchSettings`] from disk and the process environment.
//!
//! Layers, lowest first: compiled defaults, the JSON settings file, then
//! `BEACON_*` variables. The file may name only the keys it changes; a
//! partial `events` object keeps the remaining event defaults. The merged
//! result is validated before it is returned.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{DispatchSettings, OverflowPolicy};

/// `$BEACON_SETTINGS` if set, otherwise `~/.beacon/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = std::env::var_os("BEACON_SETTINGS").filter(|v| !v.is_empty()) {
        return PathBuf::from(explicit);
    }
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    home.join(".beacon").join("settings.json")
}

/// [`load_settings_from_path`] on [`settings_path`].
pub fn load_settings() -> Result<DispatchSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` and apply environment overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// [`DispatchSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<DispatchSettings> {
    let mut layered = serde_json::to_value(DispatchSettings::default())?;
    if path.exists() {
        debug!(path = %path.display(), "loading settings file");
        let file: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        overlay(&mut layered, file);
    } else {
        debug!(path = %path.display(), "no settings file, using defaults");
    }

    let mut settings: DispatchSettings = serde_json::from_value(layered)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Write `layer` over `base` in place. Nested objects merge key by key,
/// anything else replaces, and `null` leaves the base value alone.
pub fn overlay(base: &mut Value, layer: Value) {
    match (base, layer) {
        (_, Value::Null) => {}
        (Value::Object(map), Value::Object(entries)) => {
            for (key, value) in entries {
                match map.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None if !value.is_null() => {
                        let _ = map.insert(key, value);
                    }
                    None => {}
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply `BEACON_*` variables. Unparseable or out-of-range values are
/// logged and the file or default value is kept.
pub fn apply_env_overrides(settings: &mut DispatchSettings) {
    if let Some(url) = env_text("BEACON_REST_URL") {
        settings.rest_url = Some(url);
    }
    if let Some(n) = env_number("BEACON_RETRY_COUNT", 1..=100) {
        settings.retry_count = n;
    }
    if let Some(ms) = env_number("BEACON_RETRY_INTERVAL_MS", 0..=600_000) {
        settings.retry_interval_ms = ms;
    }
    if let Some(ms) = env_number("BEACON_STRAGGLER_TIMEOUT_MS", 0..=86_400_000) {
        settings.straggler_timeout_ms = ms;
    }
    if let Some(ms) = env_number("BEACON_REQUEST_TIMEOUT_MS", 100..=600_000) {
        settings.request_timeout_ms = ms;
    }
    if let Some(retain) = env_flag("BEACON_RETAIN_AFTER_SENT") {
        settings.retain_after_sent = retain;
    }
    if let Some(raw) = env_text("BEACON_OVERFLOW_POLICY") {
        match serde_json::from_value::<OverflowPolicy>(Value::String(raw.clone())) {
            Ok(policy) => settings.overflow_policy = policy,
            Err(_) => warn!(value = %raw, "unknown BEACON_OVERFLOW_POLICY, ignoring"),
        }
    }

    for (name, store) in [
        ("BEACON_EVENTS_BATCH_SIZE", &mut settings.events),
        ("BEACON_LOGS_BATCH_SIZE", &mut settings.logs),
        ("BEACON_TELEMETRY_BATCH_SIZE", &mut settings.telemetry),
    ] {
        if let Some(size) = env_number(name, 1..=10_000) {
            store.batch_size = size;
        }
    }
    if let Some(limit) = env_number("BEACON_MAX_CACHED_ITEMS", 0..=10_000_000) {
        for store in [
            &mut settings.events,
            &mut settings.logs,
            &mut settings.telemetry,
            &mut settings.storage,
        ] {
            store.max_cached_items = limit;
        }
    }

    if let Some(level) = env_text("BEACON_LOG_LEVEL") {
        settings.logging.level = level;
    }
    if let Some(json) = env_flag("BEACON_LOG_JSON") {
        settings.logging.json = json;
    }
}

/// Parse a numeric override, rejecting values outside `bounds`.
pub fn parse_number<T: FromStr + PartialOrd>(raw: &str, bounds: RangeInclusive<T>) -> Option<T> {
    raw.trim().parse().ok().filter(|n| bounds.contains(n))
}

/// Parse a switch: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_flag(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if ["true", "1", "yes", "on"].iter().any(|t| raw.eq_ignore_ascii_case(t)) {
        Some(true)
    } else if ["false", "0", "no", "off"].iter().any(|f| raw.eq_ignore_ascii_case(f)) {
        Some(false)
    } else {
        None
    }
}

fn env_text(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_number<T: FromStr + PartialOrd>(name: &str, bounds: RangeInclusive<T>) -> Option<T> {
    let raw = env_text(name)?;
    let parsed = parse_number(&raw, bounds);
    if parsed.is_none() {
        warn!(key = name, value = %raw, "out-of-range or non-numeric override, ignoring");
    }
    parsed
}

fn env_flag(name: &str) -> Option<bool> {
    let raw = env_text(name)?;
    let parsed = parse_flag(&raw);
    if parsed.is_none() {
        warn!(key = name, value = %raw, "not a boolean override, ignoring");
    }
    parsed
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use crate::types::BatchingMode;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn overlay_merges_objects_and_replaces_leaves() {
        let mut base = json!({
            "events": {"batchSize": 16, "maxCachedItems": 1024},
            "tags": [1, 2, 3],
            "logging": {"json": false}
        });
        overlay(
            &mut base,
            json!({"events": {"batchSize": 4}, "tags": [4], "logging": 7, "restUrl": null}),
        );
        assert_eq!(
            base,
            json!({
                "events": {"batchSize": 4, "maxCachedItems": 1024},
                "tags": [4],
                "logging": 7
            })
        );
    }

    #[test]
    fn overlay_null_keeps_base() {
        let mut base = json!({"retryCount": 3});
        overlay(&mut base, json!({"retryCount": null}));
        assert_eq!(base["retryCount"], 3);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/beacon/settings.json");
        let settings = load_settings_from_path(path).unwrap();
        let defaults = DispatchSettings::default();
        assert_eq!(settings.retry_count, defaults.retry_count);
        assert_eq!(settings.events, defaults.events);
    }

    #[test]
    fn load_partial_json_keeps_per_kind_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"restUrl": "https://collect.example.com/v1/", "storage": {"batchSize": 2}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(
            settings.rest_url.as_deref(),
            Some("https://collect.example.com/v1/")
        );
        assert_eq!(settings.storage.batch_size, 2);
        // deep merge keeps the storage-specific batching default
        assert_eq!(settings.storage.batching, BatchingMode::PerRecord);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert_matches!(result, Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"logs": {"batchSize": 0}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert_matches!(result, Err(SettingsError::InvalidValue(msg)) if msg.contains("log"));
    }

    #[test]
    fn flags_and_numbers() {
        for raw in ["true", "1", "YES", " on "] {
            assert_eq!(parse_flag(raw), Some(true), "{raw}");
        }
        for raw in ["false", "0", "No", "OFF"] {
            assert_eq!(parse_flag(raw), Some(false), "{raw}");
        }
        assert_eq!(parse_flag("maybe"), None);

        assert_eq!(parse_number::<u64>("3000", 0..=600_000), Some(3000));
        assert_eq!(parse_number::<u32>("0", 1..=100), None);
        assert_eq!(parse_number::<u32>("101", 1..=100), None);
        assert_eq!(parse_number::<usize>("-1", 0..=10), None);
    }
}
