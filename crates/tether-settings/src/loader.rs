//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If `~/.tether/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tether_core::BuildMode;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::TetherSettings;

/// Accepted client socket timeouts, in seconds.
pub const SOCKET_TIMEOUT_SECS: RangeInclusive<u64> = 1..=3_600;

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TETHER_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    apply_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_overrides_with<F>(settings: &mut TetherSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Connection ──────────────────────────────────────────────────
    if let Some(v) = string("TETHER_HOST") {
        settings.connection.host = v;
    }
    if let Some(v) = read_parsed(&lookup, "TETHER_PORT", |v| parse_u16_range(v, 0, u16::MAX)) {
        settings.connection.port = v;
    }

    // ── Mode ────────────────────────────────────────────────────────
    if let Some(v) = read_parsed(&lookup, "TETHER_MODE", parse_mode) {
        settings.mode = v;
    }

    // ── Sessions ────────────────────────────────────────────────────
    if let Some(v) = read_parsed(&lookup, "TETHER_ALLOW_MULTIPLE_SESSIONS", parse_bool) {
        settings.server.allow_multiple_sessions = v;
    }
    if let Some(v) = read_parsed(&lookup, "TETHER_SOCKET_TIMEOUT", parse_socket_timeout) {
        settings.client.socket_timeout_secs = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = string("TETHER_LOG_PATH") {
        settings.logging.log_path = Some(v);
    }
}

fn read_parsed<T, F, P>(lookup: &F, name: &str, parse: P) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let val = lookup(name)?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `debug` or `release` (case-insensitive).
pub fn parse_mode(val: &str) -> Option<BuildMode> {
    match val.to_lowercase().as_str() {
        "debug" => Some(BuildMode::Debug),
        "release" => Some(BuildMode::Release),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a client socket timeout in seconds, within [`SOCKET_TIMEOUT_SECS`].
pub fn parse_socket_timeout(val: &str) -> Option<u64> {
    parse_u64_range(
        val.trim(),
        *SOCKET_TIMEOUT_SECS.start(),
        *SOCKET_TIMEOUT_SECS.end(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> TetherSettings {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut settings = TetherSettings::default();
        apply_overrides_with(&mut settings, |name| env.get(name).cloned());
        settings
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"connection": {"port": 1337, "host": "localhost"}});
        let source = serde_json::json!({"connection": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["connection"]["port"], 9090);
        assert_eq!(merged["connection"]["host"], "localhost");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, TetherSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"mode": "release", "connection": {"port": 9090}, "server": {"allowMultipleSessions": true}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.mode, BuildMode::Release);
        assert_eq!(settings.connection.port, 9090);
        assert_eq!(settings.connection.host, "localhost");
        assert!(settings.server.allow_multiple_sessions);
        assert_eq!(settings.server.handshake_timeout_ms, 2_000);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"maxFrameBytes": 0}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    #[test]
    fn null_socket_timeout_in_file_keeps_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"client": {"socketTimeoutSecs": null}}"#).unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.client.socket_timeout_secs, Some(5));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let settings = overrides(&[
            ("TETHER_HOST", "0.0.0.0"),
            ("TETHER_PORT", "4000"),
            ("TETHER_MODE", "Release"),
            ("TETHER_ALLOW_MULTIPLE_SESSIONS", "yes"),
            ("TETHER_SOCKET_TIMEOUT", "30"),
            ("TETHER_LOG_LEVEL", "debug"),
            ("TETHER_LOG_PATH", "/var/log/tether.log"),
        ]);
        assert_eq!(settings.connection.host, "0.0.0.0");
        assert_eq!(settings.connection.port, 4000);
        assert_eq!(settings.mode, BuildMode::Release);
        assert!(settings.server.allow_multiple_sessions);
        assert_eq!(settings.client.socket_timeout_secs, Some(30));
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.log_path.as_deref(), Some("/var/log/tether.log"));
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let settings = overrides(&[
            ("TETHER_PORT", "99999"),
            ("TETHER_MODE", "production"),
            ("TETHER_ALLOW_MULTIPLE_SESSIONS", "sometimes"),
            ("TETHER_SOCKET_TIMEOUT", "0"),
            ("TETHER_HOST", ""),
        ]);
        assert_eq!(settings, TetherSettings::default());
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "yes", "on", "TRUE"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "no", "off", "Off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_mode_variants() {
        assert_eq!(parse_mode("debug"), Some(BuildMode::Debug));
        assert_eq!(parse_mode("RELEASE"), Some(BuildMode::Release));
        assert_eq!(parse_mode("prod"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("0", 0, u16::MAX), Some(0));
        assert_eq!(parse_u16_range("65536", 0, u16::MAX), None);
        assert_eq!(parse_u64_range("500", 1000, 2000), None);
        assert_eq!(parse_u64_range("1500", 1000, 2000), Some(1500));
        assert_eq!(parse_u64_range("abc", 1000, 2000), None);
    }
}
