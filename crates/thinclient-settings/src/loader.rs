//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ThinClientSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `THINCLIENT_*` overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ThinClientSettings;

/// Resolve the path to the settings file (`~/.thinclient/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".thinclient").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ThinClientSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ThinClientSettings> {
    load_with(path, |name| std::env::var(name).ok())
}

fn load_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<ThinClientSettings> {
    let defaults = serde_json::to_value(ThinClientSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ThinClientSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `THINCLIENT_*` environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut ThinClientSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Invalid values are ignored with a warning.
fn apply_overrides(settings: &mut ThinClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("THINCLIENT_HOST") {
        settings.server.host = Some(v);
    }
    if let Some(v) = env.u16("THINCLIENT_PORT", 1, 65535) {
        settings.server.port = Some(v);
    }
    if let Some(v) = env.string("THINCLIENT_CLIENT_ID") {
        settings.client.client_id = Some(v);
    }
    if let Some(v) = env.u64("THINCLIENT_RECONNECT_BASE_MS", 10, 600_000) {
        settings.reconnect.base_delay_ms = v;
    }
    if let Some(v) = env.u64("THINCLIENT_RECONNECT_MAX_MS", 10, 3_600_000) {
        settings.reconnect.max_delay_ms = v;
    }
    if let Some(v) = env.string("THINCLIENT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("THINCLIENT_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;
    use thinclient_core::logging::capture_logs;
    use tracing::Level;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_map(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"host": "a", "port": 1}});
        let source = serde_json::json!({"server": {"port": 2}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["host"], "a");
        assert_eq!(merged["server"]["port"], 2);
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_with(Path::new("/nonexistent/settings.json"), no_env).unwrap();
        assert_eq!(settings, ThinClientSettings::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"host": "192.168.7.1", "port": 8891}, "input": {"longPressMs": 600}}"#,
        )
        .unwrap();

        let settings = load_with(&path, no_env).unwrap();
        assert_eq!(settings.server.host.as_deref(), Some("192.168.7.1"));
        assert_eq!(settings.server.port, Some(8891));
        assert_eq!(settings.input.long_press_ms, 600);
        assert_eq!(settings.reconnect.base_delay_ms, 1_000);
    }

    #[test]
    fn env_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"host": "file-host", "port": 1000}}"#).unwrap();

        let env = env_map(&[
            ("THINCLIENT_HOST", "env-host"),
            ("THINCLIENT_CLIENT_ID", "car-1"),
            ("THINCLIENT_LOG_JSON", "yes"),
        ]);
        let settings = load_with(&path, env).unwrap();
        assert_eq!(settings.server.host.as_deref(), Some("env-host"));
        assert_eq!(settings.server.port, Some(1000));
        assert_eq!(settings.client.client_id.as_deref(), Some("car-1"));
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_value_is_ignored_with_warning() {
        let (logs, _guard) = capture_logs();
        let env = env_map(&[("THINCLIENT_PORT", "99999"), ("THINCLIENT_HOST", "")]);
        let mut settings = ThinClientSettings::default();
        apply_overrides(&mut settings, env);

        assert!(settings.server.port.is_none());
        assert!(settings.server.host.is_none());
        assert!(logs.has_event(Level::WARN, "invalid u16 env var"));
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load_with(&path, no_env), Err(SettingsError::Json(_))));
    }

    #[test]
    fn inconsistent_backoff_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"reconnect": {"baseDelayMs": 5000, "maxDelayMs": 100}}"#)
            .unwrap();
        assert!(matches!(
            load_with(&path, no_env),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "YES", "on"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "No", "OFF"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8891", 1, 65535), Some(8891));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("abc", 1, 65535), None);
        assert_eq!(parse_u64_range("500", 10, 600_000), Some(500));
        assert_eq!(parse_u64_range("5", 10, 600_000), None);
    }
}
