//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SieveSettings::default()`]
//! 2. If `~/.sieve/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{Device, SieveSettings};

/// Resolve the path to the settings file (`~/.sieve/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".sieve").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SieveSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<SieveSettings> {
    let defaults = serde_json::to_value(SieveSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: SieveSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply environment variable overrides to loaded settings.
///
/// Each env var has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - `SIEVE_DEVICE` accepts `cpu` or `accelerator`
/// - Invalid values are silently ignored (fall back to file/default)
pub fn apply_env_overrides(settings: &mut SieveSettings) {
    // ── Embedding settings ──────────────────────────────────────────
    if let Some(v) = read_env_string("SIEVE_MODEL") {
        settings.embedding.model = v;
    }
    if let Some(v) = read_env_string("SIEVE_DTYPE") {
        settings.embedding.dtype = v;
    }
    if let Some(v) = read_env_string("SIEVE_CACHE_DIR") {
        settings.embedding.cache_dir = v;
    }
    if let Some(v) = read_env_string("SIEVE_DEVICE") {
        if let Some(device) = parse_device(&v) {
            settings.embedding.device = device;
        }
    }
    if let Some(v) = read_env_usize("SIEVE_BATCH_SIZE", 1, 1024) {
        settings.embedding.batch_size = v;
    }
    if let Some(v) = read_env_usize("SIEVE_MAX_LENGTH", 1, 32_768) {
        settings.embedding.max_length = Some(v);
    }
    if let Some(v) = read_env_usize("SIEVE_LOG_EVERY", 0, 1_000_000) {
        settings.embedding.log_every = v;
    }

    // ── Filter settings ─────────────────────────────────────────────
    if let Some(v) = read_env_usize("SIEVE_TOP_K", 0, 1_000_000) {
        settings.filter.top_k = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a device name.
///
/// Accepts (case-insensitive): `cpu` or `accelerator`.
pub fn parse_device(val: &str) -> Option<Device> {
    match val.trim().to_lowercase().as_str() {
        "cpu" => Some(Device::Cpu),
        "accelerator" => Some(Device::Accelerator),
        _ => None,
    }
}

/// Parse a string as a `usize` within `[min, max]`.
pub fn parse_usize_in_range(val: &str, min: usize, max: usize) -> Option<usize> {
    val.trim()
        .parse::<usize>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| parse_usize_in_range(&v, min, max))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.embedding.batch_size, 8);
        assert_eq!(settings.filter.top_k, 50);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"embedding": {"batchSize": 16, "device": "cpu"}}"#,
        )
        .unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.embedding.batch_size, 16);
        assert_eq!(settings.embedding.device, Device::Cpu);
        // Untouched fields keep their defaults.
        assert_eq!(settings.embedding.dimensions, 384);
        assert_eq!(settings.filter.top_k, 50);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }

    #[test]
    fn deep_merge_nested_objects() {
        let target = json!({"a": {"x": 1, "y": 2}, "b": 3});
        let source = json!({"a": {"y": 20}});
        let merged = deep_merge(target, source);
        assert_eq!(merged, json!({"a": {"x": 1, "y": 20}, "b": 3}));
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        let target = json!({"a": [1, 2, 3]});
        let source = json!({"a": [4]});
        let merged = deep_merge(target, source);
        assert_eq!(merged, json!({"a": [4]}));
    }

    #[test]
    fn deep_merge_skips_nulls() {
        let target = json!({"a": 1, "b": 2});
        let source = json!({"a": null, "b": 20});
        let merged = deep_merge(target, source);
        assert_eq!(merged, json!({"a": 1, "b": 20}));
    }

    #[test]
    fn deep_merge_adds_new_keys() {
        let target = json!({"a": 1});
        let source = json!({"b": 2});
        let merged = deep_merge(target, source);
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn parse_device_accepts_known_values() {
        assert_eq!(parse_device("cpu"), Some(Device::Cpu));
        assert_eq!(parse_device("CPU"), Some(Device::Cpu));
        assert_eq!(parse_device(" accelerator "), Some(Device::Accelerator));
        assert_eq!(parse_device("gpu"), None);
        assert_eq!(parse_device(""), None);
    }

    #[test]
    fn parse_usize_respects_range() {
        assert_eq!(parse_usize_in_range("8", 1, 1024), Some(8));
        assert_eq!(parse_usize_in_range(" 16 ", 1, 1024), Some(16));
        assert_eq!(parse_usize_in_range("0", 1, 1024), None);
        assert_eq!(parse_usize_in_range("2048", 1, 1024), None);
        assert_eq!(parse_usize_in_range("abc", 1, 1024), None);
        assert_eq!(parse_usize_in_range("-1", 1, 1024), None);
    }

    #[test]
    fn settings_path_under_home() {
        let path = settings_path();
        assert!(path.ends_with(".sieve/settings.json"));
    }
}
