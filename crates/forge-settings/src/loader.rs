//! Settings loading: defaults, file deep-merge, env overrides.

use std::env;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::ForgeSettings;

/// Default settings file location: `~/.forge/settings.json`.
#[must_use]
pub fn settings_path() -> PathBuf {
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".forge").join("settings.json")
}

/// Deep-merge `overlay` onto `base`. Objects merge recursively; any other
/// value in the overlay replaces the base value.
#[must_use]
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => overlay_val,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Load settings from the default path with env overrides applied.
pub fn load_settings() -> Result<ForgeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path`, deep-merged over defaults, then env overrides.
///
/// A missing file is not an error: defaults plus env overrides apply.
pub fn load_settings_from_path(path: &Path) -> Result<ForgeSettings> {
    let defaults = serde_json::to_value(ForgeSettings::default())
        .unwrap_or(Value::Object(serde_json::Map::new()));

    let merged = if path.exists() {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file_value: Value =
            serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        deep_merge(defaults, file_value)
    } else {
        defaults
    };

    let mut settings: ForgeSettings =
        serde_json::from_value(merged).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    apply_env_overrides(&mut settings);
    settings.validate();
    Ok(settings)
}

/// Apply `FORGE_*` environment overrides (highest priority layer).
fn apply_env_overrides(settings: &mut ForgeSettings) {
    if let Ok(path) = env::var("FORGE_SOCKET_PATH") {
        settings.link.socket_path = path;
    }
    if let Ok(host) = env::var("FORGE_HOST") {
        settings.server.host = host;
    }
    if let Ok(port) = env::var("FORGE_PORT") {
        match port.parse() {
            Ok(p) => settings.server.port = p,
            Err(_) => tracing::warn!(value = %port, "ignoring unparseable FORGE_PORT"),
        }
    }
    if let Ok(filter) = env::var("FORGE_LOG") {
        settings.logging.filter = filter;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_nested_objects() {
        let base = json!({"a": {"x": 1, "y": 2}, "b": 3});
        let overlay = json!({"a": {"y": 9}});
        let merged = deep_merge(base, overlay);
        assert_eq!(merged["a"]["x"], 1);
        assert_eq!(merged["a"]["y"], 9);
        assert_eq!(merged["b"], 3);
    }

    #[test]
    fn deep_merge_scalar_replaces() {
        let merged = deep_merge(json!({"a": {"x": 1}}), json!({"a": 5}));
        assert_eq!(merged["a"], 5);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings =
            load_settings_from_path(Path::new("/nonexistent/forge/settings.json")).unwrap();
        assert_eq!(settings.server.port, 7125);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"link": {"socketPath": "/run/fw.sock"}, "subscriptions": {"coalesceWindowMs": 50}}"#,
        )
        .unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.link.socket_path, "/run/fw.sock");
        assert_eq!(settings.subscriptions.coalesce_window_ms, 50);
        // Untouched sections keep defaults
        assert_eq!(settings.session.queue_bound, 1000);
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn loaded_settings_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"session": {"queueBound": 2}}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.session.queue_bound, 8);
    }
}
