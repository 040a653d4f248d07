//! Settings loading: file, deep-merge, environment overrides.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::ScribeSettings;

/// Default settings file location: `~/.scribe/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    home.join(".scribe").join("settings.json")
}

/// Load settings from the default path with env overrides applied.
///
/// A missing file is not an error: defaults are used.
pub fn load_settings() -> Result<ScribeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific file path.
///
/// The file (when present) is deep-merged over compiled defaults, then
/// `SCRIBE_*` environment variables are applied, then the result is
/// validated (bad values corrected with warnings).
pub fn load_settings_from_path(path: &Path) -> Result<ScribeSettings> {
    let defaults = serde_json::to_value(ScribeSettings::default())?;

    let merged = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let file: Value = serde_json::from_str(&raw)?;
        debug!(?path, "loaded settings file");
        deep_merge(defaults, file)
    } else {
        debug!(?path, "no settings file, using defaults");
        defaults
    };

    let mut settings: ScribeSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate();
    Ok(settings)
}

/// Recursively merge `overlay` into `base`.
///
/// Objects merge key-by-key; any other overlay value (including arrays and
/// `null`) replaces the base value wholesale.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

fn apply_env_overrides(settings: &mut ScribeSettings) {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

    if let Some(host) = var("SCRIBE_HOST") {
        settings.server.host = host;
    }
    if let Some(port) = var("SCRIBE_PORT") {
        match port.parse() {
            Ok(port) => settings.server.port = port,
            Err(_) => tracing::warn!(value = %port, "ignoring unparseable SCRIBE_PORT"),
        }
    }
    if let Some(url) = var("SCRIBE_UPSTREAM_URL") {
        settings.upstream.base_url = url;
    }
    if let Some(tenant) = var("SCRIBE_UPSTREAM_TENANT") {
        settings.upstream.tenant_id = tenant;
    }
    if let Some(url) = var("SCRIBE_TOKEN_URL") {
        settings.upstream.token_url = url;
    }
    if let Some(locale) = var("SCRIBE_FALLBACK_LOCALE") {
        settings.relay.fallback_locale = locale;
    }
}
