//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the JSON
//! settings file, and `#[serde(default)]` so partial files deep-merge over
//! compiled defaults.

use serde::{Deserialize, Serialize};

/// Default regex patterns classifying an upstream denial/timeout reason as
/// "unsupported language". The upstream wording is free text and has
/// changed before, so deployments can extend or replace this set in the
/// settings file.
pub const DEFAULT_UNSUPPORTED_LANGUAGE_PATTERNS: [&str; 3] = [
    r"unsupported\s+language",
    r"language\s+.*\b(not\s+supported|not\s+available|unavailable)\b",
    r"unavailable\s+language",
];

/// Root settings type for the Scribe relay service.
///
/// Loaded from `~/.scribe/settings.json` with defaults applied for missing
/// fields; `SCRIBE_*` environment variables override specific values.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScribeSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Server network settings.
    pub server: ServerSettings,
    /// Upstream speech-service settings.
    pub upstream: UpstreamSettings,
    /// Relay behavior settings.
    pub relay: RelaySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for ScribeSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "scribe".to_string(),
            server: ServerSettings::default(),
            upstream: UpstreamSettings::default(),
            relay: RelaySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ScribeSettings {
    /// Correct invalid values in place rather than rejecting the file.
    ///
    /// Called automatically during loading. Bad regex patterns are dropped
    /// with a warning; an unsupported fallback locale is reset to the
    /// compiled default.
    pub fn validate(&mut self) {
        self.relay.unsupported_language_patterns.retain(|p| {
            match regex::Regex::new(p) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "dropping invalid unsupported-language pattern");
                    false
                }
            }
        });
        if self.relay.unsupported_language_patterns.is_empty() {
            tracing::warn!("no usable unsupported-language patterns, restoring defaults");
            self.relay.unsupported_language_patterns = RelaySettings::default_patterns();
        }
        if !scribe_core::locale::is_supported(&self.relay.fallback_locale) {
            tracing::warn!(
                locale = %self.relay.fallback_locale,
                "fallback locale is not a supported canonical tag, resetting"
            );
            self.relay.fallback_locale = scribe_core::locale::FALLBACK_LOCALE.to_string();
        }
    }
}

/// Server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port for HTTP and WebSocket traffic.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

/// Upstream speech-service settings.
///
/// Credentials are never stored in the settings file: the file names the
/// environment variables that hold them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// WebSocket base URL of the upstream service (`wss://…`).
    pub base_url: String,
    /// Tenant/account identifier embedded in the connection path.
    pub tenant_id: String,
    /// HTTPS token endpoint for bearer-credential acquisition.
    pub token_url: String,
    /// Environment variable holding the OAuth client id.
    pub client_id_env: String,
    /// Environment variable holding the OAuth client secret.
    pub client_secret_env: String,
    /// Transport-level connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "wss://api.eu.speech.example.com".to_string(),
            tenant_id: "demo-tenant".to_string(),
            token_url: "https://auth.eu.speech.example.com/oauth2/token".to_string(),
            client_id_env: "SCRIBE_UPSTREAM_CLIENT_ID".to_string(),
            client_secret_env: "SCRIBE_UPSTREAM_CLIENT_SECRET".to_string(),
            connect_timeout_ms: 10_000,
        }
    }
}

/// Relay behavior settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// The fixed locale substituted when language resolution or upstream
    /// negotiation fails.
    pub fallback_locale: String,
    /// Regex patterns (case-insensitive) matched against upstream
    /// denial/timeout reasons to decide whether the fallback retry fires.
    pub unsupported_language_patterns: Vec<String>,
}

impl RelaySettings {
    pub(crate) fn default_patterns() -> Vec<String> {
        DEFAULT_UNSUPPORTED_LANGUAGE_PATTERNS
            .iter()
            .map(|s| (*s).to_string())
            .collect()
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            fallback_locale: scribe_core::locale::FALLBACK_LOCALE.to_string(),
            unsupported_language_patterns: Self::default_patterns(),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive string.
    pub filter: String,
    /// Emit one JSON object per line instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_coherent() {
        let settings = ScribeSettings::default();
        assert_eq!(settings.name, "scribe");
        assert_eq!(settings.server.port, 8090);
        assert_eq!(settings.relay.fallback_locale, "en-US");
        assert!(!settings.relay.unsupported_language_patterns.is_empty());
        assert_eq!(settings.upstream.connect_timeout_ms, 10_000);
    }

    #[test]
    fn camel_case_wire_format() {
        let json = serde_json::to_value(ScribeSettings::default()).unwrap();
        assert!(json["upstream"].get("baseUrl").is_some());
        assert!(json["upstream"].get("connectTimeoutMs").is_some());
        assert!(json["relay"].get("fallbackLocale").is_some());
        assert!(json["relay"].get("unsupportedLanguagePatterns").is_some());
        assert!(json["upstream"].get("base_url").is_none());
    }

    #[test]
    fn partial_json_gets_defaults() {
        let settings: ScribeSettings =
            serde_json::from_str(r#"{"server":{"port":9999}}"#).unwrap();
        assert_eq!(settings.server.port, 9999);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.relay.fallback_locale, "en-US");
    }

    #[test]
    fn validate_drops_bad_patterns() {
        let mut settings = ScribeSettings::default();
        settings.relay.unsupported_language_patterns =
            vec!["[unclosed".to_string(), "unsupported".to_string()];
        settings.validate();
        assert_eq!(
            settings.relay.unsupported_language_patterns,
            vec!["unsupported".to_string()]
        );
    }

    #[test]
    fn validate_restores_defaults_when_all_patterns_bad() {
        let mut settings = ScribeSettings::default();
        settings.relay.unsupported_language_patterns = vec!["[".to_string()];
        settings.validate();
        assert_eq!(
            settings.relay.unsupported_language_patterns,
            RelaySettings::default_patterns()
        );
    }

    #[test]
    fn validate_resets_unsupported_fallback_locale() {
        let mut settings = ScribeSettings::default();
        settings.relay.fallback_locale = "xx-ZZ".to_string();
        settings.validate();
        assert_eq!(settings.relay.fallback_locale, "en-US");
    }
}
