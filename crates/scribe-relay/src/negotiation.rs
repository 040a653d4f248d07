//! Language negotiation: configuration rewriting and the fallback matcher.
//!
//! The upstream service reports configuration failures as free text. Which
//! wordings mean "your language is not supported" is a deployment concern,
//! so the matcher is built from a configurable pattern set instead of
//! hard-coded literals.

use regex::RegexSet;
use serde_json::{Map, Value};

/// Decides whether a denial/timeout reason means the requested language is
/// unsupported and the corrective retry should fire.
#[derive(Clone, Debug)]
pub struct UnsupportedLanguageMatcher {
    set: RegexSet,
}

impl UnsupportedLanguageMatcher {
    /// Build a matcher from regex patterns, matched case-insensitively.
    ///
    /// Invalid patterns are dropped with a warning; an empty (or fully
    /// invalid) set matches nothing, which disables the fallback retry.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let usable: Vec<String> = patterns
            .iter()
            .map(|p| format!("(?i){}", p.as_ref()))
            .filter(|p| match regex::Regex::new(p) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "skipping invalid fallback pattern");
                    false
                }
            })
            .collect();
        let set = RegexSet::new(&usable).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to build fallback pattern set, disabling retry");
            RegexSet::empty()
        });
        Self { set }
    }

    /// True when `reason` matches any configured pattern.
    pub fn matches(&self, reason: &str) -> bool {
        self.set.is_match(reason)
    }
}

/// Per-mode negotiation behavior.
///
/// The transcription relay rewrites the configuration language and retries
/// once on an unsupported-language denial; the facts relay forwards
/// everything untouched.
#[derive(Clone, Debug)]
pub enum NegotiationPolicy {
    /// Rewrite the configuration locale and retry once with
    /// `fallback_locale` when upstream rejects it.
    LanguageFallback {
        /// Classifier for denial/timeout reasons.
        matcher: UnsupportedLanguageMatcher,
        /// The fixed locale used for the corrective retry.
        fallback_locale: String,
    },
    /// No language handling: configuration frames and acknowledgements
    /// pass through verbatim.
    Passthrough,
}

impl NegotiationPolicy {
    /// True when upstream configuration acknowledgements are intercepted.
    pub fn intercepts_config_acks(&self) -> bool {
        matches!(self, Self::LanguageFallback { .. })
    }
}

/// Overwrite the configuration frame's language field in place.
///
/// Creates the `configuration` object when the client omitted it, so the
/// frame sent upstream always names a language.
pub fn rewrite_config_language(config: &mut Value, language: &str) {
    let Some(obj) = config.as_object_mut() else {
        return;
    };
    let entry = obj
        .entry("configuration")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(configuration) = entry.as_object_mut() {
        let _ = configuration.insert(
            "primaryLanguage".to_string(),
            Value::String(language.to_string()),
        );
    }
}

/// Build the corrective configuration: `last_config` with the language
/// field replaced by the fallback locale. Nothing else changes.
pub fn corrective_config(last_config: &Value, fallback_locale: &str) -> Value {
    let mut config = last_config.clone();
    rewrite_config_language(&mut config, fallback_locale);
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PATTERNS: [&str; 2] = [r"unsupported\s+language", r"language .* not supported"];

    #[test]
    fn matcher_hits_known_wordings() {
        let m = UnsupportedLanguageMatcher::new(&PATTERNS);
        assert!(m.matches("unsupported language: sv-SE"));
        assert!(m.matches("Unsupported  Language"));
        assert!(m.matches("the language sv-SE is not supported here"));
    }

    #[test]
    fn matcher_ignores_other_failures() {
        let m = UnsupportedLanguageMatcher::new(&PATTERNS);
        assert!(!m.matches("internal error"));
        assert!(!m.matches("quota exceeded"));
        assert!(!m.matches(""));
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let m = UnsupportedLanguageMatcher::new(&["[unclosed", "unsupported"]);
        assert!(m.matches("UNSUPPORTED language"));
    }

    #[test]
    fn empty_matcher_never_matches() {
        let m = UnsupportedLanguageMatcher::new::<&str>(&[]);
        assert!(!m.matches("unsupported language"));
    }

    #[test]
    fn rewrite_replaces_existing_language() {
        let mut config = json!({
            "type": "config",
            "configuration": {"primaryLanguage": "sv-SE", "diarization": true}
        });
        rewrite_config_language(&mut config, "en-US");
        assert_eq!(config["configuration"]["primaryLanguage"], "en-US");
        // Other configuration fields survive.
        assert_eq!(config["configuration"]["diarization"], true);
    }

    #[test]
    fn rewrite_creates_missing_configuration_object() {
        let mut config = json!({"type": "config"});
        rewrite_config_language(&mut config, "en-US");
        assert_eq!(config["configuration"]["primaryLanguage"], "en-US");
    }

    #[test]
    fn corrective_config_only_touches_language() {
        let last = json!({
            "type": "config",
            "configuration": {"primaryLanguage": "de-DE", "mode": "dictation"}
        });
        let corrective = corrective_config(&last, "en-US");
        assert_eq!(corrective["configuration"]["primaryLanguage"], "en-US");
        assert_eq!(corrective["configuration"]["mode"], "dictation");
        // The original is untouched.
        assert_eq!(last["configuration"]["primaryLanguage"], "de-DE");
    }
}
