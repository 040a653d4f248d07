//! Session parameters carried on the WebSocket upgrade query string.

use serde::Deserialize;

/// Query parameters of a relay session.
///
/// All fields are optional at extraction time; the interaction id is
/// validated by the driver so an invalid value can be answered with a
/// proper error frame on the upgraded socket instead of an HTTP rejection
/// the browser cannot distinguish from a network failure.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionQuery {
    /// Session/interaction identifier (required, validated by the driver).
    pub interaction_id: Option<String>,
    /// Requested primary language for transcription.
    pub primary_language: Option<String>,
    /// Locale for upstream output formatting; forwarded inside the
    /// configuration frame by the client, logged here.
    pub output_locale: Option<String>,
    /// Browser locale hint, used when the primary language does not
    /// resolve.
    pub browser_locale: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    // serde_urlencoded is what axum's Query extractor uses underneath;
    // using it directly keeps these tests independent of a server.
    fn parse(query: &str) -> SessionQuery {
        serde_urlencoded::from_str(query).unwrap()
    }

    #[test]
    fn full_query_parses() {
        let q = parse(
            "interactionId=abc-1&primaryLanguage=sv-SE&outputLocale=sv-SE&browserLocale=en-GB",
        );
        assert_eq!(q.interaction_id.as_deref(), Some("abc-1"));
        assert_eq!(q.primary_language.as_deref(), Some("sv-SE"));
        assert_eq!(q.output_locale.as_deref(), Some("sv-SE"));
        assert_eq!(q.browser_locale.as_deref(), Some("en-GB"));
    }

    #[test]
    fn missing_fields_default_to_none() {
        let q = parse("interactionId=abc");
        assert_eq!(q.interaction_id.as_deref(), Some("abc"));
        assert!(q.primary_language.is_none());
        assert!(q.browser_locale.is_none());
    }

    #[test]
    fn empty_query_is_all_none() {
        let q = parse("");
        assert!(q.interaction_id.is_none());
    }

    #[test]
    fn empty_value_is_preserved_for_validation() {
        // `interactionId=` must surface as Some("") so the driver can
        // reject it with an error frame, not be silently treated as absent.
        let q = parse("interactionId=");
        assert_eq!(q.interaction_id.as_deref(), Some(""));
    }
}
