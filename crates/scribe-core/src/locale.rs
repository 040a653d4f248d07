//! Locale canonicalization for upstream configuration.
//!
//! The upstream service accepts a fixed set of `ll-RR` locales. Clients
//! send whatever the browser or the booking record produced: `en`, `en_us`,
//! `EN-US`, `sv`, or garbage. [`canonicalize`] maps any of those to the
//! canonical supported tag, and [`resolve_session_language`] applies the
//! primary-then-browser-hint-then-fallback policy for a session.

/// The always-supported locale used when resolution fails or upstream
/// rejects the requested one.
pub const FALLBACK_LOCALE: &str = "en-US";

/// Locales the upstream service accepts, canonical form.
///
/// Sorted; one entry per language-region pair. The first entry for a given
/// language doubles as the expansion target for bare-language tags.
const SUPPORTED: &[&str] = &[
    "da-DK", "de-DE", "en-GB", "en-US", "es-ES", "fr-FR", "it-IT", "nb-NO",
    "nl-NL", "pt-PT", "sv-SE",
];

/// Map a raw locale tag to its canonical supported form, if any.
///
/// Tolerates case differences, `_` separators, and surrounding whitespace.
/// A bare language tag (`"de"`) expands to the first supported region for
/// that language; an unsupported region (`"en-AU"`) falls back the same
/// way. Returns `None` when the language itself is unsupported.
pub fn canonicalize(raw: &str) -> Option<&'static str> {
    let tag = raw.trim().replace('_', "-");
    let mut parts = tag.splitn(2, '-');
    let lang = parts.next()?.to_ascii_lowercase();
    if lang.is_empty() {
        return None;
    }
    if let Some(region) = parts.next() {
        let candidate = format!("{lang}-{}", region.to_ascii_uppercase());
        if let Some(hit) = SUPPORTED.iter().find(|s| **s == candidate).copied() {
            return Some(hit);
        }
    }
    SUPPORTED
        .iter()
        .find(|s| s.split('-').next() == Some(lang.as_str()))
        .copied()
}

/// A session's resolved configuration language.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedLanguage {
    /// The canonical tag to place in the upstream configuration.
    pub tag: String,
    /// True when neither the primary language nor the browser hint
    /// resolved and the fixed fallback was substituted.
    pub fell_back: bool,
}

/// Resolve the locale for a session's upstream configuration.
///
/// Prefers the requested primary language, then the browser locale hint,
/// then `fallback` (normally [`FALLBACK_LOCALE`]).
pub fn resolve_session_language(
    primary: Option<&str>,
    browser_hint: Option<&str>,
    fallback: &str,
) -> ResolvedLanguage {
    let resolved = primary
        .and_then(canonicalize)
        .or_else(|| browser_hint.and_then(canonicalize));
    match resolved {
        Some(tag) => ResolvedLanguage {
            tag: tag.to_string(),
            fell_back: false,
        },
        None => ResolvedLanguage {
            tag: fallback.to_string(),
            fell_back: true,
        },
    }
}

/// True when `tag` is exactly one of the supported canonical locales.
pub fn is_supported(tag: &str) -> bool {
    SUPPORTED.contains(&tag)
}
