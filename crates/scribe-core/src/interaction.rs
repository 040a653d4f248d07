//! Interaction-id validation.
//!
//! The id arrives as a query-string parameter and is frequently the result
//! of JavaScript string interpolation gone wrong, so the literal tokens
//! `null`, `undefined`, `false` and `nan` (any casing) are rejected along
//! with empty and whitespace-containing values.

use crate::errors::RelayError;

const NULL_LIKE_TOKENS: [&str; 4] = ["null", "undefined", "false", "nan"];

/// Validate a raw interaction id from the connection parameters.
///
/// Returns the id unchanged when structurally valid. No upstream work may
/// start for a session whose id fails this check.
pub fn validate_interaction_id(raw: Option<&str>) -> Result<&str, RelayError> {
    let Some(id) = raw else {
        return Err(RelayError::InvalidInteractionId("missing".into()));
    };
    if id.is_empty() {
        return Err(RelayError::InvalidInteractionId("empty".into()));
    }
    if id.chars().any(char::is_whitespace) {
        return Err(RelayError::InvalidInteractionId(format!(
            "contains whitespace: {id:?}"
        )));
    }
    let lowered = id.to_ascii_lowercase();
    if NULL_LIKE_TOKENS.contains(&lowered.as_str()) {
        return Err(RelayError::InvalidInteractionId(format!(
            "null-like token: {id:?}"
        )));
    }
    Ok(id)
}
