//! PKCE (Proof Key for Code Exchange) implementation for OAuth 2.0
//!
//! Implements RFC 7636 with the `S256` method. The code verifier travels to
//! the token exchange inside the OAuth `state` parameter: the application's
//! own state is merged with a `pkce_code_verifier` field, serialized to JSON
//! and base64url-encoded. This lets a callback handled by a different process
//! (or after a restart) complete the exchange without shared memory.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::AuthError;

/// The only challenge method this crate emits.
pub const CHALLENGE_METHOD: &str = "S256";

/// State field carrying the code verifier.
pub const VERIFIER_STATE_FIELD: &str = "pkce_code_verifier";

/// State field wrapping a non-object application state.
pub const WRAPPED_STATE_FIELD: &str = "original_app_state";

/// Generate a cryptographically secure code verifier
///
/// Returns a URL-safe base64-encoded random string of 32 bytes (43 characters).
/// Per RFC 7636, verifiers must be 43-128 characters long.
pub fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    let random_bytes: [u8; 32] = rng.gen();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Generate code challenge from verifier using SHA256
///
/// Per RFC 7636, the challenge is BASE64URL(SHA256(ASCII(code_verifier)))
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Verifier/challenge pair for a single authorization request.
///
/// The verifier stays secret until token exchange; the challenge goes into
/// the authorization URL. Both are wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
}

impl PkcePair {
    /// Generate a fresh pair.
    pub fn generate() -> Self {
        Self::from_verifier(generate_code_verifier())
    }

    /// Derive the challenge for a known verifier.
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = generate_code_challenge(&verifier);
        Self { verifier, challenge }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Get the challenge method (always "S256" for SHA256)
    #[must_use]
    pub const fn challenge_method(&self) -> &'static str {
        CHALLENGE_METHOD
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Generate a fresh [`PkcePair`].
pub fn generate_pkce_pair() -> PkcePair {
    PkcePair::generate()
}

/// Encode the OAuth `state` parameter carrying `verifier`.
///
/// - object app state: its fields are kept and `pkce_code_verifier` is added
///   (replacing any field of that name)
/// - any other JSON value: wrapped as `{"original_app_state": value}`
/// - no app state: `{"pkce_code_verifier": verifier}` only
///
/// # Errors
/// Returns [`AuthError::Unknown`] if the state cannot be serialized.
pub fn build_state(app_state: Option<&Value>, verifier: &str) -> Result<String, AuthError> {
    let mut state = match app_state {
        Some(Value::Object(fields)) => fields.clone(),
        Some(other) => {
            let mut wrapped = Map::new();
            wrapped.insert(WRAPPED_STATE_FIELD.to_string(), other.clone());
            wrapped
        }
        None => Map::new(),
    };
    state.insert(VERIFIER_STATE_FIELD.to_string(), Value::String(verifier.to_string()));

    let json = serde_json::to_vec(&state)
        .map_err(|e| AuthError::Unknown(format!("failed to encode OAuth state: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decode a `state` parameter produced by [`build_state`].
///
/// Accepts padded or unpadded base64url and percent-encoded input. Returns
/// `None` for anything that does not decode to a JSON object.
pub fn decode_state(state: &str) -> Option<Map<String, Value>> {
    let state = state.trim();
    let unescaped = if state.contains('%') {
        urlencoding::decode(state).ok()?.into_owned()
    } else {
        state.to_string()
    };

    let bytes = URL_SAFE_NO_PAD.decode(unescaped.trim_end_matches('=')).ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(fields) => Some(fields),
        _ => None,
    }
}

/// Recover the code verifier from a `state` parameter.
///
/// Never fails: malformed input or a missing/non-string field yields `None`.
/// An empty string is also `None`, since it can never match a challenge.
pub fn extract_verifier(state: &str) -> Option<String> {
    match decode_state(state)?.remove(VERIFIER_STATE_FIELD)? {
        Value::String(verifier) if !verifier.is_empty() => Some(verifier),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for PKCE generation and state encoding

    use serde_json::json;

    use super::*;

    #[test]
    fn test_empty_verifier_is_not_extracted() {
        let state = build_state(None, "").expect("state encodes");
        assert_eq!(decode_state(&state).map(|fields| fields.len()), Some(1));
        assert_eq!(extract_verifier(&state), None);
    }

    /// Validates `generate_code_verifier` output shape.
    ///
    /// Assertions:
    /// - Confirms the verifier is 43 characters (32 bytes base64url).
    /// - Ensures only URL-safe characters are used.
    /// - Ensures two verifiers differ.
    #[test]
    fn test_generate_code_verifier() {
        let verifier = generate_code_verifier();

        assert_eq!(verifier.len(), 43);
        assert!(verifier.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(verifier, generate_code_verifier());
    }

    /// Validates the challenge against the RFC 7636 appendix B test vector.
    #[test]
    fn test_code_challenge_rfc7636_vector() {
        let pair = PkcePair::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");

        assert_eq!(pair.challenge(), "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
        assert_eq!(pair.challenge_method(), "S256");
    }

    #[test]
    fn test_pair_debug_hides_verifier() {
        let pair = generate_pkce_pair();
        assert!(!format!("{pair:?}").contains(pair.verifier()));
    }

    /// Validates the state round trip for every JSON shape.
    ///
    /// Assertions:
    /// - Confirms `extract_verifier(build_state(s, v)) == v` for objects,
    ///   strings, numbers, arrays, null and absent state.
    #[test]
    fn test_state_round_trip_for_all_shapes() {
        let verifier = generate_code_verifier();
        let shapes = [
            Some(json!({"return_to": "/portfolio", "nonce": 7})),
            Some(json!("plain-string")),
            Some(json!(42)),
            Some(json!([1, 2, 3])),
            Some(Value::Null),
            None,
        ];

        for shape in shapes {
            let state = build_state(shape.as_ref(), &verifier).expect("state encodes");
            assert_eq!(extract_verifier(&state).as_deref(), Some(verifier.as_str()), "{shape:?}");
        }
    }

    #[test]
    fn test_object_state_is_merged() {
        let state = build_state(Some(&json!({"return_to": "/orders"})), "v123").expect("encodes");
        let decoded = decode_state(&state).expect("decodes");

        assert_eq!(decoded.get("return_to"), Some(&json!("/orders")));
        assert_eq!(decoded.get(VERIFIER_STATE_FIELD), Some(&json!("v123")));
        assert!(!decoded.contains_key(WRAPPED_STATE_FIELD));
    }

    #[test]
    fn test_non_object_state_is_wrapped() {
        let state = build_state(Some(&json!("resume")), "v").expect("encodes");
        let decoded = decode_state(&state).expect("decodes");

        assert_eq!(decoded.get(WRAPPED_STATE_FIELD), Some(&json!("resume")));
    }

    #[test]
    fn test_state_is_url_safe() {
        let state = build_state(Some(&json!({"q": "???>>>"})), "v").expect("encodes");
        assert!(state.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    /// Validates tolerant decoding.
    ///
    /// Assertions:
    /// - Padded and percent-encoded input still yields the verifier.
    /// - Garbage, non-object JSON and missing or non-string fields yield `None`.
    #[test]
    fn test_extract_verifier_tolerance() {
        let padded = format!("{}==", URL_SAFE_NO_PAD.encode(r#"{"pkce_code_verifier":"abc"}"#));
        assert_eq!(extract_verifier(&padded).as_deref(), Some("abc"));
        assert_eq!(extract_verifier(&padded.replace('=', "%3D")).as_deref(), Some("abc"));

        assert_eq!(extract_verifier("not base64 at all!"), None);
        assert_eq!(extract_verifier(""), None);
        assert_eq!(extract_verifier(&URL_SAFE_NO_PAD.encode("[1,2]")), None);
        assert_eq!(extract_verifier(&URL_SAFE_NO_PAD.encode(r#"{"other":1}"#)), None);
        assert_eq!(extract_verifier(&URL_SAFE_NO_PAD.encode(r#"{"pkce_code_verifier":5}"#)), None);
    }
}
