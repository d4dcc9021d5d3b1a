//! Serialized form of persisted tokens
//!
//! Writes always use the canonical camelCase shape
//! `{"accessToken", "refreshToken", "expiresAt"}` with `expiresAt` in epoch
//! milliseconds. Reads also accept records written by older clients:
//! snake_case keys, `expiresAt` in epoch seconds, numeric strings or
//! RFC 3339 timestamps, and a `null` refresh token.

use chrono::DateTime;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::types::TokenData;

/// Epoch values below this are seconds (10^11 s is in the year 5138; 10^11 ms
/// is in 1973).
const SECONDS_CUTOFF: i64 = 100_000_000_000;

/// Serialize to the canonical stored shape.
///
/// # Errors
/// Returns `StoreError::Corrupt` if serialization fails.
pub fn encode(tokens: &TokenData) -> Result<String, StoreError> {
    serde_json::to_string(tokens).map_err(|e| StoreError::Corrupt(e.to_string()))
}

/// Parse a stored record, normalizing legacy shapes.
///
/// Missing fields decode to their empty values; the validation gate in
/// [`crate::persistence::TokenPersistence`] decides whether the result is
/// usable.
///
/// # Errors
/// Returns `StoreError::Corrupt` for invalid JSON, a non-object root or an
/// unparseable expiry.
pub fn decode(raw: &str) -> Result<TokenData, StoreError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(format!("invalid JSON: {e}")))?;
    let Value::Object(fields) = value else {
        return Err(StoreError::Corrupt("expected a JSON object".to_string()));
    };

    let access_token = string_field(&fields, "accessToken", "access_token").unwrap_or_default();
    let refresh_token = string_field(&fields, "refreshToken", "refresh_token");
    let expires_at = match field(&fields, "expiresAt", "expires_at") {
        None | Some(Value::Null) => 0,
        Some(raw) => parse_expiry(raw)?,
    };

    Ok(TokenData::new(access_token, refresh_token, expires_at))
}

fn field<'a>(fields: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    fields.get(camel).or_else(|| fields.get(snake))
}

fn string_field(fields: &Map<String, Value>, camel: &str, snake: &str) -> Option<String> {
    field(fields, camel, snake).and_then(Value::as_str).map(str::to_owned)
}

fn parse_expiry(raw: &Value) -> Result<i64, StoreError> {
    match raw {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f as i64))
            .map(normalize_epoch)
            .ok_or_else(|| StoreError::Corrupt(format!("unusable expiresAt: {number}"))),
        Value::String(text) => {
            let text = text.trim();
            if let Ok(epoch) = text.parse::<i64>() {
                return Ok(normalize_epoch(epoch));
            }
            DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.timestamp_millis())
                .map_err(|e| StoreError::Corrupt(format!("unparseable expiresAt {text:?}: {e}")))
        }
        other => Err(StoreError::Corrupt(format!("unexpected expiresAt type: {other}"))),
    }
}

const fn normalize_epoch(value: i64) -> i64 {
    if value > 0 && value < SECONDS_CUTOFF {
        value.saturating_mul(1000)
    } else {
        value
    }
}
