//! Token payloads returned by the auth endpoints.
//!
//! The backend has shipped the access token under both `accessToken` and
//! `token`; neither is treated as legacy. When both are present
//! `accessToken` wins.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Tokens extracted from a login or refresh response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenGrant {
    /// New access token.
    pub access_token: Option<String>,
    /// Rotated refresh token.
    pub refresh_token: Option<String>,
    /// Absolute expiry of the refresh token.
    pub refresh_token_expiry: Option<DateTime<Utc>>,
}

impl TokenGrant {
    /// Extract the token fields from a response body.
    pub fn from_body(body: &JsonValue) -> Self {
        Self {
            access_token: string_field(body, "accessToken").or_else(|| string_field(body, "token")),
            refresh_token: string_field(body, "refreshToken"),
            refresh_token_expiry: body.get("refreshTokenExpiry").and_then(parse_expiry),
        }
    }
}

/// A login response: tokens plus the identity they belong to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginGrant {
    /// Issued tokens.
    pub tokens: TokenGrant,
    /// Identifier of the signed-in user.
    pub user_id: Option<String>,
    /// User object as returned by the server.
    pub user: Option<JsonValue>,
}

impl LoginGrant {
    /// Extract tokens and identity from a login response body.
    pub fn from_body(body: &JsonValue) -> Self {
        let user = body.get("user").filter(|u| u.is_object()).cloned();
        let user_id = id_field(body, "userId").or_else(|| {
            user.as_ref()
                .and_then(|u| id_field(u, "id").or_else(|| id_field(u, "_id")))
        });

        Self {
            tokens: TokenGrant::from_body(body),
            user_id,
            user,
        }
    }
}

/// Body of the refresh call.
#[derive(Debug, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    pub(crate) refresh_token: &'a str,
}

/// Parse an expiry given as RFC 3339 text or epoch seconds/milliseconds.
pub fn parse_expiry(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<i64>().ok().and_then(from_epoch)),
        JsonValue::Number(n) => n.as_i64().and_then(from_epoch),
        _ => None,
    }
}

// Values past 10^12 can only be milliseconds for any realistic date.
fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() >= 1_000_000_000_000 {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

fn string_field(body: &JsonValue, name: &str) -> Option<String> {
    body.get(name)
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn id_field(body: &JsonValue, name: &str) -> Option<String> {
    match body.get(name)? {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
