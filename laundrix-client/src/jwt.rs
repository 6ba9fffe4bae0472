//! Expiry claims of bearer tokens.
//!
//! Only the payload is inspected; signatures are the server's business.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;

/// Read the `exp` claim of a JWT. Returns `None` for opaque or malformed tokens.
pub fn expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload) = (parts.next()?, parts.next()?);
    parts.next()?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: JsonValue = serde_json::from_slice(&bytes).ok()?;

    let exp = match claims.get("exp")? {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        JsonValue::String(s) => s.parse().ok()?,
        _ => return None,
    };
    DateTime::from_timestamp(exp, 0)
}

/// Whether a token expiring at `expires_at` should be renewed at `now`.
pub fn needs_renewal(expires_at: DateTime<Utc>, now: DateTime<Utc>, margin: Duration) -> bool {
    expires_at
        .checked_sub_signed(margin)
        .map_or(true, |renew_at| renew_at <= now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::jwt_with_exp;
    use rstest::rstest;

    #[test]
    fn test_reads_exp_claim() {
        let token = jwt_with_exp(1_900_000_000);
        assert_eq!(
            expiry(&token),
            DateTime::from_timestamp(1_900_000_000, 0)
        );
    }

    #[rstest]
    #[case::opaque("c2Vzc2lvbi10b2tlbg")]
    #[case::two_parts("aGVhZGVy.eyJleHAiOjF9")]
    #[case::not_base64("a.!!!.c")]
    #[case::not_json("a.bm90IGpzb24.c")]
    #[case::no_exp("a.eyJzdWIiOiJkcml2ZXItNyJ9.c")]
    fn test_unreadable_tokens(#[case] token: &str) {
        assert!(expiry(token).is_none());
    }

    #[test]
    fn test_needs_renewal_respects_margin() {
        let now = Utc::now();
        let margin = Duration::seconds(60);

        assert!(needs_renewal(now - Duration::seconds(1), now, margin));
        assert!(needs_renewal(now + Duration::seconds(30), now, margin));
        assert!(!needs_renewal(now + Duration::seconds(600), now, margin));
    }

    #[test]
    fn test_needs_renewal_near_the_minimum_date() {
        let margin = Duration::seconds(60);
        assert!(needs_renewal(DateTime::<Utc>::MIN_UTC, Utc::now(), margin));
    }
}
