//! Observable session state.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Point-in-time view of the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Whether an access token is held.
    pub authenticated: bool,
    /// Current access token.
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    /// Current refresh token.
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    /// Expiry of the refresh token, when the server reported one.
    pub refresh_token_expiry: Option<DateTime<Utc>>,
    /// Identifier of the signed-in user.
    pub user_id: Option<String>,
    /// User object returned at login.
    pub user: Option<JsonValue>,
    /// Profile detail of the signed-in user.
    pub user_detail: Option<JsonValue>,
}

impl SessionSnapshot {
    pub(crate) fn with_tokens(
        access_token: Option<String>,
        refresh_token: Option<String>,
    ) -> Self {
        Self {
            authenticated: access_token.is_some(),
            access_token,
            refresh_token,
            ..Default::default()
        }
    }
}

/// Session state shared between the client and the UI.
///
/// Readers take snapshots or [`subscribe`](Self::subscribe) for change
/// notifications. Only the session layer itself mutates it.
#[derive(Debug)]
pub struct SessionState {
    tx: watch::Sender<SessionSnapshot>,
    last_validity_check: Mutex<Option<Instant>>,
    // Advanced whenever the session is cleared or replaced wholesale.
    epoch: AtomicU64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Create an unauthenticated session.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::default());
        Self {
            tx,
            last_validity_check: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    /// Current state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    /// Receive every future change of the session.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    /// Whether an access token is held.
    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().authenticated
    }

    /// Current access token.
    pub fn access_token(&self) -> Option<String> {
        self.tx.borrow().access_token.clone()
    }

    /// Current refresh token.
    pub fn refresh_token(&self) -> Option<String> {
        self.tx.borrow().refresh_token.clone()
    }

    /// Expiry of the current refresh token.
    pub fn refresh_token_expiry(&self) -> Option<DateTime<Utc>> {
        self.tx.borrow().refresh_token_expiry
    }

    /// Identifier of the signed-in user.
    pub fn user_id(&self) -> Option<String> {
        self.tx.borrow().user_id.clone()
    }

    /// Profile detail of the signed-in user.
    pub fn user_detail(&self) -> Option<JsonValue> {
        self.tx.borrow().user_detail.clone()
    }

    /// Generation of the session. Work started under one epoch must not
    /// write into another.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn replace(&self, snapshot: SessionSnapshot) {
        self.tx.send_replace(snapshot);
    }

    /// Install a renewed token pair. A missing expiry keeps the known one.
    pub(crate) fn apply_refresh(
        &self,
        access_token: String,
        refresh_token: String,
        refresh_token_expiry: Option<DateTime<Utc>>,
    ) {
        self.tx.send_modify(|s| {
            s.authenticated = true;
            s.access_token = Some(access_token);
            s.refresh_token = Some(refresh_token);
            if refresh_token_expiry.is_some() {
                s.refresh_token_expiry = refresh_token_expiry;
            }
        });
    }

    pub(crate) fn set_user_detail(&self, detail: Option<JsonValue>) {
        self.tx.send_modify(|s| s.user_detail = detail);
    }

    pub(crate) fn reset(&self) {
        *self.last_validity_check.lock() = None;
        self.tx.send_replace(SessionSnapshot::default());
    }

    /// Claim the next validity check. Returns false when one already ran
    /// within `interval`.
    pub(crate) fn begin_validity_check(&self, interval: Duration) -> bool {
        let mut last = self.last_validity_check.lock();
        if let Some(at) = *last {
            if at.elapsed() < interval {
                return false;
            }
        }
        *last = Some(Instant::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_starts_unauthenticated() {
        let session = SessionState::new();
        assert!(!session.is_authenticated());
        assert_eq!(session.snapshot(), SessionSnapshot::default());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let session = SessionState::new();
        let mut rx = session.subscribe();

        session.apply_refresh("at-2".into(), "rt-2".into(), None);
        rx.changed().await.unwrap();
        assert!(rx.borrow().authenticated);
        assert_eq!(rx.borrow().access_token.as_deref(), Some("at-2"));

        session.reset();
        rx.changed().await.unwrap();
        assert!(!rx.borrow().authenticated);
    }

    #[test]
    fn test_apply_refresh_keeps_known_expiry() {
        let session = SessionState::new();
        let expiry = DateTime::from_timestamp(1_893_553_445, 0);
        session.apply_refresh("at-1".into(), "rt-1".into(), expiry);
        session.apply_refresh("at-2".into(), "rt-2".into(), None);

        assert_eq!(session.refresh_token_expiry(), expiry);
        assert_eq!(session.refresh_token().as_deref(), Some("rt-2"));
    }

    #[test]
    fn test_user_detail_and_reset() {
        let session = SessionState::new();
        session.replace(SessionSnapshot {
            user_id: Some("driver-7".into()),
            ..SessionSnapshot::with_tokens(Some("at-1".into()), Some("rt-1".into()))
        });
        session.set_user_detail(Some(json!({"vehicle": "van-3"})));

        assert_eq!(session.user_id().as_deref(), Some("driver-7"));
        assert_eq!(session.user_detail().unwrap()["vehicle"], "van-3");

        session.reset();
        assert!(session.user_id().is_none());
        assert!(session.access_token().is_none());
    }

    #[test]
    fn test_snapshot_serialization_hides_tokens() {
        let snapshot = SessionSnapshot {
            user_id: Some("driver-7".into()),
            ..SessionSnapshot::with_tokens(Some("at-1".into()), Some("rt-1".into()))
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["authenticated"], true);
        assert_eq!(value["userId"], "driver-7");
        assert!(value.get("accessToken").is_none());
        assert!(value.get("refreshToken").is_none());
    }

    #[test]
    fn test_epoch_advances() {
        let session = SessionState::new();
        let start = session.epoch();
        assert_eq!(session.advance_epoch(), start + 1);
        session.apply_refresh("at-2".into(), "rt-2".into(), None);
        assert_eq!(session.epoch(), start + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validity_check_is_time_boxed() {
        let session = SessionState::new();
        let interval = Duration::from_secs(30);

        assert!(session.begin_validity_check(interval));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!session.begin_validity_check(interval));
        tokio::time::advance(Duration::from_secs(25)).await;
        assert!(session.begin_validity_check(interval));

        session.reset();
        assert!(session.begin_validity_check(interval));
    }
}
