//! Single-flight token refresh.
//!
//! The first caller to report an expired session becomes the leader and runs
//! the refresh call. Everyone arriving while it runs parks on a oneshot
//! channel in a bounded FIFO and receives the leader's outcome once it
//! settles. Only one refresh call is ever in flight per coordinator.
//!
//! Writes to the stored credentials go through one async gate together with
//! an epoch check, so a refresh that started before a logout or login can
//! neither resurrect the old session nor wipe the new one.

use crate::cache::TokenCache;
use crate::error::{ClientError, RefreshError, RefreshFailure};
use crate::grant::{parse_expiry, RefreshRequest, TokenGrant};
use crate::session::{SessionSnapshot, SessionState};
use chrono::{DateTime, Utc};
use laundrix_store::{keys, CredentialStore, StoreResult};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, warn};
use url::Url;

type Outcome = Result<String, RefreshFailure>;

#[derive(Debug, Default)]
struct RefreshQueue {
    refreshing: bool,
    waiters: VecDeque<oneshot::Sender<Outcome>>,
}

/// Observable state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    /// No refresh is running.
    Idle,
    /// A refresh call is in flight.
    Refreshing {
        /// Callers parked on its outcome.
        waiting: usize,
    },
}

/// Serializes token refreshes for one client.
pub struct RefreshCoordinator {
    http: reqwest::Client,
    refresh_url: Url,
    store: Arc<dyn CredentialStore>,
    cache: Arc<TokenCache>,
    session: Arc<SessionState>,
    max_pending: usize,
    queue: Mutex<RefreshQueue>,
    session_gate: AsyncMutex<()>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresh_url", &self.refresh_url.as_str())
            .field("max_pending", &self.max_pending)
            .field("phase", &self.phase())
            .finish()
    }
}

enum Role {
    Leader,
    Follower(oneshot::Receiver<Outcome>),
}

impl RefreshCoordinator {
    pub(crate) fn new(
        http: reqwest::Client,
        refresh_url: Url,
        store: Arc<dyn CredentialStore>,
        cache: Arc<TokenCache>,
        session: Arc<SessionState>,
        max_pending: usize,
    ) -> Self {
        Self {
            http,
            refresh_url,
            store,
            cache,
            session,
            max_pending,
            queue: Mutex::new(RefreshQueue::default()),
            session_gate: AsyncMutex::new(()),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> RefreshPhase {
        let queue = self.queue.lock();
        if queue.refreshing {
            RefreshPhase::Refreshing {
                waiting: queue.waiters.len(),
            }
        } else {
            RefreshPhase::Idle
        }
    }

    /// URL of the refresh endpoint.
    pub fn refresh_url(&self) -> &Url {
        &self.refresh_url
    }

    /// Obtain a new access token, joining the in-flight refresh if there is
    /// one.
    ///
    /// On failure the session the refresh started from has already been
    /// cleared by the time this returns. Fails with
    /// [`RefreshError::QueueFull`] without waiting when too many callers are
    /// already parked.
    pub async fn refresh(&self) -> Result<String, RefreshError> {
        let role = {
            let mut queue = self.queue.lock();
            if queue.refreshing {
                if queue.waiters.len() >= self.max_pending {
                    warn!(limit = self.max_pending, "Refresh queue full, rejecting request");
                    return Err(RefreshError::QueueFull {
                        limit: self.max_pending,
                    });
                }
                let (tx, rx) = oneshot::channel();
                queue.waiters.push_back(tx);
                Role::Follower(rx)
            } else {
                queue.refreshing = true;
                Role::Leader
            }
        };

        match role {
            Role::Follower(rx) => {
                debug!("Waiting on in-flight token refresh");
                match rx.await {
                    Ok(outcome) => outcome.map_err(RefreshError::from),
                    Err(_) => Err(RefreshFailure::Interrupted.into()),
                }
            }
            Role::Leader => {
                let guard = SettleGuard {
                    queue: &self.queue,
                    armed: true,
                };
                let epoch = self.session.epoch();
                let outcome = self.run_refresh(epoch).await;
                if let Err(reason) = &outcome {
                    self.clear_failed_session(epoch, reason).await;
                }
                guard.settle(outcome.clone());
                outcome.map_err(RefreshError::from)
            }
        }
    }

    async fn run_refresh(&self, epoch: u64) -> Outcome {
        let (refresh_token, expiry) = self.current_refresh_token().await?;
        if let Some(expiry) = expiry {
            if expiry <= Utc::now() {
                return Err(RefreshFailure::RefreshTokenExpired);
            }
        }

        debug!(url = %self.refresh_url, "Refreshing access token");
        let response = self
            .http
            .post(self.refresh_url.clone())
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await
            .map_err(|e| RefreshFailure::Transport(ClientError::from(e).to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshFailure::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| RefreshFailure::Transport(ClientError::from(e).to_string()))?;
        let grant = TokenGrant::from_body(&body);
        let access_token = grant
            .access_token
            .ok_or(RefreshFailure::MissingAccessToken)?;
        let refresh_token = grant
            .refresh_token
            .ok_or(RefreshFailure::RefreshTokenNotRotated)?;

        let expiry_text = grant.refresh_token_expiry.map(|e| e.to_rfc3339());
        let mut entries = vec![
            (keys::TOKEN, access_token.as_str()),
            (keys::REFRESH_TOKEN, refresh_token.as_str()),
        ];
        if let Some(expiry) = &expiry_text {
            entries.push((keys::REFRESH_TOKEN_EXPIRY, expiry.as_str()));
        }
        let _gate = self.session_gate.lock().await;
        if self.session.epoch() != epoch {
            info!("Session changed during refresh, discarding renewed tokens");
            return Err(RefreshFailure::Superseded);
        }
        self.store
            .multi_set(&entries)
            .await
            .map_err(|e| RefreshFailure::Persistence(e.to_string()))?;

        self.cache.prime(access_token.clone());
        self.session
            .apply_refresh(access_token.clone(), refresh_token, grant.refresh_token_expiry);
        info!("Access token refreshed");
        Ok(access_token)
    }

    // Session first; storage only when the session never saw one.
    async fn current_refresh_token(
        &self,
    ) -> Result<(String, Option<DateTime<Utc>>), RefreshFailure> {
        if let Some(token) = self.session.refresh_token() {
            return Ok((token, self.session.refresh_token_expiry()));
        }

        let values = match self
            .store
            .multi_get(&[keys::REFRESH_TOKEN, keys::REFRESH_TOKEN_EXPIRY])
            .await
        {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "Failed to read refresh token from storage");
                return Err(RefreshFailure::MissingRefreshToken);
            }
        };
        let mut values = values.into_iter().map(|(_, v)| v);
        let token = values
            .next()
            .flatten()
            .filter(|t| !t.is_empty())
            .ok_or(RefreshFailure::MissingRefreshToken)?;
        let expiry = values
            .next()
            .flatten()
            .and_then(|text| parse_expiry(&JsonValue::String(text)));
        Ok((token, expiry))
    }

    async fn clear_failed_session(&self, epoch: u64, reason: &RefreshFailure) {
        let _gate = self.session_gate.lock().await;
        if self.session.epoch() != epoch {
            debug!(reason = %reason, "Token refresh failed for a session that was already replaced");
            return;
        }
        warn!(reason = %reason, "Token refresh failed, clearing session");
        self.clear_locked().await;
    }

    /// Drop every local trace of the session. Storage failures are logged.
    pub(crate) async fn clear_local_session(&self) {
        let _gate = self.session_gate.lock().await;
        self.clear_locked().await;
    }

    /// Replace the local session with a freshly issued one.
    pub(crate) async fn install_session(
        &self,
        entries: &[(&str, &str)],
        snapshot: SessionSnapshot,
    ) -> StoreResult<()> {
        let _gate = self.session_gate.lock().await;
        self.clear_locked().await;
        self.store.multi_set(entries).await?;
        if let Some(token) = &snapshot.access_token {
            self.cache.prime(token.clone());
        }
        self.session.replace(snapshot);
        Ok(())
    }

    // Callers hold `session_gate`.
    async fn clear_locked(&self) {
        self.session.advance_epoch();
        if let Err(e) = self.store.multi_remove(&keys::AUTH_KEYS).await {
            warn!(error = %e, "Failed to remove stored credentials");
        }
        self.cache.reset();
        self.session.reset();
    }
}

/// Settles the queue exactly once, even when the leader is dropped mid-refresh.
struct SettleGuard<'a> {
    queue: &'a Mutex<RefreshQueue>,
    armed: bool,
}

impl SettleGuard<'_> {
    fn settle(mut self, outcome: Outcome) {
        self.armed = false;
        drain(self.queue, outcome);
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Token refresh dropped before completion");
            drain(self.queue, Err(RefreshFailure::Interrupted));
        }
    }
}

fn drain(queue: &Mutex<RefreshQueue>, outcome: Outcome) {
    let waiters = {
        let mut queue = queue.lock();
        queue.refreshing = false;
        std::mem::take(&mut queue.waiters)
    };
    if !waiters.is_empty() {
        debug!(waiters = waiters.len(), ok = outcome.is_ok(), "Releasing queued requests");
    }
    for waiter in waiters {
        // A waiter whose caller went away is fine to skip.
        let _ = waiter.send(outcome.clone());
    }
}
