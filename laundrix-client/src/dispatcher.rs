//! The authenticated API client.

use crate::cache::TokenCache;
use crate::config::ClientConfig;
use crate::coordinator::RefreshCoordinator;
use crate::error::{ClientError, ClientResult, RefreshError};
use crate::grant::{parse_expiry, LoginGrant, RefreshRequest};
use crate::jwt;
use crate::session::{SessionSnapshot, SessionState};
use chrono::{DateTime, Utc};
use laundrix_store::{keys, CredentialStore};
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// A request to the API.
///
/// Paths are resolved against the configured base URL; absolute URLs are
/// sent as-is.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<JsonValue>,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    retried: bool,
}

impl ApiRequest {
    /// Create a request.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
            headers: Vec::new(),
            retried: false,
        }
    }

    /// Set a JSON body.
    #[must_use]
    pub fn json(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a query parameter.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path or absolute URL.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this request is the replay after a token refresh.
    pub fn is_retried(&self) -> bool {
        self.retried
    }
}

/// Result of a proactive session check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCheck {
    /// A check already ran within the configured interval.
    Skipped,
    /// No access token is held.
    Unauthenticated,
    /// The access token is good for now.
    Valid {
        /// Expiry claim of the token, when it carries one.
        expires_at: Option<DateTime<Utc>>,
    },
    /// The token was about to expire and has been refreshed.
    Refreshed,
}

struct Inner {
    config: ClientConfig,
    http: reqwest::Client,
    store: Arc<dyn CredentialStore>,
    cache: Arc<TokenCache>,
    session: Arc<SessionState>,
    coordinator: RefreshCoordinator,
}

/// HTTP client that authenticates every request and renews the session
/// transparently when the server rejects the access token.
///
/// Cloning is cheap; clones share the session, cache and refresh queue.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.config.base_url.as_str())
            .field("authenticated", &self.inner.session.is_authenticated())
            .field("coordinator", &self.inner.coordinator)
            .finish()
    }
}

impl ApiClient {
    /// Create a client over `store`.
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;
        Self::with_http_client(config, store, http)
    }

    /// Create a client with a preconfigured HTTP client.
    ///
    /// The client's own timeout applies instead of [`ClientConfig::timeout`].
    pub fn with_http_client(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        http: reqwest::Client,
    ) -> ClientResult<Self> {
        let refresh_url = config.refresh_url()?;
        let cache = Arc::new(TokenCache::new(store.clone(), config.token_freshness));
        let session = Arc::new(SessionState::new());
        let coordinator = RefreshCoordinator::new(
            http.clone(),
            refresh_url,
            store.clone(),
            cache.clone(),
            session.clone(),
            config.max_pending_refresh,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http,
                store,
                cache,
                session,
                coordinator,
            }),
        })
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Observable session state.
    pub fn session(&self) -> &SessionState {
        &self.inner.session
    }

    /// Access token cache.
    pub fn token_cache(&self) -> &TokenCache {
        &self.inner.cache
    }

    /// Refresh coordinator.
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.inner.coordinator
    }

    /// Credential store.
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    /// Start building a request.
    pub fn request(&self, method: Method, path: impl Into<String>) -> ApiRequest {
        ApiRequest::new(method, path)
    }

    /// `GET path`.
    pub async fn get(&self, path: &str) -> ClientResult<Response> {
        self.execute(ApiRequest::new(Method::GET, path)).await
    }

    /// `POST path` with a JSON body.
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ClientResult<Response> {
        self.execute(ApiRequest::new(Method::POST, path).json(serde_json::to_value(body)?))
            .await
    }

    /// `PUT path` with a JSON body.
    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ClientResult<Response> {
        self.execute(ApiRequest::new(Method::PUT, path).json(serde_json::to_value(body)?))
            .await
    }

    /// `PATCH path` with a JSON body.
    pub async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ClientResult<Response> {
        self.execute(ApiRequest::new(Method::PATCH, path).json(serde_json::to_value(body)?))
            .await
    }

    /// `DELETE path`.
    pub async fn delete(&self, path: &str) -> ClientResult<Response> {
        self.execute(ApiRequest::new(Method::DELETE, path)).await
    }

    /// `GET path` and decode the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        Ok(self.get(path).await?.json().await?)
    }

    /// `POST path` and decode the JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        Ok(self.post(path, body).await?.json().await?)
    }

    /// Send `request`, renewing the session once if the server rejects the
    /// access token.
    ///
    /// A 401 on the first attempt hands over to the [`RefreshCoordinator`];
    /// the request is then replayed with the new token. A 401 on the replay,
    /// or on the refresh endpoint itself, is returned as-is.
    pub async fn execute(&self, request: ApiRequest) -> ClientResult<Response> {
        let url = self.inner.config.endpoint(&request.path)?;
        let is_refresh = self.is_refresh_endpoint(&url);
        let token = if is_refresh {
            None
        } else {
            self.inner.cache.get_token(false).await
        };

        match self.send(&request, &url, token.as_deref()).await {
            Err(err) if err.is_unauthorized() && !request.retried && !is_refresh => {
                self.recover(request, url, token, err).await
            }
            other => other,
        }
    }

    async fn recover(
        &self,
        mut request: ApiRequest,
        url: Url,
        sent_token: Option<String>,
        original: ClientError,
    ) -> ClientResult<Response> {
        request.retried = true;

        // A refresh that settled while this request was in flight has
        // already produced a newer token.
        if let Some(current) = self.inner.session.access_token() {
            if sent_token.as_deref() != Some(current.as_str()) {
                debug!(url = %url, "Replaying with token renewed in flight");
                return self.send(&request, &url, Some(&current)).await;
            }
        }

        let token = match self.inner.coordinator.refresh().await {
            Ok(token) => token,
            Err(RefreshError::QueueFull { limit }) => {
                return Err(ClientError::QueueOverflow { limit })
            }
            Err(RefreshError::Failed(reason)) => {
                return Err(ClientError::AuthRefreshFailed {
                    original: Box::new(original),
                    reason,
                })
            }
        };

        debug!(url = %url, "Replaying request after token refresh");
        self.send(&request, &url, Some(&token)).await
    }

    async fn send(
        &self,
        request: &ApiRequest,
        url: &Url,
        token: Option<&str>,
    ) -> ClientResult<Response> {
        let mut builder = self.inner.http.request(request.method.clone(), url.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(
            method = %request.method,
            url = %url,
            authenticated = token.is_some(),
            retried = request.retried,
            "Sending request"
        );
        let response = builder.send().await?;
        check_response(response).await
    }

    fn is_refresh_endpoint(&self, url: &Url) -> bool {
        let refresh = self.inner.coordinator.refresh_url();
        url.origin() == refresh.origin() && url.path() == refresh.path()
    }

    /// Sign in with `credentials` and persist the issued session.
    ///
    /// A successful login replaces any previous local session.
    pub async fn login<C: Serialize + ?Sized>(&self, credentials: &C) -> ClientResult<LoginGrant> {
        let url = self.inner.config.login_url()?;
        let response = self.inner.http.post(url).json(credentials).send().await?;
        let body: JsonValue = check_response(response).await?.json().await?;

        let grant = LoginGrant::from_body(&body);
        let access_token = grant.tokens.access_token.clone().ok_or_else(|| {
            ClientError::InvalidResponse("login response did not include an access token".into())
        })?;
        if grant.tokens.refresh_token.is_none() {
            warn!("Login response did not include a refresh token");
        }

        let expiry_text = grant.tokens.refresh_token_expiry.map(|e| e.to_rfc3339());
        let user_text = grant.user.as_ref().map(serde_json::to_string).transpose()?;

        let mut entries = vec![(keys::TOKEN, access_token.as_str())];
        if let Some(refresh_token) = &grant.tokens.refresh_token {
            entries.push((keys::REFRESH_TOKEN, refresh_token.as_str()));
        }
        if let Some(expiry) = &expiry_text {
            entries.push((keys::REFRESH_TOKEN_EXPIRY, expiry.as_str()));
        }
        if let Some(user_id) = &grant.user_id {
            entries.push((keys::USER_ID, user_id.as_str()));
        }
        if let Some(user) = &user_text {
            entries.push((keys::USER, user.as_str()));
        }

        let snapshot = SessionSnapshot {
            user_id: grant.user_id.clone(),
            user: grant.user.clone(),
            refresh_token_expiry: grant.tokens.refresh_token_expiry,
            ..SessionSnapshot::with_tokens(
                Some(access_token.clone()),
                grant.tokens.refresh_token.clone(),
            )
        };
        self.inner
            .coordinator
            .install_session(&entries, snapshot)
            .await?;

        info!(user_id = grant.user_id.as_deref().unwrap_or("-"), "Signed in");
        Ok(grant)
    }

    /// Sign out. The server is told on a best-effort basis; local
    /// credentials are cleared regardless.
    pub async fn logout(&self) {
        if let Err(e) = self.notify_logout().await {
            warn!(error = %e, "Logout request failed, clearing local session anyway");
        }
        self.inner.coordinator.clear_local_session().await;
        info!("Signed out");
    }

    async fn notify_logout(&self) -> ClientResult<()> {
        let url = self.inner.config.logout_url()?;
        let token = self.inner.cache.get_token(false).await;
        let refresh_token = match self.inner.session.refresh_token() {
            Some(token) => Some(token),
            None => self.inner.store.get(keys::REFRESH_TOKEN).await?,
        };

        let mut builder = self.inner.http.post(url);
        if let Some(token) = &token {
            builder = builder.bearer_auth(token);
        }
        if let Some(refresh_token) = &refresh_token {
            builder = builder.json(&RefreshRequest { refresh_token });
        }
        check_response(builder.send().await?).await?;
        Ok(())
    }

    /// Load the persisted session into [`SessionState`]. Returns whether it
    /// is authenticated.
    pub async fn restore_session(&self) -> ClientResult<bool> {
        let mut values: HashMap<String, String> = self
            .inner
            .store
            .multi_get(&keys::AUTH_KEYS)
            .await?
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect();

        let snapshot = SessionSnapshot {
            refresh_token_expiry: values
                .remove(keys::REFRESH_TOKEN_EXPIRY)
                .and_then(|text| parse_expiry(&JsonValue::String(text))),
            user_id: values.remove(keys::USER_ID),
            user: values.remove(keys::USER).and_then(|text| decode_stored(keys::USER, &text)),
            user_detail: values
                .remove(keys::USER_DETAIL)
                .and_then(|text| decode_stored(keys::USER_DETAIL, &text)),
            ..SessionSnapshot::with_tokens(
                values.remove(keys::TOKEN),
                values.remove(keys::REFRESH_TOKEN),
            )
        };

        let authenticated = snapshot.authenticated;
        debug!(authenticated, "Session restored from storage");
        self.inner.session.replace(snapshot);
        Ok(authenticated)
    }

    /// Persist and publish the signed-in user's profile detail.
    pub async fn set_user_detail(&self, detail: JsonValue) -> ClientResult<()> {
        let text = serde_json::to_string(&detail)?;
        self.inner.store.set(keys::USER_DETAIL, &text).await?;
        self.inner.session.set_user_detail(Some(detail));
        Ok(())
    }

    /// Check the access token's expiry and refresh it ahead of time when it
    /// is expired or about to be. Runs at most once per
    /// [`ClientConfig::validity_check_interval`].
    pub async fn check_session(&self) -> ClientResult<SessionCheck> {
        let config = &self.inner.config;
        if !self
            .inner
            .session
            .begin_validity_check(config.validity_check_interval)
        {
            return Ok(SessionCheck::Skipped);
        }

        let Some(token) = self.inner.session.access_token() else {
            return Ok(SessionCheck::Unauthenticated);
        };
        let Some(expires_at) = jwt::expiry(&token) else {
            debug!("Access token carries no readable expiry");
            return Ok(SessionCheck::Valid { expires_at: None });
        };

        let margin = chrono::Duration::from_std(config.expiry_margin)
            .unwrap_or_else(|_| chrono::Duration::zero());
        if !jwt::needs_renewal(expires_at, Utc::now(), margin) {
            return Ok(SessionCheck::Valid {
                expires_at: Some(expires_at),
            });
        }

        info!(%expires_at, "Access token expiring, refreshing ahead of time");
        match self.inner.coordinator.refresh().await {
            Ok(_) => Ok(SessionCheck::Refreshed),
            Err(RefreshError::QueueFull { limit }) => Err(ClientError::QueueOverflow { limit }),
            Err(RefreshError::Failed(reason)) => Err(ClientError::AuthRefreshFailed {
                original: Box::new(ClientError::TokenExpired { expires_at }),
                reason,
            }),
        }
    }

    /// Run [`check_session`](Self::check_session) every `period` until
    /// `cancel` fires.
    pub fn spawn_session_monitor(
        &self,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Session monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => match client.check_session().await {
                        Ok(check) => debug!(?check, "Session checked"),
                        Err(e) => warn!(error = %e, "Session check failed"),
                    },
                }
            }
        })
    }
}

async fn check_response(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), "Request failed");
    Err(ClientError::http(status.as_u16(), body))
}

fn decode_stored(key: &str, text: &str) -> Option<JsonValue> {
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "Ignoring undecodable stored value");
            None
        }
    }
}
