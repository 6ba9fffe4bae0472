//! Client configuration.

use crate::error::{ClientError, ClientResult};
use std::time::Duration;
use url::Url;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a cached access token is served without re-reading storage.
pub const DEFAULT_TOKEN_FRESHNESS: Duration = Duration::from_secs(10);

/// Maximum number of requests allowed to wait on one refresh.
pub const DEFAULT_MAX_PENDING_REFRESH: usize = 50;

/// Minimum spacing between proactive session validity checks.
pub const DEFAULT_VALIDITY_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Tokens expiring within this margin are refreshed proactively.
pub const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Configuration for an [`ApiClient`](crate::ApiClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every relative request path is joined onto.
    pub base_url: Url,
    /// Path of the token refresh endpoint.
    pub refresh_path: String,
    /// Path of the login endpoint.
    pub login_path: String,
    /// Path of the logout endpoint.
    pub logout_path: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Freshness window of the token cache.
    pub token_freshness: Duration,
    /// Bound of the refresh waiting queue.
    pub max_pending_refresh: usize,
    /// Minimum spacing between proactive validity checks.
    pub validity_check_interval: Duration,
    /// Expiry margin for proactive refresh.
    pub expiry_margin: Duration,
}

impl ClientConfig {
    /// Create a config for the API at `base_url` with default tunables.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url: with_trailing_slash(base_url),
            refresh_path: "/auth/refresh-token".into(),
            login_path: "/auth/login".into(),
            logout_path: "/auth/logout".into(),
            timeout: DEFAULT_TIMEOUT,
            token_freshness: DEFAULT_TOKEN_FRESHNESS,
            max_pending_refresh: DEFAULT_MAX_PENDING_REFRESH,
            validity_check_interval: DEFAULT_VALIDITY_CHECK_INTERVAL,
            expiry_margin: DEFAULT_EXPIRY_MARGIN,
        }
    }

    /// Parse `base_url` and create a config for it.
    pub fn parse(base_url: &str) -> ClientResult<Self> {
        Ok(Self::new(Url::parse(base_url)?))
    }

    /// Create a config from environment variables.
    ///
    /// # Required env vars
    /// - `LAUNDRIX_API_URL`: base URL of the API
    ///
    /// # Optional env vars
    /// - `LAUNDRIX_REFRESH_PATH`, `LAUNDRIX_LOGIN_PATH`, `LAUNDRIX_LOGOUT_PATH`
    /// - `LAUNDRIX_TIMEOUT_SECS`: per-request timeout in seconds
    /// - `LAUNDRIX_MAX_PENDING`: bound of the refresh waiting queue
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ClientResult<Self> {
        let base_url = lookup("LAUNDRIX_API_URL")
            .ok_or_else(|| ClientError::Configuration("LAUNDRIX_API_URL is required".into()))?;
        let base_url = Url::parse(&base_url)
            .map_err(|e| ClientError::Configuration(format!("LAUNDRIX_API_URL: {e}")))?;

        let mut config = Self::new(base_url);

        if let Some(path) = lookup("LAUNDRIX_REFRESH_PATH") {
            config = config.refresh_path(path);
        }
        if let Some(path) = lookup("LAUNDRIX_LOGIN_PATH") {
            config = config.login_path(path);
        }
        if let Some(path) = lookup("LAUNDRIX_LOGOUT_PATH") {
            config = config.logout_path(path);
        }
        if let Some(secs) = lookup("LAUNDRIX_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| ClientError::Configuration(format!("LAUNDRIX_TIMEOUT_SECS: {e}")))?;
            config = config.timeout(Duration::from_secs(secs));
        }
        if let Some(limit) = lookup("LAUNDRIX_MAX_PENDING") {
            let limit: usize = limit
                .parse()
                .map_err(|e| ClientError::Configuration(format!("LAUNDRIX_MAX_PENDING: {e}")))?;
            config = config.max_pending_refresh(limit);
        }

        Ok(config)
    }

    /// Set the refresh endpoint path.
    #[must_use]
    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Set the login endpoint path.
    #[must_use]
    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Set the logout endpoint path.
    #[must_use]
    pub fn logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = path.into();
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the token cache freshness window.
    #[must_use]
    pub fn token_freshness(mut self, window: Duration) -> Self {
        self.token_freshness = window;
        self
    }

    /// Set the bound of the refresh waiting queue.
    #[must_use]
    pub fn max_pending_refresh(mut self, limit: usize) -> Self {
        self.max_pending_refresh = limit;
        self
    }

    /// Set the minimum spacing between validity checks.
    #[must_use]
    pub fn validity_check_interval(mut self, interval: Duration) -> Self {
        self.validity_check_interval = interval;
        self
    }

    /// Set the proactive refresh margin.
    #[must_use]
    pub fn expiry_margin(mut self, margin: Duration) -> Self {
        self.expiry_margin = margin;
        self
    }

    /// Resolve a request target. Absolute URLs are used as-is; anything else
    /// is joined below the base URL, keeping the base path.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path);
        }
        self.base_url.join(path.trim_start_matches('/'))
    }

    /// Resolved refresh endpoint.
    pub fn refresh_url(&self) -> Result<Url, url::ParseError> {
        self.endpoint(&self.refresh_path)
    }

    /// Resolved login endpoint.
    pub fn login_url(&self) -> Result<Url, url::ParseError> {
        self.endpoint(&self.login_path)
    }

    /// Resolved logout endpoint.
    pub fn logout_url(&self) -> Result<Url, url::ParseError> {
        self.endpoint(&self.logout_path)
    }
}

// `Url::join` replaces the last path segment unless the base ends in '/'.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
