//! # laundrix-client
//!
//! Authenticated HTTP client for the laundrix driver API.
//!
//! Every request carries the current access token. When the server rejects
//! it, the client renews the session once and replays the request, so
//! callers never see an expired token as long as the refresh token is good.
//!
//! ## Core Concepts
//!
//! - **[`ApiClient`]**: sends requests, attaches the bearer token and owns
//!   the login, logout and restore flows
//! - **[`TokenCache`]**: serves the access token without hitting storage on
//!   every request
//! - **[`RefreshCoordinator`]**: runs at most one refresh call at a time and
//!   parks concurrent callers in a bounded queue
//! - **[`SessionState`]**: observable snapshot of the signed-in session
//!
//! ## Failure Handling
//!
//! A 401 triggers one refresh. If that fails, local credentials are cleared
//! and the request fails with [`ClientError::AuthRefreshFailed`]; UI code
//! routes the user to login when [`ClientError::is_auth_error`] is set.
//! Network errors and timeouts never trigger a refresh.
//!
//! ## Example
//!
//! ```ignore
//! use laundrix_client::{ApiClient, ClientConfig};
//! use laundrix_store::FileStore;
//! use std::sync::Arc;
//!
//! let config = ClientConfig::from_env()?;
//! let client = ApiClient::new(config, Arc::new(FileStore::new("credentials.json")))?;
//!
//! if !client.restore_session().await? {
//!     client.login(&serde_json::json!({"email": email, "password": password})).await?;
//! }
//! let orders: Vec<Order> = client.get_json("/orders/assigned").await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod grant;
pub mod jwt;
pub mod session;

#[cfg(test)]
mod test_support;

// Re-exports
pub use cache::TokenCache;
pub use config::ClientConfig;
pub use coordinator::{RefreshCoordinator, RefreshPhase};
pub use dispatcher::{ApiClient, ApiRequest, SessionCheck};
pub use error::{ClientError, ClientResult, RefreshError, RefreshFailure};
pub use grant::{LoginGrant, TokenGrant};
pub use session::{SessionSnapshot, SessionState};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        ApiClient, ApiRequest, ClientConfig, ClientError, ClientResult, SessionCheck,
        SessionSnapshot,
    };
}
