//! # laundrix - Authenticated Session Layer
//!
//! laundrix is the client-side session layer of the laundrix driver app. It
//! attaches bearer tokens to API requests, renews expired sessions with a
//! single in-flight refresh call, and keeps credentials on disk between
//! runs.
//!
//! ## Quick Start
//!
//! ```ignore
//! use laundrix::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = laundrix::connect(ClientConfig::from_env()?, "credentials.json").await?;
//!
//!     if !client.session().is_authenticated() {
//!         client
//!             .login(&serde_json::json!({"email": "dana@example.com", "password": "..."}))
//!             .await?;
//!     }
//!
//!     let orders: serde_json::Value = client.get_json("/orders/assigned").await?;
//!     println!("{orders}");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`laundrix_store`] - Credential storage trait and backends
//! - [`laundrix_client`] - API client, token cache, refresh coordinator and
//!   session state

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Credential storage.
pub use laundrix_store as store;

/// API client and session management.
pub use laundrix_client as client;

// Errors
pub use laundrix_client::{ClientError, ClientResult, RefreshError, RefreshFailure};
pub use laundrix_store::{StorageError, StoreResult};

// Client
pub use laundrix_client::{
    ApiClient, ApiRequest, ClientConfig, RefreshCoordinator, RefreshPhase, SessionCheck,
    SessionSnapshot, SessionState, TokenCache,
};

// Storage
pub use laundrix_store::{keys, CredentialStore, FileStore, MemoryStore};

/// Convenient prelude for common imports.
///
/// ```rust,ignore
/// use laundrix::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ApiClient, ApiRequest, ClientConfig, ClientError, ClientResult, CredentialStore,
        FileStore, MemoryStore, SessionCheck, SessionSnapshot,
    };
    pub use tokio_util::sync::CancellationToken;
}

/// Open a client whose credentials live in the JSON file at `credentials`
/// and restore the session saved there.
pub async fn connect(
    config: ClientConfig,
    credentials: impl Into<PathBuf>,
) -> ClientResult<ApiClient> {
    let store = FileStore::new(credentials);
    info!(path = %store.path().display(), "Opening credential store");
    let client = ApiClient::new(config, Arc::new(store))?;
    let restored = client.restore_session().await?;
    info!(authenticated = restored, "Session restored");
    Ok(client)
}

/// Returns the version of laundrix.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
