//! # laundrix-store
//!
//! Durable key/value storage for session credentials.
//!
//! The session layer keeps its access token, refresh token and identity
//! payload in a string-keyed store that survives process restarts. This crate
//! provides the storage seam and two backends:
//!
//! - **[`CredentialStore`]**: async get/set/remove over string keys, with
//!   batched `multi_*` operations
//! - **[`MemoryStore`]**: process-local store, used in tests and previews
//! - **[`FileStore`]**: JSON file written atomically (temp file + rename)
//!
//! Key names shared with the backend contract live in [`keys`].
//!
//! ## Example
//!
//! ```ignore
//! use laundrix_store::{keys, CredentialStore, FileStore};
//!
//! let store = FileStore::new("/var/lib/laundrix/credentials.json");
//! store
//!     .multi_set(&[(keys::TOKEN, "at-1"), (keys::REFRESH_TOKEN, "rt-1")])
//!     .await?;
//! assert_eq!(store.get(keys::TOKEN).await?.as_deref(), Some("at-1"));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod file;
pub mod keys;
pub mod memory;
pub mod store;

pub use error::{StorageError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::CredentialStore;
