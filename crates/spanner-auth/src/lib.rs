//! # spanner-auth
//!
//! Credential sources for Spanner transports.
//!
//! Credentials are part of a connection's configuration and take part in
//! deciding which session pool a connection uses. They are resolved lazily:
//! nothing is fetched until the first pool for a configuration is created.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spanner_auth::Credentials;
//!
//! let anonymous = Credentials::Anonymous; // emulator
//! let fixed = Credentials::AccessToken(token);
//! let custom = Credentials::provider(MyProvider::new());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cached;
pub mod credentials;
pub mod error;

pub use cached::CachedCredentials;
pub use credentials::{AccessToken, Credentials, CredentialsProvider};
pub use error::AuthError;
