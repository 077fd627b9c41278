//! Credential sources.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::cached::CachedCredentials;
use crate::error::AuthError;

/// A bearer token presented to the service.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// The token value.
    pub token: String,
    /// When the token stops being accepted, if known.
    pub expires_at: Option<Instant>,
}

impl AccessToken {
    /// A token that never expires.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    /// A token valid until `expires_at`.
    pub fn expiring(token: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            token: token.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Whether the token is still usable at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| now < exp)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Produces access tokens on demand.
///
/// Implementations are called lazily, the first time a transport needs to
/// authenticate, and again whenever a cached token nears expiry.
#[async_trait]
pub trait CredentialsProvider: fmt::Debug + Send + Sync {
    /// Fetch a fresh token.
    async fn access_token(&self) -> Result<AccessToken, AuthError>;
}

/// Credentials configured for a connection.
///
/// Equality and hashing are by identity for [`Credentials::Provider`], so two
/// connections share a session pool only when they were configured with the
/// same provider instance.
#[derive(Clone, Default)]
pub enum Credentials {
    /// No credentials, for emulators and tests.
    #[default]
    Anonymous,
    /// A fixed bearer token.
    AccessToken(String),
    /// A custom token source.
    Provider(Arc<dyn CredentialsProvider>),
}

impl Credentials {
    /// Wrap a custom provider.
    pub fn provider(provider: impl CredentialsProvider + 'static) -> Self {
        Self::Provider(Arc::new(provider))
    }

    /// Token source for a transport, or `None` for anonymous access.
    ///
    /// Providers are wrapped in a cache so the underlying source is only
    /// consulted when no valid token is held.
    #[must_use]
    pub fn token_source(&self) -> Option<Arc<dyn CredentialsProvider>> {
        match self {
            Self::Anonymous => None,
            Self::AccessToken(token) => Some(Arc::new(StaticToken(token.clone()))),
            Self::Provider(provider) => {
                Some(Arc::new(CachedCredentials::new(Arc::clone(provider))))
            }
        }
    }

    fn identity(&self) -> (u8, usize, Option<&str>) {
        match self {
            Self::Anonymous => (0, 0, None),
            Self::AccessToken(token) => (1, 0, Some(token)),
            Self::Provider(p) => (2, Arc::as_ptr(p).cast::<()>() as usize, None),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::AccessToken(_) => f.write_str("AccessToken([REDACTED])"),
            Self::Provider(p) => f.debug_tuple("Provider").field(p).finish(),
        }
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Credentials {}

impl Hash for Credentials {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

#[derive(Debug)]
struct StaticToken(String);

#[async_trait]
impl CredentialsProvider for StaticToken {
    async fn access_token(&self) -> Result<AccessToken, AuthError> {
        if self.0.is_empty() {
            return Err(AuthError::Configuration("access token is empty".into()));
        }
        Ok(AccessToken::new(self.0.clone()))
    }
}
