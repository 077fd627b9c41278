//! Lazily resolved, cached token source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::credentials::{AccessToken, CredentialsProvider};
use crate::error::AuthError;

/// Tokens are refreshed this long before they expire.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Caches the token of an inner provider until it is about to expire.
///
/// Nothing is fetched at construction; the first [`access_token`] call
/// resolves the inner provider. Concurrent callers during a refresh wait for
/// the single in-flight fetch.
///
/// [`access_token`]: CredentialsProvider::access_token
#[derive(Debug)]
pub struct CachedCredentials {
    inner: Arc<dyn CredentialsProvider>,
    refresh_margin: Duration,
    cached: Mutex<Option<AccessToken>>,
}

impl CachedCredentials {
    /// Wrap `inner` with the default refresh margin.
    pub fn new(inner: Arc<dyn CredentialsProvider>) -> Self {
        Self {
            inner,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            cached: Mutex::new(None),
        }
    }

    /// Override the refresh margin.
    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }
}

#[async_trait]
impl CredentialsProvider for CachedCredentials {
    async fn access_token(&self) -> Result<AccessToken, AuthError> {
        let mut cached = self.cached.lock().await;

        let now = Instant::now();
        if let Some(token) = cached.as_ref() {
            if token.is_valid_at(now + self.refresh_margin) {
                return Ok(token.clone());
            }
            tracing::debug!("cached access token near expiry, refreshing");
        }

        let token = self.inner.access_token().await?;
        if !token.is_valid_at(Instant::now()) {
            return Err(AuthError::TokenExpired);
        }
        *cached = Some(token.clone());
        Ok(token)
    }
}
