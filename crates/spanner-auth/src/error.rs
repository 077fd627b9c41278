//! Authentication error types.

use thiserror::Error;

/// Errors raised while obtaining credentials.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The credential source could not produce a token.
    #[error("failed to obtain access token: {0}")]
    TokenUnavailable(String),

    /// The credential source returned a token that had already expired.
    #[error("access token expired")]
    TokenExpired,

    /// Credentials were configured inconsistently.
    #[error("invalid credentials configuration: {0}")]
    Configuration(String),
}
