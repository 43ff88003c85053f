//! Error types for session operations and their collaborators.

use thiserror::Error;

/// Failures surfaced to callers of the session store.
///
/// `StorageUnavailable` and `NavigationFailure` exist so callers can name
/// them, but the store and guard degrade on those and only log.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No account is registered for the given email.
    #[error("account not found")]
    AccountNotFound,

    /// The account service rejected the email/password pair.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Sign-up was attempted for an email that already has an account.
    #[error("account already exists")]
    AccountAlreadyExists,

    /// Persisted continuity evidence could not be read or written.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The navigation collaborator refused a redirect.
    #[error("navigation failed: {0}")]
    NavigationFailure(String),

    /// The account service could not be reached or answered unexpectedly.
    #[error("account service error: {0}")]
    Service(String),

    /// A newer session request was issued before this one completed.
    #[error("superseded by a newer session request")]
    Superseded,

    /// The guest bypass is not enabled in this build.
    #[error("skip is disabled")]
    SkipDisabled,
}

/// Failure reported by a continuity store backend.
#[derive(Debug, Error)]
#[error("continuity store error: {0}")]
pub struct StorageError(#[from] pub anyhow::Error);

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::StorageUnavailable(format!("{:#}", err.0))
    }
}

/// Failure reported by a navigation collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("navigation error: {0}")]
pub struct NavigationError(pub String);

impl From<NavigationError> for AuthError {
    fn from(err: NavigationError) -> Self {
        AuthError::NavigationFailure(err.0)
    }
}

/// Result alias for session operations.
pub type AuthResult<T> = Result<T, AuthError>;
