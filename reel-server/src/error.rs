//! Error taxonomy.
//!
//! Three kinds of failure get three different treatments:
//! [`AuthError`] refuses the connection and is never retried server-side;
//! [`StoreError`] degrades to "unknown/offline" without ending anything;
//! [`PersistError`] reaches only the caller of the triggering mutation and
//! never rolls back pushes that already happened. A delivery target with
//! zero sessions is not an error at all.

use thiserror::Error;

/// Why a credential was refused at connect time.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,

    #[error("invalid credential: {0}")]
    Malformed(String),

    #[error("expired credential")]
    Expired,

    #[error("unknown user: {0}")]
    UnknownUser(String),
}

impl AuthError {
    /// Stable machine-readable code for the structured rejection body.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Missing => "AUTH_MISSING",
            AuthError::Malformed(_) => "AUTH_INVALID",
            AuthError::Expired => "AUTH_EXPIRED",
            AuthError::UnknownUser(_) => "AUTH_UNKNOWN_USER",
        }
    }
}

/// The presence store could not answer. Callers treat this as
/// "unknown/offline", never as a reason to drop a connection.
#[derive(Debug, Error)]
#[error("presence store unavailable: {0}")]
pub struct StoreError(pub String);

/// A durable notification write failed after any pushes already went out.
#[derive(Debug, Error)]
#[error("durable notification write failed: {0}")]
pub struct PersistError(#[from] pub rusqlite::Error);
