//! Bill verification backbone.
//!
//! One document per uploaded PDF, a durable single-claim job queue inside
//! the state store, a single-flight background worker that drives each bill
//! through OCR, extraction, and semantic verification, and a retention
//! worker that purges soft-deleted records. The HTTP surface is a
//! collaborator; it consumes the service layer in [`services`].

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod state;

pub use config::Config;
pub use state::AppState;

/// Server error taxonomy. User-visible variants map one-to-one onto the
/// caller-facing operations; diagnostic conditions (completeness, counter,
/// reconciliation violations) are logged and attached to results instead of
/// being raised.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed employee id, empty file, unknown hospital, bad upload id.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The record exists but is not in a state that supports the operation.
    #[error("not ready: {0}")]
    NotReady(String),

    #[error("already deleted: {0}")]
    AlreadyDeleted(String),

    #[error("not deleted: {0}")]
    NotDeleted(String),

    #[error("catalog load failed: {0}")]
    CatalogLoad(String),

    #[error("hospital not found: {0}")]
    HospitalNotFound(String),

    /// Raised only when every page of a document failed OCR.
    #[error("OCR failed: {0}")]
    OcrFailure(String),

    /// Transport failure to the state store.
    #[error("store unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<beleg_catalog::Error> for Error {
    fn from(e: beleg_catalog::Error) -> Self {
        match e {
            beleg_catalog::Error::HospitalNotFound(name) => Error::HospitalNotFound(name),
            beleg_catalog::Error::CatalogLoad(msg) => Error::CatalogLoad(msg),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<beleg_verifier::Error> for Error {
    fn from(e: beleg_verifier::Error) -> Self {
        match e {
            beleg_verifier::Error::Catalog(inner) => inner.into(),
            other => Error::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
