//! Unified error types surfaced by the runtime.
//!
//! Wraps configuration failures from the core state machinery and
//! persistence failures from the repository layer so callers can bubble them
//! up with consistent context.

use thiserror::Error;
use uuid::Uuid;

pub use session_core::ConfigurationError;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Errors raised by the persistence layer.
///
/// Fragment-scoped failures inside a bundle load are downgraded to warnings
/// and defaults (degraded-load policy); only whole-bundle problems surface
/// through this type.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("no persisted bundle for instance {0}")]
    NotFound(Uuid),
}
