//! Error types raised by the core state machinery.

use thiserror::Error;

/// Errors caused by driving an instance outside its declared configuration.
///
/// These are fatal to the failing call only; instance state is left
/// unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("phase '{phase}' is not in the declared phase set {allowed:?}")]
    PhaseNotAllowed {
        phase: String,
        allowed: Vec<String>,
    },

    #[error("instance is closed; no further transitions, scheduling, or registration")]
    Closed,
}
