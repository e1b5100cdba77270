//! Error types for situ-core.
//!
//! Only host-boundary operations (JSON in/out, snapshot import) are
//! fallible. Semantic degradations inside the engine, such as unparsable
//! condition values or unknown operators, are absorbed as match scores and
//! never surface as errors.

use thiserror::Error;

/// Errors reported at the host boundary.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed JSON handed in by the host, or a serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A bandit snapshot could not be restored.
    #[error("Invalid bandit snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type alias for [`EngineError`].
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
