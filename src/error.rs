//! Engine-wide error type and the status-code boundary at the embedding edge.
use thiserror::Error;

/// Failures returned by engine operations.
///
/// Every variant maps 1:1 onto one of the six wire codes an embedding
/// boundary would see (`OK` has no variant: success is `Ok(_)`).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// Unstructured failure with no more specific classification.
    #[error("internal error")]
    Error,
    /// An operation that legitimately found nothing (empty search, absent content).
    #[error("no result")]
    No,
    /// A caller-supplied argument was malformed or out of range.
    #[error("invalid parameters")]
    InvalidParams,
    /// A typed view did not match the stored representation.
    #[error("invalid type")]
    InvalidType,
    /// The store, transaction, or iterator was used in a state that forbids the operation.
    #[error("invalid state")]
    InvalidState,
    /// A lookup (dictionary, transaction id, subscription) found nothing bound.
    #[error("not found")]
    NotFound,
}

impl EngineError {
    /// Returns the stable wire code for this error at the embedding boundary.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Error => 1,
            Self::No => 2,
            Self::InvalidParams => 3,
            Self::InvalidType => 4,
            Self::InvalidState => 5,
            Self::NotFound => 6,
        }
    }
}

impl From<EngineError> for i32 {
    fn from(value: EngineError) -> Self {
        value.code()
    }
}

/// Result alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;
