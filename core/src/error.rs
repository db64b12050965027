//! Error types for the localization filter.
//!
//! All failures inside the filter core are data or numeric preconditions; no operation in the core
//! performs I/O. Loaders and configuration readers report their own `io::Result` or boxed errors.

use thiserror::Error;

/// Convenience alias used throughout the filter core.
pub type Result<T> = std::result::Result<T, FilterError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// `predict`, `update_weights` or `resample` was called before `init`.
    #[error("particle filter has not been initialized")]
    NotInitialized,
    /// `init` was called on a filter that already holds a particle set.
    #[error("particle filter is already initialized")]
    AlreadyInitialized,
    /// Every particle produced (numerically) zero likelihood, so the weights cannot be normalized.
    #[error("total particle weight is {0}; weights cannot be normalized")]
    ZeroTotalWeight(f64),
    /// An observation was associated with an id that does not exist in the landmark map.
    #[error("landmark {0} is not present in the map")]
    UnknownLandmark(i32),
    /// A caller supplied parameter is out of its valid domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
