//! Unified error type for the distillation pipeline.
//!
//! A single `thiserror`-backed [`Error`] enum covers configuration faults,
//! object-store lookups, persistence failures, and solver diagnostics. The
//! crate-wide [`Result`] alias threads this error type through every fallible
//! operation.

use thiserror::Error;

/// Crate-wide result alias over [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// All error conditions surfaced by the distillation pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or inconsistent configuration / runtime parameters.
    #[error("configuration error: {0}")]
    Config(String),

    /// A persistent store operation failed.
    #[error("store error: {0}")]
    Store(String),

    /// A named object was not present in the registry.
    #[error("object `{0}` not found")]
    ObjectLookup(String),

    /// A named object was present but had an unexpected concrete type.
    #[error("object `{0}` has an unexpected type")]
    ObjectCast(String),

    /// No colorvector source was found for the requested timeslice/index.
    #[error("no source for timeslice {t_slice}, colorvec {colorvec}")]
    SourceLookup { t_slice: i32, colorvec: usize },

    /// A solve converged to a residual above the acceptable bound.
    #[error("residual {residual} exceeds bound")]
    ResidualTooLarge { residual: f64 },

    /// A solution contained non-finite values after all retries.
    #[error("non-finite solution after {tries} tries")]
    NonFiniteSolution { tries: usize },

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}
