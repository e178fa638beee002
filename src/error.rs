//! Error type shared by the estimator, associator and tracker.

use thiserror::Error;

/// Errors produced while configuring or running the tracker.
///
/// Only [`TrackerError::UnknownMotionModel`], [`TrackerError::InvalidConfig`]
/// and [`TrackerError::InvalidTimeStep`] ever escape a frame update; the
/// remaining kinds are recovered locally and only surface from the lower-level
/// APIs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackerError {
    /// Observation with the wrong dimension, non-finite coordinates or an
    /// unusable covariance.
    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    /// The innovation covariance `S` of a correction could not be inverted.
    #[error("innovation covariance is singular (determinant {determinant:e})")]
    SingularInnovationCovariance { determinant: f64 },

    /// A motion model that is reserved or not recognised.
    #[error("unknown motion model `{0}`")]
    UnknownMotionModel(String),

    /// The assignment solver could not produce a matching.
    #[error("association solver failed: {0}")]
    AssociationDegenerate(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Negative or non-finite elapsed time, or a zero step after the first frame.
    #[error("invalid time step {0}")]
    InvalidTimeStep(f64),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
