//! Multi-object tracking of noisy 2D point observations.
//!
//! Each object is followed by a constant-velocity Kalman filter. Detections
//! are assigned to tracks every frame by a gated optimal assignment, and
//! tracks move through a tentative, confirmed and dead lifecycle.
//!
//! ```
//! use pointtrack_rs::{MultiObjectTracker, Observation, TrackerConfig};
//!
//! let mut tracker = MultiObjectTracker::new(TrackerConfig::default()).unwrap();
//! let tracks = tracker.update(&[Observation::new(1.0, 2.0)], 0.1).unwrap();
//! assert_eq!(tracks[0].id, 1);
//! ```

pub mod error;
pub mod integration;
pub mod tracker;

pub use error::{Result, TrackerError};
pub use integration::{
    Frame, IntoObservations, ObservationBuilder, ObservationSource, PipelineError, TrackerPipeline,
};
pub use tracker::{
    Association, MotionModelKind, MultiObjectTracker, NoiseModel, Observation,
    SingleObjectTracker, Track, TrackSnapshot, TrackState, TrackerConfig,
};
