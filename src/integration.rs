//! Integration module for connecting observation sources with the tracker.
//!
//! This module provides traits and utilities for feeding sensor drivers or
//! simulations into the `MultiObjectTracker` frame by frame.

mod builder;
mod pipeline;
mod source;

pub use builder::ObservationBuilder;
pub use pipeline::{PipelineError, TrackerPipeline};
pub use source::{Frame, IntoObservations, ObservationSource};
