//! Trait for observation sources feeding the tracker.

use crate::tracker::Observation;

/// One batch of observations and the seconds elapsed since the previous batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub observations: Vec<Observation>,
    pub dt: f64,
}

impl Frame {
    pub fn new(observations: impl IntoObservations, dt: f64) -> Self {
        Self {
            observations: observations.into_observations(),
            dt,
        }
    }
}

/// Trait for sensors or simulations producing point observations.
///
/// Implement this trait to connect any sensor driver to the tracker.
///
/// # Example
///
/// ```ignore
/// use pointtrack_rs::{Frame, Observation, ObservationSource};
///
/// struct Replay {
///     frames: std::vec::IntoIter<Frame>,
/// }
///
/// impl ObservationSource for Replay {
///     type Error = std::convert::Infallible;
///
///     fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
///         Ok(self.frames.next())
///     }
/// }
/// ```
pub trait ObservationSource {
    /// Error type for acquisition failures.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Return the next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error>;
}

/// Helper trait for converting raw point outputs to `Observation`s.
pub trait IntoObservations {
    fn into_observations(self) -> Vec<Observation>;
}

impl IntoObservations for Vec<Observation> {
    fn into_observations(self) -> Vec<Observation> {
        self
    }
}

impl IntoObservations for Vec<[f64; 2]> {
    fn into_observations(self) -> Vec<Observation> {
        self.into_iter()
            .map(|[x, y]| Observation::new(x, y))
            .collect()
    }
}

impl IntoObservations for Vec<(f64, f64)> {
    fn into_observations(self) -> Vec<Observation> {
        self.into_iter()
            .map(|(x, y)| Observation::new(x, y))
            .collect()
    }
}
