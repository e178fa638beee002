//! Tracker for a scene known to contain exactly one object.

use tracing::{trace, warn};

use crate::error::{Result, TrackerError};
use crate::tracker::kalman_filter::{ConstantVelocityFilter, NoiseModel, StateVector};
use crate::tracker::matching::Observation;

/// Runs one constant-velocity filter without association or lifecycle.
#[derive(Debug, Clone)]
pub struct SingleObjectTracker {
    filter: Option<ConstantVelocityFilter>,
    noise: NoiseModel,
    updates: u64,
}

impl SingleObjectTracker {
    pub fn new(noise: NoiseModel) -> Self {
        Self {
            filter: None,
            noise,
            updates: 0,
        }
    }

    /// `None` until the first observation arrives.
    pub fn state(&self) -> Option<StateVector> {
        self.filter.as_ref().map(|f| *f.mean())
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Predict by `dt` and correct with `observation`.
    ///
    /// The first observation initializes the filter at rest. A singular
    /// correction leaves the filter coasting on its prediction.
    pub fn update(&mut self, observation: &Observation, dt: f64) -> Result<StateVector> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(TrackerError::InvalidTimeStep(dt));
        }
        observation.validate()?;
        self.updates += 1;

        let filter = match self.filter.as_mut() {
            Some(filter) => filter,
            None => {
                let filter = self.filter.insert(ConstantVelocityFilter::from_position(
                    observation.x(),
                    observation.y(),
                    self.noise,
                ));
                trace!(x = observation.x(), y = observation.y(), "single tracker initialized");
                return Ok(*filter.mean());
            }
        };

        let prior = filter.predict(dt);
        if let Err(err) = filter.correct(
            &prior,
            &observation.position,
            observation.covariance.as_ref(),
        ) {
            warn!(%err, "correction failed, coasting on prediction");
            filter.propagate(prior);
        }
        Ok(*filter.mean())
    }
}

impl Default for SingleObjectTracker {
    fn default() -> Self {
        Self::new(NoiseModel::default())
    }
}
