//! Motion model capability used by [`Track`](crate::tracker::Track).

use std::fmt;
use std::str::FromStr;

use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::tracker::kalman_filter::{ConstantVelocityFilter, Gaussian, NoiseModel};
use crate::tracker::matching::Observation;

/// Recursive estimator for one object's kinematic state.
///
/// `predict` never mutates; the caller decides afterwards whether the prior is
/// folded with an observation (`correct`) or committed as-is (`propagate`).
pub trait MotionModel: fmt::Debug + Send + Sync {
    /// Belief after `dt` seconds without committing it.
    fn predict(&self, dt: f64) -> Gaussian;

    /// Correct `prior` with `observation` and commit the posterior.
    fn correct(&mut self, prior: &Gaussian, observation: &Observation) -> Result<()>;

    /// Commit `prior` as the current belief.
    fn propagate(&mut self, prior: Gaussian);

    /// Innovation covariance of `prior` in observation space.
    fn innovation_covariance(
        &self,
        prior: &Gaussian,
        observation_cov: Option<&Matrix2<f64>>,
    ) -> Matrix2<f64>;

    /// Current committed belief.
    fn belief(&self) -> Gaussian;
}

/// Selectable motion models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MotionModelKind {
    #[default]
    ConstantVelocity,
    /// Reserved for a constant-turn-rate model; not implemented.
    ConstantTurnRate,
}

impl MotionModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConstantVelocity => "constantVelocity",
            Self::ConstantTurnRate => "constantTurnRate",
        }
    }

    /// Fails for reserved variants.
    pub fn ensure_supported(self) -> Result<()> {
        match self {
            Self::ConstantVelocity => Ok(()),
            Self::ConstantTurnRate => Err(TrackerError::UnknownMotionModel(self.to_string())),
        }
    }

    /// Build a model at rest at `(x, y)`.
    pub fn build(self, x: f64, y: f64, noise: NoiseModel) -> Result<Box<dyn MotionModel>> {
        self.ensure_supported()?;
        match self {
            Self::ConstantVelocity => Ok(Box::new(ConstantVelocityFilter::from_position(
                x, y, noise,
            ))),
            Self::ConstantTurnRate => Err(TrackerError::UnknownMotionModel(self.to_string())),
        }
    }
}

impl fmt::Display for MotionModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MotionModelKind {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "constantVelocity" | "constant_velocity" | "cv" => Ok(Self::ConstantVelocity),
            "constantTurnRate" | "constant_turn_rate" | "ctr" => Ok(Self::ConstantTurnRate),
            other => Err(TrackerError::UnknownMotionModel(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_motion_model() {
        assert_eq!(
            "constant_velocity".parse::<MotionModelKind>().unwrap(),
            MotionModelKind::ConstantVelocity
        );
        assert_eq!(
            "constantTurnRate".parse::<MotionModelKind>().unwrap(),
            MotionModelKind::ConstantTurnRate
        );
        assert_eq!(
            "singer".parse::<MotionModelKind>().unwrap_err(),
            TrackerError::UnknownMotionModel("singer".into())
        );
    }

    #[test]
    fn test_reserved_model_cannot_be_built() {
        let err = MotionModelKind::ConstantTurnRate
            .build(0.0, 0.0, NoiseModel::default())
            .unwrap_err();
        assert!(matches!(err, TrackerError::UnknownMotionModel(_)));
    }

    #[test]
    fn test_constant_velocity_builds_at_rest() {
        let model = MotionModelKind::ConstantVelocity
            .build(3.0, 4.0, NoiseModel::default())
            .unwrap();
        let belief = model.belief();
        assert_eq!(belief.position(), nalgebra::Vector2::new(3.0, 4.0));
        assert_eq!(belief.velocity(), nalgebra::Vector2::zeros());
    }
}
