//! Constant-velocity Kalman filter over `[x, y, vx, vy]` using nalgebra fixed-size matrices.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};
use tracing::trace;

use crate::error::{Result, TrackerError};
use crate::tracker::matching::Observation;
use crate::tracker::motion_model::MotionModel;

/// Kinematic state `[x, y, vx, vy]`.
pub type StateVector = Vector4<f64>;
/// Covariance of [`StateVector`].
pub type StateCovariance = Matrix4<f64>;

/// Determinants at or below this magnitude are treated as singular.
const SINGULARITY_TOLERANCE: f64 = 1e-12;

/// Gaussian belief (mean + covariance) over the kinematic state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gaussian {
    pub mean: StateVector,
    pub covariance: StateCovariance,
}

impl Gaussian {
    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.mean[0], self.mean[1])
    }

    pub fn velocity(&self) -> Vector2<f64> {
        Vector2::new(self.mean[2], self.mean[3])
    }

    /// Upper-left 2x2 block of the covariance.
    pub fn position_covariance(&self) -> Matrix2<f64> {
        self.covariance.fixed_view::<2, 2>(0, 0).into_owned()
    }
}

/// Noise matrices of the filter.
///
/// `process` is added on every prediction, `observation` is the default `R`
/// when an observation carries no covariance of its own, and `initial` seeds
/// the covariance of a freshly spawned filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseModel {
    pub process: Matrix4<f64>,
    pub observation: Matrix2<f64>,
    pub initial: Matrix4<f64>,
}

impl NoiseModel {
    /// `Q = q·I`, `R = r·I` and an initial covariance of `q·I`.
    pub fn isotropic(process_scale: f64, observation_scale: f64) -> Self {
        Self {
            process: Matrix4::identity() * process_scale,
            observation: Matrix2::identity() * observation_scale,
            initial: Matrix4::identity() * process_scale,
        }
    }

    /// Per-axis diagonal noise.
    pub fn diagonal(process: [f64; 4], observation: [f64; 2]) -> Self {
        let process = Matrix4::from_diagonal(&Vector4::from(process));
        Self {
            process,
            observation: Matrix2::from_diagonal(&Vector2::from(observation)),
            initial: process,
        }
    }

    /// Reject matrices that are non-finite, asymmetric or carry a negative variance.
    pub fn validate(&self) -> Result<()> {
        check_noise_matrix("process", self.process.as_slice(), 4)?;
        check_noise_matrix("observation", self.observation.as_slice(), 2)?;
        check_noise_matrix("initial", self.initial.as_slice(), 4)
    }
}

/// `values` is a column-major `dim x dim` matrix.
fn check_noise_matrix(name: &str, values: &[f64], dim: usize) -> Result<()> {
    if !values.iter().all(|v| v.is_finite()) {
        return Err(TrackerError::InvalidConfig(format!(
            "{name} noise has non-finite entries"
        )));
    }
    let scale = 1.0 + values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    for i in 0..dim {
        if values[i * dim + i] < 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "{name} noise has negative variance on axis {i}"
            )));
        }
        for j in 0..i {
            if (values[i * dim + j] - values[j * dim + i]).abs() > 1e-9 * scale {
                return Err(TrackerError::InvalidConfig(format!(
                    "{name} noise is not symmetric"
                )));
            }
        }
    }
    Ok(())
}

impl Default for NoiseModel {
    fn default() -> Self {
        Self::isotropic(0.5, 10.0)
    }
}

#[derive(Debug, Clone)]
pub struct ConstantVelocityFilter {
    mean: StateVector,
    covariance: StateCovariance,
    noise: NoiseModel,
    observation_mat: Matrix2x4<f64>,
}

impl ConstantVelocityFilter {
    pub fn new(initial: StateVector, noise: NoiseModel) -> Self {
        Self {
            mean: initial,
            covariance: noise.initial,
            noise,
            observation_mat: Matrix2x4::new(
                1.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, 0.0,
            ),
        }
    }

    /// Start at `(x, y)` at rest.
    pub fn from_position(x: f64, y: f64, noise: NoiseModel) -> Self {
        Self::new(StateVector::new(x, y, 0.0, 0.0), noise)
    }

    /// `F(dt)`: position advances by velocity times `dt`, velocity is kept.
    pub fn transition_matrix(dt: f64) -> Matrix4<f64> {
        Matrix4::new(
            1.0, 0.0, dt, 0.0, //
            0.0, 1.0, 0.0, dt, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        )
    }

    pub fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    pub fn mean(&self) -> &StateVector {
        &self.mean
    }

    pub fn covariance(&self) -> &StateCovariance {
        &self.covariance
    }

    pub fn belief(&self) -> Gaussian {
        Gaussian {
            mean: self.mean,
            covariance: self.covariance,
        }
    }

    /// Predicted belief after `dt` seconds. Does not modify the filter.
    pub fn predict(&self, dt: f64) -> Gaussian {
        let motion_mat = Self::transition_matrix(dt);
        let mean = motion_mat * self.mean;
        let covariance = motion_mat * self.covariance * motion_mat.transpose() + self.noise.process;

        Gaussian {
            mean,
            covariance: symmetrize(covariance),
        }
    }

    /// `S = H·P'·Hᵀ + R`, with `R` defaulting to the configured observation noise.
    pub fn innovation_covariance(
        &self,
        prior: &Gaussian,
        observation_cov: Option<&Matrix2<f64>>,
    ) -> Matrix2<f64> {
        let r = observation_cov.copied().unwrap_or(self.noise.observation);
        self.observation_mat * prior.covariance * self.observation_mat.transpose() + r
    }

    /// Fold `observation` into `prior` and commit the posterior.
    ///
    /// On a singular innovation covariance the filter is left untouched.
    pub fn correct(
        &mut self,
        prior: &Gaussian,
        observation: &Vector2<f64>,
        observation_cov: Option<&Matrix2<f64>>,
    ) -> Result<()> {
        let innovation_cov = self.innovation_covariance(prior, observation_cov);
        let determinant = innovation_cov.determinant();
        if !determinant.is_finite() || determinant.abs() <= SINGULARITY_TOLERANCE {
            return Err(TrackerError::SingularInnovationCovariance { determinant });
        }
        let s_inv = innovation_cov
            .try_inverse()
            .ok_or(TrackerError::SingularInnovationCovariance { determinant })?;

        let innovation = observation - self.observation_mat * prior.mean;

        // K = P' * H^T * S^-1 (4x2)
        let pht = prior.covariance * self.observation_mat.transpose();
        let kalman_gain = pht * s_inv;

        let new_mean = prior.mean + kalman_gain * innovation;
        let new_covariance =
            (Matrix4::identity() - kalman_gain * self.observation_mat) * prior.covariance;

        self.mean = new_mean;
        self.covariance = symmetrize(new_covariance);
        trace!(
            innovation_x = innovation[0],
            innovation_y = innovation[1],
            "kalman correction applied"
        );
        Ok(())
    }

    /// Commit a prediction without an observation (coasting).
    pub fn propagate(&mut self, prior: Gaussian) {
        self.mean = prior.mean;
        self.covariance = symmetrize(prior.covariance);
    }
}

impl MotionModel for ConstantVelocityFilter {
    fn predict(&self, dt: f64) -> Gaussian {
        ConstantVelocityFilter::predict(self, dt)
    }

    fn correct(&mut self, prior: &Gaussian, observation: &Observation) -> Result<()> {
        ConstantVelocityFilter::correct(
            self,
            prior,
            &observation.position,
            observation.covariance.as_ref(),
        )
    }

    fn propagate(&mut self, prior: Gaussian) {
        ConstantVelocityFilter::propagate(self, prior)
    }

    fn innovation_covariance(
        &self,
        prior: &Gaussian,
        observation_cov: Option<&Matrix2<f64>>,
    ) -> Matrix2<f64> {
        ConstantVelocityFilter::innovation_covariance(self, prior, observation_cov)
    }

    fn belief(&self) -> Gaussian {
        ConstantVelocityFilter::belief(self)
    }
}

/// Average with the transpose to keep round-off from breaking symmetry.
fn symmetrize(m: Matrix4<f64>) -> Matrix4<f64> {
    (m + m.transpose()) * 0.5
}
