//! Builder for creating Observation objects from various input formats.

use nalgebra::Matrix2;

use crate::error::Result;
use crate::tracker::Observation;

/// Builder for creating `Observation` objects.
#[derive(Debug, Clone, Default)]
pub struct ObservationBuilder {
    x: f64,
    y: f64,
    covariance: Option<Matrix2<f64>>,
}

impl ObservationBuilder {
    /// Create a new observation builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the observed position.
    pub fn position(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Set an isotropic measurement standard deviation.
    pub fn std_dev(mut self, sigma: f64) -> Self {
        self.covariance = Some(Matrix2::identity() * (sigma * sigma));
        self
    }

    /// Set per-axis measurement variances.
    pub fn variances(mut self, var_x: f64, var_y: f64) -> Self {
        self.covariance = Some(Matrix2::new(var_x, 0.0, 0.0, var_y));
        self
    }

    /// Set a full 2x2 measurement covariance.
    pub fn covariance(mut self, covariance: Matrix2<f64>) -> Self {
        self.covariance = Some(covariance);
        self
    }

    /// Build the final `Observation` without validation.
    pub fn build(self) -> Observation {
        match self.covariance {
            Some(cov) => Observation::with_covariance(self.x, self.y, cov),
            None => Observation::new(self.x, self.y),
        }
    }

    /// Build and validate the `Observation`.
    pub fn try_build(self) -> Result<Observation> {
        let observation = self.build();
        observation.validate()?;
        Ok(observation)
    }
}
