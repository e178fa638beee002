//! Single object track with lifecycle timers.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tracker::kalman_filter::{Gaussian, StateCovariance, StateVector};
use crate::tracker::matching::{Observation, TrackPrediction};
use crate::tracker::motion_model::MotionModel;
use crate::tracker::track_state::TrackState;

/// Confirmation and kill thresholds, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lifecycle {
    pub time_to_confirm: f64,
    pub time_to_kill: f64,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            time_to_confirm: 0.5,
            time_to_kill: 0.5,
        }
    }
}

/// Read-only view of a live track handed to callers after each frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSnapshot {
    pub id: u64,
    pub state: TrackState,
    pub position: [f64; 2],
    pub velocity: [f64; 2],
    pub position_covariance: [[f64; 2]; 2],
}

/// Single object track.
///
/// Per frame the owner calls [`Track::predict`] and then exactly one of
/// [`Track::correct`] or [`Track::mark_missed`].
#[derive(Debug)]
pub struct Track {
    id: u64,
    state: TrackState,
    model: Box<dyn MotionModel>,
    lifecycle: Lifecycle,
    /// Prior from the last `predict`, consumed by `correct` or `mark_missed`
    prior: Option<Gaussian>,
    pending_dt: f64,
    time_since_last_observation: f64,
    continuously_observed_duration: f64,
    hits: u32,
    age: f64,
}

impl Track {
    pub fn new(id: u64, model: Box<dyn MotionModel>, lifecycle: Lifecycle) -> Self {
        Self {
            id,
            state: TrackState::Tentative,
            model,
            lifecycle,
            prior: None,
            pending_dt: 0.0,
            time_since_last_observation: 0.0,
            continuously_observed_duration: 0.0,
            hits: 1,
            age: 0.0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn lifecycle_state(&self) -> TrackState {
        self.state
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    pub fn is_dead(&self) -> bool {
        self.state == TrackState::Dead
    }

    pub fn time_since_last_observation(&self) -> f64 {
        self.time_since_last_observation
    }

    pub fn continuously_observed_duration(&self) -> f64 {
        self.continuously_observed_duration
    }

    /// Number of observations folded in, including the one that spawned the track.
    pub fn hits(&self) -> u32 {
        self.hits
    }

    /// Seconds since the track was spawned.
    pub fn age(&self) -> f64 {
        self.age
    }

    pub fn state(&self) -> StateVector {
        self.model.belief().mean
    }

    pub fn covariance(&self) -> StateCovariance {
        self.model.belief().covariance
    }

    pub fn position(&self) -> [f64; 2] {
        let mean = self.state();
        [mean[0], mean[1]]
    }

    pub fn velocity(&self) -> [f64; 2] {
        let mean = self.state();
        [mean[2], mean[3]]
    }

    pub fn position_covariance(&self) -> [[f64; 2]; 2] {
        let cov = self.covariance();
        [[cov[(0, 0)], cov[(0, 1)]], [cov[(1, 0)], cov[(1, 1)]]]
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id,
            state: self.state,
            position: self.position(),
            velocity: self.velocity(),
            position_covariance: self.position_covariance(),
        }
    }

    /// Predict `dt` seconds ahead and hold the prior for this frame's decision.
    /// Lifecycle state and timers are untouched.
    pub fn predict(&mut self, dt: f64) -> Gaussian {
        let prior = self.model.predict(dt);
        self.prior = Some(prior);
        self.pending_dt = dt;
        prior
    }

    /// The held prior, or the committed belief when `predict` was not called.
    pub fn prediction(&self) -> Gaussian {
        self.prior.unwrap_or_else(|| self.model.belief())
    }

    /// Predicted position and innovation covariance for gating.
    pub fn gating_prediction(&self) -> TrackPrediction {
        let prior = self.prediction();
        let position = prior.position();
        TrackPrediction::with_covariance(
            position[0],
            position[1],
            self.model.innovation_covariance(&prior, None),
        )
    }

    /// Fold `observation` into the held prior.
    ///
    /// On error nothing changes; the caller is expected to fall back to
    /// [`Track::mark_missed`].
    pub fn correct(&mut self, observation: &Observation) -> Result<TrackState> {
        let prior = self.prediction();
        self.model.correct(&prior, observation)?;

        self.prior = None;
        self.hits += 1;
        self.age += self.pending_dt;
        self.time_since_last_observation = 0.0;
        self.continuously_observed_duration += self.pending_dt;
        self.pending_dt = 0.0;

        if self.state == TrackState::Tentative
            && self.continuously_observed_duration > self.lifecycle.time_to_confirm
        {
            self.state = TrackState::Confirmed;
        }
        Ok(self.state)
    }

    /// Coast through a frame without an observation.
    pub fn mark_missed(&mut self, dt: f64) -> TrackState {
        if let Some(prior) = self.prior.take() {
            self.model.propagate(prior);
        }
        self.pending_dt = 0.0;
        self.age += dt;
        self.time_since_last_observation += dt;
        self.continuously_observed_duration = 0.0;

        if self.time_since_last_observation > self.lifecycle.time_to_kill {
            self.state = TrackState::Dead;
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::kalman_filter::NoiseModel;
    use crate::tracker::motion_model::MotionModelKind;

    fn track_at(x: f64, y: f64) -> Track {
        let model = MotionModelKind::ConstantVelocity
            .build(x, y, NoiseModel::default())
            .unwrap();
        Track::new(7, model, Lifecycle::default())
    }

    #[test]
    fn test_predict_does_not_touch_lifecycle() {
        let mut track = track_at(1.0, 1.0);
        track.predict(0.2);
        assert_eq!(track.lifecycle_state(), TrackState::Tentative);
        assert_eq!(track.time_since_last_observation(), 0.0);
        assert_eq!(track.continuously_observed_duration(), 0.0);
        assert_eq!(track.position(), [1.0, 1.0]);
    }

    #[test]
    fn test_confirms_after_sustained_observation() {
        let mut track = track_at(0.0, 0.0);
        for frame in 1..=4 {
            track.predict(0.125);
            let state = track.correct(&Observation::new(0.0, 0.0)).unwrap();
            assert_eq!(state, TrackState::Tentative, "frame {frame}");
        }
        track.predict(0.125);
        assert_eq!(
            track.correct(&Observation::new(0.0, 0.0)).unwrap(),
            TrackState::Confirmed
        );
        assert_eq!(track.hits(), 6);
    }

    #[test]
    fn test_confirmed_never_reverts() {
        let mut track = track_at(0.0, 0.0);
        for _ in 0..5 {
            track.predict(0.125);
            track.correct(&Observation::new(0.0, 0.0)).unwrap();
        }
        assert!(track.is_confirmed());

        track.predict(0.125);
        assert_eq!(track.mark_missed(0.125), TrackState::Confirmed);
        assert_eq!(track.continuously_observed_duration(), 0.0);
        track.predict(0.125);
        track.correct(&Observation::new(0.0, 0.0)).unwrap();
        assert!(track.is_confirmed());
    }

    #[test]
    fn test_miss_interrupts_confirmation() {
        let mut track = track_at(0.0, 0.0);
        for _ in 0..3 {
            track.predict(0.125);
            track.correct(&Observation::new(0.0, 0.0)).unwrap();
        }
        track.predict(0.125);
        track.mark_missed(0.125);
        for _ in 0..4 {
            track.predict(0.125);
            track.correct(&Observation::new(0.0, 0.0)).unwrap();
        }
        assert_eq!(track.lifecycle_state(), TrackState::Tentative);
    }

    #[test]
    fn test_dies_after_sustained_absence() {
        let mut track = track_at(0.0, 0.0);
        for _ in 0..4 {
            track.predict(0.125);
            assert_eq!(track.mark_missed(0.125), TrackState::Tentative);
        }
        track.predict(0.125);
        assert_eq!(track.mark_missed(0.125), TrackState::Dead);
        assert!(!track.lifecycle_state().is_alive());
        assert_eq!(track.mark_missed(0.125), TrackState::Dead);
        assert_eq!(track.age(), 0.75);
    }

    #[test]
    fn test_missed_track_coasts_on_prediction() {
        let mut track = track_at(0.0, 0.0);
        track.predict(1.0);
        track.correct(&Observation::new(2.0, 0.0)).unwrap();
        let before = track.state();
        let prior = track.predict(1.0);
        track.mark_missed(1.0);
        assert_eq!(track.state(), prior.mean);
        assert!(track.state()[0] > before[0]);
        assert!(track.covariance()[(0, 0)] > 0.0);
    }

    #[test]
    fn test_singular_correction_leaves_track_untouched() {
        let model = MotionModelKind::ConstantVelocity
            .build(0.0, 0.0, NoiseModel::isotropic(0.0, 0.0))
            .unwrap();
        let mut track = Track::new(1, model, Lifecycle::default());
        track.predict(0.125);
        assert!(track.correct(&Observation::new(1.0, 1.0)).is_err());
        assert_eq!(track.position(), [0.0, 0.0]);
        assert_eq!(track.hits(), 1);
        assert_eq!(track.mark_missed(0.125), TrackState::Tentative);
        assert_eq!(track.time_since_last_observation(), 0.125);
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let track = track_at(3.0, -4.0);
        let snapshot = track.snapshot();
        assert_eq!(snapshot.id, 7);
        assert_eq!(snapshot.state, TrackState::Tentative);
        assert_eq!(snapshot.position, [3.0, -4.0]);
        assert_eq!(snapshot.velocity, [0.0, 0.0]);
        assert_eq!(snapshot.position_covariance, [[0.5, 0.0], [0.0, 0.5]]);
    }
}
