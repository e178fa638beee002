//! Multi-object tracker: predict, associate, correct and manage the track registry.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{Result, TrackerError};
use crate::tracker::kalman_filter::NoiseModel;
use crate::tracker::matching::{self, Association, Observation, TrackPrediction};
use crate::tracker::motion_model::MotionModelKind;
use crate::tracker::track::{Lifecycle, Track, TrackSnapshot};
use crate::tracker::track_state::TrackState;

/// Configuration for the MultiObjectTracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerConfig {
    /// Scale `q` of the isotropic process noise and initial covariance
    pub process_noise_scale: f64,
    /// Scale `r` of the isotropic observation noise
    pub observation_noise_scale: f64,
    /// Per-axis process noise `[x, y, vx, vy]`, overriding `process_noise_scale`
    pub process_noise_diagonal: Option<[f64; 4]>,
    /// Per-axis observation noise `[x, y]`, overriding `observation_noise_scale`
    pub observation_noise_diagonal: Option<[f64; 2]>,
    /// Seconds of uninterrupted observation before a track is confirmed
    pub time_to_confirm: f64,
    /// Seconds without observation before a track is dropped
    pub time_to_kill: f64,
    /// Largest Mahalanobis distance accepted as a match
    pub association_gate_distance: f64,
    pub motion_model: MotionModelKind,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            process_noise_scale: 0.5,
            observation_noise_scale: 10.0,
            process_noise_diagonal: None,
            observation_noise_diagonal: None,
            time_to_confirm: 0.5,
            time_to_kill: 0.5,
            association_gate_distance: 4.0,
            motion_model: MotionModelKind::ConstantVelocity,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        non_negative("processNoiseScale", self.process_noise_scale)?;
        non_negative("observationNoiseScale", self.observation_noise_scale)?;
        for v in self.process_noise_diagonal.iter().flatten() {
            non_negative("processNoiseDiagonal", *v)?;
        }
        for v in self.observation_noise_diagonal.iter().flatten() {
            non_negative("observationNoiseDiagonal", *v)?;
        }
        non_negative("timeToConfirm", self.time_to_confirm)?;
        non_negative("timeToKill", self.time_to_kill)?;
        if self.association_gate_distance.is_nan() || self.association_gate_distance <= 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "associationGateDistance must be positive, got {}",
                self.association_gate_distance
            )));
        }
        self.motion_model.ensure_supported()
    }

    pub fn noise_model(&self) -> NoiseModel {
        let q = self.process_noise_scale;
        let r = self.observation_noise_scale;
        match (self.process_noise_diagonal, self.observation_noise_diagonal) {
            (None, None) => NoiseModel::isotropic(q, r),
            (process, observation) => {
                NoiseModel::diagonal(process.unwrap_or([q; 4]), observation.unwrap_or([r; 2]))
            }
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle {
            time_to_confirm: self.time_to_confirm,
            time_to_kill: self.time_to_kill,
        }
    }
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(TrackerError::InvalidConfig(format!(
            "{name} must be finite and non-negative, got {value}"
        )))
    }
}

pub struct MultiObjectTracker {
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
    frame_count: u64,
    config: TrackerConfig,
    noise: NoiseModel,
}

impl MultiObjectTracker {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        let noise = config.noise_model();
        Self::with_noise(config, noise)
    }

    /// Use explicit noise matrices instead of the scales in `config`.
    pub fn with_noise(config: TrackerConfig, noise: NoiseModel) -> Result<Self> {
        config.validate()?;
        noise.validate()?;
        Ok(Self {
            tracks: BTreeMap::new(),
            next_id: 1,
            frame_count: 0,
            config,
            noise,
        })
    }

    /// Start with one tentative track per seed observation.
    pub fn with_seeds<I>(config: TrackerConfig, seeds: I) -> Result<Self>
    where
        I: IntoIterator<Item = Observation>,
    {
        let mut tracker = Self::new(config)?;
        for seed in seeds {
            seed.validate()?;
            tracker.spawn(&seed)?;
        }
        Ok(tracker)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Id the next spawned track will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// Live tracks ordered by id.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn confirmed(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values().filter(|t| t.is_confirmed())
    }

    pub fn snapshot(&self) -> Vec<TrackSnapshot> {
        self.tracks.values().map(Track::snapshot).collect()
    }

    /// Process one frame of observations taken `dt` seconds after the previous one.
    ///
    /// Invalid observations are dropped with a warning. The returned snapshot
    /// lists every live track (tentative and confirmed) ordered by id.
    pub fn update(&mut self, observations: &[Observation], dt: f64) -> Result<Vec<TrackSnapshot>> {
        if !dt.is_finite() || dt < 0.0 || (dt == 0.0 && self.frame_count > 0) {
            return Err(TrackerError::InvalidTimeStep(dt));
        }
        self.frame_count += 1;

        let observations: Vec<Observation> = observations
            .iter()
            .enumerate()
            .filter_map(|(i, obs)| match obs.validate() {
                Ok(()) => Some(*obs),
                Err(err) => {
                    warn!(frame = self.frame_count, index = i, %err, "dropping observation");
                    None
                }
            })
            .collect();

        // Step 1: Predict every track
        self.tracks.par_iter_mut().for_each(|(_, track)| {
            track.predict(dt);
        });

        // Step 2: Associate against the predictions
        let ids: Vec<u64> = self.tracks.keys().copied().collect();
        let predictions: Vec<TrackPrediction> =
            self.tracks.values().map(Track::gating_prediction).collect();

        let Association {
            matches,
            unmatched_detections,
            unmatched_tracks,
            ..
        } = matching::associate(
            &observations,
            &predictions,
            self.config.association_gate_distance,
        );

        // Step 3: Correct matched tracks
        let mut missed = unmatched_tracks;
        for &(idet, itrack) in &matches {
            let id = ids[itrack];
            let Some(track) = self.tracks.get_mut(&id) else {
                continue;
            };
            let was = track.lifecycle_state();
            match track.correct(&observations[idet]) {
                Ok(TrackState::Confirmed) if was == TrackState::Tentative => {
                    debug!(id, "track confirmed");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(id, %err, "correction failed, treating track as missed");
                    missed.push(itrack);
                }
            }
        }

        // Step 4: Penalize misses and evict dead tracks
        let mut dead = Vec::new();
        for itrack in missed {
            let id = ids[itrack];
            if let Some(track) = self.tracks.get_mut(&id) {
                if !track.mark_missed(dt).is_alive() {
                    dead.push(id);
                }
            }
        }
        for &id in &dead {
            if let Some(track) = self.tracks.remove(&id) {
                debug!(id, age = track.age(), hits = track.hits(), "track removed");
            }
        }

        // Step 5: Init new tracks
        for &idet in &unmatched_detections {
            self.spawn(&observations[idet])?;
        }

        trace!(
            frame = self.frame_count,
            observations = observations.len(),
            matched = matches.len(),
            removed = dead.len(),
            spawned = unmatched_detections.len(),
            live = self.tracks.len(),
            "frame processed"
        );

        Ok(self.snapshot())
    }

    fn spawn(&mut self, observation: &Observation) -> Result<u64> {
        let model = self
            .config
            .motion_model
            .build(observation.x(), observation.y(), self.noise)?;
        let id = self.next_id;
        self.next_id += 1;
        self.tracks
            .insert(id, Track::new(id, model, self.config.lifecycle()));
        debug!(id, x = observation.x(), y = observation.y(), "track created");
        Ok(id)
    }
}
