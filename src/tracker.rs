mod kalman_filter;
mod matching;
mod motion_model;
mod multi_tracker;
mod single_tracker;
mod track;
mod track_state;

pub use kalman_filter::{ConstantVelocityFilter, Gaussian, NoiseModel, StateCovariance, StateVector};
pub use matching::{
    Association, Observation, TrackPrediction, associate, gated_distance, linear_assignment,
    mahalanobis_distance,
};
pub use motion_model::{MotionModel, MotionModelKind};
pub use multi_tracker::{MultiObjectTracker, TrackerConfig};
pub use single_tracker::SingleObjectTracker;
pub use track::{Lifecycle, Track, TrackSnapshot};
pub use track_state::TrackState;
