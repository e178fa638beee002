use serde::{Deserialize, Serialize};

/// Track state enumeration for object tracking lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackState {
    /// Newly created track, not yet confirmed
    #[default]
    Tentative,
    /// Observed without interruption for longer than the confirmation time
    Confirmed,
    /// Unobserved for longer than the kill time; terminal
    Dead,
}

impl TrackState {
    pub fn is_alive(&self) -> bool {
        !matches!(self, Self::Dead)
    }
}
