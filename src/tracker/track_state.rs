use serde::{Deserialize, Serialize};

/// Track lifecycle state. Transitions only move forward:
/// Tentative -> Confirmed -> Deleted, or Tentative -> Deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum TrackState {
    /// Newly created, not enough consecutive hits yet
    #[default]
    Tentative,
    /// Reached `n_init` consecutive hits
    Confirmed,
    /// Removed from the active set
    Deleted,
}

impl TrackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tentative => "tentative",
            Self::Confirmed => "confirmed",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for TrackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
