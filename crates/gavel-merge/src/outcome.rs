use serde::{Deserialize, Serialize};

/// Per-candidate result of one strategy run. Drives both the status
/// transition and the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    CleanMerge,
    CleanPick,
    PathConflict,
    MissingDependency,
    CannotPickRoot,
    NotFastForward,
}

impl Outcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, Outcome::CleanMerge | Outcome::CleanPick)
    }
}
