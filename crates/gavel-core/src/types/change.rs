use serde::{Deserialize, Serialize};

use crate::id::{AccountId, ChangeId, ObjectId};
use crate::sort_key::sort_key;
use crate::types::branch::BranchKey;

/// Lifecycle status of a change. Mutated only through guarded transitions;
/// a change is never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeStatus {
    New,
    Staging,
    Staged,
    Integrating,
    Submitted,
    Merged,
    Abandoned,
    Deferred,
}

impl ChangeStatus {
    /// Open changes can still be submitted or staged.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ChangeStatus::New
                | ChangeStatus::Staging
                | ChangeStatus::Staged
                | ChangeStatus::Integrating
                | ChangeStatus::Submitted
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub project: String,
    /// Destination branch ref, e.g. "heads/main".
    pub dest: String,
    pub owner: AccountId,
    /// Current patch set's commit id.
    pub current_revision: ObjectId,
    pub current_patch_set: u32,
    pub status: ChangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Monotonic by (last update, id); see `sort_key`.
    pub sort_key: String,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Change {
    pub fn new(
        id: ChangeId,
        project: &str,
        dest: &str,
        owner: AccountId,
        revision: ObjectId,
        now_ms: u64,
    ) -> Self {
        Self {
            id,
            project: project.to_string(),
            dest: dest.to_string(),
            owner,
            current_revision: revision,
            current_patch_set: 1,
            status: ChangeStatus::New,
            topic: None,
            sort_key: sort_key(now_ms, id.get()),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    pub fn branch_key(&self) -> BranchKey {
        BranchKey::new(&self.project, &self.dest)
    }

    /// Touch the last-updated timestamp and recompute the sort key.
    pub fn updated(&mut self, now_ms: u64) {
        self.updated_at_ms = now_ms;
        self.sort_key = sort_key(now_ms, self.id.get());
    }
}
