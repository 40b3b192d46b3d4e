use serde::{Deserialize, Serialize};

use crate::id::{AccountId, ChangeId, ObjectId};

/// One immutable patch set of a change. The id is the proposed commit's id;
/// new revisions appear only through upload or a commit-rewriting strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    pub id: ObjectId,
    pub change_id: ChangeId,
    pub number: u32,
    pub uploader: AccountId,
    /// Parent commit ids, used for dependency ordering.
    pub parents: Vec<ObjectId>,
    pub created_at_ms: u64,
}
