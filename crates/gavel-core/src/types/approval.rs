use serde::{Deserialize, Serialize};

use crate::id::{AccountId, ChangeId, ObjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalCategory {
    CodeReview,
    Submit,
    Stage,
}

/// A signed mark on one revision. At most one approval exists per
/// (revision, account, category); later values overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub change_id: ChangeId,
    pub revision: ObjectId,
    pub account: AccountId,
    pub category: ApprovalCategory,
    pub value: i16,
    pub granted_at_ms: u64,
}

impl Approval {
    pub fn key(&self) -> (ObjectId, AccountId, ApprovalCategory) {
        (self.revision, self.account, self.category)
    }
}
