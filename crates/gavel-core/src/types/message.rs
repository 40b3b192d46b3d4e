use serde::{Deserialize, Serialize};

use crate::id::{AccountId, ChangeId, MessageId};

/// Append-only note on a change; holds both human commentary and
/// machine-recorded lifecycle events. Never edited or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub change_id: ChangeId,
    pub author: AccountId,
    pub text: String,
    pub written_at_ms: u64,
}
