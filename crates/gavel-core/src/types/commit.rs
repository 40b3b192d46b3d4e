use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::{content_hash, ObjectTag};
use crate::id::ObjectId;
use crate::CoreError;

/// Flat sorted tree: path -> blob id.
pub type Tree = BTreeMap<String, ObjectId>;

/// A commit in the append-only graph. Identified by its content hash;
/// immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub parents: Vec<ObjectId>,
    pub tree: Tree,
    pub author: String,
    pub message: String,
    pub committed_at_ms: u64,
}

impl Commit {
    pub fn compute_id(&self) -> Result<ObjectId, CoreError> {
        let payload =
            serde_json::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(content_hash(ObjectTag::Commit, &payload))
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}
