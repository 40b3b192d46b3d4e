use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use gavel_core::id::{AccountId, ChangeId, MessageId, ObjectId};
use gavel_core::types::{Approval, ApprovalCategory, Change, ChangeStatus, Message, Revision};

use crate::StoreError;

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct ChangeInner {
    pub(crate) next_change_id: u32,
    pub(crate) changes: HashMap<ChangeId, Change>,
    pub(crate) revisions: HashMap<ObjectId, Revision>,
    pub(crate) approvals: Vec<Approval>,
    pub(crate) messages: Vec<Message>,
}

/// Record store for changes, revisions, approvals and messages. Each change
/// is updated through a per-record atomic read-modify-write; an integration
/// outcome is never partially visible.
pub struct ChangeStore {
    inner: Mutex<ChangeInner>,
}

impl Default for ChangeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ChangeInner::default()),
        }
    }

    pub(crate) fn from_inner(inner: ChangeInner) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChangeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn export_inner(&self) -> ChangeInner {
        let inner = self.lock();
        ChangeInner {
            next_change_id: inner.next_change_id,
            changes: inner.changes.clone(),
            revisions: inner.revisions.clone(),
            approvals: inner.approvals.clone(),
            messages: inner.messages.clone(),
        }
    }

    pub fn next_change_id(&self) -> ChangeId {
        let mut inner = self.lock();
        inner.next_change_id += 1;
        ChangeId(inner.next_change_id)
    }

    pub fn insert_change(&self, change: Change) {
        self.lock().changes.insert(change.id, change);
    }

    pub fn get(&self, id: ChangeId) -> Result<Change, StoreError> {
        self.lock()
            .changes
            .get(&id)
            .cloned()
            .ok_or(StoreError::NoSuchChange(id))
    }

    pub fn all_changes(&self) -> Vec<Change> {
        let mut changes: Vec<Change> = self.lock().changes.values().cloned().collect();
        changes.sort_by(|a, b| a.id.cmp(&b.id));
        changes
    }

    /// Atomic read-modify-write. The mutator runs under the record lock and
    /// returns whether its precondition held; on `false` nothing is stored
    /// and the caller receives a conflict instead of overwriting a status
    /// set by a concurrent actor.
    pub fn atomic_update<F>(&self, id: ChangeId, f: F) -> Result<Change, StoreError>
    where
        F: FnOnce(&mut Change) -> bool,
    {
        let mut inner = self.lock();
        let change = inner.changes.get_mut(&id).ok_or(StoreError::NoSuchChange(id))?;
        let mut candidate = change.clone();
        if !f(&mut candidate) {
            return Err(StoreError::StatusConflict(id));
        }
        *change = candidate.clone();
        Ok(candidate)
    }

    /// Guarded transition: "if current status is one of `from` then set `to`".
    pub fn update_status(
        &self,
        id: ChangeId,
        from: &[ChangeStatus],
        to: ChangeStatus,
        now_ms: u64,
    ) -> Result<Change, StoreError> {
        let updated = self.atomic_update(id, |change| {
            if from.contains(&change.status) {
                change.status = to;
                change.updated(now_ms);
                true
            } else {
                false
            }
        })?;
        debug!(change = %id, ?to, "status updated");
        Ok(updated)
    }

    /// Changes on a branch with the given status, ordered by sort key.
    pub fn by_branch_status(
        &self,
        project: &str,
        dest: &str,
        status: ChangeStatus,
    ) -> Vec<Change> {
        let mut changes: Vec<Change> = self
            .lock()
            .changes
            .values()
            .filter(|c| c.project == project && c.dest == dest && c.status == status)
            .cloned()
            .collect();
        changes.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
        changes
    }

    pub fn insert_revision(&self, revision: Revision) {
        self.lock().revisions.insert(revision.id, revision);
    }

    pub fn get_revision(&self, id: &ObjectId) -> Result<Revision, StoreError> {
        self.lock()
            .revisions
            .get(id)
            .cloned()
            .ok_or(StoreError::NoSuchRevision(*id))
    }

    pub fn insert_message(
        &self,
        change_id: ChangeId,
        author: AccountId,
        text: &str,
        now_ms: u64,
    ) -> Message {
        let message = Message {
            id: MessageId::new(),
            change_id,
            author,
            text: text.to_string(),
            written_at_ms: now_ms,
        };
        self.lock().messages.push(message.clone());
        message
    }

    pub fn messages_of(&self, change_id: ChangeId) -> Vec<Message> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.change_id == change_id)
            .cloned()
            .collect()
    }

    /// Insert or overwrite the approval for (revision, account, category).
    pub fn upsert_approval(&self, approval: Approval) {
        let mut inner = self.lock();
        if let Some(existing) = inner
            .approvals
            .iter_mut()
            .find(|a| a.key() == approval.key())
        {
            *existing = approval;
        } else {
            inner.approvals.push(approval);
        }
    }

    pub fn approvals_for(&self, revision: &ObjectId) -> Vec<Approval> {
        self.lock()
            .approvals
            .iter()
            .filter(|a| &a.revision == revision)
            .cloned()
            .collect()
    }

    pub fn has_approval(
        &self,
        revision: &ObjectId,
        category: ApprovalCategory,
    ) -> bool {
        self.lock()
            .approvals
            .iter()
            .any(|a| &a.revision == revision && a.category == category && a.value > 0)
    }

    /// Carry approvals forward to a rewritten revision.
    pub fn copy_approvals(&self, from: &ObjectId, to: &ObjectId, now_ms: u64) {
        let mut inner = self.lock();
        let copied: Vec<Approval> = inner
            .approvals
            .iter()
            .filter(|a| &a.revision == from)
            .map(|a| {
                let mut approval = a.clone();
                approval.revision = *to;
                approval.granted_at_ms = now_ms;
                approval
            })
            .collect();
        for approval in copied {
            if !inner.approvals.iter().any(|a| a.key() == approval.key()) {
                inner.approvals.push(approval);
            }
        }
    }
}
