//! Change lifecycle actions: upload, submit, stage, unstage, abandon,
//! defer, restore and revert. Every transition goes through a guarded
//! status update so concurrent actors cannot both win.

use std::sync::Arc;

use tracing::info;

use gavel_core::id::{AccountId, ChangeId, ObjectId};
use gavel_core::types::{Approval, ApprovalCategory, Change, ChangeStatus, Revision, Tree};
use gavel_merge::tree_apply::{apply_onto, tree_diff};
use gavel_store::BranchStore;

use crate::capability::Denied;
use crate::context::{now_ms, EngineContext};
use crate::notify::Event;
use crate::queue::QueueHandle;
use crate::staging;
use crate::EngineError;

fn denied(action: &'static str, d: Denied) -> EngineError {
    EngineError::Denied {
        action,
        reason: d.0,
    }
}

/// Create a change for a proposed commit. The commit is stored in the
/// project's graph; the branch itself does not move.
pub fn upload_change(
    ctx: &EngineContext,
    project: &str,
    dest: &str,
    owner: AccountId,
    parents: Vec<ObjectId>,
    tree: Tree,
    message: &str,
) -> Result<Change, EngineError> {
    let repo = ctx.repos.open(project);
    let now = now_ms();
    let commit_id =
        repo.create_commit(parents.clone(), tree, &format!("account-{owner}"), message, now)?;

    let id = ctx.changes.next_change_id();
    let change = Change::new(id, project, dest, owner, commit_id, now);
    ctx.changes.insert_revision(Revision {
        id: commit_id,
        change_id: id,
        number: 1,
        uploader: owner,
        parents,
        created_at_ms: now,
    });
    ctx.changes.insert_change(change.clone());
    info!(change = %id, project, dest, revision = %commit_id.short(), "change uploaded");
    Ok(change)
}

/// Replace the current patch set with a new commit. Allowed while the
/// change is open and not being integrated; the change returns to `New`
/// and previously granted approvals do not carry over.
pub fn upload_patch_set(
    ctx: &EngineContext,
    queue: &QueueHandle,
    change_id: ChangeId,
    uploader: AccountId,
    parents: Vec<ObjectId>,
    tree: Tree,
    message: &str,
) -> Result<Change, EngineError> {
    let change = ctx.changes.get(change_id)?;
    let repo = ctx.repos.open(&change.project);
    let now = now_ms();
    let commit_id =
        repo.create_commit(parents.clone(), tree, &format!("account-{uploader}"), message, now)?;

    let was_staged = change.status == ChangeStatus::Staged;
    let updated = ctx.changes.atomic_update(change_id, |change| {
        if !change.status.is_open()
            || change.status == ChangeStatus::Integrating
            || change.status == ChangeStatus::Submitted
        {
            return false;
        }
        change.status = ChangeStatus::New;
        change.current_revision = commit_id;
        change.current_patch_set += 1;
        change.updated(now);
        true
    })?;
    ctx.changes.insert_revision(Revision {
        id: commit_id,
        change_id,
        number: updated.current_patch_set,
        uploader,
        parents,
        created_at_ms: now,
    });

    // A replaced staged commit must be dropped from the staging branch.
    if was_staged {
        staging::rebuild_staging(ctx, queue, &updated.branch_key(), uploader)?;
    }
    Ok(updated)
}

/// Mark a change for submission to its destination branch and schedule an
/// integration run. Submitting a change that sits in the staging pipeline
/// pulls it out: its pick is dropped through a rebuild and it lands on the
/// stable branch directly.
pub fn submit(
    ctx: &EngineContext,
    queue: &QueueHandle,
    change_id: ChangeId,
    actor: AccountId,
) -> Result<Change, EngineError> {
    let change = ctx.changes.get(change_id)?;
    ctx.caps
        .can_submit(&change, actor)
        .map_err(|d| denied("submit", d))?;

    let now = now_ms();
    ctx.changes.upsert_approval(Approval {
        change_id,
        revision: change.current_revision,
        account: actor,
        category: ApprovalCategory::Submit,
        value: 1,
        granted_at_ms: now,
    });
    let was_staged = matches!(
        change.status,
        ChangeStatus::Staged | ChangeStatus::Integrating
    );
    let updated = ctx.changes.update_status(
        change_id,
        &[
            ChangeStatus::New,
            ChangeStatus::Staging,
            ChangeStatus::Staged,
            ChangeStatus::Integrating,
        ],
        ChangeStatus::Submitted,
        now,
    )?;
    ctx.changes.insert_message(
        change_id,
        actor,
        &format!("Patch Set {}: Submitted", updated.current_patch_set),
        now,
    );
    if was_staged {
        staging::rebuild_staging(ctx, queue, &updated.branch_key(), actor)?;
    }
    queue.schedule(updated.branch_key());
    Ok(updated)
}

/// Queue a change for the staging branch of its destination and schedule a
/// staging integration run.
pub fn stage(
    ctx: &EngineContext,
    queue: &QueueHandle,
    change_id: ChangeId,
    actor: AccountId,
) -> Result<Change, EngineError> {
    let change = ctx.changes.get(change_id)?;
    ctx.caps
        .can_stage(&change, actor)
        .map_err(|d| denied("stage", d))?;

    let repo: Arc<BranchStore> = ctx.repos.open(&change.project);
    let staging_ref = staging::staging_ref(&change.dest);
    if !staging::branch_exists(&repo, &staging_ref) {
        staging::create_staging_branch(&repo, &change.dest)?;
    }

    let now = now_ms();
    ctx.changes.upsert_approval(Approval {
        change_id,
        revision: change.current_revision,
        account: actor,
        category: ApprovalCategory::Stage,
        value: 1,
        granted_at_ms: now,
    });
    let updated =
        ctx.changes
            .update_status(change_id, &[ChangeStatus::New], ChangeStatus::Staging, now)?;
    ctx.changes.insert_message(
        change_id,
        actor,
        &format!("Patch Set {}: Staged", updated.current_patch_set),
        now,
    );
    queue.schedule(staging::staging_branch(&updated.branch_key()));
    Ok(updated)
}

/// Take a change back out of the staging pipeline. A change that already
/// reached the staging branch (or a running build) forces a rebuild to drop
/// its commit.
pub fn unstage(
    ctx: &EngineContext,
    queue: &QueueHandle,
    change_id: ChangeId,
    actor: AccountId,
) -> Result<Change, EngineError> {
    let change = ctx.changes.get(change_id)?;
    ctx.caps
        .can_stage(&change, actor)
        .map_err(|d| denied("unstage", d))?;

    let now = now_ms();
    let was_staged = matches!(
        change.status,
        ChangeStatus::Staged | ChangeStatus::Integrating
    );
    let updated = ctx.changes.update_status(
        change_id,
        &[
            ChangeStatus::Staging,
            ChangeStatus::Staged,
            ChangeStatus::Integrating,
        ],
        ChangeStatus::New,
        now,
    )?;
    // Withdraw rather than delete: the zeroed approval records who acted.
    ctx.changes.upsert_approval(Approval {
        change_id,
        revision: updated.current_revision,
        account: actor,
        category: ApprovalCategory::Stage,
        value: 0,
        granted_at_ms: now,
    });
    ctx.changes.insert_message(
        change_id,
        actor,
        &format!("Patch Set {}: Unstaged", updated.current_patch_set),
        now,
    );
    ctx.notifier
        .notify(Event::ChangeUnstaged, Some(&updated), actor, &updated.dest);
    if was_staged {
        staging::rebuild_staging(ctx, queue, &updated.branch_key(), actor)?;
    }
    Ok(updated)
}

/// Abandon an open or deferred change. Abandoning a staged change drops it
/// from the staging branch through a rebuild.
pub fn abandon(
    ctx: &EngineContext,
    queue: &QueueHandle,
    change_id: ChangeId,
    actor: AccountId,
    reason: Option<&str>,
) -> Result<Change, EngineError> {
    let change = ctx.changes.get(change_id)?;
    ctx.caps
        .can_abandon(&change, actor)
        .map_err(|d| denied("abandon", d))?;

    let now = now_ms();
    let was_staged = matches!(
        change.status,
        ChangeStatus::Staged | ChangeStatus::Integrating
    );
    let updated = ctx.changes.update_status(
        change_id,
        &[
            ChangeStatus::New,
            ChangeStatus::Staging,
            ChangeStatus::Staged,
            ChangeStatus::Integrating,
            ChangeStatus::Submitted,
            ChangeStatus::Deferred,
        ],
        ChangeStatus::Abandoned,
        now,
    )?;
    let mut text = format!("Patch Set {}: Abandoned", updated.current_patch_set);
    if let Some(reason) = reason {
        text.push_str("\n\n");
        text.push_str(reason);
    }
    ctx.changes.insert_message(change_id, actor, &text, now);
    ctx.notifier
        .notify(Event::ChangeAbandoned, Some(&updated), actor, &updated.dest);
    if was_staged {
        staging::rebuild_staging(ctx, queue, &updated.branch_key(), actor)?;
    }
    Ok(updated)
}

/// Park an open or abandoned change without closing it for good.
pub fn defer(
    ctx: &EngineContext,
    queue: &QueueHandle,
    change_id: ChangeId,
    actor: AccountId,
) -> Result<Change, EngineError> {
    let change = ctx.changes.get(change_id)?;
    ctx.caps
        .can_defer(&change, actor)
        .map_err(|d| denied("defer", d))?;

    let now = now_ms();
    let was_staged = matches!(
        change.status,
        ChangeStatus::Staged | ChangeStatus::Integrating
    );
    let updated = ctx.changes.update_status(
        change_id,
        &[
            ChangeStatus::New,
            ChangeStatus::Staging,
            ChangeStatus::Staged,
            ChangeStatus::Integrating,
            ChangeStatus::Submitted,
            ChangeStatus::Abandoned,
        ],
        ChangeStatus::Deferred,
        now,
    )?;
    ctx.changes.insert_message(
        change_id,
        actor,
        &format!("Patch Set {}: Deferred", updated.current_patch_set),
        now,
    );
    ctx.notifier
        .notify(Event::ChangeDeferred, Some(&updated), actor, &updated.dest);
    if was_staged {
        staging::rebuild_staging(ctx, queue, &updated.branch_key(), actor)?;
    }
    Ok(updated)
}

/// Reopen an abandoned or deferred change.
pub fn restore(
    ctx: &EngineContext,
    change_id: ChangeId,
    actor: AccountId,
) -> Result<Change, EngineError> {
    let change = ctx.changes.get(change_id)?;
    ctx.caps
        .can_restore(&change, actor)
        .map_err(|d| denied("restore", d))?;

    let now = now_ms();
    let updated = ctx.changes.update_status(
        change_id,
        &[ChangeStatus::Abandoned, ChangeStatus::Deferred],
        ChangeStatus::New,
        now,
    )?;
    ctx.changes.insert_message(
        change_id,
        actor,
        &format!("Patch Set {}: Restored", updated.current_patch_set),
        now,
    );
    ctx.notifier
        .notify(Event::ChangeRestored, Some(&updated), actor, &updated.dest);
    Ok(updated)
}

/// Propose a new change that undoes a merged change on its destination
/// branch. The original change is annotated; the revert itself goes through
/// review like any other change.
pub fn revert(
    ctx: &EngineContext,
    change_id: ChangeId,
    actor: AccountId,
) -> Result<Change, EngineError> {
    let change = ctx.changes.get(change_id)?;
    if change.status != ChangeStatus::Merged {
        return Err(EngineError::InvalidOperation(format!(
            "change {} is not merged",
            change.id
        )));
    }

    let repo = ctx.repos.open(&change.project);
    let tip = repo.resolve_ref(&change.dest).ok_or_else(|| {
        EngineError::InvalidOperation(format!("branch {} not found", change.dest))
    })?;
    let commit = repo.load_commit(&change.current_revision)?;
    if commit.is_merge() || commit.is_root() {
        return Err(EngineError::InvalidOperation(
            "only single-parent commits can be reverted".into(),
        ));
    }

    let parent = repo.load_commit(&commit.parents[0])?;
    let tip_commit = repo.load_commit(&tip)?;
    // Inverse edit: from the reverted commit back to its parent.
    let undo = tree_diff(&commit.tree, &parent.tree);
    let reverted_tree = apply_onto(&tip_commit.tree, &commit.tree, &undo).map_err(|paths| {
        EngineError::InvalidOperation(format!(
            "revert conflicts with later changes at: {}",
            paths.join(", ")
        ))
    })?;

    let now = now_ms();
    let message = format!("Revert \"{}\"", commit.message.lines().next().unwrap_or(""));
    let revert_change = upload_change(
        ctx,
        &change.project,
        &change.dest,
        actor,
        vec![tip],
        reverted_tree,
        &message,
    )?;

    ctx.changes.insert_message(
        change_id,
        actor,
        &format!("Patch Set {}: Reverted", change.current_patch_set),
        now,
    );
    ctx.notifier
        .notify(Event::ChangeReverted, Some(&change), actor, &message);
    Ok(revert_change)
}
