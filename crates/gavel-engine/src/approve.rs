//! Build lifecycle for the staging pipeline: cut a build from the staging
//! tip, then accept or reject the finished build and settle every change it
//! carried.

use std::sync::Arc;

use tracing::{info, warn};

use gavel_core::id::{AccountId, ChangeId, ObjectId};
use gavel_core::types::{BranchKey, Change, ChangeStatus};
use gavel_store::{BranchStore, StoreError};

use crate::context::{now_ms, EngineContext};
use crate::notify::Event;
use crate::queue::QueueHandle;
use crate::staging;
use crate::EngineError;

#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub build_ref: String,
    pub tip: ObjectId,
    pub changes: Vec<ChangeId>,
}

#[derive(Debug, Clone)]
pub struct BuildVerdict {
    pub build_ref: String,
    /// Changes settled by this verdict.
    pub changes: Vec<ChangeId>,
    pub passed: bool,
}

/// Snapshot the current staging tip as build `build_id` and move every
/// staged change on the branch into `Integrating`. The staging branch
/// stays open for further staging while the build runs.
pub fn new_build(
    ctx: &EngineContext,
    branch: &BranchKey,
    build_id: &str,
    actor: AccountId,
) -> Result<BuildInfo, EngineError> {
    let repo: Arc<BranchStore> = ctx.repos.open(&branch.project);
    let staging_ref = staging::staging_ref(&branch.ref_name);

    let staged = ctx
        .changes
        .by_branch_status(&branch.project, &branch.ref_name, ChangeStatus::Staged);
    if staged.is_empty() {
        return Err(EngineError::InvalidOperation(format!(
            "no staged changes on {branch}"
        )));
    }

    let build_ref = staging::create_build_ref(&repo, &staging_ref, build_id)?;
    let tip = repo
        .resolve_ref(&build_ref)
        .ok_or_else(|| EngineError::InvalidOperation(format!("build ref {build_ref} vanished")))?;

    let now = now_ms();
    let mut included = Vec::with_capacity(staged.len());
    for change in staged {
        match ctx
            .changes
            .update_status(change.id, &[ChangeStatus::Staged], ChangeStatus::Integrating, now)
        {
            Ok(_) => included.push(change.id),
            Err(StoreError::StatusConflict(id)) => {
                warn!(change = %id, "staged change moved concurrently during build cut")
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(%branch, build = build_ref, changes = included.len(), "build created");
    ctx.notifier
        .notify(Event::BuildCreated, None, actor, &build_ref);
    Ok(BuildInfo {
        build_ref,
        tip,
        changes: included,
    })
}

/// Changes whose current revision sits in the build's ancestry but not yet
/// on the stable branch.
pub fn changes_in_build(
    ctx: &EngineContext,
    branch: &BranchKey,
    build_id: &str,
) -> Result<Vec<Change>, EngineError> {
    let repo = ctx.repos.open(&branch.project);
    let build_ref = staging::build_ref(build_id);
    let build_tip = repo.resolve_ref(&build_ref).ok_or_else(|| {
        EngineError::Store(StoreError::NoSuchRef(build_ref.clone()))
    })?;
    let branch_tip = repo.resolve_ref(&branch.ref_name);

    let mut changes = Vec::new();
    for (id, _commit) in repo.walk_ancestry(&build_tip, branch_tip.as_ref())? {
        let Ok(revision) = ctx.changes.get_revision(&id) else {
            continue;
        };
        let Ok(change) = ctx.changes.get(revision.change_id) else {
            continue;
        };
        if change.current_revision == id {
            changes.push(change);
        }
    }
    Ok(changes)
}

/// A verdict must not move anything if the build carries a change that does
/// not belong to the branch being settled.
fn validate_carried(branch: &BranchKey, carried: &[Change]) -> Result<(), EngineError> {
    for change in carried {
        if change.project != branch.project || change.dest != branch.ref_name {
            return Err(EngineError::InvalidOperation(format!(
                "change {} targets {}:{}, not {branch}",
                change.id, change.project, change.dest
            )));
        }
    }
    Ok(())
}

/// Settle a finished build. On pass the stable branch fast-forwards to the
/// build tip before any change record moves; on fail every carried change
/// returns to the staging queue and the staging branch is rebuilt without
/// them having landed.
pub fn report_build_result(
    ctx: &EngineContext,
    queue: &QueueHandle,
    branch: &BranchKey,
    build_id: &str,
    passed: bool,
    actor: AccountId,
    detail: Option<&str>,
) -> Result<BuildVerdict, EngineError> {
    let build_ref = staging::build_ref(build_id);
    if passed {
        ctx.caps
            .can_update_branch(&branch.project, &branch.ref_name, actor)
            .map_err(|d| EngineError::Denied {
                action: "approve-build",
                reason: d.0,
            })?;
    }
    let carried = changes_in_build(ctx, branch, build_id)?;
    validate_carried(branch, &carried)?;
    let (integrating, superseded): (Vec<Change>, Vec<Change>) = carried
        .into_iter()
        .partition(|c| c.status == ChangeStatus::Integrating);
    abandon_superseded(ctx, &build_ref, &superseded);

    if passed {
        approve_build(ctx, queue, branch, &build_ref, &integrating, actor)
    } else {
        reject_build(ctx, queue, branch, &build_ref, &integrating, actor, detail)
    }
}

/// A carried change that left `Integrating` while the build ran was
/// superseded (replaced, unstaged and re-worked, or merged elsewhere). If it
/// is still open it is closed here; its commit is in the build either way.
fn abandon_superseded(ctx: &EngineContext, build_ref: &str, superseded: &[Change]) {
    let now = now_ms();
    for change in superseded {
        match ctx.changes.update_status(
            change.id,
            &[ChangeStatus::New, ChangeStatus::Staging, ChangeStatus::Staged],
            ChangeStatus::Abandoned,
            now,
        ) {
            Ok(_) => {
                ctx.changes.insert_message(
                    change.id,
                    ctx.system_account,
                    &format!(
                        "Change was superseded while integration build {build_ref} was running \
                         and has been abandoned."
                    ),
                    now,
                );
            }
            Err(_) => {
                // Already closed, or moved again; nothing to settle.
                warn!(change = %change.id, status = ?change.status, "superseded change left as-is");
            }
        }
    }
}

fn approve_build(
    ctx: &EngineContext,
    queue: &QueueHandle,
    branch: &BranchKey,
    build_ref: &str,
    integrating: &[Change],
    actor: AccountId,
) -> Result<BuildVerdict, EngineError> {
    let repo = ctx.repos.open(&branch.project);
    // Branch first; change records only move once the new tip is visible.
    staging::update_branch_from_build(&repo, &branch.ref_name, build_ref)?;

    let now = now_ms();
    let mut settled = Vec::with_capacity(integrating.len());
    for change in integrating {
        match ctx.changes.update_status(
            change.id,
            &[ChangeStatus::Integrating],
            ChangeStatus::Merged,
            now,
        ) {
            Ok(updated) => {
                ctx.changes.insert_message(
                    change.id,
                    ctx.system_account,
                    "Change has been successfully merged.",
                    now,
                );
                ctx.notifier
                    .notify(Event::ChangeMerged, Some(&updated), actor, build_ref);
                settled.push(change.id);
            }
            Err(StoreError::StatusConflict(id)) => {
                warn!(change = %id, "change left Integrating before build approval")
            }
            // The branch already advanced; a record left behind here needs
            // an operator, not a retry.
            Err(e) => {
                return Err(EngineError::InconsistentState(format!(
                    "{branch} advanced to {build_ref} but change {} was not settled: {e}",
                    change.id
                )))
            }
        }
    }

    info!(%branch, build = build_ref, merged = settled.len(), "build approved");
    ctx.notifier
        .notify(Event::BuildApproved, None, actor, build_ref);

    // The stable tip moved; whatever is still staged must be rebased.
    if staging::branch_exists(&repo, &staging::staging_ref(&branch.ref_name)) {
        staging::rebuild_staging(ctx, queue, branch, ctx.system_account)?;
    }
    Ok(BuildVerdict {
        build_ref: build_ref.to_string(),
        changes: settled,
        passed: true,
    })
}

fn reject_build(
    ctx: &EngineContext,
    queue: &QueueHandle,
    branch: &BranchKey,
    build_ref: &str,
    integrating: &[Change],
    actor: AccountId,
    detail: Option<&str>,
) -> Result<BuildVerdict, EngineError> {
    let now = now_ms();
    let mut text = format!("Integration build {build_ref} failed.");
    if let Some(detail) = detail {
        text.push_str("\n\n");
        text.push_str(detail);
    }

    let mut settled = Vec::with_capacity(integrating.len());
    for change in integrating {
        match ctx.changes.update_status(
            change.id,
            &[ChangeStatus::Integrating],
            ChangeStatus::Staging,
            now,
        ) {
            Ok(_) => {
                ctx.changes
                    .insert_message(change.id, ctx.system_account, &text, now);
                settled.push(change.id);
            }
            Err(StoreError::StatusConflict(id)) => {
                warn!(change = %id, "change left Integrating before build rejection")
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(%branch, build = build_ref, returned = settled.len(), "build rejected");
    ctx.notifier
        .notify(Event::BuildRejected, None, actor, build_ref);

    // Drop the failed commits from the staging branch; the returned changes
    // re-integrate on the next run.
    staging::rebuild_staging(ctx, queue, branch, ctx.system_account)?;
    Ok(BuildVerdict {
        build_ref: build_ref.to_string(),
        changes: settled,
        passed: false,
    })
}
