//! One integration run for one branch: select eligible changes, fold them
//! onto the tip, publish the new tip with a single CAS update and only then
//! finalize the change records.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use gavel_core::id::{ChangeId, ObjectId};
use gavel_core::types::{BranchKey, ChangeStatus, Revision};
use gavel_merge::{order_candidates, Candidate, Outcome};
use gavel_store::{BranchStore, StoreError};

use crate::context::{now_ms, EngineContext};
use crate::delegate::MergeDelegate;
use crate::notify::Event;
use crate::queue::QueueHandle;
use crate::staging;
use crate::EngineError;

/// Summary of a single integration run.
#[derive(Debug, Clone)]
pub struct OpReport {
    pub branch: BranchKey,
    pub delegate: MergeDelegate,
    /// Candidates considered this run.
    pub attempted: usize,
    /// Candidates that reached the delegate's terminal status.
    pub landed: usize,
    /// Candidates excluded because a dependency is not yet available.
    pub deferred: usize,
}

/// Run one integration pass over `branch`. A ref CAS race surfaces as a
/// retryable error; the caller re-runs against the moved tip.
pub fn run_integration(
    ctx: &EngineContext,
    queue: &QueueHandle,
    branch: &BranchKey,
) -> Result<OpReport, EngineError> {
    let delegate = MergeDelegate::for_branch(&branch.ref_name);
    let repo: Arc<BranchStore> = ctx.repos.open(&branch.project);

    if delegate == MergeDelegate::Staging && !staging::branch_exists(&repo, &branch.ref_name) {
        staging::create_staging_branch(&repo, &staging::source_ref(&branch.ref_name))?;
    }
    let tip = repo.resolve_ref(&branch.ref_name);

    let candidates = select(ctx, &repo, delegate, branch, tip)?;
    let mut report = OpReport {
        branch: branch.clone(),
        delegate,
        attempted: candidates.ready.len() + candidates.deferred,
        landed: 0,
        deferred: candidates.deferred,
    };
    if candidates.ready.is_empty() {
        return Ok(report);
    }

    let strategy = ctx.strategy_for(&branch.project, delegate);
    let result = strategy.integrate(
        &repo,
        tip,
        &candidates.ready,
        &ctx.integrator,
        now_ms(),
    )?;

    // Publish the tip first; record updates follow only once the ref is
    // visibly advanced. A lost race leaves every candidate untouched.
    if let Some(new_tip) = result.new_tip {
        if Some(new_tip) != tip {
            repo.cas_update_ref(&branch.ref_name, tip, new_tip, false)?;
        }
    }

    for candidate_outcome in &result.outcomes {
        let change_id = candidate_outcome.change_id;
        match candidate_outcome.outcome {
            outcome if outcome.is_clean() => {
                finalize(ctx, delegate, candidate_outcome.revision, candidate_outcome.new_commit, change_id, &repo)?;
                report.landed += 1;
            }
            Outcome::MissingDependency => {
                // Stays eligible; a later run picks it up once the
                // dependency lands.
                report.deferred += 1;
            }
            outcome => {
                if let Some(text) = delegate.message_for(outcome) {
                    ctx.changes
                        .insert_message(change_id, ctx.system_account, text, now_ms());
                }
                warn!(change = %change_id, ?outcome, branch = %branch, "candidate failed to integrate");
            }
        }
    }

    info!(
        branch = %branch,
        attempted = report.attempted,
        landed = report.landed,
        deferred = report.deferred,
        "integration run complete"
    );

    if delegate.needs_staging_rebuild() && report.landed > 0 {
        let repo = ctx.repos.open(&branch.project);
        if staging::branch_exists(&repo, &staging::staging_ref(&branch.ref_name)) {
            staging::rebuild_staging(ctx, queue, branch, ctx.system_account)?;
        }
    }
    Ok(report)
}

/// Would this change integrate cleanly onto its destination right now?
/// Runs the submit strategy's dry run; nothing is mutated.
pub fn check_candidate(ctx: &EngineContext, change_id: ChangeId) -> Result<Outcome, EngineError> {
    let change = ctx.changes.get(change_id)?;
    let repo = ctx.repos.open(&change.project);
    let strategy = ctx.strategy_for(&change.project, MergeDelegate::Submit);
    let tip = repo.resolve_ref(&change.dest);
    Ok(strategy.dry_run(&repo, tip, &change.current_revision)?)
}

struct Selection {
    ready: Vec<Candidate>,
    /// Excluded up front because a dependency is absent from both the tip
    /// ancestry and the batch.
    deferred: usize,
}

/// Eligible, approved candidates in dependency order, with the dependency
/// precheck applied.
fn select(
    ctx: &EngineContext,
    repo: &BranchStore,
    delegate: MergeDelegate,
    branch: &BranchKey,
    tip: Option<ObjectId>,
) -> Result<Selection, EngineError> {
    let category = delegate.required_category();
    let mut candidates = Vec::new();
    for change in delegate.select_candidates(ctx, branch) {
        if !ctx.changes.has_approval(&change.current_revision, category) {
            continue;
        }
        let revision = ctx.changes.get_revision(&change.current_revision)?;
        candidates.push(Candidate { change, revision });
    }
    let ordered = order_candidates(candidates);

    let in_batch: HashSet<ObjectId> = ordered.iter().map(|c| c.revision.id).collect();
    let mut unavailable: HashSet<ObjectId> = HashSet::new();
    let mut ready = Vec::with_capacity(ordered.len());
    let mut deferred = 0usize;
    for candidate in ordered {
        let blocked = candidate.revision.parents.iter().any(|parent| {
            unavailable.contains(parent)
                || !parent_available(ctx, repo, delegate, tip, &in_batch, parent)
        });
        if blocked {
            unavailable.insert(candidate.revision.id);
            deferred += 1;
            info!(
                change = %candidate.change.id,
                branch = %branch,
                "dependency not yet available; waiting"
            );
        } else {
            ready.push(candidate);
        }
    }
    Ok(Selection { ready, deferred })
}

/// A parent is satisfied when it is already part of the tip's history, when
/// it lands earlier in this batch, or when its change reached the delegate's
/// terminal status (its content is on the branch under a rewritten commit).
fn parent_available(
    ctx: &EngineContext,
    repo: &BranchStore,
    delegate: MergeDelegate,
    tip: Option<ObjectId>,
    in_batch: &HashSet<ObjectId>,
    parent: &ObjectId,
) -> bool {
    if let Some(tip) = tip {
        if repo.is_ancestor(parent, &tip) {
            return true;
        }
    }
    if in_batch.contains(parent) {
        return true;
    }
    let Ok(revision) = ctx.changes.get_revision(parent) else {
        return false;
    };
    let Ok(change) = ctx.changes.get(revision.change_id) else {
        return false;
    };
    change.status == delegate.terminal_status() || change.status == ChangeStatus::Merged
}

/// Flip one cleanly integrated change to the delegate's terminal status. A
/// cherry-pick first records the rewritten commit as a new patch set with
/// the approvals carried forward.
fn finalize(
    ctx: &EngineContext,
    delegate: MergeDelegate,
    old_revision: ObjectId,
    new_commit: Option<ObjectId>,
    change_id: ChangeId,
    repo: &BranchStore,
) -> Result<(), EngineError> {
    let now = now_ms();
    let terminal = delegate.terminal_status();
    let from = delegate.from_status();

    let picked = match new_commit {
        Some(new_id) => {
            let change = ctx.changes.get(change_id)?;
            let commit = repo.load_commit(&new_id)?;
            let revision = Revision {
                id: new_id,
                change_id,
                number: change.current_patch_set + 1,
                uploader: change.owner,
                parents: commit.parents,
                created_at_ms: now,
            };
            ctx.changes.insert_revision(revision);
            ctx.changes.copy_approvals(&old_revision, &new_id, now);
            Some(new_id)
        }
        None => None,
    };

    let updated = ctx.changes.atomic_update(change_id, |change| {
        if change.status != from {
            return false;
        }
        change.status = terminal;
        if let Some(new_id) = picked {
            change.current_revision = new_id;
            change.current_patch_set += 1;
        }
        change.updated(now);
        true
    });
    let change = match updated {
        Ok(change) => change,
        // The ref already moved; a concurrent lifecycle action took the
        // change out of the eligible status after selection.
        Err(StoreError::StatusConflict(id)) => {
            warn!(change = %id, "change left {from:?} during integration");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let outcome = if picked.is_some() {
        Outcome::CleanPick
    } else {
        Outcome::CleanMerge
    };
    if let Some(text) = delegate.message_for(outcome) {
        ctx.changes
            .insert_message(change_id, ctx.system_account, text, now);
    }
    let event = match delegate {
        MergeDelegate::Submit => Event::ChangeMerged,
        MergeDelegate::Staging => Event::ChangeStaged,
    };
    ctx.notifier
        .notify(event, Some(&change), ctx.system_account, &change.dest);
    Ok(())
}
