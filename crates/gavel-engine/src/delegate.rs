use gavel_core::types::{ApprovalCategory, BranchKey, Change, ChangeStatus};
use gavel_merge::Outcome;

use crate::context::EngineContext;
use crate::staging;

/// Policy differences between "submit to the main line" and "promote to the
/// staging line". Closed set dispatched by variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDelegate {
    Submit,
    Staging,
}

impl MergeDelegate {
    /// The delegate follows from the ref namespace being integrated.
    pub fn for_branch(ref_name: &str) -> Self {
        if ref_name.starts_with(staging::R_STAGING) {
            MergeDelegate::Staging
        } else {
            MergeDelegate::Submit
        }
    }

    /// Eligible changes for one run, ordered by sort key. `branch` is the
    /// ref being integrated: the stable branch for submit, the staging
    /// mirror for staging.
    pub fn select_candidates(&self, ctx: &EngineContext, branch: &BranchKey) -> Vec<Change> {
        match self {
            MergeDelegate::Submit => ctx.changes.by_branch_status(
                &branch.project,
                &branch.ref_name,
                ChangeStatus::Submitted,
            ),
            MergeDelegate::Staging => {
                // Changes reference their stable destination branch.
                let source = staging::source_ref(&branch.ref_name);
                ctx.changes
                    .by_branch_status(&branch.project, &source, ChangeStatus::Staging)
            }
        }
    }

    pub fn required_category(&self) -> ApprovalCategory {
        match self {
            MergeDelegate::Submit => ApprovalCategory::Submit,
            MergeDelegate::Staging => ApprovalCategory::Stage,
        }
    }

    /// Status a candidate must hold when the operation finalizes it.
    pub fn from_status(&self) -> ChangeStatus {
        match self {
            MergeDelegate::Submit => ChangeStatus::Submitted,
            MergeDelegate::Staging => ChangeStatus::Staging,
        }
    }

    pub fn terminal_status(&self) -> ChangeStatus {
        match self {
            MergeDelegate::Submit => ChangeStatus::Merged,
            MergeDelegate::Staging => ChangeStatus::Staged,
        }
    }

    /// A main-branch landing moves the base under the staging mirror, which
    /// must then be rebuilt; a staging landing does not.
    pub fn needs_staging_rebuild(&self) -> bool {
        matches!(self, MergeDelegate::Submit)
    }

    /// Human-readable explanation per outcome. Missing dependencies are
    /// retried on the next run without marking the change.
    pub fn message_for(&self, outcome: Outcome) -> Option<&'static str> {
        match (self, outcome) {
            (MergeDelegate::Submit, Outcome::CleanMerge) => {
                Some("Change has been successfully merged.")
            }
            (MergeDelegate::Submit, Outcome::CleanPick) => {
                Some("Change has been successfully cherry-picked.")
            }
            (MergeDelegate::Staging, Outcome::CleanMerge) => {
                Some("Change has been successfully merged into the staging branch.")
            }
            (MergeDelegate::Staging, Outcome::CleanPick) => {
                Some("Change has been successfully cherry-picked to the staging branch.")
            }
            (MergeDelegate::Submit, Outcome::PathConflict) => Some(
                "Your change could not be merged due to a path conflict.\n\
                 \n\
                 Please rebase the change locally and upload the rebased commit for review.",
            ),
            (MergeDelegate::Staging, Outcome::PathConflict) => Some(
                "Your change could not be merged due to a path conflict.\n\
                 \n\
                 Make sure you staged all dependencies of this change. \
                 If the change has dependencies which are currently INTEGRATING, \
                 try again when the integration finishes.\n\
                 \n\
                 Otherwise please rebase the change locally and upload the rebased commit for review.",
            ),
            (_, Outcome::CannotPickRoot) => Some(
                "Cannot cherry-pick an initial commit onto an existing branch.\n\
                 \n\
                 Please rebase the change locally and upload again for review.",
            ),
            (_, Outcome::NotFastForward) => Some(
                "Project policy requires all submissions to be a fast-forward.\n\
                 \n\
                 Please rebase the change locally and upload again for review.",
            ),
            (_, Outcome::MissingDependency) => None,
        }
    }
}
