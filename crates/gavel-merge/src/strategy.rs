use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use gavel_core::id::{ChangeId, ObjectId};
use gavel_core::types::{Change, Revision, Tree};
use gavel_store::BranchStore;

use crate::outcome::Outcome;
use crate::tree_apply::{apply_onto, three_way, tree_diff};
use crate::MergeError;

/// Integration algorithm combining candidate revisions onto a branch tip.
/// Closed set; no plugin extensibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    FastForwardOnly,
    MergeIfNecessary,
    MergeAlways,
    CherryPick,
}

/// One eligible change with the revision to integrate, presented in
/// dependency-respecting order.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub change: Change,
    pub revision: Revision,
}

#[derive(Debug, Clone)]
pub struct CandidateOutcome {
    pub change_id: ChangeId,
    pub revision: ObjectId,
    pub outcome: Outcome,
    /// Set only when the strategy rewrote the commit (cherry-pick).
    pub new_commit: Option<ObjectId>,
}

#[derive(Debug, Clone)]
pub struct IntegrationResult {
    pub new_tip: Option<ObjectId>,
    pub outcomes: Vec<CandidateOutcome>,
}

/// What applying one candidate would do. Computed without mutating the
/// store so the same path backs both `integrate` and `dry_run`.
enum Action {
    /// Tip moves to an existing commit (fast-forward).
    Advance(ObjectId),
    /// A new commit must be created.
    Create {
        parents: Vec<ObjectId>,
        tree: Tree,
        author: String,
        message: String,
    },
    /// Nothing to do (failure, or candidate already in history).
    None,
}

struct Plan {
    outcome: Outcome,
    action: Action,
}

impl Strategy {
    /// Fold `candidates` onto `tip`, producing the new tip and one outcome
    /// per candidate. Once an earlier candidate fails, its in-batch
    /// descendants are blocked as missing-dependency rather than attempted.
    pub fn integrate(
        &self,
        repo: &BranchStore,
        tip: Option<ObjectId>,
        candidates: &[Candidate],
        integrator: &str,
        now_ms: u64,
    ) -> Result<IntegrationResult, MergeError> {
        let mut tip = tip;
        let mut outcomes = Vec::with_capacity(candidates.len());
        let mut failed: HashSet<ObjectId> = HashSet::new();
        // Fast-forward-only excludes each non-descendant candidate on its
        // own; the other strategies block dependents of a failed commit.
        let cascade = !matches!(self, Strategy::FastForwardOnly);

        for candidate in candidates {
            let revision_id = candidate.revision.id;
            if cascade && candidate.revision.parents.iter().any(|p| failed.contains(p)) {
                failed.insert(revision_id);
                outcomes.push(CandidateOutcome {
                    change_id: candidate.change.id,
                    revision: revision_id,
                    outcome: Outcome::MissingDependency,
                    new_commit: None,
                });
                continue;
            }

            let plan = self.plan_one(repo, tip, &revision_id, integrator)?;
            let mut new_commit = None;
            match plan.action {
                Action::Advance(id) => tip = Some(id),
                Action::Create {
                    parents,
                    tree,
                    author,
                    message,
                } => {
                    let id = repo.create_commit(parents, tree, &author, &message, now_ms)?;
                    if plan.outcome == Outcome::CleanPick {
                        new_commit = Some(id);
                    }
                    tip = Some(id);
                }
                Action::None => {}
            }
            if !plan.outcome.is_clean() {
                failed.insert(revision_id);
            }
            debug!(
                change = %candidate.change.id,
                revision = %revision_id.short(),
                outcome = ?plan.outcome,
                "candidate integrated"
            );
            outcomes.push(CandidateOutcome {
                change_id: candidate.change.id,
                revision: revision_id,
                outcome: plan.outcome,
                new_commit,
            });
        }

        Ok(IntegrationResult {
            new_tip: tip,
            outcomes,
        })
    }

    /// Would `revision` apply cleanly onto `tip`? Plans one candidate and
    /// discards the plan; never mutates the store.
    pub fn dry_run(
        &self,
        repo: &BranchStore,
        tip: Option<ObjectId>,
        revision: &ObjectId,
    ) -> Result<Outcome, MergeError> {
        Ok(self.plan_one(repo, tip, revision, "dry-run")?.outcome)
    }

    fn plan_one(
        &self,
        repo: &BranchStore,
        tip: Option<ObjectId>,
        revision: &ObjectId,
        integrator: &str,
    ) -> Result<Plan, MergeError> {
        let tip = match tip {
            // Unborn branch: the first candidate becomes the tip as-is.
            None => {
                return Ok(Plan {
                    outcome: Outcome::CleanMerge,
                    action: Action::Advance(*revision),
                })
            }
            Some(tip) => tip,
        };

        // Already contained in the tip's history.
        if repo.is_ancestor(revision, &tip) {
            return Ok(Plan {
                outcome: Outcome::CleanMerge,
                action: Action::None,
            });
        }

        match self {
            Strategy::FastForwardOnly => {
                if repo.is_ancestor(&tip, revision) {
                    Ok(Plan {
                        outcome: Outcome::CleanMerge,
                        action: Action::Advance(*revision),
                    })
                } else {
                    Ok(Plan {
                        outcome: Outcome::NotFastForward,
                        action: Action::None,
                    })
                }
            }
            Strategy::MergeIfNecessary => {
                if repo.is_ancestor(&tip, revision) {
                    Ok(Plan {
                        outcome: Outcome::CleanMerge,
                        action: Action::Advance(*revision),
                    })
                } else {
                    self.plan_merge_commit(repo, &tip, revision, integrator)
                }
            }
            Strategy::MergeAlways => self.plan_merge_commit(repo, &tip, revision, integrator),
            Strategy::CherryPick => {
                let commit = repo.load_commit(revision)?;
                if commit.is_merge() {
                    // Merge candidates are not rewritten; integrate as in
                    // merge-if-necessary.
                    return if repo.is_ancestor(&tip, revision) {
                        Ok(Plan {
                            outcome: Outcome::CleanMerge,
                            action: Action::Advance(*revision),
                        })
                    } else {
                        self.plan_merge_commit(repo, &tip, revision, integrator)
                    };
                }
                if commit.is_root() {
                    return Ok(Plan {
                        outcome: Outcome::CannotPickRoot,
                        action: Action::None,
                    });
                }
                // Sitting directly on the tip: a rebuilt pick would differ
                // from the candidate only in timestamp (and collide with it
                // within the same millisecond), so advance to it as-is.
                if commit.parents[0] == tip {
                    return Ok(Plan {
                        outcome: Outcome::CleanMerge,
                        action: Action::Advance(*revision),
                    });
                }

                let parent = repo.load_commit(&commit.parents[0])?;
                let tip_commit = repo.load_commit(&tip)?;
                let edits = tree_diff(&parent.tree, &commit.tree);
                match apply_onto(&tip_commit.tree, &parent.tree, &edits) {
                    Err(_paths) => Ok(Plan {
                        outcome: Outcome::PathConflict,
                        action: Action::None,
                    }),
                    Ok(tree) if tree == tip_commit.tree => {
                        // Already applied: clean, no new revision.
                        Ok(Plan {
                            outcome: Outcome::CleanMerge,
                            action: Action::None,
                        })
                    }
                    Ok(tree) => Ok(Plan {
                        outcome: Outcome::CleanPick,
                        action: Action::Create {
                            parents: vec![tip],
                            tree,
                            author: commit.author.clone(),
                            message: commit.message.clone(),
                        },
                    }),
                }
            }
        }
    }

    fn plan_merge_commit(
        &self,
        repo: &BranchStore,
        tip: &ObjectId,
        revision: &ObjectId,
        integrator: &str,
    ) -> Result<Plan, MergeError> {
        let base_tree = match repo.merge_base(tip, revision)? {
            Some(base) => repo.load_commit(&base)?.tree,
            None => Tree::new(),
        };
        let tip_tree = repo.load_commit(tip)?.tree;
        let rev_tree = repo.load_commit(revision)?.tree;
        match three_way(&base_tree, &tip_tree, &rev_tree) {
            Err(_paths) => Ok(Plan {
                outcome: Outcome::PathConflict,
                action: Action::None,
            }),
            Ok(tree) => Ok(Plan {
                outcome: Outcome::CleanMerge,
                action: Action::Create {
                    parents: vec![*tip, *revision],
                    tree,
                    author: integrator.to_string(),
                    message: format!("Merge commit {}", revision.short()),
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_core::hash::blob_id;
    use gavel_core::id::AccountId;

    fn tree(entries: &[(&str, &[u8])]) -> Tree {
        entries
            .iter()
            .map(|(path, data)| (path.to_string(), blob_id(data)))
            .collect()
    }

    fn commit(repo: &BranchStore, parents: Vec<ObjectId>, t: Tree, msg: &str) -> ObjectId {
        repo.create_commit(parents, t, "author", msg, 1000).unwrap()
    }

    fn candidate(n: u32, revision: ObjectId, parents: Vec<ObjectId>) -> Candidate {
        let change_id = ChangeId(n);
        Candidate {
            change: Change::new(
                change_id,
                "demo",
                "heads/main",
                AccountId(1),
                revision,
                1_700_000_000_000 + u64::from(n) * 60_000,
            ),
            revision: Revision {
                id: revision,
                change_id,
                number: 1,
                uploader: AccountId(1),
                parents,
                created_at_ms: 1000,
            },
        }
    }

    #[test]
    fn fast_forward_only_excludes_divergent_candidates() {
        let repo = BranchStore::new();
        let a = commit(&repo, vec![], tree(&[("f", b"a")]), "a");
        let b = commit(&repo, vec![a], tree(&[("f", b"b")]), "b");
        let side = commit(&repo, vec![a], tree(&[("g", b"s")]), "side");

        let result = Strategy::FastForwardOnly
            .integrate(
                &repo,
                Some(b),
                &[candidate(1, side, vec![a])],
                "it",
                2000,
            )
            .unwrap();
        assert_eq!(result.new_tip, Some(b));
        assert_eq!(result.outcomes[0].outcome, Outcome::NotFastForward);
    }

    #[test]
    fn fast_forward_chain_lands_both() {
        let repo = BranchStore::new();
        let a = commit(&repo, vec![], tree(&[("f", b"a")]), "a");
        let c1 = commit(&repo, vec![a], tree(&[("f", b"1")]), "c1");
        let c2 = commit(&repo, vec![c1], tree(&[("f", b"2")]), "c2");

        let result = Strategy::MergeIfNecessary
            .integrate(
                &repo,
                Some(a),
                &[candidate(1, c1, vec![a]), candidate(2, c2, vec![c1])],
                "it",
                2000,
            )
            .unwrap();
        assert_eq!(result.new_tip, Some(c2));
        assert!(result.outcomes.iter().all(|o| o.outcome == Outcome::CleanMerge));
        assert!(result.outcomes.iter().all(|o| o.new_commit.is_none()));
    }

    #[test]
    fn merge_always_synthesizes_merge_commit_for_fast_forward() {
        let repo = BranchStore::new();
        let a = commit(&repo, vec![], tree(&[("f", b"a")]), "a");
        let c1 = commit(&repo, vec![a], tree(&[("f", b"1")]), "c1");

        let result = Strategy::MergeAlways
            .integrate(&repo, Some(a), &[candidate(1, c1, vec![a])], "it", 2000)
            .unwrap();
        let tip = result.new_tip.unwrap();
        assert_ne!(tip, c1);
        let merged = repo.load_commit(&tip).unwrap();
        assert_eq!(merged.parents, vec![a, c1]);
        assert_eq!(result.outcomes[0].outcome, Outcome::CleanMerge);
    }

    #[test]
    fn cherry_pick_rewrites_commit_onto_tip() {
        let repo = BranchStore::new();
        let a = commit(&repo, vec![], tree(&[("f", b"a")]), "a");
        let b = commit(&repo, vec![a], tree(&[("f", b"a"), ("g", b"b")]), "b");
        let side = commit(&repo, vec![a], tree(&[("f", b"a"), ("h", b"s")]), "side");

        let result = Strategy::CherryPick
            .integrate(&repo, Some(b), &[candidate(1, side, vec![a])], "it", 2000)
            .unwrap();
        let outcome = &result.outcomes[0];
        assert_eq!(outcome.outcome, Outcome::CleanPick);
        let new_commit = outcome.new_commit.unwrap();
        assert_eq!(result.new_tip, Some(new_commit));
        let picked = repo.load_commit(&new_commit).unwrap();
        assert_eq!(picked.parents, vec![b]);
        assert_eq!(picked.tree, tree(&[("f", b"a"), ("g", b"b"), ("h", b"s")]));
        // Original author survives the rewrite.
        assert_eq!(picked.author, "author");
    }

    #[test]
    fn cherry_pick_of_already_applied_change_is_clean_without_new_revision() {
        let repo = BranchStore::new();
        let a = commit(&repo, vec![], tree(&[("f", b"a")]), "a");
        let side = commit(&repo, vec![a], tree(&[("f", b"x")]), "side");
        // Tip already carries the identical edit.
        let b = commit(&repo, vec![a], tree(&[("f", b"x")]), "b");

        let result = Strategy::CherryPick
            .integrate(&repo, Some(b), &[candidate(1, side, vec![a])], "it", 2000)
            .unwrap();
        assert_eq!(result.outcomes[0].outcome, Outcome::CleanMerge);
        assert!(result.outcomes[0].new_commit.is_none());
        assert_eq!(result.new_tip, Some(b));
    }

    #[test]
    fn cherry_pick_of_candidate_on_tip_fast_forwards() {
        let repo = BranchStore::new();
        let a = commit(&repo, vec![], tree(&[("f", b"a")]), "a");
        let b = commit(&repo, vec![a], tree(&[("f", b"a"), ("g", b"b")]), "b");

        let result = Strategy::CherryPick
            .integrate(&repo, Some(a), &[candidate(1, b, vec![a])], "it", 2000)
            .unwrap();
        // The candidate lands unrewritten; no duplicate commit, no new
        // revision to record.
        assert_eq!(result.new_tip, Some(b));
        assert_eq!(result.outcomes[0].outcome, Outcome::CleanMerge);
        assert!(result.outcomes[0].new_commit.is_none());
    }

    #[test]
    fn cherry_pick_rejects_root_commit() {
        let repo = BranchStore::new();
        let a = commit(&repo, vec![], tree(&[("f", b"a")]), "a");
        let root = commit(&repo, vec![], tree(&[("g", b"r")]), "root");

        let result = Strategy::CherryPick
            .integrate(&repo, Some(a), &[candidate(1, root, vec![])], "it", 2000)
            .unwrap();
        assert_eq!(result.outcomes[0].outcome, Outcome::CannotPickRoot);
        assert_eq!(result.new_tip, Some(a));
    }

    #[test]
    fn path_conflict_blocks_in_batch_dependents() {
        let repo = BranchStore::new();
        let a = commit(&repo, vec![], tree(&[("f", b"a")]), "a");
        let b = commit(&repo, vec![a], tree(&[("f", b"b")]), "b");
        let s1 = commit(&repo, vec![a], tree(&[("f", b"x")]), "s1");
        let s2 = commit(&repo, vec![s1], tree(&[("f", b"x"), ("g", b"y")]), "s2");

        let result = Strategy::CherryPick
            .integrate(
                &repo,
                Some(b),
                &[candidate(1, s1, vec![a]), candidate(2, s2, vec![s1])],
                "it",
                2000,
            )
            .unwrap();
        assert_eq!(result.outcomes[0].outcome, Outcome::PathConflict);
        assert_eq!(result.outcomes[1].outcome, Outcome::MissingDependency);
        assert_eq!(result.new_tip, Some(b));
    }

    #[test]
    fn dry_run_reports_outcome_without_mutation() {
        let repo = BranchStore::new();
        let a = commit(&repo, vec![], tree(&[("f", b"a")]), "a");
        let b = commit(&repo, vec![a], tree(&[("f", b"b")]), "b");
        let side = commit(&repo, vec![a], tree(&[("f", b"x")]), "side");

        let outcome = Strategy::CherryPick.dry_run(&repo, Some(b), &side).unwrap();
        assert_eq!(outcome, Outcome::PathConflict);

        let clean = Strategy::MergeIfNecessary.dry_run(&repo, Some(a), &b).unwrap();
        assert_eq!(clean, Outcome::CleanMerge);
    }
}
