use std::sync::Arc;

use gavel_core::hash::blob_id;
use gavel_core::id::{AccountId, ChangeId, ObjectId};
use gavel_core::types::{ApprovalCategory, BranchKey, Change, ChangeStatus, Tree};
use gavel_engine::{Engine, IntegrationConfig};
use gavel_merge::{Outcome, Strategy};
use gavel_store::{snapshot, ChangeStore, RepoManager};

const OWNER: AccountId = AccountId(1);
const REVIEWER: AccountId = AccountId(2);

fn engine_with(config: IntegrationConfig, workers: usize) -> Engine {
    Engine::builder(Arc::new(RepoManager::new()), Arc::new(ChangeStore::new()))
        .config(config)
        .workers(workers)
        .build()
}

fn engine() -> Engine {
    engine_with(IntegrationConfig::default(), 0)
}

fn main_branch() -> BranchKey {
    BranchKey::new("demo", "heads/main")
}

/// Seed "demo" with an initial commit on heads/main and return its id.
fn seed(engine: &Engine) -> ObjectId {
    let repo = engine.context().repos.open("demo");
    let mut tree = Tree::new();
    tree.insert("README".into(), blob_id(b"hello"));
    let root = repo
        .create_commit(vec![], tree, "init", "initial", 1_000)
        .unwrap();
    repo.cas_update_ref("heads/main", None, root, false).unwrap();
    root
}

fn tree_of(engine: &Engine, commit: &ObjectId) -> Tree {
    engine
        .context()
        .repos
        .open("demo")
        .load_commit(commit)
        .unwrap()
        .tree
}

fn upload_edit(engine: &Engine, parent: ObjectId, path: &str, content: &[u8]) -> Change {
    let mut tree = tree_of(engine, &parent);
    tree.insert(path.into(), blob_id(content));
    engine
        .upload_change("demo", "heads/main", OWNER, vec![parent], tree, path)
        .unwrap()
}

fn status_of(engine: &Engine, id: ChangeId) -> ChangeStatus {
    engine.context().changes.get(id).unwrap().status
}

fn main_tip(engine: &Engine) -> ObjectId {
    engine
        .context()
        .repos
        .open("demo")
        .resolve_ref("heads/main")
        .unwrap()
}

fn staging_tip(engine: &Engine) -> ObjectId {
    engine
        .context()
        .repos
        .open("demo")
        .resolve_ref("staging/main")
        .unwrap()
}

// === Submitting to the stable branch ===

#[test]
fn fast_forward_only_populates_unborn_branch() {
    let engine = engine_with(
        IntegrationConfig {
            submit_strategy: Strategy::FastForwardOnly,
            staging_strategy: Strategy::CherryPick,
        },
        0,
    );
    let mut tree = Tree::new();
    tree.insert("a".into(), blob_id(b"a"));
    let change = engine
        .upload_change("demo", "heads/main", OWNER, vec![], tree, "first")
        .unwrap();

    engine.submit(change.id, REVIEWER).unwrap();
    engine.wait_idle();

    assert_eq!(status_of(&engine, change.id), ChangeStatus::Merged);
    assert_eq!(main_tip(&engine), change.current_revision);
}

#[test]
fn dependent_chain_fast_forwards_without_merge_commits() {
    let engine = engine();
    let base = seed(&engine);
    let c1 = upload_edit(&engine, base, "a", b"1");
    let c2 = upload_edit(&engine, c1.current_revision, "b", b"2");

    engine.submit(c1.id, REVIEWER).unwrap();
    engine.submit(c2.id, REVIEWER).unwrap();
    engine.wait_idle();

    assert_eq!(status_of(&engine, c1.id), ChangeStatus::Merged);
    assert_eq!(status_of(&engine, c2.id), ChangeStatus::Merged);
    // Both landed by advancing the ref; nothing was synthesized.
    assert_eq!(main_tip(&engine), c2.current_revision);
}

#[test]
fn divergent_submission_gets_a_merge_commit() {
    let engine = engine();
    let base = seed(&engine);
    let c1 = upload_edit(&engine, base, "a", b"1");
    let c2 = upload_edit(&engine, base, "b", b"2");

    engine.submit(c1.id, REVIEWER).unwrap();
    engine.wait_idle();
    engine.submit(c2.id, REVIEWER).unwrap();
    engine.wait_idle();

    assert_eq!(status_of(&engine, c2.id), ChangeStatus::Merged);
    let tip_tree = tree_of(&engine, &main_tip(&engine));
    assert_eq!(tip_tree.get("a"), Some(&blob_id(b"1")));
    assert_eq!(tip_tree.get("b"), Some(&blob_id(b"2")));
    let tip = engine
        .context()
        .repos
        .open("demo")
        .load_commit(&main_tip(&engine))
        .unwrap();
    assert_eq!(tip.parents.len(), 2);
}

#[test]
fn conflicting_submission_stays_submitted_with_message() {
    let engine = engine();
    let base = seed(&engine);
    let c1 = upload_edit(&engine, base, "f", b"one");
    let c2 = upload_edit(&engine, base, "f", b"two");

    engine.submit(c1.id, REVIEWER).unwrap();
    engine.wait_idle();
    engine.submit(c2.id, REVIEWER).unwrap();
    engine.wait_idle();

    assert_eq!(status_of(&engine, c1.id), ChangeStatus::Merged);
    assert_eq!(status_of(&engine, c2.id), ChangeStatus::Submitted);
    let texts: Vec<String> = engine
        .context()
        .changes
        .messages_of(c2.id)
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert!(texts.iter().any(|t| t.contains("path conflict")));
}

#[test]
fn concurrent_submissions_all_land() {
    let engine = engine_with(IntegrationConfig::default(), 4);
    let base = seed(&engine);
    let changes: Vec<Change> = (0..6)
        .map(|n| upload_edit(&engine, base, &format!("file-{n}"), b"x"))
        .collect();

    for change in &changes {
        engine.submit(change.id, REVIEWER).unwrap();
    }
    engine.wait_idle();

    let tip_tree = tree_of(&engine, &main_tip(&engine));
    for (n, change) in changes.iter().enumerate() {
        assert_eq!(status_of(&engine, change.id), ChangeStatus::Merged);
        assert!(tip_tree.contains_key(&format!("file-{n}")));
    }
}

#[test]
fn integration_retries_when_an_external_push_moves_the_branch() {
    let engine = engine_with(IntegrationConfig::default(), 2);
    let base = seed(&engine);
    let changes: Vec<Change> = (0..4)
        .map(|n| upload_edit(&engine, base, &format!("change-{n}"), b"x"))
        .collect();

    // Race the workers: after every submission, push a commit straight to
    // heads/main the way an out-of-band client would.
    let repo = engine.context().repos.open("demo");
    let mut pushed = Vec::new();
    for (n, change) in changes.iter().enumerate() {
        engine.submit(change.id, REVIEWER).unwrap();
        loop {
            let tip = repo.resolve_ref("heads/main").unwrap();
            let mut tree = repo.load_commit(&tip).unwrap().tree;
            tree.insert(format!("external-{n}"), blob_id(b"out of band"));
            let commit = repo
                .create_commit(vec![tip], tree, "external", "pushed directly", 2_000)
                .unwrap();
            if repo
                .cas_update_ref("heads/main", Some(tip), commit, false)
                .is_ok()
            {
                pushed.push(commit);
                break;
            }
        }
    }
    engine.wait_idle();

    let final_tip = main_tip(&engine);
    let tip_tree = tree_of(&engine, &final_tip);
    for (n, change) in changes.iter().enumerate() {
        assert_eq!(status_of(&engine, change.id), ChangeStatus::Merged);
        assert!(tip_tree.contains_key(&format!("change-{n}")));
        // A lost ref race re-runs the whole pass; the change must land
        // exactly once regardless.
        let landings = engine
            .context()
            .changes
            .messages_of(change.id)
            .into_iter()
            .filter(|m| m.text.contains("successfully merged"))
            .count();
        assert_eq!(landings, 1);
    }
    // None of the out-of-band commits were clobbered by the engine.
    for commit in &pushed {
        assert!(repo.is_ancestor(commit, &final_tip));
    }
}

#[test]
fn integration_check_flags_conflicts_before_submit() {
    let engine = engine();
    let base = seed(&engine);
    let landed = upload_edit(&engine, base, "f", b"one");
    let conflicting = upload_edit(&engine, base, "f", b"two");
    let clean = upload_edit(&engine, base, "g", b"three");

    engine.submit(landed.id, REVIEWER).unwrap();
    engine.wait_idle();

    assert_eq!(
        engine.check_integration(conflicting.id).unwrap(),
        Outcome::PathConflict
    );
    assert_eq!(
        engine.check_integration(clean.id).unwrap(),
        Outcome::CleanMerge
    );
    // The dry run touched neither the records nor the branch.
    assert_eq!(status_of(&engine, conflicting.id), ChangeStatus::New);
    assert_eq!(status_of(&engine, clean.id), ChangeStatus::New);
    assert_eq!(main_tip(&engine), landed.current_revision);
}

// === The staging pipeline ===

#[test]
fn staging_cherry_picks_and_records_new_patch_set() {
    let engine = engine();
    let base = seed(&engine);
    let first = upload_edit(&engine, base, "a", b"1");
    let second = upload_edit(&engine, base, "b", b"2");

    engine.stage(first.id, REVIEWER).unwrap();
    engine.wait_idle();
    engine.stage(second.id, REVIEWER).unwrap();
    engine.wait_idle();

    // The first change sat directly on the staging tip and fast-forwarded
    // unrewritten: same revision, same patch set.
    let landed = engine.context().changes.get(first.id).unwrap();
    assert_eq!(landed.status, ChangeStatus::Staged);
    assert_eq!(landed.current_patch_set, 1);
    assert_eq!(landed.current_revision, first.current_revision);

    // The second diverged from the moved tip and was rewritten.
    let picked = engine.context().changes.get(second.id).unwrap();
    assert_eq!(picked.status, ChangeStatus::Staged);
    assert_eq!(picked.current_patch_set, 2);
    assert_ne!(picked.current_revision, second.current_revision);
    // Approvals follow the rewritten commit.
    assert!(engine
        .context()
        .changes
        .has_approval(&picked.current_revision, ApprovalCategory::Stage));
    // The stable branch did not move.
    assert_eq!(main_tip(&engine), base);
    assert_eq!(staging_tip(&engine), picked.current_revision);
}

#[test]
fn conflicting_staged_change_waits_in_staging() {
    let engine = engine();
    let base = seed(&engine);
    let c1 = upload_edit(&engine, base, "f", b"one");
    let c2 = upload_edit(&engine, base, "f", b"two");

    engine.stage(c1.id, REVIEWER).unwrap();
    engine.stage(c2.id, REVIEWER).unwrap();
    engine.wait_idle();

    let statuses = [status_of(&engine, c1.id), status_of(&engine, c2.id)];
    assert!(statuses.contains(&ChangeStatus::Staged));
    assert!(statuses.contains(&ChangeStatus::Staging));
    let loser = if statuses[0] == ChangeStatus::Staging {
        c1.id
    } else {
        c2.id
    };
    let texts: Vec<String> = engine
        .context()
        .changes
        .messages_of(loser)
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert!(texts.iter().any(|t| t.contains("path conflict")));
}

#[test]
fn unstage_drops_commit_from_staging_branch() {
    let engine = engine();
    let base = seed(&engine);
    let change = upload_edit(&engine, base, "a", b"1");

    engine.stage(change.id, REVIEWER).unwrap();
    engine.wait_idle();
    assert_ne!(staging_tip(&engine), base);

    engine.unstage(change.id, REVIEWER).unwrap();
    engine.wait_idle();

    assert_eq!(status_of(&engine, change.id), ChangeStatus::New);
    assert_eq!(staging_tip(&engine), base);
}

#[test]
fn abandoning_staged_change_rebuilds_staging() {
    let engine = engine();
    let base = seed(&engine);
    let kept = upload_edit(&engine, base, "kept", b"1");
    let dropped = upload_edit(&engine, base, "dropped", b"2");

    engine.stage(kept.id, REVIEWER).unwrap();
    engine.stage(dropped.id, REVIEWER).unwrap();
    engine.wait_idle();

    engine.abandon(dropped.id, OWNER, Some("broken")).unwrap();
    engine.wait_idle();

    assert_eq!(status_of(&engine, dropped.id), ChangeStatus::Abandoned);
    assert_eq!(status_of(&engine, kept.id), ChangeStatus::Staged);
    let staging_tree = tree_of(&engine, &staging_tip(&engine));
    assert!(staging_tree.contains_key("kept"));
    assert!(!staging_tree.contains_key("dropped"));
}

#[test]
fn submitting_staged_change_bypasses_staging_pipeline() {
    let engine = engine();
    let base = seed(&engine);
    let change = upload_edit(&engine, base, "a", b"1");

    engine.stage(change.id, REVIEWER).unwrap();
    engine.wait_idle();
    assert_eq!(status_of(&engine, change.id), ChangeStatus::Staged);
    assert_ne!(staging_tip(&engine), base);

    engine.submit(change.id, REVIEWER).unwrap();
    engine.wait_idle();

    assert_eq!(status_of(&engine, change.id), ChangeStatus::Merged);
    assert!(tree_of(&engine, &main_tip(&engine)).contains_key("a"));
    // Pulled out of the staging line; the rebuild left the mirror sitting
    // on the new stable tip with nothing on top.
    assert_eq!(staging_tip(&engine), main_tip(&engine));
}

// === Builds ===

#[test]
fn passing_build_merges_its_changes_and_rebases_the_rest() {
    let engine = engine();
    let base = seed(&engine);
    let c1 = upload_edit(&engine, base, "a", b"1");
    let c2 = upload_edit(&engine, base, "b", b"2");

    engine.stage(c1.id, REVIEWER).unwrap();
    engine.stage(c2.id, REVIEWER).unwrap();
    engine.wait_idle();

    let build = engine.new_build(&main_branch(), "100", REVIEWER).unwrap();
    assert_eq!(build.changes.len(), 2);
    assert_eq!(status_of(&engine, c1.id), ChangeStatus::Integrating);

    // Staged after the cut; rides the next build, not this one.
    let late = upload_edit(&engine, base, "late", b"3");
    engine.stage(late.id, REVIEWER).unwrap();
    engine.wait_idle();

    engine
        .report_build_result(&main_branch(), "100", true, REVIEWER, None)
        .unwrap();
    engine.wait_idle();

    assert_eq!(status_of(&engine, c1.id), ChangeStatus::Merged);
    assert_eq!(status_of(&engine, c2.id), ChangeStatus::Merged);
    assert_eq!(main_tip(&engine), build.tip);
    // The late change survived the rebuild on top of the new stable tip.
    assert_eq!(status_of(&engine, late.id), ChangeStatus::Staged);
    let staging_tree = tree_of(&engine, &staging_tip(&engine));
    assert!(staging_tree.contains_key("a"));
    assert!(staging_tree.contains_key("late"));
}

#[test]
fn failing_build_returns_every_change_to_staging_queue() {
    let engine = engine();
    let base = seed(&engine);
    let c1 = upload_edit(&engine, base, "a", b"1");
    let c2 = upload_edit(&engine, base, "b", b"2");

    engine.stage(c1.id, REVIEWER).unwrap();
    engine.stage(c2.id, REVIEWER).unwrap();
    engine.wait_idle();

    engine.new_build(&main_branch(), "101", REVIEWER).unwrap();
    engine
        .report_build_result(&main_branch(), "101", false, REVIEWER, Some("tests failed"))
        .unwrap();
    engine.wait_idle();

    // The stable branch never moved and the changes are staged again for
    // the next build.
    assert_eq!(main_tip(&engine), base);
    assert_eq!(status_of(&engine, c1.id), ChangeStatus::Staged);
    assert_eq!(status_of(&engine, c2.id), ChangeStatus::Staged);
    for id in [c1.id, c2.id] {
        let texts: Vec<String> = engine
            .context()
            .changes
            .messages_of(id)
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert!(texts.iter().any(|t| t.contains("tests failed")));
    }
}

#[test]
fn change_unstaged_mid_build_is_abandoned_when_build_lands() {
    let engine = engine();
    let base = seed(&engine);
    let kept = upload_edit(&engine, base, "kept", b"1");
    let withdrawn = upload_edit(&engine, base, "withdrawn", b"2");

    engine.stage(kept.id, REVIEWER).unwrap();
    engine.stage(withdrawn.id, REVIEWER).unwrap();
    engine.wait_idle();
    engine.new_build(&main_branch(), "103", REVIEWER).unwrap();

    engine.unstage(withdrawn.id, REVIEWER).unwrap();
    engine.wait_idle();
    assert_eq!(status_of(&engine, withdrawn.id), ChangeStatus::New);

    engine
        .report_build_result(&main_branch(), "103", true, REVIEWER, None)
        .unwrap();
    engine.wait_idle();

    // The build already carried the withdrawn commit; its change is closed
    // as superseded rather than left open against merged content.
    assert_eq!(status_of(&engine, kept.id), ChangeStatus::Merged);
    assert_eq!(status_of(&engine, withdrawn.id), ChangeStatus::Abandoned);
    let texts: Vec<String> = engine
        .context()
        .changes
        .messages_of(withdrawn.id)
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert!(texts.iter().any(|t| t.contains("superseded")));
}

#[test]
fn build_cut_requires_staged_changes() {
    let engine = engine();
    seed(&engine);
    assert!(engine.new_build(&main_branch(), "102", REVIEWER).is_err());
}

// === Lifecycle round trips ===

#[test]
fn deferred_change_can_be_restored_and_submitted() {
    let engine = engine();
    let base = seed(&engine);
    let change = upload_edit(&engine, base, "a", b"1");

    engine.defer(change.id, OWNER).unwrap();
    assert_eq!(status_of(&engine, change.id), ChangeStatus::Deferred);

    engine.restore(change.id, OWNER).unwrap();
    engine.submit(change.id, REVIEWER).unwrap();
    engine.wait_idle();
    assert_eq!(status_of(&engine, change.id), ChangeStatus::Merged);
}

#[test]
fn revert_of_merged_change_restores_previous_content() {
    let engine = engine();
    let base = seed(&engine);
    let change = upload_edit(&engine, base, "feature", b"v1");

    engine.submit(change.id, REVIEWER).unwrap();
    engine.wait_idle();
    assert!(tree_of(&engine, &main_tip(&engine)).contains_key("feature"));

    let revert = engine.revert(change.id, REVIEWER).unwrap();
    engine.submit(revert.id, REVIEWER).unwrap();
    engine.wait_idle();

    assert_eq!(status_of(&engine, revert.id), ChangeStatus::Merged);
    assert!(!tree_of(&engine, &main_tip(&engine)).contains_key("feature"));
}

#[test]
fn new_patch_set_on_staged_change_leaves_staging_branch_clean() {
    let engine = engine();
    let base = seed(&engine);
    let change = upload_edit(&engine, base, "a", b"v1");

    engine.stage(change.id, REVIEWER).unwrap();
    engine.wait_idle();

    let mut tree = tree_of(&engine, &base);
    tree.insert("a".into(), blob_id(b"v2"));
    let updated = engine
        .upload_patch_set(change.id, OWNER, vec![base], tree, "a v2")
        .unwrap();
    engine.wait_idle();

    assert_eq!(updated.status, ChangeStatus::New);
    // The old pick is gone; the new patch set has no staging approval yet.
    assert_eq!(staging_tip(&engine), base);
}

// === Persistence ===

#[test]
fn state_survives_snapshot_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("state.json");

    let engine = engine();
    let base = seed(&engine);
    let change = upload_edit(&engine, base, "a", b"1");
    engine.stage(change.id, REVIEWER).unwrap();
    engine.wait_idle();

    let ctx = engine.context();
    snapshot::save(&path, &ctx.repos, &ctx.changes).unwrap();
    let (repos, changes) = snapshot::load(&path).unwrap();

    let reloaded = Engine::builder(Arc::new(repos), Arc::new(changes))
        .workers(0)
        .build();
    assert_eq!(status_of(&reloaded, change.id), ChangeStatus::Staged);
    assert_eq!(staging_tip(&reloaded), staging_tip(&engine));

    // The reloaded engine keeps operating on the same records.
    reloaded.unstage(change.id, REVIEWER).unwrap();
    reloaded.wait_idle();
    assert_eq!(status_of(&reloaded, change.id), ChangeStatus::New);
}
