//! Staging branch utilities: pure ref-name mapping between the stable,
//! staging and build namespaces, and the CAS-guarded ref operations built
//! on them.

use std::sync::Arc;

use tracing::{info, warn};

use gavel_core::id::AccountId;
use gavel_core::types::{BranchKey, ChangeStatus};
use gavel_store::{BranchStore, StoreError};

use crate::context::{now_ms, EngineContext};
use crate::notify::Event;
use crate::queue::QueueHandle;
use crate::EngineError;

pub(crate) const R_HEADS: &str = "heads/";
pub(crate) const R_STAGING: &str = "staging/";
pub(crate) const R_BUILDS: &str = "builds/";

fn with_prefix(ref_name: &str, old_prefix: &str, new_prefix: &str) -> String {
    match ref_name.strip_prefix(old_prefix) {
        Some(rest) => format!("{new_prefix}{rest}"),
        // Treat the ref as a short name.
        None => format!("{new_prefix}{ref_name}"),
    }
}

/// Staging mirror for a stable branch: `heads/X` -> `staging/X`.
pub fn staging_ref(branch: &str) -> String {
    with_prefix(branch, R_HEADS, R_STAGING)
}

/// Stable source for a staging branch: `staging/X` -> `heads/X`.
pub fn source_ref(staging: &str) -> String {
    with_prefix(staging, R_STAGING, R_HEADS)
}

/// Ephemeral build ref for a build id: `123` -> `builds/123`.
pub fn build_ref(build_id: &str) -> String {
    if build_id.starts_with(R_BUILDS) {
        build_id.to_string()
    } else {
        format!("{R_BUILDS}{build_id}")
    }
}

pub fn staging_branch(branch: &BranchKey) -> BranchKey {
    BranchKey::new(&branch.project, &staging_ref(&branch.ref_name))
}

pub fn source_branch(staging: &BranchKey) -> BranchKey {
    BranchKey::new(&staging.project, &source_ref(&staging.ref_name))
}

pub fn branch_exists(repo: &BranchStore, ref_name: &str) -> bool {
    repo.resolve_ref(ref_name).is_some()
}

fn resolve_required(repo: &BranchStore, ref_name: &str) -> Result<gavel_core::ObjectId, EngineError> {
    repo.resolve_ref(ref_name)
        .ok_or_else(|| EngineError::Store(StoreError::NoSuchRef(ref_name.to_string())))
}

/// Create or reset the staging ref to the current stable tip.
pub fn create_staging_branch(repo: &BranchStore, source: &str) -> Result<(), EngineError> {
    let source = with_prefix(source, R_HEADS, R_HEADS);
    let tip = resolve_required(repo, &source)?;
    let staging = staging_ref(&source);
    let current = repo.resolve_ref(&staging);
    repo.cas_update_ref(&staging, current, tip, true)?;
    Ok(())
}

/// Snapshot the staging tip under a fresh build ref. Fails if the build id
/// was already used.
pub fn create_build_ref(repo: &BranchStore, staging: &str, build_id: &str) -> Result<String, EngineError> {
    let staging = with_prefix(staging, R_STAGING, R_STAGING);
    let tip = resolve_required(repo, &staging)?;
    let build = build_ref(build_id);
    repo.cas_update_ref(&build, None, tip, false)?;
    Ok(build)
}

/// Fast-forward the stable branch to a verified build tip. A stale build
/// (not a descendant of the branch) is rejected.
pub fn update_branch_from_build(
    repo: &BranchStore,
    branch: &str,
    build_id: &str,
) -> Result<(), EngineError> {
    let branch = with_prefix(branch, R_HEADS, R_HEADS);
    let build = build_ref(build_id);
    let build_tip = resolve_required(repo, &build)?;
    let branch_tip = resolve_required(repo, &branch)?;
    repo.cas_update_ref(&branch, Some(branch_tip), build_tip, false)?;
    Ok(())
}

/// Recovery primitive: re-point the staging ref at the stable tip, return
/// every still-staged change to the staging queue and reprocess them
/// against the new base. Invoked after a change leaves staging, after a
/// submit lands, and after a failed build approval.
pub fn rebuild_staging(
    ctx: &EngineContext,
    queue: &QueueHandle,
    branch: &BranchKey,
    actor: AccountId,
) -> Result<(), EngineError> {
    let repo: Arc<BranchStore> = ctx.repos.open(&branch.project);
    let staging = staging_branch(branch);

    let old_tip = repo.resolve_ref(&staging.ref_name);
    create_staging_branch(&repo, &branch.ref_name)?;
    let new_tip = repo.resolve_ref(&staging.ref_name);
    if old_tip != new_tip {
        ctx.notifier.notify(
            Event::RefUpdated,
            None,
            actor,
            &format!("{staging} reset to stable tip"),
        );
    }

    let staged = ctx
        .changes
        .by_branch_status(&branch.project, &branch.ref_name, ChangeStatus::Staged);
    for change in staged {
        match ctx.changes.update_status(
            change.id,
            &[ChangeStatus::Staged],
            ChangeStatus::Staging,
            now_ms(),
        ) {
            Ok(_) => {}
            // A concurrent actor moved it first; the next run will see it.
            Err(StoreError::StatusConflict(id)) => {
                warn!(change = %id, "staged change moved concurrently during rebuild")
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(branch = %staging, "staging rebuild scheduled");
    queue.schedule(staging);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_core::types::Tree;
    use proptest::prelude::*;

    #[test]
    fn mapping_accepts_qualified_and_short_names() {
        assert_eq!(staging_ref("heads/main"), "staging/main");
        assert_eq!(staging_ref("main"), "staging/main");
        assert_eq!(source_ref("staging/main"), "heads/main");
        assert_eq!(source_ref("main"), "heads/main");
        assert_eq!(build_ref("123"), "builds/123");
        assert_eq!(build_ref("builds/123"), "builds/123");
    }

    proptest! {
        #[test]
        fn staging_source_mapping_roundtrips(name in "[a-z][a-z0-9/-]{0,24}") {
            prop_assume!(!name.starts_with("heads/") && !name.starts_with("staging/"));
            let staging = staging_ref(&format!("heads/{name}"));
            prop_assert_eq!(source_ref(&staging), format!("heads/{name}"));
        }
    }

    #[test]
    fn create_staging_branch_requires_source() {
        let repo = BranchStore::new();
        let err = create_staging_branch(&repo, "heads/main").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Store(StoreError::NoSuchRef(_))
        ));
    }

    #[test]
    fn build_ref_creation_is_single_use() {
        let repo = BranchStore::new();
        let a = repo
            .create_commit(vec![], Tree::new(), "t", "a", 1000)
            .unwrap();
        repo.cas_update_ref("heads/main", None, a, false).unwrap();
        create_staging_branch(&repo, "main").unwrap();

        let created = create_build_ref(&repo, "main", "42").unwrap();
        assert_eq!(created, "builds/42");
        assert!(create_build_ref(&repo, "main", "42").is_err());
    }

    #[test]
    fn update_branch_from_build_rejects_stale_build() {
        let repo = BranchStore::new();
        let a = repo
            .create_commit(vec![], Tree::new(), "t", "a", 1000)
            .unwrap();
        let b = repo
            .create_commit(vec![a], Tree::new(), "t", "b", 1000)
            .unwrap();
        let mut tree = Tree::new();
        tree.insert("f".into(), gavel_core::hash::blob_id(b"x"));
        let c = repo.create_commit(vec![a], tree, "t", "c", 1000).unwrap();

        repo.cas_update_ref("heads/main", None, b, false).unwrap();
        repo.cas_update_ref("builds/1", None, c, false).unwrap();

        let err = update_branch_from_build(&repo, "main", "1").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Store(StoreError::NotFastForward(_))
        ));
    }
}
