//! JSON snapshot persistence for the stores, so a front end can operate on
//! durable state between invocations.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use gavel_core::id::ObjectId;
use gavel_core::types::Commit;

use crate::branch::{BranchInner, BranchStore, RepoManager};
use crate::changes::{ChangeInner, ChangeStore};
use crate::StoreError;

#[derive(Serialize, Deserialize)]
struct RepoSnapshot {
    commits: HashMap<ObjectId, Commit>,
    refs: BTreeMap<String, ObjectId>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    repos: BTreeMap<String, RepoSnapshot>,
    changes: ChangeInner,
}

pub fn save(path: &Path, repos: &RepoManager, changes: &ChangeStore) -> Result<(), StoreError> {
    let mut repo_snapshots = BTreeMap::new();
    for project in repos.projects() {
        let store = repos.open(&project);
        let (commits, refs) = store.export_inner();
        repo_snapshots.insert(project, RepoSnapshot { commits, refs });
    }
    let snapshot = Snapshot {
        version: 1,
        repos: repo_snapshots,
        changes: changes.export_inner(),
    };
    let json = serde_json::to_vec_pretty(&snapshot)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Write-then-rename so a crash never leaves a torn snapshot.
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn load(path: &Path) -> Result<(RepoManager, ChangeStore), StoreError> {
    if !path.exists() {
        return Ok((RepoManager::new(), ChangeStore::new()));
    }
    let content = std::fs::read(path)?;
    let snapshot: Snapshot =
        serde_json::from_slice(&content).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let repos = RepoManager::new();
    for (project, repo) in snapshot.repos {
        repos.insert(
            project,
            BranchStore::from_inner(BranchInner {
                commits: repo.commits,
                refs: repo.refs,
            }),
        );
    }
    Ok((repos, ChangeStore::from_inner(snapshot.changes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_core::id::AccountId;
    use gavel_core::types::{Change, Tree};

    #[test]
    fn snapshot_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");

        let repos = RepoManager::new();
        let repo = repos.open("demo");
        let a = repo
            .create_commit(vec![], Tree::new(), "alice", "init", 1000)
            .unwrap();
        repo.cas_update_ref("heads/main", None, a, false).unwrap();

        let changes = ChangeStore::new();
        let id = changes.next_change_id();
        changes.insert_change(Change::new(id, "demo", "heads/main", AccountId(1), a, 1000));

        save(&path, &repos, &changes).unwrap();
        let (loaded_repos, loaded_changes) = load(&path).unwrap();

        let loaded_repo = loaded_repos.open("demo");
        assert_eq!(loaded_repo.resolve_ref("heads/main"), Some(a));
        assert_eq!(loaded_changes.get(id).unwrap().project, "demo");
        assert_eq!(loaded_changes.next_change_id().get(), id.get() + 1);
    }

    #[test]
    fn load_missing_path_yields_empty_stores() {
        let tmp = tempfile::tempdir().unwrap();
        let (repos, changes) = load(&tmp.path().join("absent.json")).unwrap();
        assert!(repos.projects().is_empty());
        assert!(changes.all_changes().is_empty());
    }
}
