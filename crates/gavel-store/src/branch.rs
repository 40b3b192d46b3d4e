use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use gavel_core::id::ObjectId;
use gavel_core::types::{Commit, Tree};

use crate::StoreError;

/// Result of a successful compare-and-swap ref update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefUpdate {
    New,
    FastForward,
    Forced,
    NoChange,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct BranchInner {
    pub(crate) commits: HashMap<ObjectId, Commit>,
    pub(crate) refs: BTreeMap<String, ObjectId>,
}

impl BranchInner {
    fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> bool {
        if ancestor == descendant {
            return true;
        }
        let mut seen: HashSet<ObjectId> = HashSet::new();
        let mut queue: VecDeque<ObjectId> = VecDeque::new();
        queue.push_back(*descendant);
        while let Some(id) = queue.pop_front() {
            if &id == ancestor {
                return true;
            }
            if let Some(commit) = self.commits.get(&id) {
                for parent in &commit.parents {
                    if seen.insert(*parent) {
                        queue.push_back(*parent);
                    }
                }
            }
        }
        false
    }
}

/// Append-only, ref-addressed commit graph for one project. A ref only ever
/// advances through CAS updates guarded by the previously observed id.
pub struct BranchStore {
    inner: Mutex<BranchInner>,
}

impl Default for BranchStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BranchInner::default()),
        }
    }

    pub(crate) fn from_inner(inner: BranchInner) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BranchInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn export_inner(&self) -> (HashMap<ObjectId, Commit>, BTreeMap<String, ObjectId>) {
        let inner = self.lock();
        (inner.commits.clone(), inner.refs.clone())
    }

    pub fn create_commit(
        &self,
        parents: Vec<ObjectId>,
        tree: Tree,
        author: &str,
        message: &str,
        now_ms: u64,
    ) -> Result<ObjectId, StoreError> {
        let mut inner = self.lock();
        for parent in &parents {
            if !inner.commits.contains_key(parent) {
                return Err(StoreError::NoSuchCommit(*parent));
            }
        }
        let commit = Commit {
            parents,
            tree,
            author: author.to_string(),
            message: message.to_string(),
            committed_at_ms: now_ms,
        };
        let id = commit.compute_id()?;
        inner.commits.entry(id).or_insert(commit);
        Ok(id)
    }

    pub fn load_commit(&self, id: &ObjectId) -> Result<Commit, StoreError> {
        self.lock()
            .commits
            .get(id)
            .cloned()
            .ok_or(StoreError::NoSuchCommit(*id))
    }

    pub fn has_commit(&self, id: &ObjectId) -> bool {
        self.lock().commits.contains_key(id)
    }

    pub fn resolve_ref(&self, name: &str) -> Option<ObjectId> {
        self.lock().refs.get(name).copied()
    }

    pub fn list_refs(&self, prefix: &str) -> Vec<(String, ObjectId)> {
        self.lock()
            .refs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, id)| (name.clone(), *id))
            .collect()
    }

    pub fn delete_ref(&self, name: &str) {
        self.lock().refs.remove(name);
    }

    /// Guarded ref update. `expected_old` of `None` means the ref must not
    /// exist yet. A non-fast-forward new value is rejected unless
    /// `allow_force` is set.
    pub fn cas_update_ref(
        &self,
        name: &str,
        expected_old: Option<ObjectId>,
        new: ObjectId,
        allow_force: bool,
    ) -> Result<RefUpdate, StoreError> {
        let mut inner = self.lock();
        if !inner.commits.contains_key(&new) {
            return Err(StoreError::NoSuchCommit(new));
        }
        let actual = inner.refs.get(name).copied();
        if actual != expected_old {
            return Err(StoreError::RefConflict {
                name: name.to_string(),
                expected: expected_old,
                actual,
            });
        }
        let result = match actual {
            None => RefUpdate::New,
            Some(old) if old == new => return Ok(RefUpdate::NoChange),
            Some(old) if inner.is_ancestor(&old, &new) => RefUpdate::FastForward,
            Some(_) if allow_force => RefUpdate::Forced,
            Some(_) => return Err(StoreError::NotFastForward(name.to_string())),
        };
        inner.refs.insert(name.to_string(), new);
        debug!(ref_name = name, new = %new.short(), ?result, "ref updated");
        Ok(result)
    }

    pub fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> bool {
        self.lock().is_ancestor(ancestor, descendant)
    }

    /// Lowest common ancestor of two commits via BFS on the graph.
    pub fn merge_base(
        &self,
        left: &ObjectId,
        right: &ObjectId,
    ) -> Result<Option<ObjectId>, StoreError> {
        let inner = self.lock();
        if left == right {
            return Ok(Some(*left));
        }

        let mut left_ancestors: HashSet<ObjectId> = HashSet::new();
        let mut right_ancestors: HashSet<ObjectId> = HashSet::new();
        let mut left_queue: VecDeque<ObjectId> = VecDeque::new();
        let mut right_queue: VecDeque<ObjectId> = VecDeque::new();

        left_ancestors.insert(*left);
        right_ancestors.insert(*right);
        left_queue.push_back(*left);
        right_queue.push_back(*right);

        loop {
            if left_queue.is_empty() && right_queue.is_empty() {
                return Ok(None);
            }

            if let Some(id) = left_queue.pop_front() {
                if right_ancestors.contains(&id) {
                    return Ok(Some(id));
                }
                if let Some(commit) = inner.commits.get(&id) {
                    for parent in &commit.parents {
                        if left_ancestors.insert(*parent) {
                            left_queue.push_back(*parent);
                        }
                    }
                }
            }

            if let Some(id) = right_queue.pop_front() {
                if left_ancestors.contains(&id) {
                    return Ok(Some(id));
                }
                if let Some(commit) = inner.commits.get(&id) {
                    for parent in &commit.parents {
                        if right_ancestors.insert(*parent) {
                            right_queue.push_back(*parent);
                        }
                    }
                }
            }
        }
    }

    /// Commits reachable from `from` but not from `excluding`, oldest first.
    pub fn walk_ancestry(
        &self,
        from: &ObjectId,
        excluding: Option<&ObjectId>,
    ) -> Result<Vec<(ObjectId, Commit)>, StoreError> {
        let inner = self.lock();
        if !inner.commits.contains_key(from) {
            return Err(StoreError::NoSuchCommit(*from));
        }

        let mut excluded: HashSet<ObjectId> = HashSet::new();
        if let Some(stop) = excluding {
            let mut queue = VecDeque::from([*stop]);
            excluded.insert(*stop);
            while let Some(id) = queue.pop_front() {
                if let Some(commit) = inner.commits.get(&id) {
                    for parent in &commit.parents {
                        if excluded.insert(*parent) {
                            queue.push_back(*parent);
                        }
                    }
                }
            }
        }

        // Iterative post-order walk so parents land before children.
        let mut ordered: Vec<(ObjectId, Commit)> = Vec::new();
        let mut visited: HashSet<ObjectId> = HashSet::new();
        let mut stack: Vec<(ObjectId, bool)> = vec![(*from, false)];
        while let Some((id, expanded)) = stack.pop() {
            if excluded.contains(&id) {
                continue;
            }
            if expanded {
                if let Some(commit) = inner.commits.get(&id) {
                    ordered.push((id, commit.clone()));
                }
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            if let Some(commit) = inner.commits.get(&id) {
                for parent in &commit.parents {
                    if !visited.contains(parent) {
                        stack.push((*parent, false));
                    }
                }
            }
        }
        Ok(ordered)
    }
}

/// Opens per-project branch stores on demand.
#[derive(Default)]
pub struct RepoManager {
    repos: RwLock<HashMap<String, Arc<BranchStore>>>,
}

impl RepoManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, project: &str) -> Arc<BranchStore> {
        if let Some(repo) = self
            .repos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project)
        {
            return Arc::clone(repo);
        }
        let mut repos = self.repos.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            repos
                .entry(project.to_string())
                .or_insert_with(|| Arc::new(BranchStore::new())),
        )
    }

    pub fn projects(&self) -> Vec<String> {
        self.repos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub(crate) fn insert(&self, project: String, store: BranchStore) {
        self.repos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project, Arc::new(store));
    }
}
