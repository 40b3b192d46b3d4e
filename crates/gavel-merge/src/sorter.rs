//! Dependency-respecting candidate order: ancestors before descendants,
//! change sort key for ties.

use std::collections::{BTreeSet, HashMap, HashSet};

use gavel_core::id::ObjectId;

use crate::strategy::Candidate;

pub fn order_candidates(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    let in_batch: HashSet<ObjectId> = candidates.iter().map(|c| c.revision.id).collect();

    // Edges only between revisions present in the batch.
    let mut blocked_by: HashMap<ObjectId, usize> = HashMap::new();
    let mut dependents: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();
    for candidate in &candidates {
        let deps = candidate
            .revision
            .parents
            .iter()
            .filter(|p| in_batch.contains(p))
            .count();
        blocked_by.insert(candidate.revision.id, deps);
        for parent in &candidate.revision.parents {
            if in_batch.contains(parent) {
                dependents
                    .entry(*parent)
                    .or_default()
                    .push(candidate.revision.id);
            }
        }
    }

    let mut by_revision: HashMap<ObjectId, Candidate> = candidates
        .drain(..)
        .map(|c| (c.revision.id, c))
        .collect();

    // Ready set keyed by (sort key, revision) for a stable tie order.
    let mut ready: BTreeSet<(String, ObjectId)> = by_revision
        .values()
        .filter(|c| blocked_by[&c.revision.id] == 0)
        .map(|c| (c.change.sort_key.clone(), c.revision.id))
        .collect();

    let mut ordered = Vec::with_capacity(by_revision.len());
    while let Some(entry) = ready.iter().next().cloned() {
        ready.remove(&entry);
        let (_, revision_id) = entry;
        for dependent in dependents.remove(&revision_id).unwrap_or_default() {
            let remaining = blocked_by
                .get_mut(&dependent)
                .map(|n| {
                    *n -= 1;
                    *n
                })
                .unwrap_or(0);
            if remaining == 0 {
                if let Some(c) = by_revision.get(&dependent) {
                    ready.insert((c.change.sort_key.clone(), dependent));
                }
            }
        }
        if let Some(candidate) = by_revision.remove(&revision_id) {
            ordered.push(candidate);
        }
    }

    // Any leftover (a dependency cycle cannot occur in a hash-linked graph,
    // but a revision may reference a parent outside the batch that another
    // path already consumed) is appended in sort-key order.
    let mut rest: Vec<Candidate> = by_revision.into_values().collect();
    rest.sort_by(|a, b| a.change.sort_key.cmp(&b.change.sort_key));
    ordered.extend(rest);
    ordered
}
