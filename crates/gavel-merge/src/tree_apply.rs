//! Tree-level three-way application. Trees are flat path -> blob id maps;
//! a path whose value changed on both sides to different blobs is a
//! path conflict.

use std::collections::{BTreeMap, BTreeSet};

use gavel_core::id::ObjectId;
use gavel_core::types::Tree;

/// Per-path edits turning `base` into `side`. `None` means the path was
/// removed.
pub fn tree_diff(base: &Tree, side: &Tree) -> BTreeMap<String, Option<ObjectId>> {
    let mut diff = BTreeMap::new();
    let paths: BTreeSet<&String> = base.keys().chain(side.keys()).collect();
    for path in paths {
        let base_val = base.get(path);
        let side_val = side.get(path);
        if base_val != side_val {
            diff.insert(path.clone(), side_val.copied());
        }
    }
    diff
}

/// Apply `diff` (computed against `base`) onto `tip`. A path where the tip
/// diverged from the base and from the edit's target is reported as a
/// conflict.
pub fn apply_onto(
    tip: &Tree,
    base: &Tree,
    diff: &BTreeMap<String, Option<ObjectId>>,
) -> Result<Tree, Vec<String>> {
    let mut result = tip.clone();
    let mut conflicts = Vec::new();
    for (path, target) in diff {
        let tip_val = tip.get(path).copied();
        let base_val = base.get(path).copied();
        if tip_val == *target {
            continue; // already applied
        }
        if tip_val != base_val {
            conflicts.push(path.clone());
            continue;
        }
        match target {
            Some(id) => {
                result.insert(path.clone(), *id);
            }
            None => {
                result.remove(path);
            }
        }
    }
    if conflicts.is_empty() {
        Ok(result)
    } else {
        Err(conflicts)
    }
}

/// Classic three-way merge of `ours` and `theirs` against `base`.
pub fn three_way(base: &Tree, ours: &Tree, theirs: &Tree) -> Result<Tree, Vec<String>> {
    let their_edits = tree_diff(base, theirs);
    apply_onto(ours, base, &their_edits)
}
