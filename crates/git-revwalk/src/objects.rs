//! Object listing: enumerate all objects reachable from a set of commits.
//!
//! Used by pack generation and the pack indexer's thin-pack fix, which
//! consults this as the "surrounding object store" when resolving a
//! `REF_DELTA` base that isn't present in the pack being indexed.

use std::collections::HashSet;

use git_hash::ObjectId;
use git_object::Object;
use git_repository::Repository;

use crate::RevWalkError;

/// List all objects reachable from the given commits, excluding objects
/// reachable from the excluded set.
///
/// Returns OIDs of all commits, trees, and blobs reachable from `include`
/// but not from `exclude`.
pub fn list_objects(
    repo: &Repository,
    include: &[ObjectId],
    exclude: &[ObjectId],
) -> Result<Vec<ObjectId>, RevWalkError> {
    let mut excluded = HashSet::new();
    for oid in exclude {
        walk_reachable(repo, oid, &mut excluded, &HashSet::new(), None)?;
    }

    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for oid in include {
        walk_reachable(repo, oid, &mut seen, &excluded, Some(&mut result))?;
    }

    Ok(result)
}

/// Walk everything reachable from `start`, skipping anything already in
/// `seen` or in `excluded`. When `collect` is given, newly visited objects
/// are appended to it; passing `None` is used for the exclusion pre-pass,
/// which only needs to populate `seen`.
fn walk_reachable(
    repo: &Repository,
    start: &ObjectId,
    seen: &mut HashSet<ObjectId>,
    excluded: &HashSet<ObjectId>,
    mut collect: Option<&mut Vec<ObjectId>>,
) -> Result<(), RevWalkError> {
    let mut stack = vec![*start];

    while let Some(oid) = stack.pop() {
        if !seen.insert(oid) || excluded.contains(&oid) {
            continue;
        }

        let obj = match repo.odb().read(&oid)? {
            Some(obj) => obj,
            None => continue,
        };

        if let Some(result) = collect.as_deref_mut() {
            result.push(oid);
        }

        match obj {
            Object::Commit(commit) => {
                stack.push(commit.tree);
                stack.extend(commit.parents.iter().copied());
            }
            Object::Tree(tree) => {
                stack.extend(tree.entries.iter().map(|e| e.oid));
            }
            Object::Blob(_) => {}
            Object::Tag(tag) => stack.push(tag.target),
        }
    }

    Ok(())
}
