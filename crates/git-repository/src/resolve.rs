//! Revision expression resolution (`HEAD~3`, `abc1234^{tree}`, refs, ...).
//!
//! `git_object::name` only parses a revision string into a `RevisionExpr`
//! (base + suffix chain); it explicitly defers the actual lookup to a layer
//! that has both an object database and a ref store. This module is that
//! layer.

use git_hash::ObjectId;
use git_object::name::{self, RevisionSuffix};
use git_object::{Object, ObjectType};
use git_ref::{RefName, RefStore};

use crate::{RepoError, Repository};

/// Resolve a revision expression (`HEAD`, `main~2`, `abc123^{commit}`, ...)
/// against a repository's object database and ref store.
pub fn resolve_revision(repo: &Repository, rev: &str) -> Result<ObjectId, RepoError> {
    let expr = name::parse_revision(rev)?;

    let mut oid = resolve_base(repo, &expr.base)?;
    for suffix in &expr.suffixes {
        oid = apply_suffix(repo, oid, suffix)?;
    }
    Ok(oid)
}

fn resolve_base(repo: &Repository, base: &str) -> Result<ObjectId, RepoError> {
    if base.is_empty() || base == "HEAD" {
        return repo
            .head_oid()?
            .ok_or_else(|| RepoError::RevisionNotFound("HEAD".into()));
    }

    // Full hex id: accept outright if the object exists.
    let hex_len = repo.hash_algo().hex_len();
    if base.len() == hex_len && base.bytes().all(|b| b.is_ascii_hexdigit()) {
        if let Ok(oid) = ObjectId::from_hex(base) {
            if repo.odb().contains(&oid) {
                return Ok(oid);
            }
        }
    }

    // Abbreviated hex id.
    if name::is_hex_prefix(base) {
        if let Ok(oid) = repo.odb().resolve_prefix(base) {
            return Ok(oid);
        }
    }

    // Ref name, trying the same cascade `git rev-parse` does.
    for candidate in ref_candidates(base) {
        let name = RefName::new(&candidate).map_err(RepoError::from)?;
        if let Some(oid) = repo.refs().resolve_to_oid(&name)? {
            return Ok(oid);
        }
    }

    Err(RepoError::RevisionNotFound(base.to_string()))
}

fn ref_candidates(base: &str) -> Vec<String> {
    vec![
        base.to_string(),
        format!("refs/{base}"),
        format!("refs/heads/{base}"),
        format!("refs/tags/{base}"),
        format!("refs/remotes/{base}"),
    ]
}

fn apply_suffix(
    repo: &Repository,
    oid: ObjectId,
    suffix: &RevisionSuffix,
) -> Result<ObjectId, RepoError> {
    match suffix {
        RevisionSuffix::Parent(n) => {
            if *n == 0 {
                return Ok(oid);
            }
            let commit = read_commit(repo, &oid)?;
            commit
                .parents
                .get((*n - 1) as usize)
                .copied()
                .ok_or_else(|| RepoError::RevisionNotFound(format!("{oid}^{n}")))
        }
        RevisionSuffix::Ancestor(n) => {
            let mut current = oid;
            for _ in 0..*n {
                let commit = read_commit(repo, &current)?;
                current = *commit
                    .first_parent()
                    .ok_or_else(|| RepoError::RevisionNotFound(format!("{oid}~{n}")))?;
            }
            Ok(current)
        }
        RevisionSuffix::Peel(target) => peel_to_type(repo, oid, Some(*target)),
        RevisionSuffix::PeelAny => peel_to_type(repo, oid, None),
        RevisionSuffix::SearchMessage(pattern) => search_message(repo, oid, pattern),
    }
}

/// Follow `tag -> target` chains (and tree-of-commit) until the requested
/// type is reached, or (when `target` is `None`) until the first non-tag
/// object.
fn peel_to_type(
    repo: &Repository,
    mut oid: ObjectId,
    target: Option<ObjectType>,
) -> Result<ObjectId, RepoError> {
    for _ in 0..512 {
        let obj = read_object(repo, &oid)?;
        match (&obj, target) {
            (Object::Tag(tag), _) => {
                oid = tag.target;
                continue;
            }
            (Object::Commit(commit), Some(ObjectType::Tree)) => return Ok(commit.tree),
            (_, None) => return Ok(oid),
            (Object::Commit(_), Some(ObjectType::Commit)) => return Ok(oid),
            (Object::Tree(_), Some(ObjectType::Tree)) => return Ok(oid),
            (Object::Blob(_), Some(ObjectType::Blob)) => return Ok(oid),
            (other, Some(wanted)) => {
                return Err(RepoError::RevisionNotFound(format!(
                    "{oid} ({:?}) cannot be peeled to {wanted:?}",
                    other.object_type()
                )));
            }
        }
    }
    Err(RepoError::RevisionNotFound(format!(
        "peeling {oid} exceeded depth limit"
    )))
}

/// `^{/pattern}`: walk first-parent ancestry from `oid` for the nearest
/// commit whose message contains `pattern`.
fn search_message(repo: &Repository, oid: ObjectId, pattern: &str) -> Result<ObjectId, RepoError> {
    let mut seen = std::collections::HashSet::new();
    let mut stack = vec![oid];
    while let Some(candidate) = stack.pop() {
        if !seen.insert(candidate) {
            continue;
        }
        let commit = read_commit(repo, &candidate)?;
        if String::from_utf8_lossy(&commit.message).contains(pattern) {
            return Ok(candidate);
        }
        for parent in &commit.parents {
            stack.push(*parent);
        }
    }
    Err(RepoError::RevisionNotFound(format!(
        "no commit found matching /{pattern}/ reachable from {oid}"
    )))
}

fn read_object(repo: &Repository, oid: &ObjectId) -> Result<Object, RepoError> {
    repo.odb()
        .read(oid)?
        .ok_or_else(|| RepoError::RevisionNotFound(oid.to_hex()))
}

fn read_commit(repo: &Repository, oid: &ObjectId) -> Result<git_object::Commit, RepoError> {
    match read_object(repo, oid)? {
        Object::Commit(c) => Ok(c),
        other => Err(RepoError::RevisionNotFound(format!(
            "{oid} is a {:?}, not a commit",
            other.object_type()
        ))),
    }
}
