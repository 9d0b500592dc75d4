//! Revision range parsing: A..B, A...B, ^A B.

use git_hash::ObjectId;
use git_repository::Repository;

use crate::RevWalkError;

/// A parsed revision range.
#[derive(Debug, Clone)]
pub struct RevisionRange {
    /// Commits to include (positive references).
    pub include: Vec<ObjectId>,
    /// Commits to exclude (negative references).
    pub exclude: Vec<ObjectId>,
    /// Whether this is a symmetric difference (A...B).
    pub symmetric: bool,
}

impl RevisionRange {
    /// Parse a revision range specification.
    ///
    /// Supported formats:
    /// - `A..B` — commits reachable from B but not A
    /// - `A...B` — symmetric difference (reachable from either but not both)
    /// - `^A B` — exclude A, include B (handled at a higher level)
    /// - `A` — single revision (include only)
    pub fn parse(repo: &Repository, spec: &str) -> Result<Self, RevWalkError> {
        let spec = spec.trim();

        // Check for A...B (symmetric difference) — must check before A..B
        if let Some((left, right)) = spec.split_once("...") {
            let a = resolve_revision(repo, left.trim())?;
            let b = resolve_revision(repo, right.trim())?;

            // Symmetric difference: find merge base and exclude it.
            // Include both A and B, exclude their merge base(s).
            let bases = crate::merge_base::merge_base(repo, &a, &b)?;

            return Ok(Self {
                include: vec![a, b],
                exclude: bases,
                symmetric: true,
            });
        }

        // Check for A..B (asymmetric)
        if let Some((left, right)) = spec.split_once("..") {
            let a = resolve_revision(repo, left.trim())?;
            let b = resolve_revision(repo, right.trim())?;

            return Ok(Self {
                include: vec![b],
                exclude: vec![a],
                symmetric: false,
            });
        }

        // Check for ^A (exclude)
        if let Some(rest) = spec.strip_prefix('^') {
            let oid = resolve_revision(repo, rest.trim())?;
            return Ok(Self {
                include: vec![],
                exclude: vec![oid],
                symmetric: false,
            });
        }

        // Single revision
        let oid = resolve_revision(repo, spec)?;
        Ok(Self {
            include: vec![oid],
            exclude: vec![],
            symmetric: false,
        })
    }
}

/// Resolve a revision string to an ObjectId.
///
/// Thin wrapper over `git_repository::resolve_revision`, which owns the
/// actual base-plus-suffix resolution grammar (hex ids, ref-name cascade,
/// `~N`/`^N`/`^{type}`/`^{/pattern}` suffixes).
pub fn resolve_revision(repo: &Repository, rev: &str) -> Result<ObjectId, RevWalkError> {
    let rev = rev.trim();
    if rev.is_empty() {
        return Err(RevWalkError::InvalidRevision("empty revision".into()));
    }
    repo.resolve(rev).map_err(RevWalkError::from)
}
