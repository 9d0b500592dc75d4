//! Ref-update outcome classification.
//!
//! `git-ref`'s `RefTransaction` only knows compare-and-swap semantics; it has
//! no notion of "fast-forward" or "forced" because that requires walking
//! ancestry, which lives in this crate (`merge_base::is_ancestor`). This
//! module is the seam between the two: a single non-transactional ref
//! update, classified the way `git update-ref`/`git push` report it.

use git_hash::ObjectId;
use git_ref::{RefError, RefName, RefStore, RefTransaction};
use git_repository::Repository;

use crate::merge_base::is_ancestor;
use crate::RevWalkError;

/// How a single-ref update turned out, mirroring the classifications C git
/// reports for branch updates (`git push`, `git update-ref`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefUpdateOutcome {
    /// The ref did not exist and was created.
    New,
    /// The ref existed and its old value is an ancestor of the new value.
    FastForward,
    /// The ref existed and was updated to a value that is not a descendant
    /// of the old value (only applied when the caller allows force).
    Forced,
    /// The update was rejected: a non-fast-forward update without force.
    Rejected,
    /// A concurrent writer changed the ref out from under us.
    LockFailure,
    /// Writing the new value failed at the filesystem level.
    IoFailure,
    /// The new and old value are identical; nothing was written.
    NoChange,
}

/// Update `name` to point at `new_target`, classifying and (unless rejected)
/// applying the result.
///
/// `force`, when false, rejects any update whose old value is not an
/// ancestor of `new_target` (i.e. anything but a fast-forward or a ref
/// creation) without touching the ref.
pub fn update_ref(
    repo: &Repository,
    name: &RefName,
    new_target: ObjectId,
    force: bool,
    message: impl Into<String>,
) -> Result<RefUpdateOutcome, RevWalkError> {
    let message = message.into();
    let current = repo.refs().resolve_to_oid(name)?;

    let outcome = match current {
        None => RefUpdateOutcome::New,
        Some(old) if old == new_target => RefUpdateOutcome::NoChange,
        Some(old) => {
            if is_ancestor(repo, &old, &new_target)? {
                RefUpdateOutcome::FastForward
            } else if force {
                RefUpdateOutcome::Forced
            } else {
                RefUpdateOutcome::Rejected
            }
        }
    };

    if matches!(outcome, RefUpdateOutcome::Rejected | RefUpdateOutcome::NoChange) {
        return Ok(outcome);
    }

    let mut txn = RefTransaction::new();
    match current {
        None => txn.create(name.clone(), new_target, message),
        Some(old) => txn.update(name.clone(), old, new_target, message),
    }

    match repo.refs().commit_transaction(txn) {
        Ok(()) => Ok(outcome),
        Err(RefError::CasFailed { .. }) => Ok(RefUpdateOutcome::LockFailure),
        Err(RefError::Io(_)) | Err(RefError::IoPath { .. }) | Err(RefError::Lock(_)) => {
            Ok(RefUpdateOutcome::IoFailure)
        }
        Err(err) => Err(RevWalkError::Ref(err)),
    }
}
