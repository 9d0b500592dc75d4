//! fsck-style structural validation, distinct from the best-effort parsing in
//! [`crate::Object::parse`].
//!
//! Parsing accepts anything it can make sense of; `check` additionally
//! enforces the invariants git itself expects objects entering a repository
//! to uphold — sorted, non-duplicate tree entries, well-formed identity
//! lines, and recognized file modes — so a malformed object can be rejected
//! before it's ever written.

use bstr::{BString, ByteSlice};
use git_hash::{HashAlgorithm, ObjectId};

use crate::{FileMode, Object, ObjectType, Tree, TreeEntry};

/// A structural defect found by [`check`] or [`check_bytes`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CorruptObject {
    #[error("duplicate tree entry '{0}'")]
    DuplicateTreeEntry(String),

    #[error("tree entries not in sorted order: '{0}' before '{1}'")]
    TreeEntriesNotSorted(String, String),

    #[error("invalid file mode {0:o} for tree entry '{1}'")]
    InvalidFileMode(u32, String),

    #[error("tree entry '{0}' has an empty name")]
    EmptyEntryName(String),

    #[error("tree entry name '{0}' contains a path separator")]
    EntryNameContainsSlash(String),

    #[error("tree entry name is '.' or '..'")]
    ReservedEntryName,

    #[error("tree entry name '.git' is reserved")]
    DotGitEntryName,

    #[error("malformed author/committer/tagger identity: {0}")]
    MalformedIdentity(String),

    #[error("tree entry '{0}' truncated in object id")]
    TruncatedObjectId(String),

    #[error("malformed tree entry: {0}")]
    MalformedTreeEntry(String),

    #[error("malformed {0} object: {1}")]
    MalformedObject(&'static str, String),
}

/// Run fsck-style structural checks against a parsed object.
///
/// This is stricter than [`crate::Object::parse`]: a tree with out-of-order
/// or duplicate entries parses fine (its bytes are well-formed binary
/// format) but fails `check`, because git's own tree-writing code never
/// produces such a tree and downstream consumers (the tree walker, the
/// index) rely on sort order.
pub fn check(obj: &Object) -> Result<(), CorruptObject> {
    match obj {
        Object::Tree(tree) => check_tree(tree),
        Object::Commit(commit) => {
            check_identity(&commit.author.name, &commit.author.email)?;
            check_identity(&commit.committer.name, &commit.committer.email)
        }
        Object::Tag(tag) => {
            if let Some(tagger) = &tag.tagger {
                check_identity(&tagger.name, &tagger.email)?;
            }
            Ok(())
        }
        Object::Blob(_) => Ok(()),
    }
}

/// Run fsck-style structural checks against raw, unparsed object content.
///
/// Unlike [`check`], this does not go through [`crate::Object::parse_content`]
/// first for trees: `Tree::parse` bails out on the first malformed entry with
/// an [`crate::ObjectError`], which would make a truncated or malformed tree
/// entry unobservable as a [`CorruptObject`]. Trees are scanned here directly
/// so truncation (e.g. a tree entry whose id is cut short) surfaces as
/// `CorruptObject::TruncatedObjectId` instead of being swallowed by a
/// different error type upstream.
pub fn check_bytes(object_type: ObjectType, bytes: &[u8]) -> Result<(), CorruptObject> {
    match object_type {
        ObjectType::Tree => check_tree_bytes(bytes),
        ObjectType::Commit | ObjectType::Tag | ObjectType::Blob => {
            let obj = Object::parse_content(object_type, bytes)
                .map_err(|e| CorruptObject::MalformedObject(kind_name(object_type), e.to_string()))?;
            check(&obj)
        }
    }
}

fn kind_name(t: ObjectType) -> &'static str {
    match t {
        ObjectType::Blob => "blob",
        ObjectType::Tree => "tree",
        ObjectType::Commit => "commit",
        ObjectType::Tag => "tag",
    }
}

/// Scan raw tree content entry-by-entry, the same layout `Tree::parse` reads
/// (`<mode-ascii> SP <name> NUL <oid-bytes>`), but reporting malformed or
/// truncated entries as [`CorruptObject`] rather than bailing into
/// `ObjectError`. A tree that scans cleanly is then run through the same
/// sort/duplicate/name checks [`check`] applies to an already-parsed tree.
fn check_tree_bytes(content: &[u8]) -> Result<(), CorruptObject> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < content.len() {
        let space_pos = content[pos..]
            .iter()
            .position(|&b| b == b' ')
            .map(|p| p + pos)
            .ok_or_else(|| CorruptObject::MalformedTreeEntry("missing space after mode".into()))?;

        let mode = FileMode::from_bytes(&content[pos..space_pos])
            .map_err(|_| CorruptObject::MalformedTreeEntry("invalid mode".into()))?;

        let name_start = space_pos + 1;
        let null_pos = content[name_start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| p + name_start)
            .ok_or_else(|| CorruptObject::MalformedTreeEntry("missing null after name".into()))?;

        let name = BString::from(&content[name_start..null_pos]);

        let oid_start = null_pos + 1;
        let oid_len = 20; // SHA-1 is the only on-disk layout this scanner understands.
        if oid_start + oid_len > content.len() {
            return Err(CorruptObject::TruncatedObjectId(name.to_string()));
        }

        let oid = ObjectId::from_bytes(&content[oid_start..oid_start + oid_len], HashAlgorithm::Sha1)
            .map_err(|e| CorruptObject::MalformedTreeEntry(e.to_string()))?;

        entries.push(TreeEntry { mode, name, oid });
        pos = oid_start + oid_len;
    }

    check_tree(&Tree { entries })
}

fn check_tree(tree: &Tree) -> Result<(), CorruptObject> {
    let mut prev: Option<&crate::TreeEntry> = None;
    for entry in &tree.entries {
        let name = entry.name.to_string();

        if entry.name.is_empty() {
            return Err(CorruptObject::EmptyEntryName(name));
        }
        if entry.name.contains(&b'/') {
            return Err(CorruptObject::EntryNameContainsSlash(name));
        }
        if entry.name.as_slice() == b"." || entry.name.as_slice() == b".." {
            return Err(CorruptObject::ReservedEntryName);
        }
        if entry.name.eq_ignore_ascii_case(b".git") {
            return Err(CorruptObject::DotGitEntryName);
        }
        check_mode(&entry.mode, &name)?;

        if let Some(prev) = prev {
            match crate::TreeEntry::cmp_entries(prev, entry) {
                std::cmp::Ordering::Less => {}
                std::cmp::Ordering::Equal => {
                    return Err(CorruptObject::DuplicateTreeEntry(name));
                }
                std::cmp::Ordering::Greater => {
                    return Err(CorruptObject::TreeEntriesNotSorted(
                        prev.name.to_string(),
                        name,
                    ));
                }
            }
        }
        prev = Some(entry);
    }
    Ok(())
}

fn check_mode(mode: &FileMode, name: &str) -> Result<(), CorruptObject> {
    match mode {
        FileMode::Regular
        | FileMode::Executable
        | FileMode::Symlink
        | FileMode::Gitlink
        | FileMode::Tree => Ok(()),
        FileMode::Unknown(raw) => Err(CorruptObject::InvalidFileMode(*raw, name.to_string())),
    }
}

fn check_identity(name: &bstr::BString, email: &bstr::BString) -> Result<(), CorruptObject> {
    if name.is_empty() {
        return Err(CorruptObject::MalformedIdentity("empty name".into()));
    }
    if email.contains(&b'<') || email.contains(&b'>') {
        return Err(CorruptObject::MalformedIdentity(
            "email contains '<' or '>'".into(),
        ));
    }
    if email.contains(&b'\n') || name.contains(&b'\n') {
        return Err(CorruptObject::MalformedIdentity(
            "identity contains a newline".into(),
        ));
    }
    Ok(())
}
