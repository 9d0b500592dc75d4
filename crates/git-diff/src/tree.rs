//! N-way tree walker.
//!
//! `TreeIterator` wraps one parsed [`Tree`]'s sorted entries as a cursor.
//! `TreeWalk` merges any number of `TreeIterator`s, yielding the
//! lexicographically-next entry name across all of them per iteration, with
//! each iterator either matching at that name (its `(mode, oid)` exposed) or
//! not (`None`). `NameConflictTreeWalk` layers a one-entry lookahead on top so
//! that a file/directory (D/F) conflict on the same name surfaces as a single
//! iteration rather than two.
//!
//! Generalizes a pairwise two-cursor merge to N cursors, reusing
//! `git_object::tree::TreeEntry::cmp_entries`'s entry-comparison rule:
//! directory names compare as if they carried a trailing `/`.

use std::cmp::Ordering;

use bstr::{BStr, BString, ByteSlice};
use git_hash::ObjectId;
use git_object::{FileMode, Object, Tree, TreeEntry};
use git_odb::ObjectDatabase;

use crate::DiffError;

/// A cursor over one tree's sorted entries.
#[derive(Clone)]
pub struct TreeIterator {
    tree: Tree,
    pos: usize,
}

impl TreeIterator {
    /// Build a cursor from an already-parsed tree.
    pub fn from_tree(mut tree: Tree) -> Self {
        tree.sort();
        Self { tree, pos: 0 }
    }

    /// Read and parse `oid` as a tree, then build a cursor over it.
    pub fn from_oid(odb: &ObjectDatabase, oid: &ObjectId) -> Result<Self, DiffError> {
        Ok(Self::from_tree(read_tree(odb, oid)?))
    }

    /// An empty cursor, used in place of a missing tree side.
    pub fn empty() -> Self {
        Self { tree: Tree::new(), pos: 0 }
    }

    /// The entry at the cursor, if not exhausted.
    pub fn current(&self) -> Option<&TreeEntry> {
        self.tree.entries.get(self.pos)
    }

    /// Advance past the current entry.
    pub fn advance(&mut self) {
        self.pos += 1;
    }
}

fn read_tree(odb: &ObjectDatabase, oid: &ObjectId) -> Result<Tree, DiffError> {
    let obj = odb
        .read(oid)
        .map_err(|e| DiffError::ObjectRead { oid: *oid, source: e })?
        .ok_or(DiffError::ObjectNotFound(*oid))?;
    match obj {
        Object::Tree(tree) => Ok(tree),
        other => Err(DiffError::UnexpectedObjectType {
            oid: *oid,
            expected: "tree",
            actual: other.object_type().to_string(),
        }),
    }
}

/// One matched (or non-matched) slot of a `TreeWalk` iteration: the entry one
/// particular input tree contributes at the current path, or `None` when
/// that tree has no entry of this name at this point in the walk.
#[derive(Debug, Clone, Copy)]
pub struct WalkEntry {
    pub mode: FileMode,
    pub oid: ObjectId,
}

/// A decision a [`TreeFilter`] makes about whether to descend into / emit an
/// entry, with the short-circuit signal `PathFilterGroup` needs: once the
/// current path sorts past every target, there is nothing left this filter
/// will ever match again.
pub enum FilterDecision {
    Include,
    Exclude,
    /// No target path can compare greater than this path ever again; the
    /// walk should stop rather than keep scanning.
    StopWalk,
}

/// Decides whether a `TreeWalk` entry is visited.
pub trait TreeFilter {
    fn matches(&mut self, path: &BStr, is_tree: bool) -> FilterDecision;
}

/// Matches everything.
pub struct AllFilter;
impl TreeFilter for AllFilter {
    fn matches(&mut self, _path: &BStr, _is_tree: bool) -> FilterDecision {
        FilterDecision::Include
    }
}

/// Matches paths under (or equal to) a single root-relative, `/`-delimited
/// path. A trailing slash is trimmed on construction.
#[derive(Debug, Clone)]
pub struct PathFilter {
    path: BString,
}

impl PathFilter {
    pub fn new(path: impl Into<BString>) -> Self {
        let mut path = path.into();
        while path.last() == Some(&b'/') {
            path.pop();
        }
        Self { path }
    }

    fn matches_path(&self, path: &BStr, is_tree: bool) -> FilterMatch {
        if path.as_bytes() == self.path.as_bytes() {
            return FilterMatch::Exact;
        }
        if path.len() < self.path.len() {
            // `path` can only match if it's a directory prefix of `self.path`.
            if is_tree
                && self.path.starts_with(path.as_bytes())
                && self.path.get(path.len()) == Some(&b'/')
            {
                return FilterMatch::Descend;
            }
            return FilterMatch::None;
        }
        if path.starts_with(self.path.as_bytes()) && path.get(self.path.len()) == Some(&b'/') {
            return FilterMatch::Exact;
        }
        FilterMatch::None
    }
}

enum FilterMatch {
    /// This entry (or everything under it) is inside the target path.
    Exact,
    /// This directory entry is an ancestor of the target path; descend.
    Descend,
    None,
}

impl TreeFilter for PathFilter {
    fn matches(&mut self, path: &BStr, is_tree: bool) -> FilterDecision {
        match self.matches_path(path, is_tree) {
            FilterMatch::Exact | FilterMatch::Descend => FilterDecision::Include,
            FilterMatch::None => FilterDecision::Exclude,
        }
    }
}

/// A set of [`PathFilter`]s, any one of which admits an entry; raises
/// `StopWalk` once the current path has sorted past every target.
pub struct PathFilterGroup {
    filters: Vec<PathFilter>,
}

impl PathFilterGroup {
    pub fn new(paths: impl IntoIterator<Item = impl Into<BString>>) -> Self {
        Self {
            filters: paths.into_iter().map(PathFilter::new).collect(),
        }
    }
}

impl TreeFilter for PathFilterGroup {
    fn matches(&mut self, path: &BStr, is_tree: bool) -> FilterDecision {
        let mut any_descend = false;
        for f in &self.filters {
            match f.matches_path(path, is_tree) {
                FilterMatch::Exact => return FilterDecision::Include,
                FilterMatch::Descend => any_descend = true,
                FilterMatch::None => {}
            }
        }
        if any_descend {
            FilterDecision::Include
        } else {
            // Every filter target already sorts behind this path (tree order
            // is ascending), so no later entry can match either.
            FilterDecision::StopWalk
        }
    }
}

/// `AND` combinator: both sides must include.
pub struct And<A, B>(pub A, pub B);
impl<A: TreeFilter, B: TreeFilter> TreeFilter for And<A, B> {
    fn matches(&mut self, path: &BStr, is_tree: bool) -> FilterDecision {
        match self.0.matches(path, is_tree) {
            FilterDecision::Include => self.1.matches(path, is_tree),
            other => other,
        }
    }
}

/// `OR` combinator: either side including is enough.
pub struct Or<A, B>(pub A, pub B);
impl<A: TreeFilter, B: TreeFilter> TreeFilter for Or<A, B> {
    fn matches(&mut self, path: &BStr, is_tree: bool) -> FilterDecision {
        match (self.0.matches(path, is_tree), self.1.matches(path, is_tree)) {
            (FilterDecision::Include, _) | (_, FilterDecision::Include) => FilterDecision::Include,
            (FilterDecision::StopWalk, FilterDecision::StopWalk) => FilterDecision::StopWalk,
            _ => FilterDecision::Exclude,
        }
    }
}

/// `NOT` combinator.
pub struct Not<A>(pub A);
impl<A: TreeFilter> TreeFilter for Not<A> {
    fn matches(&mut self, path: &BStr, is_tree: bool) -> FilterDecision {
        match self.0.matches(path, is_tree) {
            FilterDecision::Include => FilterDecision::Exclude,
            FilterDecision::Exclude => FilterDecision::Include,
            FilterDecision::StopWalk => FilterDecision::StopWalk,
        }
    }
}

/// Merges N tree cursors, yielding one entry per iteration: the
/// lexicographically-minimal name among all non-exhausted cursors, with each
/// cursor's slot populated only if it has an entry of exactly that name.
pub struct TreeWalk {
    iters: Vec<TreeIterator>,
    /// Path segments above the current depth, joined with `/` to form the
    /// root-relative path passed to the filter.
    path_stack: Vec<BString>,
    filter: Option<Box<dyn TreeFilter>>,
    recursive: bool,
    stopped: bool,
    /// Which iterators matched at the most recently yielded entry.
    matched: Vec<bool>,
}

impl TreeWalk {
    pub fn new(iters: Vec<TreeIterator>) -> Self {
        let n = iters.len();
        Self {
            iters,
            path_stack: Vec::new(),
            filter: None,
            recursive: false,
            stopped: false,
            matched: vec![false; n],
        }
    }

    pub fn set_filter(&mut self, filter: Box<dyn TreeFilter>) {
        self.filter = Some(filter);
    }

    pub fn set_recursive(&mut self, recursive: bool) {
        self.recursive = recursive;
    }

    /// Advance to the next merged entry. Returns `false` once every cursor is
    /// exhausted (or a filter raised `StopWalk`).
    pub fn next(&mut self) -> Result<bool, DiffError> {
        if self.stopped {
            return Ok(false);
        }
        loop {
            // Clear slots matched by the previous iteration before advancing them.
            for (i, was_matched) in self.matched.clone().into_iter().enumerate() {
                if was_matched {
                    self.iters[i].advance();
                }
            }

            let min_name = self.min_name();
            let Some(min_name) = min_name else {
                self.matched.iter_mut().for_each(|m| *m = false);
                return Ok(false);
            };

            let is_tree = self.entry_is_tree(&min_name);
            for (i, iter) in self.iters.iter().enumerate() {
                self.matched[i] = iter
                    .current()
                    .is_some_and(|e| cmp_entries_by_name(&e.name, e.mode.is_tree(), &min_name, is_tree) == Ordering::Equal);
            }

            let path = self.current_path(&min_name);
            if let Some(filter) = self.filter.as_mut() {
                match filter.matches(path.as_bstr(), is_tree) {
                    FilterDecision::Include => {}
                    FilterDecision::Exclude => continue,
                    FilterDecision::StopWalk => {
                        self.stopped = true;
                        self.matched.iter_mut().for_each(|m| *m = false);
                        return Ok(false);
                    }
                }
            }

            return Ok(true);
        }
    }

    fn min_name(&self) -> Option<BString> {
        self.iters
            .iter()
            .filter_map(TreeIterator::current)
            .min_by(|a, b| cmp_entries_by_name(&a.name, a.mode.is_tree(), &b.name, b.mode.is_tree()))
            .map(|e| e.name.clone())
    }

    fn entry_is_tree(&self, name: &BString) -> bool {
        self.iters
            .iter()
            .filter_map(TreeIterator::current)
            .find(|e| e.name == *name)
            .map(|e| e.mode.is_tree())
            .unwrap_or(false)
    }

    fn current_path(&self, name: &BString) -> BString {
        if self.path_stack.is_empty() {
            name.clone()
        } else {
            let mut p = self.path_stack.join(&b"/"[..]);
            p.push(b'/');
            p.extend_from_slice(name);
            BString::from(p)
        }
    }

    /// The name of the entry at the current iteration.
    pub fn name(&self) -> Option<BString> {
        self.iters
            .iter()
            .enumerate()
            .find(|(i, _)| self.matched[*i])
            .and_then(|(_, it)| it.current())
            .map(|e| e.name.clone())
    }

    /// Whether the current iteration's matched entries are all (or any)
    /// subtrees — `true` only once all matching sides agree it's a tree.
    pub fn is_subtree(&self) -> bool {
        self.iters
            .iter()
            .enumerate()
            .filter(|(i, _)| self.matched[*i])
            .all(|(_, it)| it.current().is_some_and(|e| e.mode.is_tree()))
    }

    /// The `(mode, oid)` a given input tree contributes at this iteration, or
    /// `None` if that tree doesn't have an entry of this name here.
    pub fn entry(&self, index: usize) -> Option<WalkEntry> {
        if !self.matched.get(index).copied().unwrap_or(false) {
            return None;
        }
        self.iters[index]
            .current()
            .map(|e| WalkEntry { mode: e.mode, oid: e.oid })
    }

    /// Push the current entry's subtree(s) and recurse one level deeper.
    /// Only valid entries with `is_subtree() == true` may be entered.
    pub fn enter_subtree(&mut self, odb: &ObjectDatabase) -> Result<(), DiffError> {
        let name = self.name().expect("enter_subtree called with no current entry");
        let mut new_iters = Vec::with_capacity(self.iters.len());
        for (i, _) in self.iters.iter().enumerate() {
            if let Some(entry) = self.entry(i) {
                new_iters.push(TreeIterator::from_oid(odb, &entry.oid)?);
            } else {
                new_iters.push(TreeIterator::empty());
            }
        }
        self.path_stack.push(name);
        self.iters = new_iters;
        self.matched = vec![false; self.iters.len()];
        Ok(())
    }

    /// Whether a recursive walk is configured to auto-descend into matched
    /// subtrees (used by [`walk_recursive`]).
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }
}

/// `TreeEntry::cmp_entries`, but comparing an explicit name/is-tree pair
/// instead of two full entries — used by [`TreeWalk`] to compare the
/// merge-minimum name across many cursors without materializing a
/// `TreeEntry` for it.
fn cmp_entries_by_name(a_name: &BStr, a_is_tree: bool, b_name: &BStr, b_is_tree: bool) -> Ordering {
    let min_len = a_name.len().min(b_name.len());
    let cmp = a_name[..min_len].cmp(&b_name[..min_len]);
    if cmp != Ordering::Equal {
        return cmp;
    }
    let c1 = if a_name.len() > min_len {
        a_name[min_len]
    } else if a_is_tree {
        b'/'
    } else {
        0
    };
    let c2 = if b_name.len() > min_len {
        b_name[min_len]
    } else if b_is_tree {
        b'/'
    } else {
        0
    };
    c1.cmp(&c2)
}

/// A `TreeWalk` with D/F-conflict lookahead: if the plain merge-minimum at
/// this iteration would
/// be a file `foo` while some cursor's *next* entry is a tree also named
/// `foo`, the walk forces the tree to be the minimum so both sides of the
/// conflict are matched in a single iteration (the caller sees
/// `is_subtree() == true` and can `enter_subtree`). After emitting a D/F pair
/// the walk also skips a previously-emitted directory's name if a sibling
/// cursor would otherwise re-emit it — i.e. each distinct name is yielded
/// exactly once even when trees and files disagree about ordering.
pub struct NameConflictTreeWalk {
    inner: TreeWalk,
    last_name: Option<BString>,
}

impl NameConflictTreeWalk {
    pub fn new(iters: Vec<TreeIterator>) -> Self {
        Self { inner: TreeWalk::new(iters), last_name: None }
    }

    pub fn set_filter(&mut self, filter: Box<dyn TreeFilter>) {
        self.inner.set_filter(filter);
    }

    pub fn set_recursive(&mut self, recursive: bool) {
        self.inner.set_recursive(recursive);
    }

    pub fn next(&mut self) -> Result<bool, DiffError> {
        loop {
            if !self.has_df_conflict() {
                if !self.inner.next()? {
                    return Ok(false);
                }
            } else {
                self.force_tree_minimum();
            }

            let name = self.inner.name();
            if name == self.last_name {
                // A sibling cursor tried to re-emit the name we just matched
                // as a D/F pair (or plain entry); skip the duplicate.
                continue;
            }
            self.last_name = name;
            return Ok(true);
        }
    }

    /// True if, among cursors not currently matching the plain minimum, one
    /// has a tree at its *next* position sharing the minimum's name while the
    /// minimum itself is a file.
    fn has_df_conflict(&self) -> bool {
        let Some(min_name) = self.inner.min_name() else { return false };
        let min_is_tree = self.inner.entry_is_tree(&min_name);
        if min_is_tree {
            return false;
        }
        self.inner.iters.iter().any(|it| {
            it.current()
                .is_some_and(|e| e.name == min_name && e.mode.is_tree())
        })
    }

    /// Re-run the merge-minimum computation but require the winner to be the
    /// tree side of a D/F pair, so both mode classes land in one iteration.
    fn force_tree_minimum(&mut self) {
        for (i, was_matched) in self.inner.matched.clone().into_iter().enumerate() {
            if was_matched {
                self.inner.iters[i].advance();
            }
        }
        let Some(name) = self.inner.min_name() else {
            self.inner.matched.iter_mut().for_each(|m| *m = false);
            return;
        };
        for (i, it) in self.inner.iters.iter().enumerate() {
            self.inner.matched[i] = it.current().is_some_and(|e| e.name == name);
        }
    }

    pub fn name(&self) -> Option<BString> {
        self.inner.name()
    }

    pub fn is_subtree(&self) -> bool {
        self.inner.is_subtree()
    }

    pub fn entry(&self, index: usize) -> Option<WalkEntry> {
        self.inner.entry(index)
    }

    pub fn enter_subtree(&mut self, odb: &ObjectDatabase) -> Result<(), DiffError> {
        self.last_name = None;
        self.inner.enter_subtree(odb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git_object::Blob;
    use git_repository::Repository;
    use std::path::Path;

    fn write_blob(repo: &Repository, data: &[u8]) -> ObjectId {
        repo.odb().write(&Object::Blob(Blob { data: data.to_vec() })).unwrap()
    }

    fn write_tree(repo: &Repository, entries: Vec<TreeEntry>) -> ObjectId {
        repo.odb().write(&Object::Tree(Tree { entries })).unwrap()
    }

    fn init_repo(dir: &Path) -> Repository {
        Repository::init(dir).unwrap()
    }

    #[test]
    fn two_way_merge_add_delete_modify() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());

        let a1 = write_blob(&repo, b"a1");
        let a2 = write_blob(&repo, b"a2");
        let b1 = write_blob(&repo, b"b1");
        let c1 = write_blob(&repo, b"c1");

        let old = write_tree(
            &repo,
            vec![
                TreeEntry { mode: FileMode::Regular, name: BString::from("a.txt"), oid: a1 },
                TreeEntry { mode: FileMode::Regular, name: BString::from("b.txt"), oid: b1 },
            ],
        );
        let new = write_tree(
            &repo,
            vec![
                TreeEntry { mode: FileMode::Regular, name: BString::from("a.txt"), oid: a2 },
                TreeEntry { mode: FileMode::Regular, name: BString::from("c.txt"), oid: c1 },
            ],
        );

        let old_iter = TreeIterator::from_oid(repo.odb(), &old).unwrap();
        let new_iter = TreeIterator::from_oid(repo.odb(), &new).unwrap();
        let mut walk = TreeWalk::new(vec![old_iter, new_iter]);

        let mut names = Vec::new();
        while walk.next().unwrap() {
            let name = walk.name().unwrap();
            names.push((name.to_string(), walk.entry(0).is_some(), walk.entry(1).is_some()));
        }

        assert_eq!(
            names,
            vec![
                ("a.txt".to_string(), true, true),
                ("b.txt".to_string(), true, false),
                ("c.txt".to_string(), false, true),
            ]
        );
    }

    #[test]
    fn df_conflict_single_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());

        // Left tree: "x" is a file. Right tree: "x" is a directory containing "y".
        let file_oid = write_blob(&repo, b"file content");
        let nested_oid = write_blob(&repo, b"nested content");
        let subtree = write_tree(
            &repo,
            vec![TreeEntry { mode: FileMode::Regular, name: BString::from("y"), oid: nested_oid }],
        );

        let left = write_tree(
            &repo,
            vec![TreeEntry { mode: FileMode::Regular, name: BString::from("x"), oid: file_oid }],
        );
        let right = write_tree(
            &repo,
            vec![TreeEntry { mode: FileMode::Tree, name: BString::from("x"), oid: subtree }],
        );

        let left_iter = TreeIterator::from_oid(repo.odb(), &left).unwrap();
        let right_iter = TreeIterator::from_oid(repo.odb(), &right).unwrap();
        let mut walk = NameConflictTreeWalk::new(vec![left_iter, right_iter]);

        assert!(walk.next().unwrap());
        assert_eq!(walk.name().unwrap().to_string(), "x");
        assert!(walk.is_subtree());
        assert!(walk.entry(0).is_some());
        assert!(walk.entry(1).is_some());

        // Exactly one iteration for "x" — no leftover file-only iteration follows.
        assert!(!walk.next().unwrap());
    }

    #[test]
    fn path_filter_group_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());

        let a = write_blob(&repo, b"a");
        let z = write_blob(&repo, b"z");
        let tree = write_tree(
            &repo,
            vec![
                TreeEntry { mode: FileMode::Regular, name: BString::from("a.txt"), oid: a },
                TreeEntry { mode: FileMode::Regular, name: BString::from("z.txt"), oid: z },
            ],
        );

        let iter = TreeIterator::from_oid(repo.odb(), &tree).unwrap();
        let mut walk = TreeWalk::new(vec![iter]);
        walk.set_filter(Box::new(PathFilterGroup::new(["a.txt"])));

        assert!(walk.next().unwrap());
        assert_eq!(walk.name().unwrap().to_string(), "a.txt");
        // "z.txt" sorts past the only target, so the group raises StopWalk.
        assert!(!walk.next().unwrap());
    }

    #[test]
    fn recursive_descend_via_enter_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());

        let nested_oid = write_blob(&repo, b"nested");
        let subtree = write_tree(
            &repo,
            vec![TreeEntry { mode: FileMode::Regular, name: BString::from("inner.txt"), oid: nested_oid }],
        );
        let root = write_tree(
            &repo,
            vec![TreeEntry { mode: FileMode::Tree, name: BString::from("dir"), oid: subtree }],
        );

        let iter = TreeIterator::from_oid(repo.odb(), &root).unwrap();
        let mut walk = TreeWalk::new(vec![iter]);

        assert!(walk.next().unwrap());
        assert_eq!(walk.name().unwrap().to_string(), "dir");
        assert!(walk.is_subtree());

        walk.enter_subtree(repo.odb()).unwrap();
        assert!(walk.next().unwrap());
        assert_eq!(walk.name().unwrap().to_string(), "inner.txt");
        assert!(!walk.next().unwrap());
    }
}
