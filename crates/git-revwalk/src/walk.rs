//! Core revision walk iterator.
//!
//! `RevWalk` itself is a thin builder: `push`/`hide`/`set_sort` just record
//! starting points and options against a [`PendingGenerator`], and the full
//! generator stack (topo sort, reverse buffering, ...) is assembled once, on
//! the first call to `next()`, from [`crate::pipeline`].

use git_hash::ObjectId;
use git_object::{Commit, Object, ObjectType};
use git_ref::RefStore;
use git_repository::Repository;

use crate::arena::RevCommitArena;
use crate::commit_graph::CommitGraph;
use crate::pipeline::{Generator, PendingGenerator, ReverseGenerator, TopoSortGenerator};
use crate::RevWalkError;

/// Sort order for commit traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// By committer date, newest first (default).
    #[default]
    Chronological,
    /// Topological: parents always appear after children.
    Topological,
    /// By author date, newest first.
    AuthorDate,
    /// Reverse chronological (oldest first).
    Reverse,
}

/// Options for revision walking.
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    pub sort: SortOrder,
    pub first_parent_only: bool,
    pub ancestry_path: bool,
    pub max_count: Option<usize>,
    pub skip: Option<usize>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub author_pattern: Option<String>,
    pub committer_pattern: Option<String>,
    pub grep_pattern: Option<String>,
}

/// Revision walk iterator over commits.
pub struct RevWalk<'a> {
    repo: &'a Repository,
    arena: RevCommitArena<'a>,
    /// The unbuilt pipeline's root stage; taken by `build()` on first `next()`.
    pending: Option<PendingGenerator>,
    /// Assembled on first `next()` from `pending` plus `sort`/`options`.
    generator: Option<Box<dyn Generator>>,
    sort: SortOrder,
    options: WalkOptions,
    emitted: usize,
    skipped: usize,
}

impl<'a> RevWalk<'a> {
    /// Create a new revision walker for the given repository.
    pub fn new(repo: &'a Repository) -> Result<Self, RevWalkError> {
        let commit_graph = CommitGraph::open_from_repo(repo).ok();
        let arena = RevCommitArena::new(repo, commit_graph);

        Ok(Self {
            repo,
            arena,
            pending: Some(PendingGenerator::new(false)),
            generator: None,
            sort: SortOrder::default(),
            options: WalkOptions::default(),
            emitted: 0,
            skipped: 0,
        })
    }

    /// Add a starting commit (positive reference).
    pub fn push(&mut self, oid: ObjectId) -> Result<(), RevWalkError> {
        let id = self.arena.lookup_or_parse(oid)?;
        self.pending_mut().add_start(&mut self.arena, id, false)
    }

    /// Add an exclusion commit (negative reference, like ^A).
    /// All ancestors of this commit are excluded from output, propagated
    /// lazily as the walk discovers them rather than walked eagerly here.
    pub fn hide(&mut self, oid: ObjectId) -> Result<(), RevWalkError> {
        let id = self.arena.lookup_or_parse(oid)?;
        self.pending_mut().add_start(&mut self.arena, id, true)
    }

    /// Push HEAD as a starting point.
    pub fn push_head(&mut self) -> Result<(), RevWalkError> {
        if let Some(oid) = self.repo.head_oid()? {
            self.push(oid)?;
        }
        Ok(())
    }

    /// Push all refs as starting points (--all).
    pub fn push_all(&mut self) -> Result<(), RevWalkError> {
        let refs = self.repo.refs().iter(None)?;
        for r in refs {
            let r = r?;
            if let Some(oid) = r.target_oid() {
                if self.is_commit(&oid) {
                    self.push(oid)?;
                }
            }
        }
        Ok(())
    }

    /// Push all branches as starting points.
    pub fn push_branches(&mut self) -> Result<(), RevWalkError> {
        let refs = self.repo.refs().iter(Some("refs/heads/"))?;
        for r in refs {
            let r = r?;
            if let Some(oid) = r.target_oid() {
                self.push(oid)?;
            }
        }
        Ok(())
    }

    /// Push all tags as starting points.
    pub fn push_tags(&mut self) -> Result<(), RevWalkError> {
        let refs = self.repo.refs().iter(Some("refs/tags/"))?;
        for r in refs {
            let r = r?;
            if let Some(oid) = r.target_oid() {
                if self.is_commit(&oid) {
                    self.push(oid)?;
                }
            }
        }
        Ok(())
    }

    /// Set the sort order.
    pub fn set_sort(&mut self, sort: SortOrder) {
        self.sort = sort;
        self.options.sort = sort;
    }

    /// Set walk options.
    pub fn set_options(&mut self, options: WalkOptions) {
        self.sort = options.sort;
        self.options = options;
    }

    /// Parse and apply a revision range ("A..B", "A...B", "^A B").
    pub fn push_range(&mut self, range_spec: &str) -> Result<(), RevWalkError> {
        let range = crate::range::RevisionRange::parse(self.repo, range_spec)?;
        for oid in &range.include {
            self.push(*oid)?;
        }
        for oid in &range.exclude {
            self.hide(*oid)?;
        }
        Ok(())
    }

    // --- Internal helpers ---

    fn pending_mut(&mut self) -> &mut PendingGenerator {
        self.pending
            .as_mut()
            .expect("push/hide called after the walk has started iterating")
    }

    fn is_commit(&self, oid: &ObjectId) -> bool {
        matches!(
            self.repo.odb().read_header(oid),
            Ok(Some(info)) if info.obj_type == ObjectType::Commit
        )
    }

    fn read_commit(&self, oid: &ObjectId) -> Result<Commit, RevWalkError> {
        let obj = self
            .repo
            .odb()
            .read(oid)?
            .ok_or(RevWalkError::CommitNotFound(*oid))?;
        match obj {
            Object::Commit(c) => Ok(c),
            _ => Err(RevWalkError::NotACommit(*oid)),
        }
    }

    /// Assemble the generator stack for `self.sort`/`self.options` from the
    /// recorded starting points. Called once, lazily, on the first `next()`.
    fn build(&mut self) -> Box<dyn Generator> {
        let mut pending = self.pending.take().expect("build() called twice");
        pending.set_first_parent_only(self.options.first_parent_only);
        match self.sort {
            SortOrder::Chronological => Box::new(pending),
            SortOrder::AuthorDate => {
                pending.set_sort_key(crate::pipeline::SortKey::AuthorDate);
                Box::new(pending)
            }
            SortOrder::Topological => Box::new(TopoSortGenerator::new(pending)),
            SortOrder::Reverse => Box::new(ReverseGenerator::new(pending)),
        }
    }

    /// Apply date filters (--since, --until).
    fn passes_date_filter(&self, commit: &Commit) -> bool {
        let commit_date = commit.committer.date.timestamp;
        if let Some(since) = self.options.since {
            if commit_date < since {
                return false;
            }
        }
        if let Some(until) = self.options.until {
            if commit_date > until {
                return false;
            }
        }
        true
    }

    /// Apply pattern filters (--author, --committer, --grep).
    fn passes_pattern_filter(&self, commit: &Commit) -> bool {
        if let Some(ref pattern) = self.options.author_pattern {
            let author = String::from_utf8_lossy(&commit.author.name);
            let email = String::from_utf8_lossy(&commit.author.email);
            if !author.contains(pattern.as_str()) && !email.contains(pattern.as_str()) {
                return false;
            }
        }
        if let Some(ref pattern) = self.options.committer_pattern {
            let committer = String::from_utf8_lossy(&commit.committer.name);
            let email = String::from_utf8_lossy(&commit.committer.email);
            if !committer.contains(pattern.as_str()) && !email.contains(pattern.as_str()) {
                return false;
            }
        }
        if let Some(ref pattern) = self.options.grep_pattern {
            let msg = String::from_utf8_lossy(&commit.message);
            if !msg.contains(pattern.as_str()) {
                return false;
            }
        }
        true
    }
}

impl Iterator for RevWalk<'_> {
    type Item = Result<ObjectId, RevWalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(max) = self.options.max_count {
            if self.emitted >= max {
                return None;
            }
        }

        if self.generator.is_none() {
            self.generator = Some(self.build());
        }

        let has_pattern_filters = self.options.author_pattern.is_some()
            || self.options.committer_pattern.is_some()
            || self.options.grep_pattern.is_some();
        let has_date_filters = self.options.since.is_some() || self.options.until.is_some();
        let needs_full_commit = has_pattern_filters || has_date_filters;

        loop {
            let id = match self.generator.as_mut().unwrap().next(&mut self.arena) {
                Ok(Some(id)) => id,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            let oid = self.arena.oid(id);

            if needs_full_commit {
                let commit = match self.read_commit(&oid) {
                    Ok(c) => c,
                    Err(e) => return Some(Err(e)),
                };

                if !self.passes_date_filter(&commit) {
                    continue;
                }
                if !self.passes_pattern_filter(&commit) {
                    continue;
                }
            }

            if let Some(skip) = self.options.skip {
                if self.skipped < skip {
                    self.skipped += 1;
                    continue;
                }
            }

            self.emitted += 1;
            return Some(Ok(oid));
        }
    }
}
