//! Commit storage for the generator pipeline.
//!
//! Instead of a graph of reference-counted, mutable `RevCommit` nodes, every
//! parsed commit lives in one growable `Vec` and is referred to elsewhere by
//! its index (`RevCommitId`). Flags live alongside each entry, so marking a
//! commit `UNINTERESTING` or `SEEN` is a plain array write — no interior
//! mutability, no `Rc<RefCell<_>>` shared between generators. Parsing is
//! lazy: a commit is only read from the object database (or commit-graph)
//! the first time something asks for it.

use std::collections::HashMap;

use git_hash::ObjectId;
use git_object::Object;
use git_repository::Repository;

use crate::commit_graph::CommitGraph;
use crate::flags::RevFlagSet;
use crate::RevWalkError;

/// Index of a [`RevCommit`] within a [`RevCommitArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RevCommitId(u32);

/// A commit as tracked by the walk: parent links are other arena indices
/// rather than `ObjectId`s, so following a parent never touches the object
/// database once the parent has already been parsed.
#[derive(Debug, Clone)]
pub struct RevCommit {
    pub oid: ObjectId,
    pub tree: ObjectId,
    pub parents: Vec<RevCommitId>,
    pub commit_time: i64,
    pub author_time: i64,
    /// Generation number from the commit-graph (0 if unavailable).
    pub generation: u32,
    pub flags: RevFlagSet,
    parsed: bool,
}

/// Owns every commit the walk has touched, keyed by `ObjectId` for dedup and
/// by `RevCommitId` for cheap traversal.
pub struct RevCommitArena<'repo> {
    repo: &'repo Repository,
    commit_graph: Option<CommitGraph>,
    commits: Vec<RevCommit>,
    index: HashMap<ObjectId, RevCommitId>,
}

impl<'repo> RevCommitArena<'repo> {
    /// `commit_graph` is owned by the arena rather than borrowed, so a
    /// caller (like [`crate::RevWalk`]) can hold both the graph and the
    /// arena as plain sibling fields without a self-referential struct.
    pub fn new(repo: &'repo Repository, commit_graph: Option<CommitGraph>) -> Self {
        Self {
            repo,
            commit_graph,
            commits: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Look up or allocate a slot for `oid`, without parsing it yet. Safe to
    /// call while holding a `RevCommitId` obtained from the same arena;
    /// reentrant parses (parent discovery) only ever register new OIDs, they
    /// never touch `self.commits` while a parse of another commit is live.
    fn id_for(&mut self, oid: ObjectId) -> RevCommitId {
        if let Some(&id) = self.index.get(&oid) {
            return id;
        }
        let id = RevCommitId(self.commits.len() as u32);
        self.commits.push(RevCommit {
            oid,
            tree: ObjectId::NULL_SHA1,
            parents: Vec::new(),
            commit_time: 0,
            author_time: 0,
            generation: 0,
            flags: RevFlagSet::EMPTY,
            parsed: false,
        });
        self.index.insert(oid, id);
        id
    }

    /// Resolve `oid` to a [`RevCommitId`], parsing it (and registering, but
    /// not parsing, its direct parents) if this is the first time it's seen.
    pub fn lookup_or_parse(&mut self, oid: ObjectId) -> Result<RevCommitId, RevWalkError> {
        let id = self.id_for(oid);
        if !self.commits[id.index()].parsed {
            self.parse(id)?;
        }
        Ok(id)
    }

    /// Ensure `id`'s fields are populated. A no-op if already parsed.
    pub fn ensure_parsed(&mut self, id: RevCommitId) -> Result<(), RevWalkError> {
        if !self.commits[id.index()].parsed {
            self.parse(id)?;
        }
        Ok(())
    }

    fn parse(&mut self, id: RevCommitId) -> Result<(), RevWalkError> {
        let oid = self.commits[id.index()].oid;

        if let Some(entry) = self.commit_graph.as_ref().and_then(|cg| cg.lookup(&oid)) {
            let parent_ids: Vec<RevCommitId> =
                entry.parent_oids.iter().map(|p| self.id_for(*p)).collect();
            let commit = &mut self.commits[id.index()];
            commit.tree = entry.tree_oid;
            commit.parents = parent_ids;
            commit.commit_time = entry.commit_time;
            commit.author_time = entry.commit_time;
            commit.generation = entry.generation;
            commit.parsed = true;
            return Ok(());
        }

        let obj = self
            .repo
            .odb()
            .read(&oid)?
            .ok_or(RevWalkError::CommitNotFound(oid))?;
        let Object::Commit(parsed) = obj else {
            return Err(RevWalkError::NotACommit(oid));
        };

        let parent_ids: Vec<RevCommitId> = parsed.parents.iter().map(|p| self.id_for(*p)).collect();
        let commit = &mut self.commits[id.index()];
        commit.tree = parsed.tree;
        commit.parents = parent_ids;
        commit.commit_time = parsed.committer.date.timestamp;
        commit.author_time = parsed.author.date.timestamp;
        commit.parsed = true;
        Ok(())
    }

    pub fn get(&self, id: RevCommitId) -> &RevCommit {
        &self.commits[id.index()]
    }

    pub fn flags(&self, id: RevCommitId) -> RevFlagSet {
        self.commits[id.index()].flags
    }

    pub fn set_flags(&mut self, id: RevCommitId, flags: RevFlagSet) {
        self.commits[id.index()].flags.insert(flags);
    }

    pub fn clear_flags(&mut self, id: RevCommitId, flags: RevFlagSet) {
        self.commits[id.index()].flags.remove(flags);
    }

    /// Replace a commit's effective parent list (used by
    /// [`crate::pipeline::RewriteGenerator`] to collapse TREESAME parents
    /// out of the simplified history).
    pub fn set_parents(&mut self, id: RevCommitId, parents: Vec<RevCommitId>) {
        self.commits[id.index()].parents = parents;
    }

    pub fn oid(&self, id: RevCommitId) -> ObjectId {
        self.commits[id.index()].oid
    }

    pub fn odb(&self) -> &git_odb::ObjectDatabase {
        self.repo.odb()
    }

    pub fn read_full(&self, id: RevCommitId) -> Result<git_object::Commit, RevWalkError> {
        let oid = self.oid(id);
        match self.repo.odb().read(&oid)?.ok_or(RevWalkError::CommitNotFound(oid))? {
            Object::Commit(c) => Ok(c),
            _ => Err(RevWalkError::NotACommit(oid)),
        }
    }
}

impl RevCommitId {
    fn index(self) -> usize {
        self.0 as usize
    }
}
