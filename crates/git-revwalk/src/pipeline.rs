//! The pull-driven generator pipeline that [`crate::RevWalk`] assembles.
//!
//! Each generator pulls from the one beneath it and is itself pulled from
//! above, so a commit flows through exactly the stages the walk's options
//! call for: a [`PendingGenerator`] (always present) expands parents and
//! propagates uninteresting/colored flags, then optionally a
//! [`RewriteGenerator`] simplifies history against a pathspec, a
//! [`BoundaryGenerator`] re-surfaces uninteresting boundary commits, a
//! [`TopoSortGenerator`] reorders so parents never precede children, a
//! [`DelayRewriteToEnd`] holds rewritten merges back until topo order has
//! settled, and a [`ReverseGenerator`] buffers everything to emit oldest
//! first.

use std::collections::{HashMap, HashSet, VecDeque};

use bstr::BString;

use crate::arena::{RevCommitArena, RevCommitId};
use crate::flags::{self, RevFlag, RevFlagSet};
use crate::RevWalkError;

/// Describes what a generator's output stream already guarantees, so a
/// generator being stacked on top can decide whether it needs to do
/// anything (e.g. `TopoSortGenerator` is a no-op to add on top of a stream
/// that is already `SORT_TOPO`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorFlags(u32);

impl GeneratorFlags {
    pub const NONE: Self = Self(0);
    pub const SORT_COMMIT_TIME_DESC: Self = Self(1 << 0);
    pub const SORT_TOPO: Self = Self(1 << 1);
    pub const SORT_REVERSE: Self = Self(1 << 2);
    pub const HAS_UNINTERESTING: Self = Self(1 << 3);
    pub const HAS_REWRITE: Self = Self(1 << 4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for GeneratorFlags {
    type Output = GeneratorFlags;
    fn bitor(self, rhs: Self) -> Self::Output {
        GeneratorFlags(self.0 | rhs.0)
    }
}

/// A stage in the revision-walk pipeline: pulls zero or more commits from
/// whatever it wraps and yields the next one it has decided to forward.
pub trait Generator {
    fn next(&mut self, arena: &mut RevCommitArena) -> Result<Option<RevCommitId>, RevWalkError>;
    fn output_type(&self) -> GeneratorFlags;
}

/// Clock-skew tolerance: once every entry left in the heap is uninteresting,
/// [`PendingGenerator`] keeps draining this many more before concluding the
/// walk is done, in case an uninteresting commit's (possibly skewed) clock
/// makes it look newer than an interesting commit still behind it.
const OVER_SCAN: u32 = 5;

struct HeapEntry {
    commit_time: i64,
    insertion_ctr: u64,
    id: RevCommitId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.commit_time
            .cmp(&other.commit_time)
            .then_with(|| other.insertion_ctr.cmp(&self.insertion_ctr))
    }
}

/// The root of every pipeline: a commit-time-ordered expansion of parents,
/// propagating any flags in its `paint_mask` (by default just
/// [`flags::UNINTERESTING`]) from a commit to its parents as they're
/// discovered.
pub struct PendingGenerator {
    heap: std::collections::BinaryHeap<HeapEntry>,
    insertion_ctr: u64,
    first_parent_only: bool,
    over_scan_budget: u32,
    paint_mask: RevFlagSet,
    sort_key: SortKey,
}

/// Which timestamp orders the heap. Commits already enqueued under one key
/// keep that key even if [`PendingGenerator::set_sort_key`] is called again
/// afterward — set it before seeding starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    CommitDate,
    AuthorDate,
}

impl PendingGenerator {
    pub fn new(first_parent_only: bool) -> Self {
        Self {
            heap: std::collections::BinaryHeap::new(),
            insertion_ctr: 0,
            first_parent_only,
            over_scan_budget: OVER_SCAN,
            paint_mask: flags::UNINTERESTING,
            sort_key: SortKey::default(),
        }
    }

    /// Which flags propagate from a commit down to its parents as they're
    /// discovered. [`crate::merge_base::MergeBaseFilter`]-style callers
    /// extend this to include per-start color flags.
    pub fn set_paint_mask(&mut self, mask: RevFlagSet) {
        self.paint_mask = mask;
    }

    pub fn set_first_parent_only(&mut self, first_parent_only: bool) {
        self.first_parent_only = first_parent_only;
    }

    pub fn set_sort_key(&mut self, sort_key: SortKey) {
        self.sort_key = sort_key;
    }

    /// Seed a starting point. `uninteresting` marks it (and everything
    /// reachable from it) excluded from the output.
    pub fn add_start(
        &mut self,
        arena: &mut RevCommitArena,
        id: RevCommitId,
        uninteresting: bool,
    ) -> Result<(), RevWalkError> {
        arena.ensure_parsed(id)?;
        if uninteresting {
            arena.set_flags(id, flags::UNINTERESTING);
        }
        self.enqueue(arena, id);
        Ok(())
    }

    fn enqueue(&mut self, arena: &mut RevCommitArena, id: RevCommitId) {
        if arena.flags(id).contains(flags::IN_PENDING) {
            return;
        }
        arena.set_flags(id, flags::IN_PENDING);
        let commit_time = match self.sort_key {
            SortKey::CommitDate => arena.get(id).commit_time,
            SortKey::AuthorDate => arena.get(id).author_time,
        };
        self.heap.push(HeapEntry { commit_time, insertion_ctr: self.insertion_ctr, id });
        self.insertion_ctr += 1;
    }
}

impl Generator for PendingGenerator {
    fn next(&mut self, arena: &mut RevCommitArena) -> Result<Option<RevCommitId>, RevWalkError> {
        loop {
            let Some(entry) = self.heap.pop() else { return Ok(None) };
            let id = entry.id;

            let is_uninteresting = arena.flags(id).contains(flags::UNINTERESTING);
            let propagate = arena.flags(id).intersection(self.paint_mask);

            arena.ensure_parsed(id)?;
            let parents = arena.get(id).parents.clone();
            let parents: &[RevCommitId] = if self.first_parent_only {
                &parents[..parents.len().min(1)]
            } else {
                &parents[..]
            };
            for &p in parents {
                arena.ensure_parsed(p)?;
                if !propagate.is_empty() {
                    arena.set_flags(p, propagate);
                }
                self.enqueue(arena, p);
            }

            if is_uninteresting {
                let all_uninteresting = self
                    .heap
                    .iter()
                    .all(|e| arena.flags(e.id).contains(flags::UNINTERESTING));
                if all_uninteresting {
                    if self.over_scan_budget == 0 {
                        return Ok(None);
                    }
                    self.over_scan_budget -= 1;
                }
                continue;
            }

            self.over_scan_budget = OVER_SCAN;
            arena.set_flags(id, flags::SEEN);
            return Ok(Some(id));
        }
    }

    fn output_type(&self) -> GeneratorFlags {
        GeneratorFlags::SORT_COMMIT_TIME_DESC | GeneratorFlags::HAS_UNINTERESTING
    }
}

/// History simplification: elides a commit whose tree matches one of its
/// parents (optionally restricted to a pathspec), redirecting through that
/// parent instead. Grounded on [`git_diff::tree`]'s N-way tree walk — two
/// trees compared via a two-cursor [`git_diff::tree::NameConflictTreeWalk`].
pub struct RewriteTreeFilter {
    pathspec: Option<Vec<BString>>,
}

impl RewriteTreeFilter {
    pub fn new(pathspec: Option<Vec<BString>>) -> Self {
        Self { pathspec }
    }

    /// True if `a` and `b` are identical trees, restricted to `self.pathspec`
    /// when set. With no pathspec, only a byte-identical tree OID counts —
    /// anything else is assumed to differ somewhere.
    fn trees_equal(
        &self,
        arena: &RevCommitArena,
        a: git_hash::ObjectId,
        b: git_hash::ObjectId,
    ) -> Result<bool, RevWalkError> {
        if a == b {
            return Ok(true);
        }
        let Some(paths) = &self.pathspec else {
            return Ok(false);
        };
        let odb = arena.odb();
        let ai = git_diff::tree::TreeIterator::from_oid(odb, &a)?;
        let bi = git_diff::tree::TreeIterator::from_oid(odb, &b)?;
        let mut walk = git_diff::tree::NameConflictTreeWalk::new(vec![ai, bi]);
        walk.set_filter(Box::new(git_diff::tree::PathFilterGroup::new(paths.clone())));

        while walk.next()? {
            let ea = walk.entry(0);
            let eb = walk.entry(1);
            match (ea, eb) {
                (Some(ea), Some(eb)) => {
                    if ea.mode.raw() != eb.mode.raw() {
                        return Ok(false);
                    }
                    if ea.oid == eb.oid {
                        continue;
                    }
                    if ea.mode.is_tree() && eb.mode.is_tree() {
                        walk.enter_subtree(odb)?;
                        continue;
                    }
                    return Ok(false);
                }
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// True if `tree` has no content at all under `self.pathspec` — the
    /// commit this tree belongs to never contributed the filtered paths, so
    /// its ancestry is irrelevant to a merge that only adds them. With no
    /// pathspec configured there is nothing to be empty under, so this is
    /// always `false`.
    fn contributes_nothing(
        &self,
        arena: &RevCommitArena,
        tree: git_hash::ObjectId,
    ) -> Result<bool, RevWalkError> {
        let Some(paths) = &self.pathspec else { return Ok(false) };
        Ok(!tree_touches_pathspec(arena.odb(), tree, paths)?)
    }
}

/// Whether `tree`, restricted to `paths`, contains any entry at all.
/// Descends into matched subtrees until it finds a leaf the filter included,
/// or exhausts the walk without finding one.
fn tree_touches_pathspec(
    odb: &git_odb::ObjectDatabase,
    tree: git_hash::ObjectId,
    paths: &[BString],
) -> Result<bool, RevWalkError> {
    let root = git_diff::tree::TreeIterator::from_oid(odb, &tree)?;
    let mut walk = git_diff::tree::TreeWalk::new(vec![root]);
    walk.set_filter(Box::new(git_diff::tree::PathFilterGroup::new(paths.to_vec())));
    while walk.next()? {
        if walk.is_subtree() {
            walk.enter_subtree(odb)?;
        } else {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Applies [`RewriteTreeFilter`] to every commit pulled from `inner`. A
/// non-merge commit whose tree matches its sole parent is elided entirely;
/// a merge commit that matches one parent has its parent list collapsed to
/// that parent and is tagged [`flags::REWRITE`] but still forwarded (callers
/// combining this with [`DelayRewriteToEnd`] hold it back until topo order
/// is final).
pub struct RewriteGenerator<G> {
    inner: G,
    filter: RewriteTreeFilter,
}

impl<G: Generator> RewriteGenerator<G> {
    pub fn new(inner: G, filter: RewriteTreeFilter) -> Self {
        Self { inner, filter }
    }
}

impl<G: Generator> Generator for RewriteGenerator<G> {
    fn next(&mut self, arena: &mut RevCommitArena) -> Result<Option<RevCommitId>, RevWalkError> {
        loop {
            let Some(id) = self.inner.next(arena)? else { return Ok(None) };
            arena.ensure_parsed(id)?;
            let parents = arena.get(id).parents.clone();
            if parents.is_empty() {
                return Ok(Some(id));
            }

            let tree = arena.get(id).tree;
            let mut treesame_parent = None;
            for &p in &parents {
                arena.ensure_parsed(p)?;
                let ptree = arena.get(p).tree;
                if self.filter.trees_equal(arena, tree, ptree)? {
                    treesame_parent = Some(p);
                    break;
                }
            }

            let Some(p) = treesame_parent else {
                // No parent is TREESAME. If this is a merge that only adds
                // files under the pathspec, the parent(s) that never had any
                // content under those paths contributed nothing to them;
                // cut their ancestry rather than dragging in an unrelated
                // branch purely because of the merge.
                if parents.len() > 1 {
                    let mut contributors = Vec::with_capacity(parents.len());
                    for &parent in &parents {
                        arena.ensure_parsed(parent)?;
                        let ptree = arena.get(parent).tree;
                        if !self.filter.contributes_nothing(arena, ptree)? {
                            contributors.push(parent);
                        }
                    }
                    if !contributors.is_empty() && contributors.len() < parents.len() {
                        arena.set_parents(id, contributors);
                        arena.set_flags(id, flags::REWRITE);
                    }
                }
                return Ok(Some(id));
            };
            arena.set_flags(id, flags::REWRITE);
            if parents.len() > 1 {
                arena.set_parents(id, vec![p]);
                return Ok(Some(id));
            }
            // Single-parent TREESAME commit: skip it, its parent is already
            // queued below us regardless of whether we forward this one.
        }
    }

    fn output_type(&self) -> GeneratorFlags {
        self.inner.output_type() | GeneratorFlags::HAS_REWRITE
    }
}

/// Re-surfaces the immediate uninteresting parents of interesting commits
/// (tagged [`flags::BOUNDARY`]) after the interesting stream is exhausted —
/// the `--boundary` commits a caller may want to show even though they're
/// not part of the included history.
pub struct BoundaryGenerator<G> {
    inner: G,
    enabled: bool,
    boundary: VecDeque<RevCommitId>,
    emitted_boundary: HashSet<RevCommitId>,
}

impl<G: Generator> BoundaryGenerator<G> {
    pub fn new(inner: G, enabled: bool) -> Self {
        Self { inner, enabled, boundary: VecDeque::new(), emitted_boundary: HashSet::new() }
    }
}

impl<G: Generator> Generator for BoundaryGenerator<G> {
    fn next(&mut self, arena: &mut RevCommitArena) -> Result<Option<RevCommitId>, RevWalkError> {
        loop {
            match self.inner.next(arena)? {
                Some(id) => {
                    if self.enabled {
                        arena.ensure_parsed(id)?;
                        for p in arena.get(id).parents.clone() {
                            if arena.flags(p).contains(flags::UNINTERESTING)
                                && self.emitted_boundary.insert(p)
                            {
                                arena.set_flags(p, flags::BOUNDARY);
                                self.boundary.push_back(p);
                            }
                        }
                    }
                    return Ok(Some(id));
                }
                None => return Ok(self.boundary.pop_front()),
            }
        }
    }

    fn output_type(&self) -> GeneratorFlags {
        self.inner.output_type()
    }
}

/// Reorders a fully-consumed upstream so every parent is emitted after all
/// of its children (git's `--topo-order`). Drains `inner` completely on the
/// first call, so it cannot be usefully combined with an unbounded walk.
pub struct TopoSortGenerator<G> {
    inner: G,
    prepared: bool,
    adjacency: HashMap<RevCommitId, Vec<RevCommitId>>,
    indegree: HashMap<RevCommitId, u32>,
    dates: HashMap<RevCommitId, i64>,
    ready: VecDeque<RevCommitId>,
}

impl<G: Generator> TopoSortGenerator<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            prepared: false,
            adjacency: HashMap::new(),
            indegree: HashMap::new(),
            dates: HashMap::new(),
            ready: VecDeque::new(),
        }
    }

    fn prepare(&mut self, arena: &mut RevCommitArena) -> Result<(), RevWalkError> {
        if self.prepared {
            return Ok(());
        }
        self.prepared = true;

        let mut all = Vec::new();
        let mut seen = HashSet::new();
        while let Some(id) = self.inner.next(arena)? {
            seen.insert(id);
            all.push(id);
        }

        for &id in &all {
            self.indegree.entry(id).or_insert(0);
            self.dates.insert(id, arena.get(id).commit_time);
            let parents: Vec<RevCommitId> = arena
                .get(id)
                .parents
                .iter()
                .copied()
                .filter(|p| seen.contains(p))
                .collect();
            for &p in &parents {
                *self.indegree.entry(p).or_insert(0) += 1;
            }
            self.adjacency.insert(id, parents);
        }

        let mut tips: Vec<RevCommitId> = all
            .iter()
            .copied()
            .filter(|id| self.indegree.get(id).copied().unwrap_or(0) == 0)
            .collect();
        tips.sort_by(|a, b| self.dates[b].cmp(&self.dates[a]));
        self.ready = tips.into();
        Ok(())
    }
}

impl<G: Generator> Generator for TopoSortGenerator<G> {
    fn next(&mut self, arena: &mut RevCommitArena) -> Result<Option<RevCommitId>, RevWalkError> {
        self.prepare(arena)?;
        let Some(id) = self.ready.pop_front() else { return Ok(None) };

        let parents = self.adjacency.get(&id).cloned().unwrap_or_default();
        let mut newly_ready = Vec::new();
        for p in parents {
            if let Some(d) = self.indegree.get_mut(&p) {
                *d = d.saturating_sub(1);
                if *d == 0 {
                    newly_ready.push(p);
                }
            }
        }
        newly_ready.sort_by(|a, b| self.dates[b].cmp(&self.dates[a]));
        for p in newly_ready {
            self.ready.push_back(p);
        }
        Ok(Some(id))
    }

    fn output_type(&self) -> GeneratorFlags {
        (self.inner.output_type() | GeneratorFlags::SORT_TOPO) & !GeneratorFlags::SORT_COMMIT_TIME_DESC
    }
}

impl std::ops::BitAnd for GeneratorFlags {
    type Output = GeneratorFlags;
    fn bitand(self, rhs: Self) -> Self::Output {
        GeneratorFlags(self.0 & rhs.0)
    }
}
impl std::ops::Not for GeneratorFlags {
    type Output = GeneratorFlags;
    fn not(self) -> Self::Output {
        GeneratorFlags(!self.0)
    }
}

/// Holds commits tagged [`flags::REWRITE`] back until the upstream
/// (generally [`TopoSortGenerator`]) is fully drained, then emits them —
/// otherwise a simplified merge would surface before the real content
/// changes its collapsed parent points at.
pub struct DelayRewriteToEnd<G> {
    inner: G,
    held: VecDeque<RevCommitId>,
}

impl<G: Generator> DelayRewriteToEnd<G> {
    pub fn new(inner: G) -> Self {
        Self { inner, held: VecDeque::new() }
    }
}

impl<G: Generator> Generator for DelayRewriteToEnd<G> {
    fn next(&mut self, arena: &mut RevCommitArena) -> Result<Option<RevCommitId>, RevWalkError> {
        loop {
            match self.inner.next(arena)? {
                Some(id) => {
                    if arena.flags(id).contains(flags::REWRITE) {
                        self.held.push_back(id);
                        continue;
                    }
                    return Ok(Some(id));
                }
                None => return Ok(self.held.pop_front()),
            }
        }
    }

    fn output_type(&self) -> GeneratorFlags {
        self.inner.output_type()
    }
}

/// Buffers the entire upstream on first pull and emits it oldest-first.
pub struct ReverseGenerator<G> {
    inner: G,
    buffer: Option<Vec<RevCommitId>>,
}

impl<G: Generator> ReverseGenerator<G> {
    pub fn new(inner: G) -> Self {
        Self { inner, buffer: None }
    }
}

impl<G: Generator> Generator for ReverseGenerator<G> {
    fn next(&mut self, arena: &mut RevCommitArena) -> Result<Option<RevCommitId>, RevWalkError> {
        if self.buffer.is_none() {
            let mut buf = Vec::new();
            while let Some(id) = self.inner.next(arena)? {
                buf.push(id);
            }
            self.buffer = Some(buf);
        }
        Ok(self.buffer.as_mut().unwrap().pop())
    }

    fn output_type(&self) -> GeneratorFlags {
        self.inner.output_type() | GeneratorFlags::SORT_REVERSE
    }
}

/// What a [`RevFilter`] decides about one commit.
pub enum FilterResult {
    Include,
    Exclude,
    /// Nothing pulled afterward can matter either; stop the walk outright.
    StopWalk,
}

/// A pluggable predicate spliced into the pipeline above the raw commit
/// expansion, analogous to [`git_diff::tree::TreeFilter`] but over commits.
pub trait RevFilter {
    fn include(&mut self, arena: &mut RevCommitArena, id: RevCommitId) -> Result<FilterResult, RevWalkError>;
}

/// Applies a [`RevFilter`] to every commit pulled from `inner`.
pub struct FilteredGenerator<G, F> {
    inner: G,
    filter: F,
    stopped: bool,
}

impl<G: Generator, F: RevFilter> FilteredGenerator<G, F> {
    pub fn new(inner: G, filter: F) -> Self {
        Self { inner, filter, stopped: false }
    }
}

impl<G: Generator, F: RevFilter> Generator for FilteredGenerator<G, F> {
    fn next(&mut self, arena: &mut RevCommitArena) -> Result<Option<RevCommitId>, RevWalkError> {
        if self.stopped {
            return Ok(None);
        }
        loop {
            let Some(id) = self.inner.next(arena)? else { return Ok(None) };
            match self.filter.include(arena, id)? {
                FilterResult::Include => return Ok(Some(id)),
                FilterResult::Exclude => continue,
                FilterResult::StopWalk => {
                    self.stopped = true;
                    return Ok(None);
                }
            }
        }
    }

    fn output_type(&self) -> GeneratorFlags {
        self.inner.output_type()
    }
}

/// One allocatable color per start commit; a commit painted with every
/// color is reachable from every start, i.e. a common ancestor. Meant to be
/// paired with [`PendingGenerator::set_paint_mask`] so the colors propagate
/// to parents as the underlying expansion discovers them.
pub struct MergeBaseFilter {
    colors: Vec<RevFlag>,
    target: RevFlagSet,
}

impl MergeBaseFilter {
    /// `starts.len()` must not exceed the allocator's 7 free flags.
    pub fn new(allocator: &flags::RevFlagAllocator, starts: &[RevCommitId], arena: &mut RevCommitArena) -> Option<Self> {
        let mut colors = Vec::with_capacity(starts.len());
        let mut target = RevFlagSet::EMPTY;
        for &id in starts {
            let flag = allocator.allocate_flag()?;
            let mut set = RevFlagSet::EMPTY;
            set.set(flag);
            arena.set_flags(id, set);
            target.set(flag);
            colors.push(flag);
        }
        Some(Self { colors, target })
    }

    /// The mask [`PendingGenerator::set_paint_mask`] needs so these colors
    /// propagate down to parents.
    pub fn paint_mask(&self) -> RevFlagSet {
        let mut mask = RevFlagSet::EMPTY;
        for &c in &self.colors {
            mask.set(c);
        }
        mask
    }
}

impl RevFilter for MergeBaseFilter {
    fn include(&mut self, arena: &mut RevCommitArena, id: RevCommitId) -> Result<FilterResult, RevWalkError> {
        if arena.flags(id).contains(self.target) {
            Ok(FilterResult::Include)
        } else {
            Ok(FilterResult::Exclude)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit_graph::CommitGraph;
    use git_object::{Blob, Commit, Object, Tree};
    use git_repository::Repository;
    use git_utils::date::{GitDate, Signature};

    fn sig(t: i64) -> Signature {
        Signature {
            name: BString::from("A"),
            email: BString::from("a@b.com"),
            date: GitDate { timestamp: t, tz_offset: 0 },
        }
    }

    fn commit(repo: &Repository, parents: Vec<git_hash::ObjectId>, t: i64) -> git_hash::ObjectId {
        let tree = repo.odb().write(&Object::Tree(Tree::new())).unwrap();
        repo.odb()
            .write(&Object::Commit(Commit {
                tree,
                parents,
                author: sig(t),
                committer: sig(t),
                encoding: None,
                gpgsig: None,
                extra_headers: Vec::new(),
                message: BString::from("m"),
            }))
            .unwrap()
    }

    #[test]
    fn pending_generator_yields_in_commit_time_order() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let _ = repo.odb().write(&Object::Blob(Blob { data: vec![0] })).unwrap();

        let root = commit(&repo, vec![], 100);
        let mid = commit(&repo, vec![root], 200);
        let tip = commit(&repo, vec![mid], 300);

        let mut arena = RevCommitArena::new(&repo, None);
        let tip_id = arena.lookup_or_parse(tip).unwrap();

        let mut gen = PendingGenerator::new(false);
        gen.add_start(&mut arena, tip_id, false).unwrap();

        let mut order = Vec::new();
        while let Some(id) = gen.next(&mut arena).unwrap() {
            order.push(arena.oid(id));
        }
        assert_eq!(order, vec![tip, mid, root]);
    }

    #[test]
    fn uninteresting_ancestors_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let _ = repo.odb().write(&Object::Blob(Blob { data: vec![0] })).unwrap();

        let root = commit(&repo, vec![], 100);
        let hidden = commit(&repo, vec![root], 200);
        let tip = commit(&repo, vec![hidden], 300);

        let mut arena = RevCommitArena::new(&repo, None);
        let tip_id = arena.lookup_or_parse(tip).unwrap();
        let hidden_id = arena.lookup_or_parse(hidden).unwrap();

        let mut gen = PendingGenerator::new(false);
        gen.add_start(&mut arena, hidden_id, true).unwrap();
        gen.add_start(&mut arena, tip_id, false).unwrap();

        let mut order = Vec::new();
        while let Some(id) = gen.next(&mut arena).unwrap() {
            order.push(arena.oid(id));
        }
        assert_eq!(order, vec![tip]);
    }

    #[test]
    fn topo_sort_never_emits_parent_before_child() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let _ = repo.odb().write(&Object::Blob(Blob { data: vec![0] })).unwrap();

        let root = commit(&repo, vec![], 100);
        // Give the child an earlier commit_time than its parent to prove
        // topo order (not date order) is what's enforced here.
        let child = commit(&repo, vec![root], 50);

        let mut arena = RevCommitArena::new(&repo, None);
        let child_id = arena.lookup_or_parse(child).unwrap();

        let mut pending = PendingGenerator::new(false);
        pending.add_start(&mut arena, child_id, false).unwrap();
        let mut topo = TopoSortGenerator::new(pending);

        let first = topo.next(&mut arena).unwrap().unwrap();
        let second = topo.next(&mut arena).unwrap().unwrap();
        assert_eq!(arena.oid(first), child);
        assert_eq!(arena.oid(second), root);
        assert!(topo.next(&mut arena).unwrap().is_none());
    }

    #[test]
    fn reverse_generator_emits_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let _ = repo.odb().write(&Object::Blob(Blob { data: vec![0] })).unwrap();

        let root = commit(&repo, vec![], 100);
        let tip = commit(&repo, vec![root], 200);

        let mut arena = RevCommitArena::new(&repo, None);
        let tip_id = arena.lookup_or_parse(tip).unwrap();

        let mut pending = PendingGenerator::new(false);
        pending.add_start(&mut arena, tip_id, false).unwrap();
        let mut reversed = ReverseGenerator::new(pending);

        let first = reversed.next(&mut arena).unwrap().unwrap();
        let second = reversed.next(&mut arena).unwrap().unwrap();
        assert_eq!(arena.oid(first), root);
        assert_eq!(arena.oid(second), tip);
    }

    #[test]
    fn commit_graph_none_is_accepted() {
        // Sanity: arena works with no commit-graph (the common case in tests).
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let none: Option<CommitGraph> = None;
        let _arena = RevCommitArena::new(&repo, none);
    }

    fn blob(repo: &Repository, data: &[u8]) -> git_hash::ObjectId {
        repo.odb().write(&Object::Blob(Blob { data: data.to_vec() })).unwrap()
    }

    fn tree_with(repo: &Repository, entries: &[(&str, git_hash::ObjectId)]) -> git_hash::ObjectId {
        let tree = Tree {
            entries: entries
                .iter()
                .map(|(name, oid)| git_object::TreeEntry {
                    mode: git_object::FileMode::Regular,
                    name: BString::from(*name),
                    oid: *oid,
                })
                .collect(),
        };
        repo.odb().write(&Object::Tree(tree)).unwrap()
    }

    fn commit_with_tree(
        repo: &Repository,
        tree: git_hash::ObjectId,
        parents: Vec<git_hash::ObjectId>,
        t: i64,
    ) -> git_hash::ObjectId {
        repo.odb()
            .write(&Object::Commit(Commit {
                tree,
                parents,
                author: sig(t),
                committer: sig(t),
                encoding: None,
                gpgsig: None,
                extra_headers: Vec::new(),
                message: BString::from("m"),
            }))
            .unwrap()
    }

    /// spec.md's "commit that only adds files": a merge where neither parent
    /// is TREESAME, but one parent (`unrelated`) has no content at all under
    /// the pathspec. `RewriteGenerator` must cut that parent's ancestry
    /// rather than keep it around purely because of the merge.
    #[test]
    fn rewrite_generator_cuts_ancestry_of_parent_contributing_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        let empty_tree = tree_with(&repo, &[]);
        let root = commit_with_tree(&repo, empty_tree, vec![], 100);

        let foo_v1 = blob(&repo, b"foo v1");
        let adds_foo_tree = tree_with(&repo, &[("foo.txt", foo_v1)]);
        let adds_foo = commit_with_tree(&repo, adds_foo_tree, vec![root], 150);

        let bar = blob(&repo, b"bar");
        let unrelated_tree = tree_with(&repo, &[("bar.txt", bar)]);
        let unrelated = commit_with_tree(&repo, unrelated_tree, vec![root], 160);

        let foo_v2 = blob(&repo, b"foo v2 (merged)");
        let merge_tree = tree_with(&repo, &[("foo.txt", foo_v2), ("bar.txt", bar)]);
        let merge = commit_with_tree(&repo, merge_tree, vec![adds_foo, unrelated], 200);

        let mut arena = RevCommitArena::new(&repo, None);
        let merge_id = arena.lookup_or_parse(merge).unwrap();

        let mut pending = PendingGenerator::new(false);
        pending.add_start(&mut arena, merge_id, false).unwrap();
        let filter = RewriteTreeFilter::new(Some(vec![BString::from("foo.txt")]));
        let mut rewrite = RewriteGenerator::new(pending, filter);

        let first = rewrite.next(&mut arena).unwrap().unwrap();
        assert_eq!(first, merge_id);
        assert_eq!(arena.get(merge_id).parents, vec![arena.lookup_or_parse(adds_foo).unwrap()]);
        assert!(arena.flags(merge_id).contains(flags::REWRITE));
    }
}
