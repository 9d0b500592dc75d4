//! Process-wide bounded cache of mapped pack regions ("windows").
//!
//! Pack reads go through here when a [`WindowCache`] is configured: each
//! read asks for a byte-aligned slice of a pack file and gets back a
//! [`Cursor`], a short-lived loan scoped to the call. The cache never holds
//! its lock across I/O — it checks for a hit under the lock, releases it,
//! maps or reads the window without the lock held, then re-acquires to
//! insert. A concurrent miss on the same window is tolerated: the second
//! insert just replaces the first in the LRU.
//!
//! Grounded on `git_object::cache::ObjectCache`'s `lru::LruCache` usage,
//! generalized from entry-count bounding to a manually tracked byte budget.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher as _};
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use memmap2::{Mmap, MmapOptions};

use crate::PackError;

/// Default page alignment for windows, matching `pack.packedGitWindowSize`'s
/// usual default.
pub const DEFAULT_WINDOW_SIZE: u64 = 8 * 1024;

/// Identity of a pack file within a [`WindowCache`], independent of its path
/// (two `PackId`s referring to the same pack compare equal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackId(u64);

impl PackId {
    /// Derive a stable id from a pack's path.
    pub fn from_path(path: &Path) -> Self {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        Self(hasher.finish())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct WindowKey {
    pack: PackId,
    aligned_start: u64,
}

/// Backing storage for one window's bytes, held behind an `Arc` so a
/// [`Cursor`] is just a clone of a shared pointer — pin-counting falls out
/// of `Arc::strong_count` rather than a hand-rolled counter.
enum WindowData {
    Mapped(Mmap),
    Heap(Vec<u8>),
}

impl Deref for WindowData {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(m) => m,
            Self::Heap(v) => v,
        }
    }
}

struct Window {
    data: Arc<WindowData>,
    /// Absolute offset in the pack file where this window begins.
    start: u64,
}

/// How a [`WindowCache`] backs its windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// `mmap` the window range; the OS pages it in on demand.
    Mmap,
    /// Eagerly read the window range into a heap buffer.
    Heap,
}

/// A read-scoped loan of one window's bytes. Not an owned region: it is a
/// clone of the window's `Arc`, so dropping it only decrements a refcount.
/// No cursor may be held across blocking I/O — callers that need another
/// window call [`WindowCache::cursor`] again rather than retaining this one.
pub struct Cursor {
    data: Arc<WindowData>,
    /// Offset of the requested range relative to the window start.
    rel_start: usize,
    len: usize,
}

impl Deref for Cursor {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.data[self.rel_start..self.rel_start + self.len]
    }
}

struct Inner {
    windows: lru::LruCache<WindowKey, Window>,
    resident_bytes: u64,
    max_bytes: u64,
    window_size: u64,
    backing: Backing,
}

/// Process-wide, explicitly byte-budgeted cache of pack windows.
///
/// Configuration mirrors `pack.windowSize`/`core.packedGitLimit`/
/// `core.packedGitMMAP`: a window alignment, a total resident
/// byte budget, and a backing mode. The `lru` crate bounds by entry count,
/// so this cache additionally tracks total resident bytes and evicts LRU
/// entries past budget before inserting — the same capacity check
/// `ObjectCache::insert` already does one level up, generalized to bytes.
pub struct WindowCache {
    inner: Mutex<Inner>,
}

impl WindowCache {
    /// Create a cache with the given byte budget, window alignment, and
    /// backing mode.
    pub fn new(max_bytes: u64, window_size: u64, backing: Backing) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                // entry count is uncapped by `lru` itself; the byte budget
                // below is the real limit, enforced manually on insert.
                windows: lru::LruCache::new(NonZeroUsize::new(usize::MAX).unwrap()),
                resident_bytes: 0,
                max_bytes,
                window_size: window_size.max(1),
                backing,
            }),
        })
    }

    /// Borrow `len` bytes starting at `offset` within the pack identified by
    /// `pack_id`, reading `path` if the covering window isn't cached yet.
    pub fn cursor(
        &self,
        pack_id: PackId,
        path: &Path,
        offset: u64,
        len: usize,
    ) -> Result<Cursor, PackError> {
        let window_size = self.inner.lock().unwrap().window_size;
        let aligned_start = (offset / window_size) * window_size;
        let key = WindowKey { pack: pack_id, aligned_start };

        // Fast path: lock, check for a hit, release.
        if let Some(cursor) = self.try_hit(&key, offset, len) {
            return Ok(cursor);
        }

        // Miss: map/read without holding the lock.
        let backing = self.inner.lock().unwrap().backing;
        let covering_len = window_size.max((offset - aligned_start) + len as u64);
        let data = Arc::new(load_window(path, aligned_start, covering_len, backing)?);
        let resident = data.len() as u64;

        // Re-acquire to insert; a racing concurrent miss is harmless, the
        // second insert simply replaces the first.
        {
            let mut inner = self.inner.lock().unwrap();
            evict_to_budget(&mut inner, resident);
            inner.resident_bytes += resident;
            if let Some(evicted) = inner.windows.put(
                key,
                Window { data: Arc::clone(&data), start: aligned_start },
            ) {
                inner.resident_bytes = inner.resident_bytes.saturating_sub(evicted.data.len() as u64);
            }
        }

        let rel_start = (offset - aligned_start) as usize;
        Ok(Cursor { data, rel_start, len })
    }

    fn try_hit(&self, key: &WindowKey, offset: u64, len: usize) -> Option<Cursor> {
        let mut inner = self.inner.lock().unwrap();
        let window = inner.windows.get(key)?;
        let rel_start = (offset - window.start) as usize;
        if rel_start + len > window.data.len() {
            return None;
        }
        Some(Cursor { data: Arc::clone(&window.data), rel_start, len })
    }

    /// Total bytes currently resident across all cached windows.
    pub fn resident_bytes(&self) -> u64 {
        self.inner.lock().unwrap().resident_bytes
    }

    /// Number of windows currently cached.
    pub fn window_count(&self) -> usize {
        self.inner.lock().unwrap().windows.len()
    }
}

fn evict_to_budget(inner: &mut Inner, incoming: u64) {
    while inner.resident_bytes + incoming > inner.max_bytes {
        match inner.windows.pop_lru() {
            Some((_, window)) => {
                inner.resident_bytes = inner.resident_bytes.saturating_sub(window.data.len() as u64);
            }
            None => break,
        }
    }
}

fn load_window(path: &Path, start: u64, len: u64, backing: Backing) -> Result<WindowData, PackError> {
    use std::io::{Read, Seek, SeekFrom};

    let mut file = std::fs::File::open(path)?;
    let file_len = file.metadata()?.len();
    let end = (start + len).min(file_len);
    let slice_len = (end - start) as usize;

    match backing {
        Backing::Mmap => {
            // Map only the covering range, not the whole file: `resident`
            // (derived from this data's length) must reflect the window's
            // size, not the pack's, or the byte budget in `Inner` never
            // actually bounds anything once one pack exceeds `max_bytes`.
            // `MmapOptions` rounds `start` down to the platform's allocation
            // granularity internally and adjusts the returned slice so it
            // still starts exactly at `start` and is exactly `slice_len`
            // long — the same window `[start, start + slice_len)` the
            // `Heap` branch below reads.
            if slice_len == 0 {
                return Ok(WindowData::Heap(Vec::new()));
            }
            let mmap = unsafe {
                MmapOptions::new().offset(start).len(slice_len).map(&file)?
            };
            Ok(WindowData::Mapped(mmap))
        }
        Backing::Heap => {
            file.seek(SeekFrom::Start(start))?;
            let mut buf = vec![0u8; slice_len];
            file.read_exact(&mut buf)?;
            Ok(WindowData::Heap(buf))
        }
    }
}
