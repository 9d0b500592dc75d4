//! Building a `.idx` from a raw `.pack`.
//!
//! Mirrors `git index-pack`: a single forward pass over entry headers
//! (running zlib to EOF without materializing each object) establishes
//! every entry's offset and compressed span; a resolve pass turns those
//! spans into `(oid, offset, crc32)` triples, applying deltas as their
//! bases become known; a fixed-point loop handles REF_DELTA entries whose
//! base appears later in the pack or not at all; and, for thin packs, an
//! external resolver supplies the missing bases, which get appended to
//! the pack itself so the result is self-contained.
//!
//! Grounded on `write::PackWriter`'s "hash as you go, fix up the header
//! and trailer afterward" approach and on `git_utils::lockfile::LockFile`'s
//! write-to-`.lock`-then-atomically-rename discipline, used here in place
//! of a hand-rolled `.pack_tmp`/`.idx_tmp` scheme.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::bufread::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use git_hash::hasher::Hasher;
use git_hash::{HashAlgorithm, ObjectId};
use git_object::ObjectType;
use git_utils::lockfile::LockFile;

use crate::entry::{encode_entry_header, parse_entry_header};
use crate::generate::ObjectResolver;
use crate::write::encode_pack_index;
use crate::{
    IndexVersion, PackEntryType, PackError, PACK_HEADER_SIZE, PACK_SIGNATURE, PACK_VERSION,
};

/// Lets a long-running index run be polled for cancellation and report
/// progress, generalizing `git_utils::progress::Progress`'s display loop
/// into something a caller can also use to abort.
pub trait ProgressMonitor {
    fn update(&self, _done: u32, _total: u32) {}
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A monitor that never cancels and reports nothing.
pub struct NullProgress;

impl ProgressMonitor for NullProgress {}

/// Outcome of a successful indexing run.
#[derive(Debug)]
pub struct IndexResult {
    pub pack_path: PathBuf,
    pub idx_path: PathBuf,
    pub pack_checksum: ObjectId,
    pub num_objects: u32,
}

/// One entry located by the header-only forward pass.
struct RawEntry {
    offset: u64,
    entry_type: PackEntryType,
    compressed_start: u64,
    compressed_len: usize,
}

/// A fully resolved object: its type, bytes, and CRC32 of its raw pack entry.
struct Resolved {
    obj_type: ObjectType,
    data: Vec<u8>,
    crc32: u32,
}

/// Builds a `.idx` for a `.pack`, resolving deltas and fixing thin packs.
pub struct PackIndexer<'a> {
    version: IndexVersion,
    thin_resolver: Option<&'a dyn ObjectResolver>,
}

impl<'a> Default for PackIndexer<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> PackIndexer<'a> {
    pub fn new() -> Self {
        Self {
            version: IndexVersion::V2,
            thin_resolver: None,
        }
    }

    /// Request a specific index version. v2 is still forced if any offset
    /// needs the 64-bit overflow table.
    pub fn with_version(mut self, version: IndexVersion) -> Self {
        self.version = version;
        self
    }

    /// Supply a resolver for REF_DELTA bases absent from the pack itself.
    /// Required to index a thin pack; without it, an unresolvable REF_DELTA
    /// is reported as [`PackError::MissingBase`].
    pub fn with_thin_resolver(mut self, resolver: &'a dyn ObjectResolver) -> Self {
        self.thin_resolver = Some(resolver);
        self
    }

    /// Index `pack_path` in place, writing `<pack>.idx` beside it.
    ///
    /// Both files are written through a [`LockFile`] on their final path —
    /// built under `<path>.lock` and atomically renamed in on success,
    /// removed on any error or on [`ProgressMonitor::is_cancelled`].
    pub fn run(
        &self,
        pack_path: &Path,
        monitor: &dyn ProgressMonitor,
    ) -> Result<IndexResult, PackError> {
        let idx_path = pack_path.with_extension("idx");

        let mut raw = std::fs::read(pack_path)?;
        let (trailer_start, declared_count) = self.parse_header(&raw)?;

        // Step 2: single forward pass over entry headers, decompressing
        // each just far enough to find where the next header starts.
        let mut entries = Vec::with_capacity(declared_count as usize);
        let mut offset = PACK_HEADER_SIZE as u64;
        for seen in 0..declared_count {
            if monitor.is_cancelled() {
                self.cleanup(&idx_path, pack_path);
                return Err(PackError::Cancelled);
            }
            let header = parse_entry_header(&raw[offset as usize..trailer_start as usize], offset)?;
            let compressed_start = header.data_offset;
            let compressed_len =
                compressed_span(&raw[compressed_start as usize..trailer_start as usize], offset)?;
            entries.push(RawEntry {
                offset,
                entry_type: header.entry_type,
                compressed_start,
                compressed_len,
            });
            offset = compressed_start + compressed_len as u64;
            monitor.update(seen + 1, declared_count);
        }

        // Step 3: verify the trailer against everything read so far.
        let trailer = &raw[offset as usize..offset as usize + 20];
        let mut hasher = Hasher::new(HashAlgorithm::Sha1);
        hasher.update(&raw[..offset as usize]);
        let computed = hasher.finalize().map_err(PackError::Hash)?;
        if computed.as_bytes() != trailer {
            self.cleanup(&idx_path, pack_path);
            return Err(PackError::ChecksumMismatch {
                expected: ObjectId::from_bytes(trailer, HashAlgorithm::Sha1)
                    .unwrap_or(computed),
                actual: computed,
            });
        }
        let mut pack_checksum = computed;

        // Steps 4-5: resolve non-delta entries and OFS_DELTA chains on the
        // first pass (their bases always precede them in the file); queue
        // REF_DELTA entries whose base isn't known yet for a fixed-point
        // retry loop.
        let mut resolved: HashMap<u64, Resolved> = HashMap::new();
        let mut oid_to_offset: HashMap<ObjectId, u64> = HashMap::new();
        let mut pending: Vec<usize> = Vec::new();

        for (i, e) in entries.iter().enumerate() {
            match self.try_resolve(&raw, e, &resolved, &oid_to_offset) {
                Some(resolved_entry) => {
                    let oid =
                        Hasher::hash_object(HashAlgorithm::Sha1, &resolved_entry.obj_type.to_string(), &resolved_entry.data)
                            .map_err(PackError::Hash)?;
                    oid_to_offset.insert(oid, e.offset);
                    resolved.insert(e.offset, resolved_entry);
                }
                None => pending.push(i),
            }
        }

        loop {
            let mut progressed = false;
            let mut still_pending = Vec::new();
            for i in pending {
                let e = &entries[i];
                match self.try_resolve(&raw, e, &resolved, &oid_to_offset) {
                    Some(resolved_entry) => {
                        let oid = Hasher::hash_object(
                            HashAlgorithm::Sha1,
                            &resolved_entry.obj_type.to_string(),
                            &resolved_entry.data,
                        )
                        .map_err(PackError::Hash)?;
                        oid_to_offset.insert(oid, e.offset);
                        resolved.insert(e.offset, resolved_entry);
                        progressed = true;
                    }
                    None => still_pending.push(i),
                }
            }
            pending = still_pending;
            if pending.is_empty() || !progressed {
                break;
            }
        }

        // Step 6: thin-pack fix. Anything still pending is a REF_DELTA
        // whose base isn't in the pack; ask the external resolver. Each
        // distinct external base gets appended once as a new non-delta
        // entry, then the REF_DELTAs that needed it resolve normally.
        if !pending.is_empty() {
            let resolver = self.thin_resolver.ok_or_else(|| {
                let base = match entries[pending[0]].entry_type {
                    PackEntryType::RefDelta { base_oid } => base_oid,
                    _ => ObjectId::NULL_SHA1,
                };
                PackError::MissingBase(base)
            })?;

            let mut appended_count = 0u32;
            loop {
                let mut progressed = false;
                let mut still_pending = Vec::new();
                for i in pending {
                    let e = &entries[i];
                    let base_oid = match e.entry_type {
                        PackEntryType::RefDelta { base_oid } => base_oid,
                        _ => {
                            // Shouldn't happen: only REF_DELTA stays unresolved
                            // past the in-pack fixed point.
                            still_pending.push(i);
                            continue;
                        }
                    };
                    if !oid_to_offset.contains_key(&base_oid) {
                        match resolver.read_object(&base_oid)? {
                            Some(obj) => {
                                let append_offset = raw.len() as u64 - 20; // before old trailer
                                let crc32 = append_object(&mut raw, obj.obj_type, &obj.data)?;
                                resolved.insert(
                                    append_offset,
                                    Resolved {
                                        obj_type: obj.obj_type,
                                        data: obj.data,
                                        crc32,
                                    },
                                );
                                oid_to_offset.insert(base_oid, append_offset);
                                appended_count += 1;
                            }
                            None => {
                                self.cleanup(&idx_path, pack_path);
                                return Err(PackError::MissingBase(base_oid));
                            }
                        }
                    }
                    match self.try_resolve(&raw, e, &resolved, &oid_to_offset) {
                        Some(resolved_entry) => {
                            let oid = Hasher::hash_object(
                                HashAlgorithm::Sha1,
                                &resolved_entry.obj_type.to_string(),
                                &resolved_entry.data,
                            )
                            .map_err(PackError::Hash)?;
                            oid_to_offset.insert(oid, e.offset);
                            resolved.insert(e.offset, resolved_entry);
                            progressed = true;
                        }
                        None => still_pending.push(i),
                    }
                }
                pending = still_pending;
                if pending.is_empty() {
                    break;
                }
                if !progressed {
                    let base = match entries[pending[0]].entry_type {
                        PackEntryType::RefDelta { base_oid } => base_oid,
                        _ => ObjectId::NULL_SHA1,
                    };
                    self.cleanup(&idx_path, pack_path);
                    return Err(PackError::MissingBase(base));
                }
            }

            if appended_count > 0 {
                // Rewrite the object count and recompute the trailer: the
                // pack is no longer thin.
                let new_count = declared_count + appended_count;
                raw[8..12].copy_from_slice(&new_count.to_be_bytes());
                raw.truncate(raw.len() - 20);
                let mut hasher = Hasher::new(HashAlgorithm::Sha1);
                hasher.update(&raw);
                pack_checksum = hasher.finalize().map_err(PackError::Hash)?;
                raw.extend_from_slice(pack_checksum.as_bytes());
            }
        }

        // Step 7: write the final pack and index, sorted by oid.
        let mut idx_entries: Vec<(ObjectId, u64, u32)> = Vec::with_capacity(resolved.len());
        for (&offset, r) in resolved.iter() {
            let oid = Hasher::hash_object(HashAlgorithm::Sha1, &r.obj_type.to_string(), &r.data)
                .map_err(PackError::Hash)?;
            idx_entries.push((oid, offset, r.crc32));
        }
        idx_entries.sort_by(|a, b| a.0.cmp(&b.0));
        let num_objects = idx_entries.len() as u32;

        let idx_bytes = encode_pack_index(&idx_entries, &pack_checksum, self.version)?;

        let mut pack_lock = LockFile::acquire(pack_path)?;
        std::io::Write::write_all(&mut pack_lock, &raw)?;
        pack_lock.commit()?;

        let mut idx_lock = LockFile::acquire(&idx_path)?;
        std::io::Write::write_all(&mut idx_lock, &idx_bytes)?;
        idx_lock.commit()?;

        Ok(IndexResult {
            pack_path: pack_path.to_path_buf(),
            idx_path,
            pack_checksum,
            num_objects,
        })
    }

    fn parse_header(&self, raw: &[u8]) -> Result<(u64, u32), PackError> {
        if raw.len() < PACK_HEADER_SIZE + 20 {
            return Err(PackError::InvalidHeader("file too small".into()));
        }
        if &raw[0..4] != PACK_SIGNATURE {
            return Err(PackError::InvalidHeader("bad PACK signature".into()));
        }
        let version = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let count = u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]);
        let trailer_start = raw.len() as u64 - 20;
        Ok((trailer_start, count))
    }

    /// Try to turn one raw entry into a resolved object, given what's
    /// resolved so far. Returns `None` if its base isn't available yet.
    /// `oid_to_offset` lets a `REF_DELTA`'s base be found by one map lookup
    /// instead of rehashing every already-resolved object on each call.
    fn try_resolve(
        &self,
        raw: &[u8],
        e: &RawEntry,
        resolved: &HashMap<u64, Resolved>,
        oid_to_offset: &HashMap<ObjectId, u64>,
    ) -> Option<Resolved> {
        let header_bytes = &raw[e.offset as usize..e.compressed_start as usize];
        let compressed =
            &raw[e.compressed_start as usize..(e.compressed_start as usize + e.compressed_len)];
        let mut crc_hasher = crc32fast::Hasher::new();
        crc_hasher.update(header_bytes);
        crc_hasher.update(compressed);
        let crc32 = crc_hasher.finalize();

        match e.entry_type {
            PackEntryType::Commit | PackEntryType::Tree | PackEntryType::Blob | PackEntryType::Tag => {
                let obj_type = e.entry_type.to_object_type().expect("non-delta type");
                let data = decompress(compressed).ok()?;
                Some(Resolved { obj_type, data, crc32 })
            }
            PackEntryType::OfsDelta { base_offset } => {
                let base = resolved.get(&base_offset)?;
                let delta = decompress(compressed).ok()?;
                let data = crate::delta::apply::apply_delta(&base.data, &delta).ok()?;
                Some(Resolved { obj_type: base.obj_type, data, crc32 })
            }
            PackEntryType::RefDelta { base_oid } => {
                let base_offset = oid_to_offset.get(&base_oid)?;
                let base = resolved.get(base_offset)?;
                let delta = decompress(compressed).ok()?;
                let data = crate::delta::apply::apply_delta(&base.data, &delta).ok()?;
                Some(Resolved { obj_type: base.obj_type, data, crc32 })
            }
        }
    }

    fn cleanup(&self, idx_path: &Path, pack_path: &Path) {
        let _ = std::fs::remove_file(format!("{}.lock", idx_path.display()));
        let _ = std::fs::remove_file(format!("{}.lock", pack_path.display()));
    }
}

/// Run zlib decompression far enough to find the compressed span's length,
/// without caring about the decompressed bytes. Used during the header-only
/// forward pass so the whole pack need not be materialized twice.
fn compressed_span(data: &[u8], offset: u64) -> Result<usize, PackError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut sink = std::io::sink();
    std::io::copy(&mut decoder, &mut sink).map_err(|_| PackError::CorruptEntry(offset))?;
    Ok(decoder.total_in() as usize)
}

fn decompress(compressed: &[u8]) -> Result<Vec<u8>, PackError> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut buf = Vec::new();
    decoder
        .read_to_end(&mut buf)
        .map_err(|_| PackError::CorruptEntry(0))?;
    Ok(buf)
}

/// Append `data` as a new non-delta entry just before the pack trailer,
/// returning the CRC32 of its raw (header + compressed) bytes.
fn append_object(raw: &mut Vec<u8>, obj_type: ObjectType, data: &[u8]) -> Result<u32, PackError> {
    let type_num = match obj_type {
        ObjectType::Commit => 1,
        ObjectType::Tree => 2,
        ObjectType::Blob => 3,
        ObjectType::Tag => 4,
    };
    let header = encode_entry_header(type_num, data.len() as u64);

    let mut compressed = Vec::new();
    {
        let mut encoder = ZlibEncoder::new(&mut compressed, Compression::default());
        std::io::Write::write_all(&mut encoder, data)?;
        encoder.finish()?;
    }

    let insert_at = raw.len() - 20;
    let mut crc_hasher = crc32fast::Hasher::new();
    crc_hasher.update(&header);
    crc_hasher.update(&compressed);
    let crc32 = crc_hasher.finalize();

    let mut appended = Vec::with_capacity(header.len() + compressed.len());
    appended.extend_from_slice(&header);
    appended.extend_from_slice(&compressed);
    raw.splice(insert_at..insert_at, appended);

    Ok(crc32)
}
