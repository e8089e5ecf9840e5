//! Binds one segment file (§4.2) to one index (§4.3).

mod file;
mod index;

pub(crate) use index::Location;
use index::{HashIndex, Index, SortedIndex};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use crate::codec::{self, Decoded};
use crate::config::IndexKind;
use crate::error::Result;
use file::SegmentFile;

/// What a per-segment query found for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RecordState {
    Value(Vec<u8>),
    Tombstone,
}

enum IndexImpl {
    Hash(HashIndex),
    Sorted(SortedIndex),
}

impl IndexImpl {
    fn new(kind: IndexKind) -> Self {
        match kind {
            IndexKind::Hash => IndexImpl::Hash(HashIndex::default()),
            IndexKind::Sorted => IndexImpl::Sorted(SortedIndex::default()),
        }
    }

    fn inner(&self) -> &dyn Index {
        match self {
            IndexImpl::Hash(h) => h,
            IndexImpl::Sorted(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Index {
        match self {
            IndexImpl::Hash(h) => h,
            IndexImpl::Sorted(s) => s,
        }
    }
}

/// One append-only segment: a file plus the index over it.
///
/// `file` and `index` are each independently lock-guarded so that
/// queries (read lock on both) never block behind each other, while the
/// single writer the engine serializes through takes both write locks
/// for the duration of one `append`.
pub(crate) struct Segment {
    id: u64,
    path: PathBuf,
    delimiter: Vec<u8>,
    max_segment_size: u64,
    file: RwLock<SegmentFile>,
    index: RwLock<IndexImpl>,
    full: AtomicBool,
    size: AtomicU64,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("full", &self.full.load(Ordering::Relaxed))
            .field("size", &self.size.load(Ordering::Relaxed))
            .finish()
    }
}

fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id:020}.seg"))
}

impl Segment {
    /// Creates a brand new, empty, active segment.
    pub(crate) fn create(
        dir: &Path,
        id: u64,
        max_segment_size: u64,
        delimiter: Vec<u8>,
        index_kind: IndexKind,
    ) -> Result<Self> {
        let path = segment_path(dir, id);
        let file = SegmentFile::create(&path)?;
        Ok(Self {
            id,
            path,
            delimiter,
            max_segment_size,
            file: RwLock::new(file),
            index: RwLock::new(IndexImpl::new(index_kind)),
            full: AtomicBool::new(false),
            size: AtomicU64::new(0),
        })
    }

    /// Opens an existing segment file at `path` (named `<id>.seg`) and
    /// rebuilds its index by replaying every blob sequentially. Used by
    /// the startup recovery scan. The reopened segment is immediately
    /// sealed unless `id == active_id`.
    pub(crate) fn recover(
        path: PathBuf,
        id: u64,
        delimiter: Vec<u8>,
        index_kind: IndexKind,
        max_segment_size: u64,
        is_active: bool,
    ) -> Result<Self> {
        let file = SegmentFile::open(&path)?;
        let mut index = IndexImpl::new(index_kind);
        for (offset, blob) in file.scan(&delimiter)? {
            let decoded = codec::decode(&blob)?;
            index.inner_mut().store(
                decoded.key().to_vec(),
                Location {
                    offset,
                    size: blob.len() as u64,
                },
            );
        }
        let size = file.size();
        let full = !is_active || size > max_segment_size;
        Ok(Self {
            id,
            path,
            delimiter,
            max_segment_size,
            file: RwLock::new(file),
            index: RwLock::new(index),
            full: AtomicBool::new(full),
            size: AtomicU64::new(size),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub(crate) fn is_full(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }

    /// Forces the full latch. Used by the compactor on its freshly built
    /// output segment once it is complete.
    pub(crate) fn seal(&self) {
        self.full.store(true, Ordering::Release);
    }

    pub(crate) fn len(&self) -> usize {
        self.index.read().unwrap().inner().len()
    }

    fn append_blob(&self, blob: &[u8], key: &[u8]) -> Result<()> {
        let offset = {
            let mut file = self.file.write().unwrap();
            let offset = file.append(blob, &self.delimiter)?;
            self.size.store(file.size(), Ordering::Release);
            offset
        };
        self.index.write().unwrap().inner_mut().store(
            key.to_vec(),
            Location {
                offset,
                size: blob.len() as u64,
            },
        );
        if self.size.load(Ordering::Acquire) > self.max_segment_size {
            self.full.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Encodes and appends `(key, value)`. Atomic w.r.t. other appends on
    /// this segment under the single-writer assumption the engine
    /// enforces externally.
    pub(crate) fn append(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let blob = codec::encode(key, value);
        self.append_blob(&blob, key)
    }

    /// Encodes and appends a tombstone for `key`.
    pub(crate) fn append_tombstone(&self, key: &[u8]) -> Result<()> {
        let blob = codec::encode_tombstone(key);
        self.append_blob(&blob, key)
    }

    /// Looks up `key` in this segment only. `Ok(None)` is the
    /// `NotFoundInSegment` signal from spec §7 — never surfaced past the
    /// engine's newest-to-oldest walk.
    pub(crate) fn query(&self, key: &[u8]) -> Result<Option<RecordState>> {
        let location = { self.index.read().unwrap().inner().query(key) };
        let Some(location) = location else {
            return Ok(None);
        };
        let blob = self.file.read().unwrap().read_at(location.offset, location.size)?;
        match codec::decode(&blob)? {
            Decoded::Value(decoded_key, value) => {
                debug_assert_eq!(decoded_key, key, "index fidelity violated");
                Ok(Some(RecordState::Value(value)))
            }
            Decoded::Tombstone(decoded_key) => {
                debug_assert_eq!(decoded_key, key, "index fidelity violated");
                Ok(Some(RecordState::Tombstone))
            }
        }
    }

    /// All records in this segment, in the index's natural order
    /// (ascending key for `SortedIndex`, offset order for `HashIndex`).
    /// Used by the compactor's k-way merge.
    pub(crate) fn iter_records(&self) -> Result<Vec<Decoded>> {
        let entries = self.index.read().unwrap().inner().iter_in_file_order();
        let file = self.file.read().unwrap();
        entries
            .into_iter()
            .map(|(_, loc)| {
                let blob = file.read_at(loc.offset, loc.size)?;
                codec::decode(&blob)
            })
            .collect()
    }

    pub(crate) fn delete_file(&self) -> std::io::Result<()> {
        SegmentFile::delete(&self.path)
    }

    /// Flushes this segment's file to disk. Called on every segment
    /// during `Engine::shutdown`.
    pub(crate) fn close(&self) -> Result<()> {
        self.file.read().unwrap().sync()
    }
}
