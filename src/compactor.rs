//! Background merge-and-compaction worker (spec §4.7).
//!
//! Grounded on the *intent* of `original_source/internal/storage/mergecompaction/merge.go`'s
//! `WatchSet::RunJob` (a loop woken by a dirty flag that merge-sorts
//! frozen segments into a fresh one) without inheriting its
//! `getNextElement`/`readNext` implementation, which that file's own
//! trailing comment admits "doesn't merge" — we build the k-way merge
//! spec.md §4.7 actually asks for.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::codec::Decoded;
use crate::config::IndexKind;
use crate::engine::EngineInner;
use crate::error::Result;
use crate::segment::Segment;

/// Low-frequency poll interval used when no wake-up signal arrives —
/// spec §4.7's "may also poll at a low frequency".
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub(crate) struct Compactor {
    handle: Option<JoinHandle<()>>,
}

impl Compactor {
    pub(crate) fn spawn(inner: Arc<EngineInner>, wake_rx: Receiver<()>) -> Self {
        let handle = std::thread::Builder::new()
            .name("segkv-compactor".into())
            .spawn(move || run(inner, wake_rx))
            .expect("failed to spawn compactor thread");
        Self {
            handle: Some(handle),
        }
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(inner: Arc<EngineInner>, wake_rx: Receiver<()>) {
    loop {
        if inner.is_shutting_down() {
            return;
        }

        match wake_rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {
                drain_retired(&inner);
                match run_one_merge(&inner) {
                    Ok(true) => log::debug!("compaction: merged a run of frozen segments"),
                    Ok(false) => {}
                    Err(e) => log::warn!("compaction attempt abandoned: {e}"),
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Attempts to delete the backing file of any retired segment no longer
/// referenced by any live snapshot (spec §4.5: "deleted from disk only
/// after the last snapshot referencing them is released").
fn drain_retired(inner: &EngineInner) {
    let mut retiring = inner.retiring.lock().unwrap();
    retiring.retain(|segment| {
        if Arc::strong_count(segment) > 1 {
            return true;
        }
        if let Err(e) = segment.delete_file() {
            log::warn!("failed to delete retired segment {}: {e}", segment.id());
        } else {
            log::trace!("deleted retired segment {}", segment.id());
        }
        false
    });
}

/// Runs one merge pass. Returns `Ok(true)` if a merge happened,
/// `Ok(false)` if there weren't enough frozen segments to bother with.
fn run_one_merge(inner: &EngineInner) -> Result<bool> {
    let snapshot = inner.list.snapshot();
    if snapshot.len() < 2 {
        return Ok(false);
    }
    // every segment but the rightmost (active) one is frozen, per the
    // segment-list invariant in spec §3.
    let frozen = &snapshot[..snapshot.len() - 1];
    if frozen.len() < 2 {
        return Ok(false);
    }

    let oldest_id = frozen.first().unwrap().id();
    let newest_id = frozen.last().unwrap().id();

    let merged = match build_merged_segment(inner, frozen) {
        Ok(segment) => segment,
        Err(e) => return Err(e),
    };
    merged.seal();

    let replaced = inner
        .list
        .replace_range(oldest_id, newest_id, Arc::new(merged));
    drop(snapshot);

    inner.retiring.lock().unwrap().extend(replaced);
    Ok(true)
}

/// Builds the compactor's output segment *M* by a k-way merge over
/// `frozen`'s records (oldest to newest). On any failure the partially
/// written file is deleted and the error propagated; the segment list is
/// never touched in that case (spec §4.7 failure semantics).
fn build_merged_segment(inner: &EngineInner, frozen: &[Arc<Segment>]) -> Result<Segment> {
    let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
    let merged = Segment::create(
        &inner.config.data_dir,
        id,
        inner.config.max_segment_size_bytes,
        inner.config.delimiter_bytes.clone(),
        IndexKind::Sorted,
    )?;

    match merge_into(&merged, frozen) {
        Ok(()) => Ok(merged),
        Err(e) => {
            let _ = merged.delete_file();
            Err(e)
        }
    }
}

struct Cursor {
    records: Vec<Decoded>,
    pos: usize,
    rank: usize,
}

impl Cursor {
    fn peek(&self) -> Option<&Decoded> {
        self.records.get(self.pos)
    }
}

struct HeapItem {
    key: Vec<u8>,
    rank: usize,
    cursor_idx: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.rank == other.rank
    }
}
impl Eq for HeapItem {}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse key order to pop the
        // lexicographically smallest key first, then prefer the newer
        // (higher-rank) segment when keys tie.
        other.key.cmp(&self.key).then(self.rank.cmp(&other.rank))
    }
}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Streaming k-way merge: newest source wins for a given key; a
/// tombstone that wins is dropped rather than carried forward, since
/// nothing in `frozen` (and nothing compaction ever sees) can be older
/// than it, and the active segment — the only thing that could be
/// newer — is never part of a merge set.
fn merge_into(output: &Segment, frozen: &[Arc<Segment>]) -> Result<()> {
    let mut cursors = Vec::with_capacity(frozen.len());
    for (rank, segment) in frozen.iter().enumerate() {
        let mut records = segment.iter_records()?;
        records.sort_by(|a, b| a.key().cmp(b.key()));
        cursors.push(Cursor {
            records,
            pos: 0,
            rank,
        });
    }

    let mut heap = BinaryHeap::new();
    for (idx, cursor) in cursors.iter().enumerate() {
        if let Some(rec) = cursor.peek() {
            heap.push(HeapItem {
                key: rec.key().to_vec(),
                rank: cursor.rank,
                cursor_idx: idx,
            });
        }
    }

    while let Some(top) = heap.pop() {
        let min_key = top.key.clone();
        let mut candidates = vec![top];
        while let Some(next) = heap.peek() {
            if next.key == min_key {
                candidates.push(heap.pop().unwrap());
            } else {
                break;
            }
        }

        let mut winner: Option<Decoded> = None;
        let mut winner_rank: Option<usize> = None;
        for item in &candidates {
            let cursor = &mut cursors[item.cursor_idx];
            let record = cursor.records[cursor.pos].clone();
            cursor.pos += 1;

            if winner_rank.map_or(true, |wr| item.rank > wr) {
                winner_rank = Some(item.rank);
                winner = Some(record);
            }

            if let Some(next_rec) = cursor.peek() {
                heap.push(HeapItem {
                    key: next_rec.key().to_vec(),
                    rank: cursor.rank,
                    cursor_idx: item.cursor_idx,
                });
            }
        }

        match winner.expect("at least one candidate per popped key") {
            Decoded::Value(key, value) => output.append(&key, &value)?,
            Decoded::Tombstone(_) => {}
        }
    }

    Ok(())
}
