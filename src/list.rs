//! Ordered, concurrent-safe segment list (spec §4.5).
//!
//! Modeled as copy-on-write over an immutable vector, per spec §9's
//! Design Notes preference over a shared-mutable linked list with back
//! pointers. `snapshot()` clones the outer `Arc`, a single atomic
//! increment; the segments it contains, and therefore their open files,
//! stay alive for as long as any snapshot (or the live list) still
//! references them, regardless of how many `replace_range` calls happen
//! in between.

use std::sync::{Arc, RwLock};

use crate::segment::Segment;

/// A point-in-time, oldest-first view of the segment list. Holding one
/// keeps every segment in it alive even if the live list moves on.
pub(crate) type Snapshot = Arc<Vec<Arc<Segment>>>;

pub(crate) struct SegmentList {
    inner: RwLock<Snapshot>,
}

impl SegmentList {
    pub(crate) fn new(segments: Vec<Arc<Segment>>) -> Self {
        Self {
            inner: RwLock::new(Arc::new(segments)),
        }
    }

    /// The current rightmost (active) segment.
    pub(crate) fn active(&self) -> Arc<Segment> {
        let snapshot = self.inner.read().unwrap();
        snapshot
            .last()
            .cloned()
            .expect("segment list must always have an active segment")
    }

    /// A reference-counted, oldest-first view of the whole list as it
    /// stands right now.
    pub(crate) fn snapshot(&self) -> Snapshot {
        self.inner.read().unwrap().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    /// Appends `segment` as the new rightmost (active) segment.
    pub(crate) fn append_right(&self, segment: Arc<Segment>) {
        let mut guard = self.inner.write().unwrap();
        let mut next = (**guard).clone();
        next.push(segment);
        *guard = Arc::new(next);
    }

    /// Atomically substitutes the contiguous run of segments whose ids
    /// fall in `[old_from, old_to]` (inclusive) with `new_segment`,
    /// preserving relative order. Returns the replaced segments so the
    /// caller can schedule their deletion once no snapshot references
    /// them any longer.
    pub(crate) fn replace_range(
        &self,
        old_from: u64,
        old_to: u64,
        new_segment: Arc<Segment>,
    ) -> Vec<Arc<Segment>> {
        let mut guard = self.inner.write().unwrap();
        let current = &**guard;

        let start = current
            .iter()
            .position(|s| s.id() == old_from)
            .expect("replace_range: old_from not present in list");
        let end = current
            .iter()
            .position(|s| s.id() == old_to)
            .expect("replace_range: old_to not present in list");
        assert!(start <= end, "replace_range: old_from must precede old_to");

        let mut next = Vec::with_capacity(current.len() - (end - start) + 1);
        next.extend_from_slice(&current[..start]);
        next.push(new_segment);
        next.extend_from_slice(&current[end + 1..]);

        let replaced = current[start..=end].to_vec();
        *guard = Arc::new(next);
        replaced
    }
}
