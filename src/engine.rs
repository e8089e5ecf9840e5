//! Public storage engine API (spec §4.6, §6).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::compactor::Compactor;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::list::SegmentList;
use crate::recovery;
use crate::segment::{RecordState, Segment};

/// State shared between `Engine` and the compactor thread.
pub(crate) struct EngineInner {
    pub(crate) config: Config,
    pub(crate) list: SegmentList,
    pub(crate) next_id: AtomicU64,
    pub(crate) retiring: Mutex<Vec<Arc<Segment>>>,
    write_lock: Mutex<()>,
    shutdown: AtomicBool,
    inflight: AtomicUsize,
    wake_tx: SyncSender<()>,
}

impl EngineInner {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Registers one in-flight `insert`/`delete`/`query` call, rejecting it
    /// if shutdown has already started. Incrementing before checking the
    /// flag (rather than the other way around) means `shutdown` can never
    /// observe the counter at zero while a call that passed this check is
    /// still in flight: either the flag was already set when the counter
    /// was bumped, in which case the caller backs out immediately, or it
    /// wasn't, in which case `shutdown`'s drain loop is guaranteed to see
    /// the bumped counter.
    fn enter(&self) -> Result<InFlightGuard<'_>> {
        self.inflight.fetch_add(1, Ordering::AcqRel);
        if self.is_shutting_down() {
            self.inflight.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::Shutdown);
        }
        Ok(InFlightGuard {
            inflight: &self.inflight,
        })
    }
}

/// RAII handle for one in-flight call; decrements `EngineInner::inflight`
/// on drop so `shutdown` can tell when it's safe to close segment files.
struct InFlightGuard<'a> {
    inflight: &'a AtomicUsize,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.inflight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An embedded key-value store backed by a segmented append-only log.
///
/// Cheap to clone-share: construct once, wrap in `Arc` (or just keep one
/// `Engine` around and call its `&self` methods from multiple threads —
/// every method already takes `&self`).
pub struct Engine {
    inner: Arc<EngineInner>,
    compactor: Mutex<Compactor>,
}

impl Engine {
    /// Opens (or creates) the store at `config.data_dir`, recovering any
    /// existing segments, and starts the background compactor.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let recovered = recovery::recover(&config)?;
        for warning in &recovered.warnings {
            log::warn!(
                "recovery: skipping {}: {}",
                warning.path.display(),
                warning.reason
            );
        }
        log::debug!(
            "recovery: {} segment(s) loaded, next id {}",
            recovered.segments.len(),
            recovered.next_id
        );

        let (wake_tx, wake_rx) = sync_channel::<()>(1);

        let inner = Arc::new(EngineInner {
            config,
            list: SegmentList::new(recovered.segments),
            next_id: AtomicU64::new(recovered.next_id),
            retiring: Mutex::new(Vec::new()),
            write_lock: Mutex::new(()),
            shutdown: AtomicBool::new(false),
            inflight: AtomicUsize::new(0),
            wake_tx,
        });

        let compactor = Compactor::spawn(inner.clone(), wake_rx);

        Ok(Self {
            inner,
            compactor: Mutex::new(compactor),
        })
    }

    /// Appends `(key, value)`, rolling the active segment over if it is
    /// now full, and nudging the compactor if the segment count has
    /// crossed `merge_threshold_segments`.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let _inflight = self.inner.enter()?;
        let _guard = self.inner.write_lock.lock().unwrap();

        let active = self.inner.list.active();
        active.append(key, value)?;
        self.after_write(&active);
        Ok(())
    }

    /// Appends a tombstone for `key`, shadowing any earlier value.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let _inflight = self.inner.enter()?;
        let _guard = self.inner.write_lock.lock().unwrap();

        let active = self.inner.list.active();
        active.append_tombstone(key)?;
        self.after_write(&active);
        Ok(())
    }

    /// Rolls over a now-full active segment and signals the compactor if
    /// warranted. Called with `write_lock` held.
    fn after_write(&self, active: &Arc<Segment>) {
        if active.is_full() {
            let new_id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
            log::debug!("rollover: segment {} full, creating segment {}", active.id(), new_id);
            match Segment::create(
                &self.inner.config.data_dir,
                new_id,
                self.inner.config.max_segment_size_bytes,
                self.inner.config.delimiter_bytes.clone(),
                self.inner.config.index_kind,
            ) {
                Ok(fresh) => self.inner.list.append_right(Arc::new(fresh)),
                Err(e) => log::error!("rollover: failed to create segment {new_id}: {e}"),
            }
        }

        if self.inner.list.len() > self.inner.config.merge_threshold_segments {
            match self.inner.wake_tx.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => {
                    log::warn!("compactor channel disconnected; compaction will not run again")
                }
            }
        }
    }

    /// Looks up `key`, walking segments newest to oldest. `Ok(None)`
    /// covers both "never written" and "tombstoned" — spec §7's
    /// `NotFound`, indistinguishable by design.
    pub fn query(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let _inflight = self.inner.enter()?;

        let snapshot = self.inner.list.snapshot();
        for segment in snapshot.iter().rev() {
            match segment.query(key)? {
                Some(RecordState::Value(v)) => return Ok(Some(v)),
                Some(RecordState::Tombstone) => return Ok(None),
                None => continue,
            }
        }
        Ok(None)
    }

    /// Stops accepting new calls, waits for the compactor to finish its
    /// current step and exit, waits for every already-admitted
    /// `insert`/`delete`/`query` call to finish, then flushes and releases
    /// every segment's file handle. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.compactor.lock().unwrap().join();

        while self.inner.inflight.load(Ordering::Acquire) > 0 {
            std::thread::sleep(Duration::from_micros(100));
        }

        let snapshot = self.inner.list.snapshot();
        for segment in snapshot.iter() {
            if let Err(e) = segment.close() {
                log::warn!("shutdown: failed to close segment {}: {e}", segment.id());
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn inner_for_test(&self) -> Arc<EngineInner> {
        self.inner.clone()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
