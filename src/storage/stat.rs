//! Multi-resolution statistics store
//!
//! New snapshots enter layer 0. When a layer holds more than its
//! `bucket_count` snapshots, its oldest `merge_ratio` snapshots are summed into
//! one snapshot that moves to the next layer; the terminal layer simply drops
//! its oldest snapshot. Every change is mirrored to an [`AxisStore`] so the
//! history survives restarts.
//!
//! Layers partition time: the coarsest layer holds the oldest intervals and
//! layer 0 the newest. Snapshot `(end_time, axis)` covers the interval from the
//! previous snapshot's end time (or the store's `start_time`) to `end_time`.
//! The start time is persisted next to the records whenever it moves, so a
//! reloaded history keeps the width of its oldest interval.

use super::telemetry;
use super::{validate_layers, AxisRecord, AxisStore, Layer, LayerConfig};
use crate::matrix::{Axis, Plane, Strategy};
use crate::{Error, Result};

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Store configuration
#[derive(Debug, Clone)]
pub struct StatConfig {
    /// Resolution layers, finest first
    pub layers: Vec<LayerConfig>,
    /// Upper bound on the buckets of a merged snapshot; `None` keeps full resolution
    pub max_storage_buckets: Option<usize>,
    /// Attempts per record insert before the failure is reported
    pub insert_attempts: usize,
    /// Base delay between insert attempts
    pub retry_backoff: Duration,
}

impl Default for StatConfig {
    fn default() -> Self {
        Self {
            layers: super::default_layers(),
            max_storage_buckets: None,
            insert_attempts: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
enum PersistOp {
    Insert(AxisRecord),
    Delete { layer: u8, end_time: i64 },
    StartTime(i64),
}

#[derive(Debug)]
struct Layers {
    layers: Vec<Layer>,
    start_time: i64,
}

impl Layers {
    fn latest(&self) -> Option<i64> {
        self.layers.iter().filter_map(Layer::latest).max()
    }

    /// All snapshots ordered by time, coarsest layer first.
    fn timeline(&self) -> Vec<&(i64, Axis)> {
        self.layers
            .iter()
            .rev()
            .flat_map(|layer| layer.snapshots.iter())
            .collect()
    }

    /// Restore the layer bounds, recording every insert and delete in `ops`.
    fn cascade(
        &mut self,
        compaction: Option<(&dyn Strategy, usize)>,
        ops: &mut Vec<PersistOp>,
    ) -> Result<()> {
        for i in 0..self.layers.len() {
            let layer_no = i as u8;
            while self.layers[i].overflowing() {
                let config = self.layers[i].config;

                if config.is_terminal() {
                    for (end_time, _) in self.layers[i].pop_oldest(1) {
                        debug!(layer = layer_no, end_time, "Evicted oldest snapshot");
                        telemetry::record_evicted();
                        self.start_time = end_time;
                        ops.push(PersistOp::Delete {
                            layer: layer_no,
                            end_time,
                        });
                        ops.push(PersistOp::StartTime(end_time));
                    }
                    continue;
                }

                let ratio = config.merge_ratio;
                let source = &self.layers[i].snapshots;
                let Some(end_time) = source.iter().take(ratio).last().map(|(t, _)| *t) else {
                    break;
                };
                let mut merged = Axis::merge(source.iter().take(ratio).map(|(_, axis)| axis))?;

                if let Some((strategy, max_buckets)) = compaction {
                    if merged.len() > max_buckets {
                        match strategy.compact_axis(&merged, max_buckets) {
                            Ok(compacted) => merged = compacted,
                            Err(e) => {
                                warn!(layer = layer_no + 1, end_time, error = %e, "Axis compaction failed, storing full resolution")
                            }
                        }
                    }
                }
                let record = AxisRecord::new(layer_no + 1, end_time, &merged)?;

                for (evicted, _) in self.layers[i].pop_oldest(ratio) {
                    ops.push(PersistOp::Delete {
                        layer: layer_no,
                        end_time: evicted,
                    });
                }
                debug!(
                    from_layer = layer_no,
                    to_layer = layer_no + 1,
                    end_time,
                    merged = ratio,
                    buckets = merged.len(),
                    "Merged snapshots into coarser layer"
                );
                telemetry::record_merged(layer_no, ratio);
                self.layers[i + 1].push(end_time, merged);
                ops.push(PersistOp::Insert(record));
            }
        }
        Ok(())
    }
}

/// Layered, persisted history of key-space activity.
pub struct Stat {
    config: StatConfig,
    state: RwLock<Layers>,
    store: Arc<dyn AxisStore>,
    strategy: Arc<dyn Strategy>,
    /// Serializes writers; holds deletes that failed and are retried on the next append.
    pending_deletes: Mutex<Vec<(u8, i64)>>,
}

impl Stat {
    /// Create an empty store whose history starts at `start_time`.
    pub fn new(
        config: StatConfig,
        store: Arc<dyn AxisStore>,
        strategy: Arc<dyn Strategy>,
        start_time: i64,
    ) -> Result<Self> {
        validate_layers(&config.layers)?;
        let layers = config.layers.iter().copied().map(Layer::new).collect();
        Ok(Self {
            config,
            state: RwLock::new(Layers { layers, start_time }),
            store,
            strategy,
            pending_deletes: Mutex::new(Vec::new()),
        })
    }

    /// Rebuild the layers from the store, replacing the in-memory history.
    ///
    /// Undecodable records are skipped. Records not newer than the data already
    /// loaded from coarser layers, and records beyond a layer's bucket count, are
    /// skipped and deleted. Returns the number of snapshots loaded.
    pub async fn load(&self) -> Result<usize> {
        let mut pending = self.pending_deletes.lock().await;
        let layer_count = self.config.layers.len();

        let mut loaded: Vec<VecDeque<(i64, Axis)>> = vec![VecDeque::new(); layer_count];
        let mut stale: Vec<(u8, i64)> = Vec::new();
        let mut latest: Option<i64> = None;

        for i in (0..layer_count).rev() {
            let layer_no = i as u8;
            for record in self.store.find_ordered_by_time(layer_no).await? {
                if let Some(latest) = latest.filter(|l| record.end_time <= *l) {
                    warn!(layer = layer_no, end_time = record.end_time, latest, "Skipping out-of-order axis record");
                    stale.push((layer_no, record.end_time));
                    continue;
                }
                match record.decode() {
                    Ok(axis) => {
                        latest = Some(record.end_time);
                        loaded[i].push_back((record.end_time, axis));
                    }
                    Err(e) => warn!(error = %e, "Skipping corrupt axis record"),
                }
            }

            let bucket_count = self.config.layers[i].bucket_count;
            while loaded[i].len() > bucket_count {
                if let Some((end_time, _)) = loaded[i].pop_front() {
                    stale.push((layer_no, end_time));
                }
            }
        }

        let saved_start = match self.store.load_start_time().await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(error = %e, "Unreadable start time, deriving it from the records");
                None
            }
        };

        let count = loaded.iter().map(VecDeque::len).sum();
        {
            let mut state = self.state.write();
            let oldest = loaded.iter().rev().find_map(|l| l.front().map(|(t, _)| *t));
            for (layer, snapshots) in state.layers.iter_mut().zip(loaded) {
                layer.snapshots = snapshots;
            }
            if let Some(oldest) = oldest {
                state.start_time = match saved_start {
                    Some(saved) if saved < oldest => saved,
                    _ => state.start_time.min(oldest),
                };
            }
        }

        for (layer, end_time) in stale {
            if let Err(e) = self.store.delete(layer, end_time).await {
                warn!(layer, end_time, error = %e, "Failed to delete stale axis record, will retry");
                pending.push((layer, end_time));
            }
        }

        telemetry::record_loaded(count);
        info!(snapshots = count, layers = layer_count, "Loaded key visual history");
        Ok(count)
    }

    /// Append the snapshot ending at `end_time` to the finest layer and cascade.
    ///
    /// `end_time` must be newer than every retained snapshot and the start time.
    /// An [`Error::Persistence`] means the in-memory history was updated but the
    /// store is behind; failed deletes are retried on the next append.
    pub async fn append(&self, axis: Axis, end_time: i64) -> Result<()> {
        if axis.is_empty() {
            debug!(end_time, "Ignoring empty snapshot");
            return Ok(());
        }

        let mut pending = self.pending_deletes.lock().await;
        self.retry_pending(&mut pending).await;

        let record = AxisRecord::new(0, end_time, &axis)?;
        let (ops, cascaded) = {
            let mut state = self.state.write();
            let latest = state
                .latest()
                .map_or(state.start_time, |t| t.max(state.start_time));
            if end_time <= latest {
                return Err(Error::OutOfOrder {
                    time: end_time,
                    latest,
                });
            }
            let first = state.latest().is_none();
            state.layers[0].push(end_time, axis);

            let mut ops = vec![PersistOp::Insert(record)];
            if first {
                ops.push(PersistOp::StartTime(state.start_time));
            }
            let cascaded = state.cascade(self.compaction(), &mut ops);
            (ops, cascaded)
        };
        telemetry::record_appended();

        let persisted = self.persist(ops, &mut pending).await;
        cascaded?;
        persisted
    }

    /// Snapshots overlapping `(start, end]`, restricted to `[start_key, end_key)`.
    ///
    /// Selects every snapshot whose end time lies in the window, plus the
    /// snapshot straddling the window's end, so a window inside one coarse
    /// interval still returns that interval. Empty keys are open bounds.
    pub fn range(&self, start: i64, end: i64, start_key: &[u8], end_key: &[u8]) -> Result<Plane> {
        if start >= end {
            return Err(Error::InvalidInput(format!(
                "start time {} is not before end time {}",
                start, end
            )));
        }
        if !start_key.is_empty() && !end_key.is_empty() && start_key >= end_key {
            return Err(Error::InvalidInput(format!(
                "start key {} is not before end key {}",
                hex::encode(start_key),
                hex::encode(end_key)
            )));
        }

        let state = self.state.read();
        let timeline = state.timeline();
        let begins = |i: usize| {
            if i == 0 {
                state.start_time
            } else {
                timeline[i - 1].0
            }
        };

        let lo = timeline.partition_point(|(t, _)| *t <= start);
        let mut hi = timeline.partition_point(|(t, _)| *t <= end);
        if hi < timeline.len() && begins(hi) < end {
            hi += 1;
        }
        if lo >= hi {
            return Ok(Plane::default());
        }

        let mut times = Vec::with_capacity(hi - lo + 1);
        times.push(begins(lo));
        let mut axes = Vec::with_capacity(hi - lo);
        for (end_time, axis) in &timeline[lo..hi] {
            times.push(*end_time);
            axes.push(axis.range(start_key, end_key));
        }
        Plane::new(times, axes)
    }

    /// Drop the whole history, in memory and in the store.
    pub async fn clear(&self, start_time: i64) -> Result<()> {
        let mut pending = self.pending_deletes.lock().await;
        {
            let mut state = self.state.write();
            for layer in &mut state.layers {
                layer.snapshots.clear();
            }
            state.start_time = start_time;
        }
        pending.clear();
        self.store.clear_all().await?;
        self.store.save_start_time(start_time).await?;
        info!(start_time, "Cleared key visual history");
        Ok(())
    }

    /// Start of the oldest retained interval.
    pub fn start_time(&self) -> i64 {
        self.state.read().start_time
    }

    /// End time of the newest snapshot.
    pub fn latest_time(&self) -> Option<i64> {
        self.state.read().latest()
    }

    pub fn layer_lens(&self) -> Vec<usize> {
        self.state.read().layers.iter().map(Layer::len).collect()
    }

    /// Copy of one layer's snapshots, oldest first.
    pub fn layer_snapshot(&self, layer: usize) -> Vec<(i64, Axis)> {
        self.state
            .read()
            .layers
            .get(layer)
            .map(|l| l.snapshots.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn layer_configs(&self) -> &[LayerConfig] {
        &self.config.layers
    }

    pub fn strategy(&self) -> &Arc<dyn Strategy> {
        &self.strategy
    }

    fn compaction(&self) -> Option<(&dyn Strategy, usize)> {
        self.config
            .max_storage_buckets
            .map(|max| (self.strategy.as_ref(), max.max(1)))
    }

    async fn retry_pending(&self, pending: &mut Vec<(u8, i64)>) {
        if pending.is_empty() {
            return;
        }
        let mut still_failing = Vec::new();
        for (layer, end_time) in pending.drain(..) {
            if let Err(e) = self.store.delete(layer, end_time).await {
                debug!(layer, end_time, error = %e, "Pending delete still failing");
                still_failing.push((layer, end_time));
            }
        }
        *pending = still_failing;
    }

    /// Apply inserts first, then the start time, then deletes, so a failure
    /// leaves duplicates rather than gaps; duplicates are dropped at the next load.
    async fn persist(&self, ops: Vec<PersistOp>, pending: &mut Vec<(u8, i64)>) -> Result<()> {
        let mut failures = Vec::new();
        let mut deletes = Vec::new();
        let mut start_time = None;

        for op in ops {
            match op {
                PersistOp::Insert(record) => {
                    if let Err(e) = self.insert_with_retry(&record).await {
                        telemetry::record_persistence_failure("insert");
                        failures.push(format!(
                            "insert layer={} end_time={}: {}",
                            record.layer, record.end_time, e
                        ));
                    }
                }
                PersistOp::Delete { layer, end_time } => deletes.push((layer, end_time)),
                PersistOp::StartTime(t) => start_time = Some(t),
            }
        }

        if let Some(t) = start_time {
            if let Err(e) = self.store.save_start_time(t).await {
                warn!(start_time = t, error = %e, "Failed to save start time");
                telemetry::record_persistence_failure("start_time");
                failures.push(format!("start_time={}: {}", t, e));
            }
        }

        for (layer, end_time) in deletes {
            if let Err(e) = self.store.delete(layer, end_time).await {
                warn!(layer, end_time, error = %e, "Failed to delete evicted snapshot, will retry");
                telemetry::record_persistence_failure("delete");
                failures.push(format!("delete layer={} end_time={}: {}", layer, end_time, e));
                pending.push((layer, end_time));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Persistence(failures.join("; ")))
        }
    }

    async fn insert_with_retry(&self, record: &AxisRecord) -> Result<()> {
        let attempts = self.config.insert_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.insert(record).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(
                        layer = record.layer,
                        end_time = record.end_time,
                        attempt,
                        error = %e,
                        "Axis insert failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt as u32).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
