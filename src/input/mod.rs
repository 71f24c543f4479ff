//! Sample sources and the ingest loop
//!
//! A [`SampleSource`] produces key-space snapshots; [`StatInput`] polls it on a
//! fixed cadence and appends what it returns to the [`Stat`].

mod channel;
mod pd;

pub use channel::{channel_source, ChannelSource};
pub use pd::{regions_to_axis, PdRegionSource, RegionInfo};

use crate::matrix::Axis;
use crate::storage::Stat;
use crate::{Error, Result};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Producer of activity snapshots.
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Earliest time (unix seconds) the source has data for. Used as the start
    /// of the first snapshot interval.
    fn start_time(&self) -> i64;

    /// Snapshots that became available since the previous poll, oldest first.
    async fn poll(&self) -> Result<Vec<(i64, Axis)>>;

    /// History up to `end_time` is already retained; later snapshots must end
    /// after it even if the wall clock stepped backward across a restart.
    fn observe_latest(&self, _end_time: i64) {}
}

/// Feeds a [`Stat`] from a [`SampleSource`].
pub struct StatInput {
    source: Arc<dyn SampleSource>,
    stat: Arc<Stat>,
    interval: Duration,
}

impl StatInput {
    pub fn new(source: Arc<dyn SampleSource>, stat: Arc<Stat>, interval: Duration) -> Self {
        Self {
            source,
            stat,
            interval,
        }
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed between polls: an append that has started
    /// always runs to completion.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Stat input started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.collect_once().await;
                }
                _ = shutdown.cancelled() => {
                    info!("Stat input shutting down");
                    break;
                }
            }
        }
    }

    /// Poll the source once and append its snapshots. Returns how many were
    /// appended; failures are logged and never stop the loop.
    pub async fn collect_once(&self) -> usize {
        let snapshots = match self.source.poll().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(error = %e, "Sample source poll failed");
                return 0;
            }
        };

        let mut appended = 0;
        for (end_time, axis) in snapshots {
            let buckets = axis.len();
            match self.stat.append(axis, end_time).await {
                Ok(()) => {
                    appended += 1;
                    debug!(end_time, buckets, "Appended snapshot");
                }
                Err(e @ Error::Persistence(_)) => {
                    appended += 1;
                    warn!(end_time, error = %e, "Snapshot kept in memory but not fully persisted");
                }
                Err(e) => warn!(end_time, error = %e, "Dropped snapshot"),
            }
        }
        appended
    }
}
