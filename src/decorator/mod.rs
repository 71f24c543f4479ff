//! Label strategies: turn raw keys into human-meaningful labels
//!
//! A label strategy decorates heatmap boundaries and declares which adjacent
//! keys belong to different domains (tables, indexes, meta data) so the
//! compression strategy never merges across them. Strategies may be backed by
//! external metadata that is refreshed in the background; lookups always use
//! the last successfully loaded mapping.

mod schema;
mod separator;
mod telemetry;
mod tidb;
mod tidb_key;

pub use schema::{
    DbInfo, HttpSchemaProvider, IndexInfo, Name, PartitionDefinition, PartitionInfo, SchemaProvider,
    TableInfo, SCHEMA_VERSION_KEY,
};
pub use separator::SeparatorLabelStrategy;
pub use tidb::TidbLabelStrategy;
pub use tidb_key::{decode_region_key, TidbKey};

use crate::matrix::KEYSPACE_END;
use crate::Result;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Semantic annotation of one key boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelKey {
    #[serde(with = "hex::serde")]
    pub key: Vec<u8>,
    pub labels: Vec<String>,
}

impl LabelKey {
    pub fn new(key: impl Into<Vec<u8>>, labels: Vec<String>) -> Self {
        Self {
            key: key.into(),
            labels,
        }
    }
}

/// Pluggable key labeling.
///
/// `label` and `cross_border` must never block on or fail because of the
/// external mapping; a stale mapping is acceptable.
#[async_trait]
pub trait LabelStrategy: Send + Sync {
    /// Label one raw key.
    fn label(&self, key: &[u8]) -> LabelKey;

    /// Whether `start` and `end` belong to different un-mergeable domains.
    fn cross_border(&self, start: &[u8], end: &[u8]) -> bool;

    fn label_global_start(&self) -> LabelKey;

    fn label_global_end(&self) -> LabelKey;

    /// Reload external metadata. Called from the background refresher.
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// Label a boundary list, using the strategy's global sentinels for the open
/// ends of the key space. Returned labels always carry the boundary's own key.
pub fn label_boundaries(strategy: &dyn LabelStrategy, keys: &[Vec<u8>]) -> Vec<LabelKey> {
    keys.iter()
        .map(|key| {
            let labels = if key.is_empty() {
                strategy.label_global_start().labels
            } else if key.as_slice() == KEYSPACE_END {
                strategy.label_global_end().labels
            } else {
                return strategy.label(key);
            };
            LabelKey::new(key.clone(), labels)
        })
        .collect()
}

/// Periodically refreshes a label strategy until cancelled.
pub struct LabelRefresher {
    strategy: Arc<dyn LabelStrategy>,
    interval: Duration,
}

impl LabelRefresher {
    pub fn new(strategy: Arc<dyn LabelStrategy>, interval: Duration) -> Self {
        Self { strategy, interval }
    }

    /// Run the refresh loop. Returns when `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.strategy.refresh().await {
                        Ok(()) => debug!("Label mapping refreshed"),
                        Err(e) => warn!(error = %e, "Label refresh failed, keeping previous mapping"),
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Label refresher shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStrategy {
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl LabelStrategy for CountingStrategy {
        fn label(&self, key: &[u8]) -> LabelKey {
            LabelKey::new(key, vec![String::from_utf8_lossy(key).into_owned()])
        }

        fn cross_border(&self, _start: &[u8], _end: &[u8]) -> bool {
            false
        }

        fn label_global_start(&self) -> LabelKey {
            LabelKey::new(Vec::new(), vec!["start".into()])
        }

        fn label_global_end(&self) -> LabelKey {
            LabelKey::new(Vec::new(), vec!["end".into()])
        }

        async fn refresh(&self) -> Result<()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Err(crate::Error::Source("metadata unavailable".into()))
        }
    }

    #[test]
    fn test_label_boundaries_uses_sentinels() {
        let strategy = CountingStrategy {
            refreshes: AtomicUsize::new(0),
        };
        let labels = label_boundaries(
            &strategy,
            &[Vec::new(), b"k".to_vec(), KEYSPACE_END.to_vec()],
        );
        assert_eq!(labels[0].labels, vec!["start"]);
        assert_eq!(labels[1].labels, vec!["k"]);
        assert_eq!(labels[2].labels, vec!["end"]);
    }

    #[tokio::test]
    async fn test_refresher_survives_failures_and_stops() {
        let strategy = Arc::new(CountingStrategy {
            refreshes: AtomicUsize::new(0),
        });
        let refresher = LabelRefresher::new(strategy.clone(), Duration::from_millis(5));
        let shutdown = CancellationToken::new();
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { refresher.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(40)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(strategy.refreshes.load(Ordering::SeqCst) >= 2);
    }
}
