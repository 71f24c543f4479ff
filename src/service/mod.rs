//! Key visual service
//!
//! The [`Service`] owns everything that runs while collection is enabled: the
//! layered history, the ingest loop and the label refresher. A manager loop
//! follows the dynamic config and starts, stops or restarts the service:
//!
//! - collection disabled: stop
//! - label policy changed: stop, then start with fresh labels
//! - otherwise: start if stopped
//!
//! Restarting under a different policy clears the stored history.

mod dynamic;
mod lifecycle;

pub use dynamic::{ConfigBroadcaster, ConfigSubscriber, KeyVisualConfig, Policy};
pub use lifecycle::{Lifecycle, ServiceState};

use crate::decorator::{LabelRefresher, LabelStrategy};
use crate::heatmap::HeatmapQuery;
use crate::input::{SampleSource, StatInput, DEFAULT_POLL_INTERVAL};
use crate::matrix::{DistanceConfig, DistanceStrategy, Matrix, Strategy, MAX_DISPLAY_ROWS};
use crate::storage::{AxisStore, Stat, StatConfig};
use crate::{Error, Result};

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Static service settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub stat: StatConfig,
    pub distance: DistanceConfig,
    pub poll_interval: Duration,
    pub label_refresh_interval: Duration,
    pub max_display_rows: usize,
    /// Queue length of each config subscriber
    pub config_queue: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            stat: StatConfig::default(),
            distance: DistanceConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            label_refresh_interval: Duration::from_secs(60),
            max_display_rows: MAX_DISPLAY_ROWS,
            config_queue: 16,
        }
    }
}

/// Builds the external pieces the service runs on.
pub trait Components: Send + Sync {
    /// Persistence, shared by every run of the service
    fn store(&self) -> Arc<dyn AxisStore>;

    /// Label strategy for a config's policy
    fn label_strategy(&self, config: &KeyVisualConfig) -> Result<Arc<dyn LabelStrategy>>;

    /// A fresh sample source for one run
    fn sample_source(&self) -> Result<Arc<dyn SampleSource>>;
}

/// State of one run.
struct Active {
    stat: Arc<Stat>,
    strategy: Arc<dyn Strategy>,
    config: KeyVisualConfig,
    shutdown: CancellationToken,
}

pub struct Service {
    config: ServiceConfig,
    components: Arc<dyn Components>,
    lifecycle: Lifecycle,
    active: RwLock<Option<Arc<Active>>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    /// Policy the stored history was collected under
    history_policy: Mutex<Option<Policy>>,
    dynamic: ConfigBroadcaster,
}

impl Service {
    pub fn new(
        config: ServiceConfig,
        components: Arc<dyn Components>,
        initial: KeyVisualConfig,
    ) -> Self {
        let dynamic = ConfigBroadcaster::new(initial, config.config_queue);
        Self {
            config,
            components,
            lifecycle: Lifecycle::new(),
            active: RwLock::new(None),
            tasks: tokio::sync::Mutex::new(Vec::new()),
            history_policy: Mutex::new(None),
            dynamic,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.lifecycle.state()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Current dynamic config.
    pub fn dynamic_config(&self) -> KeyVisualConfig {
        self.dynamic.current()
    }

    /// Publish a new dynamic config; the manager loop applies it.
    pub fn update_dynamic_config(&self, config: KeyVisualConfig) {
        info!(
            disabled = config.auto_collection_disabled,
            policy = %config.policy,
            "Key visual config updated"
        );
        self.dynamic.publish(config);
    }

    pub fn subscribe(&self) -> ConfigSubscriber {
        self.dynamic.subscribe()
    }

    /// History of the current run, if running.
    pub fn stat(&self) -> Option<Arc<Stat>> {
        self.active.read().as_ref().map(|a| a.stat.clone())
    }

    /// Render a heatmap for `query`. The matrix carries every display tag of
    /// the requested tag.
    pub fn heatmap(&self, query: &HeatmapQuery) -> Result<Matrix> {
        let active = self.active.read().clone().ok_or(Error::ServiceNotRunning)?;

        let plane = active.stat.range(
            query.start_time,
            query.end_time,
            &query.start_key,
            &query.end_key,
        )?;
        let matrix = plane.pixel(
            active.strategy.as_ref(),
            self.config.max_display_rows,
            &query.tag.display_tags(),
        )?;
        Ok(matrix.with_range(&query.start_key, &query.end_key))
    }

    /// Start collecting under `config`.
    pub async fn start(&self, config: &KeyVisualConfig) -> Result<()> {
        self.lifecycle
            .transition(ServiceState::Stopped, ServiceState::Starting)?;

        match self.build(config).await {
            Ok((active, tasks)) => {
                *self.active.write() = Some(active);
                *self.tasks.lock().await = tasks;
                self.lifecycle
                    .transition(ServiceState::Starting, ServiceState::Running)?;
                info!(policy = %config.policy, "Key visual service started");
                Ok(())
            }
            Err(e) => {
                self.lifecycle
                    .transition(ServiceState::Starting, ServiceState::Stopped)?;
                Err(e)
            }
        }
    }

    /// Stop collecting. Waits for the background tasks to finish.
    pub async fn stop(&self) -> Result<()> {
        self.lifecycle
            .transition(ServiceState::Running, ServiceState::Stopping)?;

        let active = self.active.write().take();
        if let Some(active) = active {
            active.shutdown.cancel();
        }
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Key visual task ended abnormally");
            }
        }

        self.lifecycle
            .transition(ServiceState::Stopping, ServiceState::Stopped)?;
        info!("Key visual service stopped");
        Ok(())
    }

    async fn build(&self, config: &KeyVisualConfig) -> Result<(Arc<Active>, Vec<JoinHandle<()>>)> {
        let labels = self.components.label_strategy(config)?;
        if let Err(e) = labels.refresh().await {
            warn!(error = %e, "Initial label load failed, starting with generic labels");
        }
        let strategy: Arc<dyn Strategy> =
            Arc::new(DistanceStrategy::new(labels.clone(), self.config.distance));

        let source = self.components.sample_source()?;
        let start_time = source.start_time();
        let stat = Arc::new(Stat::new(
            self.config.stat.clone(),
            self.components.store(),
            strategy.clone(),
            start_time,
        )?);

        let previous = self.history_policy.lock().replace(config.policy);
        match previous {
            Some(policy) if policy != config.policy => {
                info!(from = %policy, to = %config.policy, "Label policy changed, clearing history");
                stat.clear(start_time).await?;
            }
            _ => {
                stat.load().await?;
                if let Some(latest) = stat.latest_time() {
                    source.observe_latest(latest);
                }
            }
        }

        let shutdown = CancellationToken::new();
        let input = StatInput::new(source, stat.clone(), self.config.poll_interval);
        let refresher = LabelRefresher::new(labels, self.config.label_refresh_interval);
        let tasks = vec![
            {
                let shutdown = shutdown.clone();
                tokio::spawn(async move { input.run(shutdown).await })
            },
            {
                let shutdown = shutdown.clone();
                tokio::spawn(async move { refresher.run(shutdown).await })
            },
        ];

        let active = Arc::new(Active {
            stat,
            strategy,
            config: config.clone(),
            shutdown,
        });
        Ok((active, tasks))
    }

    /// Bring the service in line with `config`.
    pub async fn apply(&self, config: &KeyVisualConfig) {
        if config.auto_collection_disabled {
            self.stop_if_running().await;
            return;
        }

        let restart = self
            .active
            .read()
            .as_ref()
            .is_some_and(|a| a.config.labels_differ(config));
        if restart {
            self.stop_if_running().await;
        }

        if self.lifecycle.state() == ServiceState::Stopped {
            if let Err(e) = self.start(config).await {
                error!(error = %e, "Can not start key visual service");
            }
        }
    }

    async fn stop_if_running(&self) {
        if !self.is_running() {
            return;
        }
        if let Err(e) = self.stop().await {
            error!(error = %e, "Can not stop key visual service");
        }
    }

    /// Follow dynamic config changes until `shutdown` is cancelled, then stop.
    pub async fn run_manager(&self, shutdown: CancellationToken) {
        let mut subscriber = self.dynamic.subscribe();
        self.apply(&self.dynamic.current()).await;

        loop {
            tokio::select! {
                next = subscriber.recv() => match next {
                    Some(config) => self.apply(&config).await,
                    None => break,
                },
                _ = shutdown.cancelled() => {
                    info!("Key visual manager shutting down");
                    break;
                }
            }
        }
        self.stop_if_running().await;
    }
}
