//! Component factory for environment-based configuration
//!
//! Builds the axis store, label strategies and sample sources the service runs
//! on, switching between development (in-memory) and production (file-backed)
//! setups through environment variables.

use crate::decorator::{
    HttpSchemaProvider, LabelStrategy, SeparatorLabelStrategy, TidbLabelStrategy,
};
use crate::input::{PdRegionSource, SampleSource};
use crate::service::{Components, KeyVisualConfig, Policy};
use crate::storage::{AxisStore, FileAxisStore, MemoryAxisStore};
use crate::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DEFAULT_PD_ADDR: &str = "127.0.0.1:2379";
const DEFAULT_TIDB_STATUS_ADDR: &str = "127.0.0.1:10080";
const DEFAULT_DATA_DIR: &str = "./data/keyvisual";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Where axis snapshots are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    File(PathBuf),
}

/// Settings for the external collaborators.
#[derive(Debug, Clone)]
pub struct ComponentSettings {
    pub store: StoreBackend,
    pub pd_addr: String,
    pub tidb_status_addr: String,
    pub http_timeout: Duration,
}

impl Default for ComponentSettings {
    fn default() -> Self {
        Self {
            store: StoreBackend::Memory,
            pd_addr: DEFAULT_PD_ADDR.to_string(),
            tidb_status_addr: DEFAULT_TIDB_STATUS_ADDR.to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl ComponentSettings {
    /// Read settings from the environment
    ///
    /// Environment variables:
    /// - KEYVISUAL_STORE: "memory" (default) or "file"
    /// - KEYVISUAL_DATA_DIR: directory for the file store (default: ./data/keyvisual)
    /// - PD_ADDR: PD endpoint polled for region statistics
    /// - TIDB_STATUS_ADDR: TiDB status endpoint used for table labels
    /// - KEYVISUAL_HTTP_TIMEOUT_SECS: timeout of outbound requests (default: 10)
    pub fn from_env() -> Result<Self> {
        let backend = std::env::var("KEYVISUAL_STORE").unwrap_or_else(|_| "memory".to_string());
        let store = match backend.trim().to_ascii_lowercase().as_str() {
            "memory" => StoreBackend::Memory,
            "file" => {
                let dir = std::env::var("KEYVISUAL_DATA_DIR")
                    .unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());
                StoreBackend::File(PathBuf::from(dir))
            }
            other => {
                return Err(Error::Config(format!(
                    "Unknown KEYVISUAL_STORE: {}. Use 'memory' or 'file'",
                    other
                )))
            }
        };

        let http_timeout = match std::env::var("KEYVISUAL_HTTP_TIMEOUT_SECS") {
            Ok(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|e| {
                    Error::Config(format!("KEYVISUAL_HTTP_TIMEOUT_SECS '{}': {}", raw, e))
                })?;
                if secs == 0 {
                    return Err(Error::Config(
                        "KEYVISUAL_HTTP_TIMEOUT_SECS must be positive".to_string(),
                    ));
                }
                Duration::from_secs(secs)
            }
            Err(_) => DEFAULT_HTTP_TIMEOUT,
        };

        Ok(Self {
            store,
            pd_addr: std::env::var("PD_ADDR").unwrap_or_else(|_| DEFAULT_PD_ADDR.to_string()),
            tidb_status_addr: std::env::var("TIDB_STATUS_ADDR")
                .unwrap_or_else(|_| DEFAULT_TIDB_STATUS_ADDR.to_string()),
            http_timeout,
        })
    }
}

/// Production wiring of [`Components`].
pub struct ComponentFactory {
    settings: ComponentSettings,
    store: Arc<dyn AxisStore>,
}

impl ComponentFactory {
    /// Open the configured store. The store lives as long as the factory.
    pub async fn new(settings: ComponentSettings) -> Result<Self> {
        let store = Self::create_store(&settings.store).await?;
        Ok(Self { settings, store })
    }

    pub async fn from_env() -> Result<Self> {
        Self::new(ComponentSettings::from_env()?).await
    }

    pub fn settings(&self) -> &ComponentSettings {
        &self.settings
    }

    async fn create_store(backend: &StoreBackend) -> Result<Arc<dyn AxisStore>> {
        match backend {
            StoreBackend::Memory => {
                info!("Using in-memory axis store (development mode)");
                Ok(Arc::new(MemoryAxisStore::new()))
            }
            StoreBackend::File(dir) => {
                info!(path = %dir.display(), "Using file axis store");
                Ok(Arc::new(FileAxisStore::open(dir.clone()).await?))
            }
        }
    }
}

impl Components for ComponentFactory {
    fn store(&self) -> Arc<dyn AxisStore> {
        self.store.clone()
    }

    fn label_strategy(&self, config: &KeyVisualConfig) -> Result<Arc<dyn LabelStrategy>> {
        match config.policy {
            Policy::Db => {
                info!(status_addr = %self.settings.tidb_status_addr, "Using TiDB table labels");
                let provider = HttpSchemaProvider::new(
                    &self.settings.tidb_status_addr,
                    self.settings.http_timeout,
                )?
                .with_etcd(&self.settings.pd_addr)?;
                Ok(Arc::new(TidbLabelStrategy::new(Arc::new(provider))))
            }
            Policy::Kv => {
                info!(separator = %config.policy_kv_separator, "Using separator labels");
                Ok(Arc::new(SeparatorLabelStrategy::new(
                    config.policy_kv_separator.clone(),
                )))
            }
        }
    }

    fn sample_source(&self) -> Result<Arc<dyn SampleSource>> {
        let start_time = chrono::Utc::now().timestamp();
        Ok(Arc::new(PdRegionSource::new(
            &self.settings.pd_addr,
            self.settings.http_timeout,
            start_time,
        )?))
    }
}
