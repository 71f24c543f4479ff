//! Dynamic key-visual configuration and its broadcaster

use crate::{Error, Result};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// How keys are labeled and which borders are preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Keys are TiDB table/index keys
    #[default]
    Db,
    /// Keys are opaque; labels split on a separator
    Kv,
}

impl FromStr for Policy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "db" => Ok(Policy::Db),
            "kv" => Ok(Policy::Kv),
            other => Err(Error::Config(format!(
                "unknown key visual policy '{}'. Use 'db' or 'kv'",
                other
            ))),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Db => f.write_str("db"),
            Policy::Kv => f.write_str("kv"),
        }
    }
}

/// Runtime-adjustable settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyVisualConfig {
    pub auto_collection_disabled: bool,
    pub policy: Policy,
    pub policy_kv_separator: String,
}

impl Default for KeyVisualConfig {
    fn default() -> Self {
        Self {
            auto_collection_disabled: false,
            policy: Policy::Db,
            policy_kv_separator: "/".to_string(),
        }
    }
}

impl KeyVisualConfig {
    /// Whether moving from `self` to `other` requires rebuilding the label strategy.
    pub fn labels_differ(&self, other: &KeyVisualConfig) -> bool {
        self.policy != other.policy
            || (self.policy == Policy::Kv && self.policy_kv_separator != other.policy_kv_separator)
    }
}

/// Publishes config changes to every subscriber.
///
/// Each subscriber has a bounded queue. Publishing never blocks: when a
/// subscriber falls behind, its oldest queued configs are dropped and the
/// subscriber continues from the oldest config still queued.
#[derive(Debug)]
pub struct ConfigBroadcaster {
    sender: broadcast::Sender<KeyVisualConfig>,
    current: RwLock<KeyVisualConfig>,
}

impl ConfigBroadcaster {
    pub fn new(initial: KeyVisualConfig, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            current: RwLock::new(initial),
        }
    }

    /// The most recently published config.
    pub fn current(&self) -> KeyVisualConfig {
        self.current.read().clone()
    }

    /// Publish a config. Returns the number of subscribers it was queued for.
    pub fn publish(&self, config: KeyVisualConfig) -> usize {
        let mut current = self.current.write();
        *current = config.clone();
        // no subscribers is not an error; `current` still records the change
        self.sender.send(config).unwrap_or(0)
    }

    pub fn subscribe(&self) -> ConfigSubscriber {
        ConfigSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving end of a [`ConfigBroadcaster`].
#[derive(Debug)]
pub struct ConfigSubscriber {
    receiver: broadcast::Receiver<KeyVisualConfig>,
}

impl ConfigSubscriber {
    /// Next config, or `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<KeyVisualConfig> {
        loop {
            match self.receiver.recv().await {
                Ok(config) => return Some(config),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Config subscriber lagged, dropped oldest updates");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
