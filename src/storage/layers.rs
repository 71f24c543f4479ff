//! Resolution layers

use crate::matrix::Axis;
use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Retention of one resolution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Maximum number of retained snapshots
    pub bucket_count: usize,
    /// Snapshots merged into one when the layer overflows; 0 marks the terminal layer
    pub merge_ratio: usize,
}

impl LayerConfig {
    pub const fn new(bucket_count: usize, merge_ratio: usize) -> Self {
        Self {
            bucket_count,
            merge_ratio,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.merge_ratio == 0
    }
}

/// Default retention ladder, assuming one snapshot per minute:
///
/// | layer | snapshot width | retained |
/// |-------|----------------|----------|
/// | 0     | 1 min          | 1 h      |
/// | 1     | 2 min          | 7 h      |
/// | 2     | 6 min          | 16 h     |
/// | 3     | 30 min         | 6 d      |
/// | 4     | 4 h            | 4 w      |
pub fn default_layers() -> Vec<LayerConfig> {
    vec![
        LayerConfig::new(60, 2),
        LayerConfig::new(210, 3),
        LayerConfig::new(160, 5),
        LayerConfig::new(288, 8),
        LayerConfig::new(168, 0),
    ]
}

pub fn validate_layers(layers: &[LayerConfig]) -> Result<()> {
    if layers.is_empty() {
        return Err(Error::Config("at least one layer is required".to_string()));
    }
    if layers.len() > u8::MAX as usize + 1 {
        return Err(Error::Config(format!(
            "{} layers configured, at most {} supported",
            layers.len(),
            u8::MAX as usize + 1
        )));
    }
    let last = layers.len() - 1;
    for (i, layer) in layers.iter().enumerate() {
        if layer.bucket_count == 0 {
            return Err(Error::Config(format!("layer {} has bucket_count 0", i)));
        }
        if layer.merge_ratio > layer.bucket_count {
            return Err(Error::Config(format!(
                "layer {} merge_ratio {} exceeds bucket_count {}",
                i, layer.merge_ratio, layer.bucket_count
            )));
        }
        if i == last && !layer.is_terminal() {
            return Err(Error::Config(format!(
                "last layer {} must have merge_ratio 0",
                i
            )));
        }
        if i != last && layer.is_terminal() {
            return Err(Error::Config(format!(
                "only the last layer may have merge_ratio 0 (layer {})",
                i
            )));
        }
    }
    Ok(())
}

/// Time-ordered snapshots of one layer, oldest first.
#[derive(Debug, Clone)]
pub(crate) struct Layer {
    pub(crate) config: LayerConfig,
    pub(crate) snapshots: VecDeque<(i64, Axis)>,
}

impl Layer {
    pub(crate) fn new(config: LayerConfig) -> Self {
        Self {
            config,
            snapshots: VecDeque::with_capacity(config.bucket_count + 1),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub(crate) fn overflowing(&self) -> bool {
        self.snapshots.len() > self.config.bucket_count
    }

    pub(crate) fn latest(&self) -> Option<i64> {
        self.snapshots.back().map(|(end_time, _)| *end_time)
    }

    pub(crate) fn push(&mut self, end_time: i64, axis: Axis) {
        self.snapshots.push_back((end_time, axis));
    }

    /// Remove up to `n` of the oldest snapshots.
    pub(crate) fn pop_oldest(&mut self, n: usize) -> Vec<(i64, Axis)> {
        let n = n.min(self.snapshots.len());
        self.snapshots.drain(..n).collect()
    }
}
