//! In-memory axis store for development, tests and ephemeral deployments

use super::{AxisRecord, AxisStore};
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Axis store kept entirely in memory.
///
/// One time-ordered map per layer, so `find_ordered_by_time` is a plain scan.
#[derive(Debug, Default)]
pub struct MemoryAxisStore {
    layers: DashMap<u8, BTreeMap<i64, Vec<u8>>>,
    start_time: RwLock<Option<i64>>,
}

impl MemoryAxisStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records across layers.
    pub fn len(&self) -> usize {
        self.layers.iter().map(|layer| layer.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AxisStore for MemoryAxisStore {
    async fn insert(&self, record: &AxisRecord) -> Result<()> {
        self.layers
            .entry(record.layer)
            .or_default()
            .insert(record.end_time, record.axis.clone());
        Ok(())
    }

    async fn find_ordered_by_time(&self, layer: u8) -> Result<Vec<AxisRecord>> {
        Ok(self
            .layers
            .get(&layer)
            .map(|records| {
                records
                    .iter()
                    .map(|(end_time, axis)| AxisRecord {
                        layer,
                        end_time: *end_time,
                        axis: axis.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, layer: u8, end_time: i64) -> Result<()> {
        if let Some(mut records) = self.layers.get_mut(&layer) {
            records.remove(&end_time);
        }
        Ok(())
    }

    async fn delete_layer(&self, layer: u8) -> Result<()> {
        self.layers.remove(&layer);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.layers.clear();
        *self.start_time.write() = None;
        Ok(())
    }

    async fn save_start_time(&self, start_time: i64) -> Result<()> {
        *self.start_time.write() = Some(start_time);
        Ok(())
    }

    async fn load_start_time(&self) -> Result<Option<i64>> {
        Ok(*self.start_time.read())
    }
}
