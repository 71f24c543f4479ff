//! Axis store trait

use super::AxisRecord;
use crate::Result;
use async_trait::async_trait;

/// Persistence backend for layer snapshots.
///
/// Records are addressed by `(layer, end_time)`. Implementations must support
/// ordering by time within a layer and layer-scoped deletion; inserting an
/// existing address replaces the record.
#[async_trait]
pub trait AxisStore: Send + Sync {
    /// Store a record, replacing any record at the same address
    async fn insert(&self, record: &AxisRecord) -> Result<()>;

    /// All records of a layer, oldest first
    async fn find_ordered_by_time(&self, layer: u8) -> Result<Vec<AxisRecord>>;

    /// Delete one record. Deleting a missing record is not an error.
    async fn delete(&self, layer: u8, end_time: i64) -> Result<()>;

    /// Delete every record of a layer
    async fn delete_layer(&self, layer: u8) -> Result<()>;

    /// Delete every record and the saved start time
    async fn clear_all(&self) -> Result<()>;

    /// Remember where the retained history begins
    async fn save_start_time(&self, start_time: i64) -> Result<()>;

    /// Start time saved by the last `save_start_time`, if any
    async fn load_start_time(&self) -> Result<Option<i64>>;
}
