//! Label strategy for TiDB key layouts

use super::telemetry;
use super::{LabelKey, LabelStrategy, SchemaProvider, TidbKey};
use crate::{Error, Result};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Names resolved for one physical table id.
#[derive(Debug, Clone)]
struct TableDetail {
    db: String,
    name: String,
    indices: HashMap<i64, String>,
}

type TableMap = HashMap<i64, TableDetail>;

/// Labels keys with database, table and index names resolved from TiDB.
///
/// Borders are drawn between meta and table data, between tables, and between
/// indexes (or records) of the same table.
///
/// A refresh is skipped while the provider reports the schema version that was
/// last loaded completely. Databases that fail to load keep their previous
/// tables and leave the version unapplied, so the next refresh retries them.
pub struct TidbLabelStrategy {
    provider: Arc<dyn SchemaProvider>,
    tables: RwLock<Arc<TableMap>>,
    applied_version: Mutex<Option<i64>>,
}

impl TidbLabelStrategy {
    pub fn new(provider: Arc<dyn SchemaProvider>) -> Self {
        Self {
            provider,
            tables: RwLock::new(Arc::new(HashMap::new())),
            applied_version: Mutex::new(None),
        }
    }

    /// Number of table ids currently resolvable.
    pub fn known_tables(&self) -> usize {
        self.tables.read().len()
    }

    /// Schema version of the last complete load.
    pub fn applied_version(&self) -> Option<i64> {
        *self.applied_version.lock()
    }

    /// Load every public database; returns the mapping and the number of
    /// databases that failed.
    async fn load_tables(&self) -> Result<(TableMap, usize)> {
        let mut map = TableMap::new();
        let databases = self.provider.databases().await?;
        let mut failures = 0usize;

        for db in databases.iter().filter(|db| db.is_public()) {
            let tables = match self.provider.tables(&db.db_name.original).await {
                Ok(tables) => tables,
                Err(e) => {
                    warn!(db = %db.db_name.original, error = %e, "Failed to load tables");
                    failures += 1;
                    continue;
                }
            };
            for table in tables {
                let indices: HashMap<i64, String> = table
                    .indices
                    .iter()
                    .map(|index| (index.id, index.idx_name.original.clone()))
                    .collect();
                if let Some(partition) = &table.partition {
                    for def in &partition.definitions {
                        map.insert(
                            def.id,
                            TableDetail {
                                db: db.db_name.original.clone(),
                                name: format!("{}/{}", table.name.original, def.name.original),
                                indices: indices.clone(),
                            },
                        );
                    }
                }
                map.insert(
                    table.id,
                    TableDetail {
                        db: db.db_name.original.clone(),
                        name: table.name.original.clone(),
                        indices,
                    },
                );
            }
        }

        Ok((map, failures))
    }
}

#[async_trait]
impl LabelStrategy for TidbLabelStrategy {
    fn label(&self, key: &[u8]) -> LabelKey {
        let decoded = TidbKey::from_region_key(key);
        let (is_meta, table_id) = decoded.meta_or_table();
        let mut labels = Vec::with_capacity(3);

        if is_meta {
            labels.push("meta".to_string());
            return LabelKey::new(key, labels);
        }

        let tables = self.tables.read().clone();
        match tables.get(&table_id) {
            Some(detail) => {
                labels.push(detail.db.clone());
                labels.push(detail.name.clone());
                let row_id = decoded.row_id();
                let index_id = decoded.index_id();
                if row_id != 0 {
                    labels.push(format!("row_{}", row_id));
                } else if index_id != 0 {
                    labels.push(
                        detail
                            .indices
                            .get(&index_id)
                            .cloned()
                            .unwrap_or_else(|| format!("index_{}", index_id)),
                    );
                }
            }
            None => {
                labels.push(format!("table_{}", table_id));
                let row_id = decoded.row_id();
                let index_id = decoded.index_id();
                if row_id != 0 {
                    labels.push(format!("row_{}", row_id));
                } else if index_id != 0 {
                    labels.push(format!("index_{}", index_id));
                }
            }
        }
        LabelKey::new(key, labels)
    }

    fn cross_border(&self, start: &[u8], end: &[u8]) -> bool {
        let start = TidbKey::from_region_key(start);
        let end = TidbKey::from_region_key(end);
        let (start_meta, start_table) = start.meta_or_table();
        let (end_meta, end_table) = end.meta_or_table();
        if start_meta || end_meta {
            return start_meta != end_meta;
        }
        if start_table != end_table {
            return true;
        }
        start.index_id() != end.index_id()
    }

    fn label_global_start(&self) -> LabelKey {
        LabelKey::new(Vec::new(), vec!["meta".to_string()])
    }

    fn label_global_end(&self) -> LabelKey {
        LabelKey::new(Vec::new(), Vec::new())
    }

    async fn refresh(&self) -> Result<()> {
        let version = match self.provider.schema_version().await {
            Ok(version) => version,
            Err(e) => {
                telemetry::record_refresh_outcome("failed");
                return Err(e);
            }
        };
        let applied = self.applied_version();
        if version.is_some() && version == applied {
            debug!(version = ?version, "Schema version has not changed, skipping refresh");
            telemetry::record_refresh_outcome("unchanged");
            return Ok(());
        }
        debug!(old = ?applied, new = ?version, "Schema version changed");

        let (loaded, failures) = match self.load_tables().await {
            Ok(result) => result,
            Err(e) => {
                telemetry::record_refresh_outcome("failed");
                return Err(e);
            }
        };

        if failures > 0 {
            let mut merged = (**self.tables.read()).clone();
            merged.extend(loaded);
            debug!(tables = merged.len(), failures, "Loaded partial TiDB table mapping");
            *self.tables.write() = Arc::new(merged);
            telemetry::record_refresh_outcome("partial");
            return Err(Error::Source(format!(
                "{} database(s) failed to load, keeping their previous tables",
                failures
            )));
        }

        debug!(tables = loaded.len(), version = ?version, "Loaded TiDB table mapping");
        *self.tables.write() = Arc::new(loaded);
        *self.applied_version.lock() = version;
        telemetry::record_refresh_outcome("updated");
        Ok(())
    }
}
