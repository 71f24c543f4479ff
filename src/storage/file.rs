//! Directory-backed axis store
//!
//! One file per record: `<root>/layer-<N>/<end_time>.axis`. Records are written
//! to a temporary file and renamed into place, so a crash never leaves a
//! half-written record under its final name. Leftover temporaries and
//! unparseable names are skipped on read. The history's start time lives in
//! `<root>/start_time` as decimal seconds.

use super::{AxisRecord, AxisStore};
use crate::{Error, Result};

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const LAYER_PREFIX: &str = "layer-";
const RECORD_SUFFIX: &str = ".axis";
const TMP_SUFFIX: &str = ".tmp";
const START_TIME_FILE: &str = "start_time";

/// Axis store persisting each record as a file.
#[derive(Debug, Clone)]
pub struct FileAxisStore {
    root: PathBuf,
    sync: bool,
}

impl FileAxisStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(Error::Io)?;
        Ok(Self { root, sync: true })
    }

    /// Skip fsync on insert. Useful for tests.
    pub fn without_sync(mut self) -> Self {
        self.sync = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn layer_dir(&self, layer: u8) -> PathBuf {
        self.root.join(format!("{}{}", LAYER_PREFIX, layer))
    }

    fn record_path(&self, layer: u8, end_time: i64) -> PathBuf {
        self.layer_dir(layer).join(record_file_name(end_time))
    }

    /// Write `bytes` to `path` through a temporary file.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension(&TMP_SUFFIX[1..]);
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        if self.sync {
            file.sync_data().await?;
        }
        drop(file);
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn record_file_name(end_time: i64) -> String {
    format!("{}{}", end_time, RECORD_SUFFIX)
}

fn parse_record_time(name: &str) -> Option<i64> {
    name.strip_suffix(RECORD_SUFFIX)?.parse::<i64>().ok()
}

fn ignore_not_found(result: io::Result<()>) -> Result<()> {
    match result {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(Error::Io(e)),
        _ => Ok(()),
    }
}

#[async_trait]
impl AxisStore for FileAxisStore {
    async fn insert(&self, record: &AxisRecord) -> Result<()> {
        let dir = self.layer_dir(record.layer);
        fs::create_dir_all(&dir).await?;

        let path = self.record_path(record.layer, record.end_time);
        self.write_atomic(&path, &record.axis).await?;

        debug!(layer = record.layer, end_time = record.end_time, bytes = record.axis.len(), "Stored axis record");
        Ok(())
    }

    async fn find_ordered_by_time(&self, layer: u8) -> Result<Vec<AxisRecord>> {
        let dir = self.layer_dir(layer);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut found: Vec<(i64, PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            match parse_record_time(&name) {
                Some(end_time) => found.push((end_time, entry.path())),
                None if name.ends_with(TMP_SUFFIX) => {
                    debug!(layer, file = %name, "Skipping interrupted record write");
                }
                None => warn!(layer, file = %name, "Skipping unrecognised file in axis store"),
            }
        }
        found.sort_by_key(|(end_time, _)| *end_time);

        let mut records = Vec::with_capacity(found.len());
        for (end_time, path) in found {
            match fs::read(&path).await {
                Ok(axis) => records.push(AxisRecord {
                    layer,
                    end_time,
                    axis,
                }),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(layer, end_time, error = %e, "Unreadable axis record, skipping");
                }
            }
        }
        Ok(records)
    }

    async fn delete(&self, layer: u8, end_time: i64) -> Result<()> {
        ignore_not_found(fs::remove_file(self.record_path(layer, end_time)).await)
    }

    async fn delete_layer(&self, layer: u8) -> Result<()> {
        ignore_not_found(fs::remove_dir_all(self.layer_dir(layer)).await)
    }

    async fn clear_all(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(LAYER_PREFIX) {
                ignore_not_found(fs::remove_dir_all(entry.path()).await)?;
            }
        }
        ignore_not_found(fs::remove_file(self.root.join(START_TIME_FILE)).await)
    }

    async fn save_start_time(&self, start_time: i64) -> Result<()> {
        self.write_atomic(&self.root.join(START_TIME_FILE), start_time.to_string().as_bytes())
            .await
    }

    async fn load_start_time(&self) -> Result<Option<i64>> {
        let raw = match fs::read_to_string(self.root.join(START_TIME_FILE)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        raw.trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|e| Error::Serialization(format!("start time '{}': {}", raw.trim(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{Axis, StatTag};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record(layer: u8, end_time: i64, value: u64) -> AxisRecord {
        let mut values = BTreeMap::new();
        values.insert(StatTag::WrittenBytes, vec![value]);
        let axis = Axis::new(vec![b"a".to_vec(), b"z".to_vec()], values).unwrap();
        AxisRecord::new(layer, end_time, &axis).unwrap()
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileAxisStore::open(dir.path()).await.unwrap();
            store.insert(&record(0, 120, 2)).await.unwrap();
            store.insert(&record(0, 60, 1)).await.unwrap();
            store.insert(&record(1, -30, 9)).await.unwrap();
        }

        let store = FileAxisStore::open(dir.path()).await.unwrap();
        let layer0 = store.find_ordered_by_time(0).await.unwrap();
        assert_eq!(layer0.iter().map(|r| r.end_time).collect::<Vec<_>>(), vec![60, 120]);
        assert_eq!(layer0[1], record(0, 120, 2));
        assert_eq!(store.find_ordered_by_time(1).await.unwrap()[0].end_time, -30);
    }

    #[tokio::test]
    async fn test_insert_replaces() {
        let dir = TempDir::new().unwrap();
        let store = FileAxisStore::open(dir.path()).await.unwrap().without_sync();
        store.insert(&record(0, 60, 1)).await.unwrap();
        store.insert(&record(0, 60, 5)).await.unwrap();
        let records = store.find_ordered_by_time(0).await.unwrap();
        assert_eq!(records, vec![record(0, 60, 5)]);
    }

    #[tokio::test]
    async fn test_skips_stray_files() {
        let dir = TempDir::new().unwrap();
        let store = FileAxisStore::open(dir.path()).await.unwrap().without_sync();
        store.insert(&record(0, 60, 1)).await.unwrap();
        std::fs::write(dir.path().join("layer-0").join("120.tmp"), b"partial").unwrap();
        std::fs::write(dir.path().join("layer-0").join("notes.txt"), b"hello").unwrap();

        let records = store.find_ordered_by_time(0).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_layer_scoped_deletion() {
        let dir = TempDir::new().unwrap();
        let store = FileAxisStore::open(dir.path()).await.unwrap().without_sync();
        let per_layer = 3;
        for layer in 0..3u8 {
            for i in 0..per_layer {
                store.insert(&record(layer, i as i64, 1)).await.unwrap();
            }
        }

        store.delete_layer(0).await.unwrap();
        let mut remaining = 0;
        for layer in 0..3u8 {
            remaining += store.find_ordered_by_time(layer).await.unwrap().len();
        }
        assert_eq!(remaining, 2 * per_layer);

        store.delete(1, 0).await.unwrap();
        store.delete(1, 0).await.unwrap();
        assert_eq!(store.find_ordered_by_time(1).await.unwrap().len(), per_layer - 1);

        store.clear_all().await.unwrap();
        store.delete_layer(2).await.unwrap();
        assert!(store.find_ordered_by_time(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_time_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileAxisStore::open(dir.path()).await.unwrap().without_sync();
            assert_eq!(store.load_start_time().await.unwrap(), None);
            store.save_start_time(1_700_000_000).await.unwrap();
            store.insert(&record(0, 1_700_000_060, 1)).await.unwrap();
        }

        let store = FileAxisStore::open(dir.path()).await.unwrap().without_sync();
        assert_eq!(store.load_start_time().await.unwrap(), Some(1_700_000_000));
        assert_eq!(store.find_ordered_by_time(0).await.unwrap().len(), 1);

        store.clear_all().await.unwrap();
        assert_eq!(store.load_start_time().await.unwrap(), None);

        std::fs::write(dir.path().join(START_TIME_FILE), b"yesterday").unwrap();
        assert!(store.load_start_time().await.is_err());
    }
}
