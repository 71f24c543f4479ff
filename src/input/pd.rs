//! Placement driver region source
//!
//! Polls the PD HTTP API (`GET /pd/api/v1/regions`) and turns the region list
//! into one snapshot: every region becomes a bucket carrying the traffic PD
//! reports for it.

use super::SampleSource;
use crate::clock::BoundedClock;
use crate::matrix::{Axis, StatTag, KEYSPACE_END};
use crate::{Error, Result};

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

const REGIONS_PATH: &str = "/pd/api/v1/regions";

/// One region as reported by PD. Keys are hex encoded; an empty end key is the
/// end of the key space.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegionInfo {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub start_key: String,
    #[serde(default)]
    pub end_key: String,
    #[serde(default)]
    pub written_bytes: u64,
    #[serde(default)]
    pub read_bytes: u64,
    #[serde(default)]
    pub written_keys: u64,
    #[serde(default)]
    pub read_keys: u64,
}

#[derive(Debug, Deserialize)]
struct RegionsResponse {
    #[serde(default)]
    regions: Vec<RegionInfo>,
}

/// Convert a region list into an axis.
///
/// Regions are ordered by start key. Key ranges no region covers become
/// zero-valued buckets; regions overlapping an earlier one or with an invalid
/// range are skipped.
pub fn regions_to_axis(mut regions: Vec<RegionInfo>) -> Result<Axis> {
    let mut decoded: Vec<(Vec<u8>, Vec<u8>, [u64; 4])> = Vec::with_capacity(regions.len());
    for region in regions.drain(..) {
        let start = hex::decode(&region.start_key)
            .map_err(|e| Error::Source(format!("region {} start key: {}", region.id, e)))?;
        let mut end = hex::decode(&region.end_key)
            .map_err(|e| Error::Source(format!("region {} end key: {}", region.id, e)))?;
        if end.is_empty() {
            end = KEYSPACE_END.to_vec();
        }
        if start >= end {
            warn!(region = region.id, "Skipping region with empty key range");
            continue;
        }
        let stats = [
            region.written_bytes,
            region.read_bytes,
            region.written_keys,
            region.read_keys,
        ];
        decoded.push((start, end, stats));
    }
    decoded.sort_by(|a, b| a.0.cmp(&b.0));

    let tags = [
        StatTag::WrittenBytes,
        StatTag::ReadBytes,
        StatTag::WrittenKeys,
        StatTag::ReadKeys,
    ];
    let mut keys: Vec<Vec<u8>> = Vec::with_capacity(decoded.len() + 1);
    let mut columns: [Vec<u64>; 4] = Default::default();

    for (start, end, stats) in decoded {
        match keys.last() {
            None => keys.push(start),
            Some(last) if *last > start => {
                debug!(start = %hex::encode(&start), "Skipping overlapping region");
                continue;
            }
            Some(last) if *last < start => {
                keys.push(start);
                for column in &mut columns {
                    column.push(0);
                }
            }
            Some(_) => {}
        }
        keys.push(end);
        for (column, value) in columns.iter_mut().zip(stats) {
            column.push(value);
        }
    }

    if keys.len() < 2 {
        return Ok(Axis::empty());
    }
    let values: BTreeMap<StatTag, Vec<u64>> = tags.into_iter().zip(columns).collect();
    Axis::new(keys, values)
}

/// Sample source backed by the PD region API.
pub struct PdRegionSource {
    client: reqwest::Client,
    url: String,
    start_time: i64,
    clock: BoundedClock,
}

impl PdRegionSource {
    pub fn new(pd_addr: &str, timeout: Duration, start_time: i64) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base = if pd_addr.starts_with("http://") || pd_addr.starts_with("https://") {
            pd_addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", pd_addr.trim_end_matches('/'))
        };
        Ok(Self {
            client,
            url: format!("{}{}", base, REGIONS_PATH),
            start_time,
            clock: BoundedClock::starting_after(start_time),
        })
    }

    async fn fetch_regions(&self) -> Result<Vec<RegionInfo>> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Source(format!(
                "GET {} returned {}",
                self.url,
                response.status()
            )));
        }
        let body = response.bytes().await?;
        let parsed: RegionsResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::Serialization(format!("PD regions unmarshal failed: {}", e)))?;
        Ok(parsed.regions)
    }
}

#[async_trait]
impl SampleSource for PdRegionSource {
    fn start_time(&self) -> i64 {
        self.start_time
    }

    fn observe_latest(&self, end_time: i64) {
        self.clock.observe(end_time);
    }

    async fn poll(&self) -> Result<Vec<(i64, Axis)>> {
        let regions = self.fetch_regions().await?;
        let count = regions.len();
        let axis = regions_to_axis(regions)?;
        let end_time = self.clock.now_secs();
        debug!(regions = count, buckets = axis.len(), end_time, "Polled PD regions");
        Ok(vec![(end_time, axis)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(start: &str, end: &str, written: u64) -> RegionInfo {
        RegionInfo {
            start_key: hex::encode(start),
            end_key: hex::encode(end),
            written_bytes: written,
            read_keys: written * 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_observed_history_moves_clock_forward() {
        let source = PdRegionSource::new("127.0.0.1:2379", Duration::from_secs(1), 0).unwrap();
        let future = chrono::Utc::now().timestamp() + 3_600;
        source.observe_latest(future);
        assert_eq!(source.clock.now_secs(), future + 1);
    }

    #[test]
    fn test_regions_become_buckets() {
        let axis = regions_to_axis(vec![
            region("m", "", 3),
            region("", "c", 1),
            region("c", "m", 2),
        ])
        .unwrap();

        assert_eq!(
            axis.keys(),
            &[b"".to_vec(), b"c".to_vec(), b"m".to_vec(), KEYSPACE_END.to_vec()]
        );
        assert_eq!(axis.values(StatTag::WrittenBytes).as_ref(), &[1, 2, 3]);
        assert_eq!(axis.values(StatTag::ReadKeys).as_ref(), &[2, 4, 6]);
        assert_eq!(axis.values(StatTag::ReadBytes).as_ref(), &[0, 0, 0]);
    }

    #[test]
    fn test_gaps_and_overlaps() {
        let axis = regions_to_axis(vec![
            region("a", "c", 1),
            region("b", "d", 50),
            region("e", "f", 2),
        ])
        .unwrap();
        assert_eq!(
            axis.keys(),
            &[b"a".to_vec(), b"c".to_vec(), b"e".to_vec(), b"f".to_vec()]
        );
        assert_eq!(axis.values(StatTag::WrittenBytes).as_ref(), &[1, 0, 2]);
    }

    #[test]
    fn test_empty_and_invalid() {
        assert!(regions_to_axis(Vec::new()).unwrap().is_empty());
        let bad = RegionInfo {
            start_key: "zz".into(),
            ..Default::default()
        };
        assert!(matches!(regions_to_axis(vec![bad]), Err(Error::Source(_))));
    }

    #[test]
    fn test_response_deserialization() {
        let raw = r#"{"count": 1, "regions": [
            {"id": 2, "start_key": "7480", "end_key": "", "written_bytes": 10, "approximate_size": 1}
        ]}"#;
        let parsed: RegionsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.regions[0].id, 2);
        assert_eq!(parsed.regions[0].written_bytes, 10);
        assert_eq!(parsed.regions[0].read_bytes, 0);
    }
}
