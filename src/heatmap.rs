//! Heatmap query parameters
//!
//! Keys arrive hex encoded, times as unix seconds. Missing times default to the
//! last six hours; a missing `type` selects `written_bytes`.

use crate::matrix::StatTag;
use crate::{Error, Result};

use serde::Deserialize;

/// Window used when the caller gives no start time.
pub const DEFAULT_WINDOW_SECS: i64 = 360 * 60;

/// Raw query string of `GET /heatmaps`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeatmapParams {
    pub startkey: Option<String>,
    pub endkey: Option<String>,
    pub starttime: Option<String>,
    pub endtime: Option<String>,
    #[serde(rename = "type")]
    pub tag: Option<String>,
}

/// A validated heatmap request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeatmapQuery {
    /// Empty means the start of the key space
    pub start_key: Vec<u8>,
    /// Empty means the end of the key space
    pub end_key: Vec<u8>,
    pub start_time: i64,
    pub end_time: i64,
    pub tag: StatTag,
}

impl HeatmapQuery {
    /// Resolve raw parameters, filling defaults relative to `now`.
    pub fn from_params(params: &HeatmapParams, now: i64) -> Result<Self> {
        let end_time = match non_empty(&params.endtime) {
            Some(raw) => parse_time("endtime", raw)?,
            None => now,
        };
        let start_time = match non_empty(&params.starttime) {
            Some(raw) => parse_time("starttime", raw)?,
            None => end_time.checked_sub(DEFAULT_WINDOW_SECS).ok_or_else(|| {
                Error::InvalidInput(format!("endtime {} leaves no room for the default window", end_time))
            })?,
        };
        let tag = match non_empty(&params.tag) {
            Some(raw) => raw.parse::<StatTag>().map_err(Error::InvalidInput)?,
            None => StatTag::WrittenBytes,
        };

        let query = Self {
            start_key: parse_key("startkey", params.startkey.as_deref())?,
            end_key: parse_key("endkey", params.endkey.as_deref())?,
            start_time,
            end_time,
            tag,
        };
        query.validate()?;
        Ok(query)
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_time >= self.end_time {
            return Err(Error::InvalidInput(format!(
                "starttime {} must be before endtime {}",
                self.start_time, self.end_time
            )));
        }
        if !self.end_key.is_empty() && self.start_key >= self.end_key {
            return Err(Error::InvalidInput(format!(
                "startkey {} must be before endkey {}",
                hex::encode(&self.start_key),
                hex::encode(&self.end_key)
            )));
        }
        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_time(name: &str, raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|e| Error::InvalidInput(format!("{} '{}': {}", name, raw, e)))
}

fn parse_key(name: &str, raw: Option<&str>) -> Result<Vec<u8>> {
    hex::decode(raw.unwrap_or_default().trim())
        .map_err(|e| Error::InvalidInput(format!("{} is not valid hex: {}", name, e)))
}
