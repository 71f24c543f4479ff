//! Renderable heatmap matrix

use super::StatTag;
use crate::decorator::LabelKey;

use serde::Serialize;
use std::collections::BTreeMap;

/// Heatmap returned to clients.
///
/// `data[tag][t][row]` is the activity of key row `row` during time column `t`.
/// Row `row` spans `key_axis[row]..key_axis[row + 1]`; column `t` spans
/// `time_axis[t]..time_axis[t + 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Matrix {
    pub data: BTreeMap<StatTag, Vec<Vec<u64>>>,
    pub key_axis: Vec<LabelKey>,
    pub time_axis: Vec<i64>,
    #[serde(with = "hex::serde")]
    pub start_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub end_key: Vec<u8>,
}

impl Matrix {
    /// Number of key rows.
    pub fn rows(&self) -> usize {
        self.key_axis.len().saturating_sub(1)
    }

    /// Number of time columns.
    pub fn columns(&self) -> usize {
        self.time_axis.len().saturating_sub(1)
    }

    /// Record the key range the matrix was resolved for.
    pub fn with_range(mut self, start_key: &[u8], end_key: &[u8]) -> Self {
        self.start_key = start_key.to_vec();
        self.end_key = end_key.to_vec();
        self
    }

    /// Sum over all cells of a tag.
    pub fn total(&self, tag: StatTag) -> u64 {
        self.data
            .get(&tag)
            .map(|columns| {
                columns
                    .iter()
                    .flatten()
                    .fold(0u64, |acc, v| acc.saturating_add(*v))
            })
            .unwrap_or(0)
    }

    /// Raw boundary keys of the rows.
    pub fn boundaries(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.key_axis.iter().map(|label| label.key.as_slice())
    }
}
