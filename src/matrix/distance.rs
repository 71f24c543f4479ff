//! Distance-based bucket reduction
//!
//! Adjacent buckets are merged greedily, cheapest pair first, until the
//! requested height is reached. The cost of a pair blends how differently the
//! two buckets behaved over time with how active they are, so quiet and
//! uniform regions collapse first and hot spots keep their resolution.
//! Boundaries the label strategy marks as borders are never removed.

use super::{union_keys, Axis, Matrix, Plane, StatTag, Strategy};
use crate::decorator::{label_boundaries, LabelStrategy};
use crate::Result;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;

/// Tuning for [`DistanceStrategy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceConfig {
    /// Weight of the dissimilarity term in `[0, 1]`; the remainder weighs activity.
    pub ratio: f64,
    /// Number of logarithmic activity levels.
    pub levels: u32,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        let phi = (1.0 + 5f64.sqrt()) / 2.0;
        Self {
            ratio: 1.0 / phi,
            levels: 15,
        }
    }
}

/// Merge candidate; orders so that `BinaryHeap` pops the cheapest pair,
/// lowest key position first on ties.
#[derive(Debug)]
struct Candidate {
    distance: f64,
    left: usize,
    right: usize,
    left_stamp: u32,
    right_stamp: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.left.cmp(&self.left))
    }
}

/// Maps a pair's total activity onto `[0, 1]` in `levels` logarithmic steps.
struct ActivityScale {
    log_max: f64,
    levels: f64,
}

impl ActivityScale {
    fn new(max_total: u64, levels: u32) -> Self {
        Self {
            log_max: (max_total as f64).ln_1p(),
            levels: levels.max(1) as f64,
        }
    }

    fn level(&self, total: u64) -> f64 {
        if self.log_max <= 0.0 {
            return 0.0;
        }
        let fraction = (total as f64).ln_1p() / self.log_max;
        (fraction * self.levels).ceil().min(self.levels) / self.levels
    }
}

/// Greedy adjacent-bucket merging under a similarity/activity distance.
pub struct DistanceStrategy {
    config: DistanceConfig,
    labels: Arc<dyn LabelStrategy>,
}

impl DistanceStrategy {
    pub fn new(labels: Arc<dyn LabelStrategy>, config: DistanceConfig) -> Self {
        Self { config, labels }
    }

    pub fn label_strategy(&self) -> &Arc<dyn LabelStrategy> {
        &self.labels
    }

    fn distance(&self, left: &[u64], right: &[u64], total: u64, scale: &ActivityScale) -> f64 {
        let dissimilarity = if total == 0 {
            0.0
        } else {
            let diff: f64 = left
                .iter()
                .zip(right)
                .map(|(a, b)| (*a as f64 - *b as f64).abs())
                .sum();
            diff / total as f64
        };
        let ratio = self.config.ratio.clamp(0.0, 1.0);
        ratio * dissimilarity + (1.0 - ratio) * scale.level(total)
    }

    /// Choose the surviving buckets. `series[slot]` is the activity of one
    /// bucket over time; returns the ascending start slots of the merged rows.
    fn partition(&self, keys: &[Vec<u8>], series: Vec<Vec<u64>>, max_rows: usize) -> Vec<usize> {
        let slots = series.len();
        let max_rows = max_rows.max(1);
        if slots <= max_rows {
            return (0..slots).collect();
        }

        // blocked[s]: boundary keys[s] separates two label domains
        let blocked: Vec<bool> = (0..slots)
            .map(|s| s > 0 && self.labels.cross_border(&keys[s - 1], &keys[s]))
            .collect();

        let mut groups = series;
        let mut totals: Vec<u64> = groups
            .iter()
            .map(|g| g.iter().fold(0u64, |acc, v| acc.saturating_add(*v)))
            .collect();
        let max_pair = totals
            .windows(2)
            .map(|w| w[0].saturating_add(w[1]))
            .max()
            .unwrap_or(0);
        let scale = ActivityScale::new(max_pair, self.config.levels);

        let mut next: Vec<usize> = (1..=slots).collect();
        let mut prev: Vec<Option<usize>> = (0..slots).map(|s| s.checked_sub(1)).collect();
        let mut alive = vec![true; slots];
        let mut stamp = vec![0u32; slots];
        let mut heap = BinaryHeap::with_capacity(slots);

        let candidate = |groups: &[Vec<u64>], totals: &[u64], stamp: &[u32], left: usize, right: usize| {
            let total = totals[left].saturating_add(totals[right]);
            Candidate {
                distance: self.distance(&groups[left], &groups[right], total, &scale),
                left,
                right,
                left_stamp: stamp[left],
                right_stamp: stamp[right],
            }
        };

        for s in 1..slots {
            if !blocked[s] {
                heap.push(candidate(&groups, &totals, &stamp, s - 1, s));
            }
        }

        let mut rows = slots;
        while rows > max_rows {
            let Some(c) = heap.pop() else {
                break;
            };
            if !alive[c.left]
                || !alive[c.right]
                || stamp[c.left] != c.left_stamp
                || stamp[c.right] != c.right_stamp
            {
                continue;
            }

            let absorbed = std::mem::take(&mut groups[c.right]);
            for (acc, v) in groups[c.left].iter_mut().zip(absorbed) {
                *acc = acc.saturating_add(v);
            }
            totals[c.left] = totals[c.left].saturating_add(totals[c.right]);
            alive[c.right] = false;
            stamp[c.left] += 1;
            rows -= 1;

            let after = next[c.right];
            next[c.left] = after;
            if after < slots {
                prev[after] = Some(c.left);
            }

            if let Some(before) = prev[c.left] {
                if !blocked[c.left] {
                    heap.push(candidate(&groups, &totals, &stamp, before, c.left));
                }
            }
            if after < slots && !blocked[after] {
                heap.push(candidate(&groups, &totals, &stamp, c.left, after));
            }
        }

        (0..slots).filter(|s| alive[*s]).collect()
    }
}

fn fold(counters: &[u64], starts: &[usize]) -> Vec<u64> {
    starts
        .iter()
        .enumerate()
        .map(|(i, start)| {
            let end = starts.get(i + 1).copied().unwrap_or(counters.len());
            counters[*start..end]
                .iter()
                .fold(0u64, |acc, v| acc.saturating_add(*v))
        })
        .collect()
}

fn tag_counters(projected: &BTreeMap<StatTag, Vec<u64>>, tag: StatTag, slots: usize) -> Vec<u64> {
    if let Some(counters) = projected.get(&tag) {
        return counters.clone();
    }
    let mut out = vec![0u64; slots];
    if tag == StatTag::Integration {
        for part in [StatTag::WrittenBytes, StatTag::ReadBytes] {
            if let Some(counters) = projected.get(&part) {
                for (o, v) in out.iter_mut().zip(counters) {
                    *o = o.saturating_add(*v);
                }
            }
        }
    }
    out
}

impl Strategy for DistanceStrategy {
    fn reduce(&self, plane: &Plane, max_rows: usize, tags: &[StatTag]) -> Result<Matrix> {
        let mut wanted: Vec<StatTag> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !wanted.contains(tag) {
                wanted.push(*tag);
            }
        }
        let time_axis = plane.times().to_vec();

        let keys = union_keys(plane.axes());
        if keys.len() < 2 || wanted.is_empty() {
            return Ok(Matrix {
                data: wanted
                    .iter()
                    .map(|tag| (*tag, vec![Vec::new(); plane.len()]))
                    .collect(),
                time_axis,
                ..Default::default()
            });
        }
        let slots = keys.len() - 1;

        // data[tag][t][slot] on the union boundaries
        let mut columns: BTreeMap<StatTag, Vec<Vec<u64>>> = BTreeMap::new();
        for axis in plane.axes() {
            let projected = axis.project(&keys)?;
            for tag in &wanted {
                columns
                    .entry(*tag)
                    .or_default()
                    .push(tag_counters(&projected, *tag, slots));
            }
        }

        let base = &columns[&wanted[0]];
        let series: Vec<Vec<u64>> = (0..slots)
            .map(|slot| base.iter().map(|column| column[slot]).collect())
            .collect();
        let starts = self.partition(&keys, series, max_rows);

        let data = columns
            .into_iter()
            .map(|(tag, per_time)| {
                let folded = per_time.iter().map(|column| fold(column, &starts)).collect();
                (tag, folded)
            })
            .collect();

        let mut boundaries: Vec<Vec<u8>> = starts.iter().map(|s| keys[*s].clone()).collect();
        boundaries.push(keys[slots].clone());

        Ok(Matrix {
            data,
            key_axis: label_boundaries(self.labels.as_ref(), &boundaries),
            time_axis,
            ..Default::default()
        })
    }

    fn compact_axis(&self, axis: &Axis, max_rows: usize) -> Result<Axis> {
        if axis.len() <= max_rows.max(1) {
            return Ok(axis.clone());
        }
        let series = axis
            .values(StatTag::Integration)
            .iter()
            .map(|v| vec![*v])
            .collect();
        let starts = self.partition(axis.keys(), series, max_rows);

        let mut keys: Vec<Vec<u8>> = starts.iter().map(|s| axis.keys()[*s].clone()).collect();
        keys.push(axis.keys()[axis.len()].clone());
        let values = axis
            .tags()
            .map(|tag| (tag, fold(&axis.values(tag), &starts)))
            .collect();
        Axis::new(keys, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorator::{LabelKey, SeparatorLabelStrategy};
    use async_trait::async_trait;

    /// Borders between keys with different first bytes.
    struct FirstByteBorders;

    #[async_trait]
    impl LabelStrategy for FirstByteBorders {
        fn label(&self, key: &[u8]) -> LabelKey {
            LabelKey::new(key, vec![String::from_utf8_lossy(&key[..1]).into_owned()])
        }

        fn cross_border(&self, start: &[u8], end: &[u8]) -> bool {
            start.first() != end.first()
        }

        fn label_global_start(&self) -> LabelKey {
            LabelKey::default()
        }

        fn label_global_end(&self) -> LabelKey {
            LabelKey::default()
        }
    }

    fn axis(keys: &[&str], written: &[u64]) -> Axis {
        let mut values = BTreeMap::new();
        values.insert(StatTag::WrittenBytes, written.to_vec());
        Axis::new(keys.iter().map(|k| k.as_bytes().to_vec()).collect(), values).unwrap()
    }

    fn separator_strategy() -> DistanceStrategy {
        DistanceStrategy::new(
            Arc::new(SeparatorLabelStrategy::new("/")),
            DistanceConfig::default(),
        )
    }

    #[test]
    fn test_reduce_preserves_totals_and_order() {
        let plane = Plane::new(
            vec![0, 60, 120],
            vec![
                axis(&["a", "b", "c", "d", "e", "f"], &[1, 0, 0, 50, 3]),
                axis(&["a", "b", "c", "d", "e", "f"], &[2, 0, 1, 70, 0]),
            ],
        )
        .unwrap();
        let matrix = separator_strategy()
            .reduce(&plane, 2, &[StatTag::WrittenBytes])
            .unwrap();

        assert_eq!(matrix.rows(), 2);
        assert_eq!(matrix.columns(), 2);
        assert_eq!(matrix.total(StatTag::WrittenBytes), 127);
        let keys: Vec<&[u8]> = matrix.boundaries().collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(keys.first().copied(), Some(&b"a"[..]));
        assert_eq!(keys.last().copied(), Some(&b"f"[..]));
    }

    #[test]
    fn test_hot_bucket_keeps_resolution() {
        let plane = Plane::new(
            vec![0, 60],
            vec![axis(&["a", "b", "c", "d", "e"], &[0, 0, 900, 0])],
        )
        .unwrap();
        let matrix = separator_strategy()
            .reduce(&plane, 3, &[StatTag::WrittenBytes])
            .unwrap();
        assert_eq!(matrix.rows(), 3);
        // the hot bucket [c, d) survives on its own
        assert!(matrix.data[&StatTag::WrittenBytes][0].contains(&900));
    }

    #[test]
    fn test_borders_are_never_merged() {
        let keys = ["a1", "a2", "a3", "b1", "b2", "c1", "c2"];
        let plane = Plane::new(vec![0, 60], vec![axis(&keys, &[1, 1, 1, 1, 1, 1])]).unwrap();
        let strategy = DistanceStrategy::new(Arc::new(FirstByteBorders), DistanceConfig::default());

        for max_rows in 1..=6 {
            let matrix = strategy.reduce(&plane, max_rows, &[StatTag::WrittenBytes]).unwrap();
            let boundaries: Vec<&[u8]> = matrix.boundaries().collect();
            assert!(boundaries.contains(&&b"b1"[..]));
            assert!(boundaries.contains(&&b"c1"[..]));
            assert!(matrix.rows() >= 3);
            assert!(matrix.rows() <= max_rows.max(3));
            assert_eq!(matrix.total(StatTag::WrittenBytes), 6);
        }
    }

    #[test]
    fn test_reduce_is_deterministic() {
        let plane = Plane::new(
            vec![0, 60],
            vec![axis(&["a", "b", "c", "d", "e", "f", "g"], &[5, 5, 5, 5, 5, 5])],
        )
        .unwrap();
        let strategy = separator_strategy();
        let first = strategy.reduce(&plane, 3, &[StatTag::WrittenBytes]).unwrap();
        let second = strategy.reduce(&plane, 3, &[StatTag::WrittenBytes]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_reduce_renders_derived_tags() {
        let mut values = BTreeMap::new();
        values.insert(StatTag::WrittenBytes, vec![1, 2]);
        values.insert(StatTag::ReadBytes, vec![3, 4]);
        let a = Axis::new(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()], values).unwrap();
        let plane = Plane::new(vec![0, 60], vec![a]).unwrap();

        let matrix = separator_strategy()
            .reduce(&plane, 10, &StatTag::Integration.display_tags())
            .unwrap();
        assert_eq!(matrix.data[&StatTag::Integration], vec![vec![4, 6]]);
        assert_eq!(matrix.data[&StatTag::ReadBytes], vec![vec![3, 4]]);
    }

    #[test]
    fn test_empty_plane() {
        let matrix = separator_strategy()
            .reduce(&Plane::default(), 10, &[StatTag::ReadKeys])
            .unwrap();
        assert_eq!(matrix.rows(), 0);
        assert!(matrix.data[&StatTag::ReadKeys].is_empty());
    }

    #[test]
    fn test_compact_axis_bounds_buckets() {
        let a = axis(&["a", "b", "c", "d", "e", "f"], &[1, 2, 3, 4, 5]);
        let compacted = separator_strategy().compact_axis(&a, 2).unwrap();
        assert_eq!(compacted.len(), 2);
        assert_eq!(compacted.total(StatTag::WrittenBytes), 15);
        assert_eq!(compacted.keys().first(), a.keys().first());
        assert_eq!(compacted.keys().last(), a.keys().last());
    }
}
