//! Key axis: ordered key boundaries with per-tag bucket counters

use super::StatTag;
use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Activity across a key range at one point in time.
///
/// `keys` holds `K + 1` strictly increasing boundaries describing `K` buckets;
/// bucket `i` covers `[keys[i], keys[i + 1])`. Every tag in `values` carries
/// exactly `K` counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    keys: Vec<Vec<u8>>,
    values: BTreeMap<StatTag, Vec<u64>>,
}

impl Axis {
    /// Build an axis, validating boundary order and vector lengths.
    pub fn new(keys: Vec<Vec<u8>>, values: BTreeMap<StatTag, Vec<u64>>) -> Result<Self> {
        if keys.len() < 2 {
            if values.values().any(|v| !v.is_empty()) {
                return Err(Error::InvalidAxis(format!(
                    "{} boundaries cannot carry values",
                    keys.len()
                )));
            }
            return Ok(Self::default());
        }

        if let Some(pos) = keys.windows(2).position(|w| w[0] >= w[1]) {
            return Err(Error::InvalidAxis(format!(
                "boundaries not strictly increasing at position {}",
                pos + 1
            )));
        }

        let buckets = keys.len() - 1;
        for (tag, counters) in &values {
            if counters.len() != buckets {
                return Err(Error::InvalidAxis(format!(
                    "tag {} has {} counters for {} buckets",
                    tag,
                    counters.len(),
                    buckets
                )));
            }
        }

        Ok(Self { keys, values })
    }

    /// The axis with no buckets.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.len() < 2
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.keys.len().saturating_sub(1)
    }

    pub fn keys(&self) -> &[Vec<u8>] {
        &self.keys
    }

    /// Stored tags, in tag order.
    pub fn tags(&self) -> impl Iterator<Item = StatTag> + '_ {
        self.values.keys().copied()
    }

    /// Counters for a tag. Derived tags are computed when not stored;
    /// tags the source never reported read as zero.
    pub fn values(&self, tag: StatTag) -> Cow<'_, [u64]> {
        if let Some(counters) = self.values.get(&tag) {
            return Cow::Borrowed(counters);
        }
        let mut out = vec![0u64; self.len()];
        if tag == StatTag::Integration {
            for part in [StatTag::WrittenBytes, StatTag::ReadBytes] {
                if let Some(counters) = self.values.get(&part) {
                    for (o, v) in out.iter_mut().zip(counters) {
                        *o = o.saturating_add(*v);
                    }
                }
            }
        }
        Cow::Owned(out)
    }

    /// Sum of all buckets for a tag.
    pub fn total(&self, tag: StatTag) -> u64 {
        self.values(tag).iter().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    /// Distribute this axis' counters onto `boundaries`, which must contain every
    /// key of this axis.
    ///
    /// A bucket split by a boundary this axis does not know keeps its whole value
    /// in the first piece; new pieces and buckets outside this axis' extent get 0.
    pub fn project(&self, boundaries: &[Vec<u8>]) -> Result<BTreeMap<StatTag, Vec<u64>>> {
        let slots = boundaries.len().saturating_sub(1);
        let mut out: BTreeMap<StatTag, Vec<u64>> = self
            .values
            .keys()
            .map(|tag| (*tag, vec![0u64; slots]))
            .collect();
        if self.is_empty() {
            return Ok(out);
        }

        let mut cursor = 0usize;
        for i in 0..self.len() {
            let key = &self.keys[i];
            // keys and boundaries are both sorted, so the search only moves forward
            let offset = boundaries[cursor..]
                .binary_search(key)
                .map_err(|_| Error::InvalidAxis("projection target misses a boundary".into()))?;
            cursor += offset;
            if cursor >= slots {
                return Err(Error::InvalidAxis(
                    "projection target ends before the axis".into(),
                ));
            }
            for (tag, counters) in &self.values {
                if let Some(slot) = out.get_mut(tag) {
                    slot[cursor] = slot[cursor].saturating_add(counters[i]);
                }
            }
        }
        Ok(out)
    }

    /// Merge snapshots by per-bucket summation over the union of their boundaries.
    pub fn merge<'a, I>(axes: I) -> Result<Axis>
    where
        I: IntoIterator<Item = &'a Axis>,
        I::IntoIter: Clone,
    {
        let axes = axes.into_iter();
        let keys = union_keys(axes.clone());
        let slots = keys.len().saturating_sub(1);
        let mut values: BTreeMap<StatTag, Vec<u64>> = BTreeMap::new();
        for axis in axes {
            for (tag, projected) in axis.project(&keys)? {
                let acc = values.entry(tag).or_insert_with(|| vec![0u64; slots]);
                for (a, v) in acc.iter_mut().zip(projected) {
                    *a = a.saturating_add(v);
                }
            }
        }
        Axis::new(keys, values)
    }

    /// Restrict to the buckets overlapping `[start, end)`; an empty bound is open.
    ///
    /// Buckets straddling a bound are kept whole, their outer boundary clipped to
    /// the requested key.
    pub fn range(&self, start: &[u8], end: &[u8]) -> Axis {
        if self.is_empty() {
            return Axis::empty();
        }
        let buckets = self.len();

        // first bucket whose upper boundary lies past `start`
        let lo = if start.is_empty() {
            0
        } else {
            self.keys[1..].partition_point(|k| k.as_slice() <= start)
        };
        // one past the last bucket whose lower boundary lies before `end`
        let hi = if end.is_empty() {
            buckets
        } else {
            self.keys[..buckets].partition_point(|k| k.as_slice() < end)
        };
        if lo >= hi {
            return Axis::empty();
        }

        let mut keys: Vec<Vec<u8>> = self.keys[lo..=hi].to_vec();
        if !start.is_empty() && keys[0].as_slice() < start {
            keys[0] = start.to_vec();
        }
        let last = keys.len() - 1;
        if !end.is_empty() && keys[last].as_slice() > end {
            keys[last] = end.to_vec();
        }
        if keys[0] >= keys[1] || keys[last - 1] >= keys[last] {
            return Axis::empty();
        }

        let values = self
            .values
            .iter()
            .map(|(tag, counters)| (*tag, counters[lo..hi].to_vec()))
            .collect();
        Axis { keys, values }
    }

    /// Consume the axis into its parts.
    pub fn into_parts(self) -> (Vec<Vec<u8>>, BTreeMap<StatTag, Vec<u64>>) {
        (self.keys, self.values)
    }
}

/// Sorted, de-duplicated union of the boundaries of every non-empty axis.
pub fn union_keys<'a, I>(axes: I) -> Vec<Vec<u8>>
where
    I: IntoIterator<Item = &'a Axis>,
{
    let mut keys: Vec<Vec<u8>> = axes
        .into_iter()
        .filter(|a| !a.is_empty())
        .flat_map(|a| a.keys.iter().cloned())
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(keys: &[&str], written: &[u64]) -> Axis {
        let mut values = BTreeMap::new();
        values.insert(StatTag::WrittenBytes, written.to_vec());
        Axis::new(keys.iter().map(|k| k.as_bytes().to_vec()).collect(), values).unwrap()
    }

    #[test]
    fn test_new_rejects_unordered_keys() {
        let mut values = BTreeMap::new();
        values.insert(StatTag::ReadBytes, vec![1, 2]);
        let err = Axis::new(vec![b"b".to_vec(), b"a".to_vec(), b"c".to_vec()], values).unwrap_err();
        assert!(matches!(err, Error::InvalidAxis(_)));
    }

    #[test]
    fn test_new_rejects_length_mismatch() {
        let mut values = BTreeMap::new();
        values.insert(StatTag::ReadBytes, vec![1]);
        assert!(Axis::new(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()], values).is_err());
    }

    #[test]
    fn test_integration_is_derived() {
        let mut values = BTreeMap::new();
        values.insert(StatTag::WrittenBytes, vec![1, 2]);
        values.insert(StatTag::ReadBytes, vec![10, 20]);
        let axis = Axis::new(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()], values).unwrap();
        assert_eq!(axis.values(StatTag::Integration).as_ref(), &[11, 22]);
        assert_eq!(axis.values(StatTag::ReadKeys).as_ref(), &[0, 0]);
    }

    #[test]
    fn test_merge_same_boundaries_sums() {
        let a = axis(&["a", "b", "c"], &[1, 2]);
        let b = axis(&["a", "b", "c"], &[10, 20]);
        let merged = Axis::merge(&[a, b]).unwrap();
        assert_eq!(merged.values(StatTag::WrittenBytes).as_ref(), &[11, 22]);
    }

    #[test]
    fn test_merge_new_boundary_gets_nothing() {
        let a = axis(&["a", "c"], &[5]);
        let b = axis(&["a", "b", "c"], &[1, 2]);
        let merged = Axis::merge(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(merged.keys().len(), 3);
        assert_eq!(merged.values(StatTag::WrittenBytes).as_ref(), &[6, 2]);
        assert_eq!(
            merged.total(StatTag::WrittenBytes),
            a.total(StatTag::WrittenBytes) + b.total(StatTag::WrittenBytes)
        );
    }

    #[test]
    fn test_merge_disjoint_extents() {
        let a = axis(&["a", "b"], &[3]);
        let b = axis(&["c", "d"], &[4]);
        let merged = Axis::merge(&[a, b]).unwrap();
        assert_eq!(merged.values(StatTag::WrittenBytes).as_ref(), &[3, 0, 4]);
    }

    #[test]
    fn test_range_clips_boundary_buckets() {
        let a = axis(&["a", "c", "e", "g"], &[1, 2, 3]);
        let r = a.range(b"b", b"f");
        assert_eq!(r.keys(), &[b"b".to_vec(), b"c".to_vec(), b"e".to_vec(), b"f".to_vec()]);
        assert_eq!(r.values(StatTag::WrittenBytes).as_ref(), &[1, 2, 3]);

        let r = a.range(b"c", b"e");
        assert_eq!(r.keys(), &[b"c".to_vec(), b"e".to_vec()]);
        assert_eq!(r.values(StatTag::WrittenBytes).as_ref(), &[2]);
    }

    #[test]
    fn test_range_open_and_disjoint() {
        let a = axis(&["b", "d", "f"], &[1, 2]);
        assert_eq!(a.range(b"", b""), a);
        assert!(a.range(b"f", b"").is_empty());
        assert!(a.range(b"", b"b").is_empty());
        assert_eq!(a.range(b"", b"c").values(StatTag::WrittenBytes).as_ref(), &[1]);
    }
}
