//! Time-ordered snapshots assembled for one query

use super::{Axis, Matrix, StatTag, Strategy};
use crate::{Error, Result};

/// Read-only view over the snapshots covering a query window.
///
/// Snapshot `i` covers the interval `(times[i], times[i + 1]]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plane {
    times: Vec<i64>,
    axes: Vec<Axis>,
}

impl Plane {
    pub fn new(times: Vec<i64>, axes: Vec<Axis>) -> Result<Self> {
        if axes.is_empty() {
            if times.len() > 1 {
                return Err(Error::Internal("plane times without axes".into()));
            }
            return Ok(Self { times, axes });
        }
        if times.len() != axes.len() + 1 {
            return Err(Error::Internal(format!(
                "plane has {} times for {} axes",
                times.len(),
                axes.len()
            )));
        }
        if times.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::Internal("plane times are not ordered".into()));
        }
        Ok(Self { times, axes })
    }

    pub fn times(&self) -> &[i64] {
        &self.times
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Number of snapshots.
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// End times of the snapshots.
    pub fn end_times(&self) -> &[i64] {
        if self.times.is_empty() {
            &[]
        } else {
            &self.times[1..]
        }
    }

    /// Render the plane with `strategy` into at most `max_rows` key rows.
    pub fn pixel(
        &self,
        strategy: &dyn Strategy,
        max_rows: usize,
        tags: &[StatTag],
    ) -> Result<Matrix> {
        if tags.is_empty() {
            return Err(Error::InvalidInput("at least one stat type is required".into()));
        }
        strategy.reduce(self, max_rows.max(1), tags)
    }
}
