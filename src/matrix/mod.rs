//! Heatmap data types and the pixelization strategy
//!
//! - [`Axis`]: one snapshot of activity across the key space
//! - [`Plane`]: time-ordered snapshots selected for one query
//! - [`Matrix`]: the renderable, bounded-height result
//! - [`DistanceStrategy`]: merges adjacent buckets until the output fits

mod axis;
mod distance;
mod output;
mod plane;
mod tag;

pub use axis::{union_keys, Axis};
pub use distance::{DistanceConfig, DistanceStrategy};
pub use output::Matrix;
pub use plane::Plane;
pub use tag::StatTag;

use crate::Result;

/// Boundary standing for the end of the key space.
///
/// Sample sources report the last region's open upper bound as this key so
/// axis boundaries stay strictly increasing byte strings.
pub const KEYSPACE_END: &[u8] = &[0xFF; 16];

/// Maximum number of key rows rendered for one heatmap.
pub const MAX_DISPLAY_ROWS: usize = 1536;

/// Reduction of a plane into a bounded-height matrix.
pub trait Strategy: Send + Sync {
    /// Merge adjacent buckets of `plane` into at most `max_rows` rows, unless
    /// label borders force more. `tags[0]` drives the merge decisions; every tag
    /// in `tags` is rendered on the resulting rows.
    fn reduce(&self, plane: &Plane, max_rows: usize, tags: &[StatTag]) -> Result<Matrix>;

    /// Reduce a single axis to at most `max_rows` buckets, keeping every stored tag.
    fn compact_axis(&self, axis: &Axis, max_rows: usize) -> Result<Axis>;
}
