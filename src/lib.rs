//! # Key Visual
//!
//! A multi-resolution heatmap of read and write activity across the key space
//! of a distributed storage cluster.
//!
//! Periodic region statistics become [`matrix::Axis`] snapshots. Snapshots are
//! kept in a layered history where older data is progressively merged into
//! coarser time buckets, so weeks of history fit in bounded memory. A heatmap
//! query selects a time window and key range, then compresses adjacent key
//! buckets until the result fits on screen, never merging across table or
//! index borders.
//!
//! ## Architecture
//!
//! - **Input**: polls a sample source and appends snapshots to the history
//! - **Storage**: the layered history ([`storage::Stat`]) and its persistence mirror
//! - **Matrix**: axis, plane and matrix types plus the compression strategy
//! - **Decorator**: label strategies that name keys and declare borders
//! - **Service**: lifecycle and dynamic config handling
//! - **API**: the HTTP surface

pub mod api;
pub mod clock;
pub mod config;
pub mod decorator;
pub mod heatmap;
pub mod input;
pub mod matrix;
pub mod service;
pub mod storage;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::heatmap::HeatmapQuery;
    pub use crate::matrix::{Axis, Matrix, Plane, StatTag};
    pub use crate::service::{KeyVisualConfig, Policy, Service, ServiceConfig};
    pub use crate::storage::{AxisStore, Stat, StatConfig};
    pub use crate::{Error, Result};
}
