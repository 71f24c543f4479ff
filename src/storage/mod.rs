//! Layered snapshot history and its persistence
//!
//! - [`Stat`]: the layered in-memory history with cascading downsampling
//! - [`AxisStore`]: persistence seam, with in-memory and file-backed stores
//! - [`AxisRecord`]: a persisted snapshot and the checksummed axis codec

mod client;
mod file;
mod layers;
mod local;
mod model;
mod stat;
mod telemetry;

pub use client::AxisStore;
pub use file::FileAxisStore;
pub use layers::{default_layers, validate_layers, LayerConfig};
pub use local::MemoryAxisStore;
pub use model::{decode_axis, encode_axis, AxisRecord};
pub use stat::{Stat, StatConfig};

pub(crate) use layers::Layer;
