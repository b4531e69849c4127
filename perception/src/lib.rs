//! L4: the perception helpers between the background grid's foreground mask
//! and the tracker: world transform, ground/ceiling removal, decimation and
//! clustering. Pure functions over point vectors — no shared state, so the
//! orchestrator owns sequencing and retry/backoff concerns.

pub mod dbscan;
pub mod decimation;
pub mod height_band;
pub mod transform;
pub mod voxel;

pub use dbscan::cluster_points;
pub use decimation::{apply_decimation, DecimationMode};
pub use height_band::HeightBandFilter;
pub use transform::transform_to_world;
pub use voxel::voxel_grid;
