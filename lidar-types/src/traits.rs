//! Contracts for the external collaborators named in the spec: the
//! Kalman/track-association tracker (L5), the classifier (L6), persistence
//! and publish sinks, and the optional background/region snapshot stores.
//! None of these are implemented here -- the core only depends on the
//! shape, so call sites can be exercised with test doubles.

use crate::cluster::WorldCluster;
use crate::frame::Frame;
use crate::track::{FrameBundle, Track, TrackFeatures, TrackObservation};

/// Opaque kinematic tracker. Mutated from exactly one orchestrator call at a
/// time per sensor; `get_confirmed_tracks` and `update_classification` may be
/// called concurrently from other tasks and must take the tracker's own lock.
pub trait Tracker: Send + Sync {
    fn update(&self, clusters: Vec<WorldCluster>, frame_ts_ns: i64);
    fn get_confirmed_tracks(&self) -> Vec<Track>;
    fn record_frame_stats(&self, total_foreground: usize, clustered_foreground: usize);
    /// Age coasting tracks during throttle bursts without a clustering pass.
    fn advance_misses(&self, ts_ns: i64);
    fn update_classification(&self, track_id: u64, class: &str, confidence: f32, model: &str);
}

/// Opaque object classifier (L6).
pub trait Classifier: Send + Sync {
    /// Minimum observation count before a track is eligible for classification.
    fn min_observations(&self) -> i32;
    fn classify_and_update(&self, track: &Track);
    fn extract_track_features(&self, track: &Track) -> TrackFeatures;
}

/// Persistence backend (SQLite schema, migrations, etc. are out of scope;
/// this is the interface the core calls through).
pub trait PersistenceSink: Send + Sync {
    fn persist_track(&self, track: &Track, world_frame: &str);
    fn persist_observation(&self, obs: &TrackObservation);
    /// Prune soft-deleted tracks older than `ttl_secs`; returns count removed.
    fn prune_deleted_tracks(&self, sensor_id: &str, ttl_secs: u64) -> u64;
}

/// Generic non-blocking frame-bundle conveyor (gRPC visualiser, UDP side
/// channel, etc.). Returns `false` when the send was dropped for back-pressure.
pub trait PublishSink: Send + Sync {
    fn publish(&self, bundle: &FrameBundle) -> bool;
}

/// Adapts raw frame + mask + clusters + tracker state into the bundle type
/// a `PublishSink` understands.
pub trait VisualiserAdapter: Send + Sync {
    fn adapt(
        &self,
        frame: &Frame,
        mask: &[bool],
        clusters: &[WorldCluster],
        tracks: &[Track],
    ) -> FrameBundle;
}

/// Optional collaborator for persisting/restoring background-grid snapshots.
pub trait BgStore: Send + Sync {
    /// Write a grid snapshot, returning its id on success.
    fn write_snapshot(&self, sensor_id: &str, payload: &[u8]) -> Option<String>;
    fn read_snapshot(&self, snapshot_id: &str) -> Option<Vec<u8>>;
}

/// Optional collaborator for persisting/restoring region-manager snapshots.
pub trait RegionStore: Send + Sync {
    fn get_region_snapshot_by_source_path(&self, path: &str) -> Option<Vec<u8>>;
    fn get_region_snapshot_by_scene_hash(&self, hash: &str) -> Option<Vec<u8>>;
    fn write_region_snapshot(&self, snapshot_id: &str, scene_hash: &str, source_path: &str, payload: &[u8]);
}
