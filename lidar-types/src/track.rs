/// Per-frame (not averaged) bounding box dimensions, as attached to a
/// `TrackObservation`. Averaged dimensions live on the `Track` record itself
/// for classification and reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingBox {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackClassification {
    pub class: String,
    pub confidence: f32,
    pub model: String,
}

/// A confirmed, kinematic object as maintained by the (external) tracker.
/// The core only reads fields needed to drive classification, persistence
/// and publishing; association/Kalman internals are out of scope (see L5).
#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: u64,
    pub sensor_id: String,
    /// Consecutive frames without a matching observation.
    pub misses: u32,
    pub observation_count: u32,
    pub classification: Option<TrackClassification>,
    pub centroid: (f64, f64, f64),
    pub velocity: (f64, f64, f64),
    /// Running-average bounding box, for reporting/classification only.
    pub bbox_avg: BoundingBox,
}

/// One per-frame observation of a track, persisted only when the track was
/// matched this frame (`misses == 0`).
#[derive(Debug, Clone)]
pub struct TrackObservation {
    pub track_id: u64,
    pub frame_id: String,
    pub timestamp_ns: i64,
    pub position: (f64, f64, f64),
    pub velocity: (f64, f64, f64),
    /// Per-frame bounding box, distinct from `Track::bbox_avg`.
    pub bbox: BoundingBox,
}

/// Feature row handed to the (optional) ML training-data export hook.
#[derive(Debug, Clone)]
pub struct TrackFeatures {
    pub track_id: u64,
    pub features: Vec<f64>,
}

/// The externally-published package of a frame's mask, clusters and tracker
/// snapshot, described abstractly in the spec; conveyed opaquely to the
/// visualiser / UDP adapters via non-blocking sends.
#[derive(Debug, Clone)]
pub struct FrameBundle {
    pub frame_id: String,
    pub sensor_id: String,
    pub total_points: usize,
    pub foreground_count: usize,
    pub background_sample: Vec<crate::point::CartesianPoint>,
    pub foreground_points: Vec<crate::point::CartesianPoint>,
    pub cluster_count: usize,
    pub tracks: Vec<Track>,
}
