use std::sync::Arc;

use parking_lot::RwLock;

use background_grid::BackgroundGrid;
use lidar_types::{Classifier, PersistenceSink, PublishSink, Tracker, TrackFeatures, VisualiserAdapter};

use crate::debug::DebugSink;

/// Everything `new_frame_callback` needs to wire one sensor's orchestrator.
/// Field names follow the spec's configuration enumeration for
/// `TrackingPipeline` in §6.
pub struct TrackingPipelineConfig {
    pub sensor_id: String,
    pub background_manager: Arc<RwLock<BackgroundGrid>>,
    pub tracker: Arc<dyn Tracker>,
    pub classifier: Option<Arc<dyn Classifier>>,
    pub persistence_sink: Option<Arc<dyn PersistenceSink>>,
    pub publish_sink: Option<Arc<dyn PublishSink>>,
    /// Secondary UDP conveyor, sent the same bundle as `publish_sink`.
    pub udp_sink: Option<Arc<dyn PublishSink>>,
    pub visualiser_adapter: Option<Arc<dyn VisualiserAdapter>>,
    pub debug_sink: Option<Arc<dyn DebugSink>>,

    /// 0 disables throttling.
    pub max_frame_rate: f64,
    /// <= 0 disables voxel downsampling.
    pub voxel_leaf_size: f64,
    pub remove_ground: bool,
    pub height_band_floor: f64,
    pub height_band_ceiling: f64,

    pub deleted_track_ttl_secs: u64,

    pub feature_export_fn: Option<Arc<dyn Fn(TrackFeatures) + Send + Sync>>,
}

impl TrackingPipelineConfig {
    pub fn new(sensor_id: impl Into<String>, background_manager: Arc<RwLock<BackgroundGrid>>, tracker: Arc<dyn Tracker>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            background_manager,
            tracker,
            classifier: None,
            persistence_sink: None,
            publish_sink: None,
            udp_sink: None,
            visualiser_adapter: None,
            debug_sink: None,
            max_frame_rate: 0.0,
            voxel_leaf_size: 0.0,
            remove_ground: false,
            height_band_floor: -0.3,
            height_band_ceiling: 3.0,
            deleted_track_ttl_secs: 300,
            feature_export_fn: None,
        }
    }
}
