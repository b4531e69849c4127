use std::time::Duration;

/// Tuning knobs for one `FrameBuilder`. Field names and defaults mirror the
/// configuration enumeration in the spec exactly; several fields
/// (`azimuth_tolerance_deg`, `max_backfill_delay`) are reserved for a
/// not-yet-built out-of-order backfill policy -- the sequence-gap detector
/// records them but never consults them.
#[derive(Debug, Clone)]
pub struct FrameBuilderConfig {
    pub sensor_id: String,
    pub azimuth_tolerance_deg: f64,
    pub min_frame_points: usize,
    pub max_backfill_delay: Duration,
    pub frame_buffer_size: usize,
    pub buffer_timeout: Duration,
    pub cleanup_interval: Duration,
    pub expected_frame_duration: Duration,
    pub enable_time_based: bool,
}

impl FrameBuilderConfig {
    pub fn new(sensor_id: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            azimuth_tolerance_deg: 10.0,
            min_frame_points: 1_000,
            max_backfill_delay: Duration::from_millis(100),
            frame_buffer_size: 10,
            buffer_timeout: Duration::from_millis(1_000),
            cleanup_interval: Duration::from_millis(250),
            expected_frame_duration: Duration::ZERO,
            enable_time_based: false,
        }
    }
}
