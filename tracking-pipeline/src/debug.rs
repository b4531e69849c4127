use lidar_types::CartesianPoint;

/// Sink for the debug-UI subset described in step 3/4 of the orchestrator:
/// a bounded background sample plus the (optionally ring/azimuth-restricted)
/// foreground points. Not one of the named external contracts in the spec's
/// interface enumeration -- purely local wiring -- so it lives here rather
/// than in `lidar_types::traits`.
pub trait DebugSink: Send + Sync {
    fn on_background_sample(&self, sensor_id: &str, sample: &[CartesianPoint]);
    fn on_foreground_points(&self, sensor_id: &str, points: &[CartesianPoint]);
}
