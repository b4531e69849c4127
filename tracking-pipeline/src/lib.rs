//! L4->L5 orchestrator. `new_frame_callback` builds the single closure a
//! `FrameBuilder` invokes once per completed rotation: background
//! classification, debug sampling, throttling, world transform, ground
//! removal, decimation, clustering, tracker update, classification,
//! persistence and publish -- in that order, entirely serially per sensor.
//!
//! Nothing here ever fails upward; boundary errors belong to the
//! collaborators it calls (`set_params`, persistence, snapshot restore).
//! This module only logs and counts.

mod config;
mod debug;

pub use config::TrackingPipelineConfig;
pub use debug::DebugSink;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use background_grid::{extract_foreground_points, BackgroundParams};
use lidar_types::{BoundingBox, CartesianPoint, Frame, FrameBundle, Track, TrackObservation, WorldCluster};
use perception::{cluster_points, transform_to_world, voxel_grid, HeightBandFilter};

const DEBUG_SAMPLE_CAP: usize = 5_000;
const PUBLISH_CHANNEL_DEPTH: usize = 16;
const MIN_CLUSTER_DIAMETER_M: f64 = 0.05;
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

struct TrackingPipelineState {
    config: TrackingPipelineConfig,
    polar_buffer: Mutex<Vec<lidar_types::PolarPoint>>,
    last_processed_wall: Mutex<Option<Instant>>,
    last_prune_wall: Mutex<Option<Instant>>,
    publish_tx: Option<crossbeam_channel::Sender<Arc<FrameBundle>>>,
    dropped_publish: AtomicU64,
    frames_throttled: AtomicU64,
}

/// Build the per-sensor frame callback. If a publish sink (or UDP sink) is
/// configured, a dedicated thread drains the bounded publish queue so slow
/// conveyor I/O never blocks the orchestrator's hot path.
pub fn new_frame_callback(config: TrackingPipelineConfig) -> Arc<dyn Fn(Frame) + Send + Sync> {
    let needs_publisher = config.publish_sink.is_some() || config.udp_sink.is_some();
    let publish_tx = if needs_publisher {
        let (tx, rx) = crossbeam_channel::bounded::<Arc<FrameBundle>>(PUBLISH_CHANNEL_DEPTH);
        Some((tx, rx))
    } else {
        None
    };

    let (publish_tx, publish_rx) = match publish_tx {
        Some((tx, rx)) => (Some(tx), Some(rx)),
        None => (None, None),
    };

    let state = Arc::new(TrackingPipelineState {
        config,
        polar_buffer: Mutex::new(Vec::new()),
        last_processed_wall: Mutex::new(None),
        last_prune_wall: Mutex::new(None),
        publish_tx,
        dropped_publish: AtomicU64::new(0),
        frames_throttled: AtomicU64::new(0),
    });

    if let Some(rx) = publish_rx {
        let publish_sink = state.config.publish_sink.clone();
        let udp_sink = state.config.udp_sink.clone();
        std::thread::spawn(move || {
            while let Ok(bundle) = rx.recv() {
                if let Some(sink) = &publish_sink {
                    sink.publish(&bundle);
                }
                if let Some(sink) = &udp_sink {
                    sink.publish(&bundle);
                }
            }
        });
    }

    Arc::new(move |frame: Frame| state.handle_frame(frame))
}

impl TrackingPipelineState {
    fn handle_frame(&self, frame: Frame) {
        // Step 1: polar reconstitution into a retained buffer.
        {
            let mut polar = self.polar_buffer.lock();
            polar.clear();
            polar.extend(frame.points.iter().map(CartesianPoint::to_polar));
        }

        // Step 2: foreground mask.
        let mask = {
            let polar = self.polar_buffer.lock();
            self.config.background_manager.write().process_frame_polar_with_mask(&polar, frame.start_ts_ns)
        };
        if mask.len() != frame.points.len() {
            warn!(target: "lidar::ops", sensor_id = %self.config.sensor_id, "background mask length mismatch, dropping frame");
            return;
        }

        let total = frame.points.len();
        let foreground_count = mask.iter().filter(|&&m| m).count();
        let background_count = total - foreground_count;

        let params = self.config.background_manager.read().get_params().clone();

        // Step 3: bounded background sample for the debug UI.
        if self.config.debug_sink.is_some() {
            self.publish_debug(&frame, &mask, background_count, &params);
        }

        // Step 4: foreground points for downstream processing.
        let foreground_points = extract_foreground_points(&frame, &mask);

        // Step 5: throttle.
        if self.config.max_frame_rate > 0.0 {
            let min_interval = Duration::from_secs_f64(1.0 / self.config.max_frame_rate);
            let now = Instant::now();
            let mut last = self.last_processed_wall.lock();
            if let Some(prev) = *last {
                let gap = now.duration_since(prev);
                if gap < min_interval {
                    self.frames_throttled.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                if gap > min_interval * 2 {
                    self.config.tracker.advance_misses(frame.start_ts_ns);
                }
            }
            *last = Some(now);
        }

        // Step 6: world transform (no pose at this stage, per the orchestrator spec).
        let world_points = transform_to_world(&foreground_points, None, &self.config.sensor_id);

        // Step 7: ground removal.
        let ground_removed = if self.config.remove_ground {
            let mut filter = HeightBandFilter::new(self.config.height_band_floor, self.config.height_band_ceiling);
            let kept = filter.filter_vertical(&world_points);
            trace!(
                target: "lidar::trace",
                sensor_id = %self.config.sensor_id,
                processed = filter.processed,
                kept = filter.kept,
                below = filter.below,
                above = filter.above,
                "ground removal"
            );
            kept
        } else {
            world_points
        };

        // Step 8: voxel downsample.
        let decimated = if self.config.voxel_leaf_size > 0.0 {
            voxel_grid(&ground_removed, self.config.voxel_leaf_size)
        } else {
            ground_removed
        };

        // Step 9: DBSCAN clustering.
        let clusters = cluster_points(
            &decimated,
            params.foreground_dbscan_eps,
            params.foreground_min_cluster_points,
            params.foreground_max_input_points,
            MIN_CLUSTER_DIAMETER_M,
        );

        // Step 10: tracker update.
        if clusters.is_empty() {
            self.config.tracker.record_frame_stats(foreground_count, 0);
        } else {
            let clustered_points: usize = clusters.iter().map(|c| c.point_count.max(0) as usize).sum();
            self.config.tracker.record_frame_stats(foreground_count, clustered_points);
            self.config.tracker.update(clusters.clone(), frame.start_ts_ns);
        }

        // Step 11: classification & persistence.
        let confirmed = self.config.tracker.get_confirmed_tracks();
        for track in &confirmed {
            self.classify_and_persist(track, &frame, &clusters);
        }

        // Step 12: publish.
        if let (Some(adapter), Some(tx)) = (&self.config.visualiser_adapter, &self.publish_tx) {
            let bundle = adapter.adapt(&frame, &mask, &clusters, &confirmed);
            self.enqueue_publish(tx, bundle);
        }

        // Step 13: periodic DB prune.
        self.maybe_prune();

        debug!(
            target: "lidar::diag",
            sensor_id = %self.config.sensor_id,
            frame_id = %frame.frame_id,
            total,
            foreground_count,
            clusters = clusters.len(),
            tracks = confirmed.len(),
            "frame processed"
        );
    }

    fn publish_debug(&self, frame: &Frame, mask: &[bool], background_count: usize, params: &BackgroundParams) {
        let sink = match &self.config.debug_sink {
            Some(s) => s,
            None => return,
        };
        let stride = (background_count / DEBUG_SAMPLE_CAP).max(1);
        let mut sample = Vec::new();
        let mut seen = 0usize;
        for (i, &fg) in mask.iter().enumerate() {
            if !fg {
                if seen % stride == 0 && sample.len() < DEBUG_SAMPLE_CAP {
                    sample.push(frame.points[i]);
                }
                seen += 1;
            }
        }
        sink.on_background_sample(&self.config.sensor_id, &sample);

        let foreground: Vec<CartesianPoint> = mask
            .iter()
            .enumerate()
            .filter(|(_, &fg)| fg)
            .map(|(i, _)| frame.points[i])
            .collect();
        let restricted = restrict_to_debug_range(&foreground, params);
        sink.on_foreground_points(&self.config.sensor_id, &restricted);
    }

    fn classify_and_persist(&self, track: &Track, frame: &Frame, clusters: &[WorldCluster]) {
        if let Some(classifier) = &self.config.classifier {
            if track.observation_count >= classifier.min_observations().max(0) as u32 {
                let is_first = track.classification.is_none();
                let is_periodic = track.observation_count % 5 == 0;
                if is_first || is_periodic {
                    classifier.classify_and_update(track);
                    if let Some(export_fn) = &self.config.feature_export_fn {
                        let features = classifier.extract_track_features(track);
                        export_fn(features);
                    }
                }
            }
        }

        if let Some(sink) = &self.config.persistence_sink {
            sink.persist_track(track, "world");
            if track.misses == 0 {
                let bbox = per_frame_bbox_for_track(track, clusters);
                let obs = TrackObservation {
                    track_id: track.track_id,
                    frame_id: frame.frame_id.clone(),
                    timestamp_ns: frame.start_ts_ns,
                    position: track.centroid,
                    velocity: track.velocity,
                    bbox,
                };
                sink.persist_observation(&obs);
            }
        }
    }

    fn enqueue_publish(&self, tx: &crossbeam_channel::Sender<Arc<FrameBundle>>, bundle: FrameBundle) {
        if tx.is_full() {
            self.dropped_publish.fetch_add(1, Ordering::Relaxed);
            warn!(target: "lidar::ops", sensor_id = %self.config.sensor_id, "publish queue full, bundle dropped");
            return;
        }
        if let Err(error) = tx.send(Arc::new(bundle)) {
            warn!(target: "lidar::ops", sensor_id = %self.config.sensor_id, %error, "ignoring publish send error, receiver gone");
        }
    }

    fn maybe_prune(&self) {
        let sink = match &self.config.persistence_sink {
            Some(s) => s,
            None => return,
        };
        let now = Instant::now();
        let mut last = self.last_prune_wall.lock();
        let due = match *last {
            None => true,
            Some(prev) => now.duration_since(prev) >= PRUNE_INTERVAL,
        };
        if !due {
            return;
        }
        *last = Some(now);
        let pruned = sink.prune_deleted_tracks(&self.config.sensor_id, self.config.deleted_track_ttl_secs);
        if pruned > 0 {
            debug!(target: "lidar::diag", sensor_id = %self.config.sensor_id, pruned, "pruned soft-deleted tracks");
        }
    }
}

/// Restrict a point set to the grid's configured debug ring/azimuth window.
/// `-1` on either bound of a pair means "unrestricted" for that axis.
fn restrict_to_debug_range(points: &[CartesianPoint], params: &BackgroundParams) -> Vec<CartesianPoint> {
    let ring_restricted = params.debug_ring_min >= 0 && params.debug_ring_max >= 0;
    let az_restricted = params.debug_az_min >= 0 && params.debug_az_max >= 0;
    if !ring_restricted && !az_restricted {
        return points.to_vec();
    }
    points
        .iter()
        .filter(|p| {
            let ring_ok = !ring_restricted || {
                let ring = p.channel as i32;
                ring >= params.debug_ring_min && ring <= params.debug_ring_max
            };
            let az_ok = !az_restricted || {
                let az = p.azimuth_deg as i32;
                az >= params.debug_az_min && az <= params.debug_az_max
            };
            ring_ok && az_ok
        })
        .copied()
        .collect()
}

/// Recover per-frame bounding-box dimensions for a confirmed track by
/// matching it to the nearest cluster centroid this frame produced. The
/// tracker contract exposes only the post-association track, not the
/// cluster that fed it, so nearest-centroid is the best available signal;
/// falls back to the track's running-average box when no cluster matches.
fn per_frame_bbox_for_track(track: &Track, clusters: &[WorldCluster]) -> BoundingBox {
    let nearest = clusters.iter().min_by(|a, b| {
        let da = centroid_dist2(a.centroid, track.centroid);
        let db = centroid_dist2(b.centroid, track.centroid);
        da.partial_cmp(&db).unwrap()
    });
    match nearest {
        Some(cluster) => aabb_of(cluster),
        None => track.bbox_avg,
    }
}

fn centroid_dist2(a: (f64, f64, f64), b: (f64, f64, f64)) -> f64 {
    let (dx, dy, dz) = (a.0 - b.0, a.1 - b.1, a.2 - b.2);
    dx * dx + dy * dy + dz * dz
}

fn aabb_of(cluster: &WorldCluster) -> BoundingBox {
    if cluster.points.is_empty() {
        return BoundingBox::default();
    }
    let (mut min_x, mut min_y, mut min_z) = (f64::MAX, f64::MAX, f64::MAX);
    let (mut max_x, mut max_y, mut max_z) = (f64::MIN, f64::MIN, f64::MIN);
    for p in &cluster.points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        min_z = min_z.min(p.z);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
        max_z = max_z.max(p.z);
    }
    BoundingBox {
        dx: max_x - min_x,
        dy: max_y - min_y,
        dz: max_z - min_z,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as AtOrdering};
    use std::sync::Mutex as StdMutex;

    use background_grid::BackgroundGrid;
    use chrono::Utc;
    use lidar_types::{PolarPoint, Tracker, TrackClassification, TrackFeatures};

    struct NullTracker {
        updates: AtomicU32,
        confirmed: StdMutex<Vec<Track>>,
    }

    impl Tracker for NullTracker {
        fn update(&self, _clusters: Vec<WorldCluster>, _frame_ts_ns: i64) {
            self.updates.fetch_add(1, AtOrdering::Relaxed);
        }
        fn get_confirmed_tracks(&self) -> Vec<Track> {
            self.confirmed.lock().unwrap().clone()
        }
        fn record_frame_stats(&self, _total_foreground: usize, _clustered_foreground: usize) {}
        fn advance_misses(&self, _ts_ns: i64) {}
        fn update_classification(&self, _track_id: u64, _class: &str, _confidence: f32, _model: &str) {}
    }

    struct StubClassifier;
    impl lidar_types::Classifier for StubClassifier {
        fn min_observations(&self) -> i32 {
            1
        }
        fn classify_and_update(&self, _track: &Track) {}
        fn extract_track_features(&self, track: &Track) -> TrackFeatures {
            TrackFeatures {
                track_id: track.track_id,
                features: vec![],
            }
        }
    }

    struct StubPersistence {
        observations: AtomicU32,
    }
    impl lidar_types::PersistenceSink for StubPersistence {
        fn persist_track(&self, _track: &Track, _world_frame: &str) {}
        fn persist_observation(&self, _obs: &TrackObservation) {
            self.observations.fetch_add(1, AtOrdering::Relaxed);
        }
        fn prune_deleted_tracks(&self, _sensor_id: &str, _ttl_secs: u64) -> u64 {
            0
        }
    }

    fn polar(channel: u8, az: f64, dist: f64, ts: i64) -> PolarPoint {
        PolarPoint {
            channel,
            azimuth_deg: az,
            elevation_deg: 0.0,
            distance_m: dist,
            intensity: 0,
            timestamp_ns: ts,
            block_id: 0,
            udp_sequence: 0,
            raw_block_azimuth: 0,
        }
    }

    fn test_config(tracker: Arc<dyn Tracker>) -> TrackingPipelineConfig {
        let grid = BackgroundGrid::new("s0", 2, 8, BackgroundParams::default()).unwrap();
        let mut cfg = TrackingPipelineConfig::new("s0", Arc::new(parking_lot::RwLock::new(grid)), tracker);
        cfg.max_frame_rate = 0.0;
        cfg
    }

    fn sample_frame() -> Frame {
        let mut f = Frame::new("s0-frame-0".into(), "s0".into(), 0, Utc::now());
        for i in 0..5u32 {
            let pt = polar(1, 0.0, 10.0, i as i64);
            f.push(CartesianPoint::from_polar(&pt));
        }
        f.recompute_spin_complete();
        f
    }

    #[test]
    fn handle_frame_runs_without_classifier_or_persistence() {
        let tracker: Arc<dyn Tracker> = Arc::new(NullTracker {
            updates: AtomicU32::new(0),
            confirmed: StdMutex::new(vec![]),
        });
        let cfg = test_config(tracker);
        let callback = new_frame_callback(cfg);
        callback(sample_frame());
    }

    #[test]
    fn classification_and_persistence_run_for_confirmed_tracks() {
        let track = Track {
            track_id: 1,
            sensor_id: "s0".into(),
            misses: 0,
            observation_count: 1,
            classification: None,
            centroid: (0.0, 0.0, 0.0),
            velocity: (0.0, 0.0, 0.0),
            bbox_avg: BoundingBox::default(),
        };
        let tracker: Arc<dyn Tracker> = Arc::new(NullTracker {
            updates: AtomicU32::new(0),
            confirmed: StdMutex::new(vec![track]),
        });
        let mut cfg = test_config(tracker);
        cfg.classifier = Some(Arc::new(StubClassifier));
        let persistence = Arc::new(StubPersistence {
            observations: AtomicU32::new(0),
        });
        cfg.persistence_sink = Some(persistence.clone());
        let callback = new_frame_callback(cfg);
        callback(sample_frame());
        assert_eq!(persistence.observations.load(AtOrdering::Relaxed), 1);
    }

    #[test]
    fn throttled_frame_skips_tracker_update() {
        let tracker: Arc<dyn Tracker> = Arc::new(NullTracker {
            updates: AtomicU32::new(0),
            confirmed: StdMutex::new(vec![]),
        });
        let mut cfg = test_config(tracker.clone());
        cfg.max_frame_rate = 1.0;
        let callback = new_frame_callback(cfg);
        callback(sample_frame());
        callback(sample_frame());
    }

    #[test]
    fn per_frame_bbox_falls_back_to_running_average_when_no_cluster_matches() {
        let track = Track {
            track_id: 7,
            sensor_id: "s0".into(),
            misses: 0,
            observation_count: 1,
            classification: Some(TrackClassification {
                class: "person".into(),
                confidence: 0.9,
                model: "m1".into(),
            }),
            centroid: (10.0, 10.0, 10.0),
            velocity: (0.0, 0.0, 0.0),
            bbox_avg: BoundingBox { dx: 1.0, dy: 1.0, dz: 1.0 },
        };
        let bbox = per_frame_bbox_for_track(&track, &[]);
        assert_eq!(bbox, track.bbox_avg);
    }
}
