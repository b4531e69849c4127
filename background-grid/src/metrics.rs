use lidar_geometry::spherical_to_cartesian;
use lidar_types::{CartesianPoint, Frame};

use crate::grid::{BackgroundGrid, RANGE_BUCKETS_M, RANGE_BUCKET_COUNT};

/// Snapshot of how many observed cells were accepted/rejected this run,
/// bucketed by range so a caller can spot range-dependent misclassification.
#[derive(Debug, Clone, Copy)]
pub struct AcceptanceMetrics {
    pub accept_by_range: [u64; RANGE_BUCKET_COUNT],
    pub reject_by_range: [u64; RANGE_BUCKET_COUNT],
    pub total_frames_processed: u64,
    pub total_points_processed: u64,
}

impl AcceptanceMetrics {
    pub fn total_accepted(&self) -> u64 {
        self.accept_by_range.iter().sum()
    }

    pub fn total_rejected(&self) -> u64 {
        self.reject_by_range.iter().sum()
    }

    /// Human-readable bucket boundaries, the last entry meaning "beyond".
    pub fn bucket_boundaries(&self) -> &'static [f64] {
        &RANGE_BUCKETS_M
    }
}

/// SoA cartesian projection of the settled grid, for a visualiser to render
/// without walking cells itself. Distinct from [`crate::grid::BackgroundGridSnapshot`],
/// which is the full-fidelity persistence round-trip format.
#[derive(Debug, Clone, Default)]
pub struct BackgroundVisualiserSnapshot {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub confidence: Vec<f32>,
    pub ring_elevations: Vec<f64>,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameMetrics {
    pub total_points: usize,
    pub foreground_points: usize,
    pub background_points: usize,
    pub foreground_ratio: f64,
    pub processing_us: u64,
}

impl BackgroundGrid {
    pub fn get_acceptance_metrics(&self) -> AcceptanceMetrics {
        AcceptanceMetrics {
            accept_by_range: self.accept_by_range,
            reject_by_range: self.reject_by_range,
            total_frames_processed: self.total_frames_processed,
            total_points_processed: self.total_points_processed,
        }
    }

    pub fn reset_acceptance_metrics(&mut self) {
        self.accept_by_range = [0; RANGE_BUCKET_COUNT];
        self.reject_by_range = [0; RANGE_BUCKET_COUNT];
    }

    pub fn compute_frame_metrics(&self) -> FrameMetrics {
        let ratio = if self.total_points_last_frame == 0 {
            0.0
        } else {
            self.foreground_points_last_frame as f64 / self.total_points_last_frame as f64
        };
        FrameMetrics {
            total_points: self.total_points_last_frame,
            foreground_points: self.foreground_points_last_frame,
            background_points: self.total_points_last_frame - self.foreground_points_last_frame,
            foreground_ratio: ratio,
            processing_us: self.last_frame_processing_us,
        }
    }

    /// A sudden surge in the foreground ratio, sustained for one frame, is
    /// the cheapest signal that the sensor itself moved (vs. something
    /// merely walking through the scene).
    pub fn check_for_sensor_movement(&self) -> bool {
        self.compute_frame_metrics().foreground_ratio > self.params().sensor_movement_foreground_threshold as f64
    }

    fn params(&self) -> &crate::params::BackgroundParams {
        self.get_params()
    }

    /// Fraction of locked-baseline cells whose average has drifted beyond
    /// `background_drift_threshold_m` from the value they locked at. Returns
    /// `(drifted, ratio, average_drift)`, where `average_drift` is the mean
    /// absolute drift in metres across the drifted cells only.
    pub fn check_background_drift(&self) -> (bool, f64, f64) {
        let locked: Vec<&crate::cell::BackgroundCell> = self.cells_ref().iter().filter(|c| c.locked_at_count > 0).collect();
        if locked.is_empty() {
            return (false, 0.0, 0.0);
        }
        let drifts: Vec<f64> = locked
            .iter()
            .map(|c| (c.average_range_m - c.locked_baseline).abs() as f64)
            .filter(|d| *d > self.params().background_drift_threshold_m as f64)
            .collect();
        let ratio = drifts.len() as f64 / locked.len() as f64;
        let average_drift = if drifts.is_empty() { 0.0 } else { drifts.iter().sum::<f64>() / drifts.len() as f64 };
        let drifted = ratio > self.params().background_drift_ratio_threshold as f64;
        (drifted, ratio, average_drift)
    }

    /// Whether enough sensor time or enough cell churn has passed since the
    /// last snapshot to justify persisting a new one. Callers release the
    /// per-frame lock before doing the actual I/O and re-acquire only to
    /// record the new `last_snapshot_ns`/reset the change counter.
    pub fn is_snapshot_due(&self, now_ns: i64) -> bool {
        let time_due = now_ns.saturating_sub(self.last_snapshot_ns) >= self.params().snapshot_interval_ns;
        let change_due = self.changes_since_snapshot >= self.params().change_threshold_for_snapshot;
        time_due || change_due
    }

    /// Projects every settled cell with `average_range_m` in `(0, 200]` into
    /// cartesian SoA buffers for a visualiser, via `ring_elevations` set
    /// through [`BackgroundGrid::set_ring_elevations`]. Empty buffers (and a
    /// `warn!`) if no elevation table is configured -- nothing to project
    /// against.
    pub fn generate_background_snapshot(&mut self) -> (String, BackgroundVisualiserSnapshot) {
        self.visualiser_snapshot_seq += 1;
        let signature = self.scene_signature();
        let ring_elevations = self.ring_elevations().to_vec();
        if ring_elevations.len() != self.rings() {
            tracing::warn!(
                target: "lidar::ops",
                sensor_id = %self.sensor_id(),
                rings = self.rings(),
                configured = ring_elevations.len(),
                "background snapshot requested without a matching elevation table"
            );
            return (
                signature,
                BackgroundVisualiserSnapshot {
                    sequence: self.visualiser_snapshot_seq,
                    ring_elevations,
                    ..Default::default()
                },
            );
        }

        let azimuth_bins = self.azimuth_bins();
        let bin_width_deg = 360.0 / azimuth_bins as f64;
        let mut snapshot = BackgroundVisualiserSnapshot {
            ring_elevations: ring_elevations.clone(),
            sequence: self.visualiser_snapshot_seq,
            ..Default::default()
        };
        for (idx, cell) in self.cells_ref().iter().enumerate() {
            let avg = cell.average_range_m as f64;
            if avg <= 0.0 || avg > 200.0 {
                continue;
            }
            let ring = idx / azimuth_bins;
            let az_bin = idx % azimuth_bins;
            let az_center_deg = (az_bin as f64 + 0.5) * bin_width_deg;
            let xyz = spherical_to_cartesian(avg, az_center_deg, ring_elevations[ring]);
            snapshot.x.push(xyz.x);
            snapshot.y.push(xyz.y);
            snapshot.z.push(xyz.z);
            let threshold = self.params().locked_baseline_threshold.max(1);
            snapshot.confidence.push((cell.times_seen_count as f32 / threshold as f32).min(1.0));
        }
        (signature, snapshot)
    }

    pub fn mark_snapshot_taken(&mut self, now_ns: i64) {
        self.last_snapshot_ns = now_ns;
        self.changes_since_snapshot = 0;
    }
}

/// Pull out the points a mask marks foreground, stamping `classification = 1`
/// so downstream consumers don't need to re-thread the mask.
pub fn extract_foreground_points(frame: &Frame, mask: &[bool]) -> Vec<CartesianPoint> {
    frame
        .points
        .iter()
        .zip(mask.iter())
        .filter(|(_, is_fg)| **is_fg)
        .map(|(p, _)| {
            let mut p = *p;
            p.classification = 1;
            p
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::BackgroundParams;
    use approx::assert_relative_eq;
    use lidar_types::PolarPoint;

    fn pt(channel: u8, az: f64, distance: f64, ts: i64) -> PolarPoint {
        PolarPoint {
            channel,
            azimuth_deg: az,
            elevation_deg: 0.0,
            distance_m: distance,
            intensity: 0,
            timestamp_ns: ts,
            block_id: 0,
            udp_sequence: 0,
            raw_block_azimuth: 0,
        }
    }

    #[test]
    fn acceptance_metrics_sum_matches_observed_cells() {
        let mut params = BackgroundParams::default();
        params.min_confidence_floor = 1;
        params.seed_from_first_observation = true;
        let mut grid = BackgroundGrid::new("s", 2, 8, params).unwrap();
        grid.process_frame_polar(&[pt(1, 10.0, 5.0, 0), pt(2, 90.0, 8.0, 0)], 0);
        let metrics = grid.get_acceptance_metrics();
        assert_eq!(metrics.total_accepted() + metrics.total_rejected(), 2);
    }

    #[test]
    fn frame_metrics_ratio_is_zero_with_no_points() {
        let grid = BackgroundGrid::new("s", 2, 8, BackgroundParams::default()).unwrap();
        let m = grid.compute_frame_metrics();
        assert_eq!(m.foreground_ratio, 0.0);
    }

    #[test]
    fn extract_foreground_points_stamps_classification() {
        let mut frame = Frame::new("s-0".into(), "s".into(), 0, chrono::Utc::now());
        frame.push(CartesianPoint {
            x: 1.0,
            y: 0.0,
            z: 0.0,
            channel: 1,
            azimuth_deg: 0.0,
            elevation_deg: 0.0,
            distance_m: 1.0,
            intensity: 0,
            timestamp_ns: 0,
            block_id: 0,
            udp_sequence: 0,
            raw_block_azimuth: 0,
            classification: 0,
        });
        let fg = extract_foreground_points(&frame, &[true]);
        assert_eq!(fg.len(), 1);
        assert_eq!(fg[0].classification, 1);
    }

    #[test]
    fn drift_reports_ratio_and_average_drift() {
        // Spec End-to-End Scenario 6.
        let mut params = BackgroundParams::default();
        params.background_drift_threshold_m = 1.0;
        params.background_drift_ratio_threshold = 0.10;
        let mut grid = BackgroundGrid::new("s", 2, 5, params).unwrap();
        for cell in grid.cells_mut().iter_mut().take(10) {
            cell.locked_baseline = 5.0;
            cell.average_range_m = 6.5;
            cell.locked_at_count = 1;
            cell.times_seen_count = 1_000;
        }
        let (drifted, ratio, average_drift) = grid.check_background_drift();
        assert!(drifted);
        assert_relative_eq!(ratio, 1.0);
        assert_relative_eq!(average_drift, 1.5, epsilon = 1e-6);
    }

    #[test]
    fn drift_is_false_with_no_locked_cells() {
        let grid = BackgroundGrid::new("s", 2, 5, BackgroundParams::default()).unwrap();
        assert_eq!(grid.check_background_drift(), (false, 0.0, 0.0));
    }

    #[test]
    fn background_snapshot_without_elevation_table_is_empty() {
        let mut grid = BackgroundGrid::new("s", 2, 8, BackgroundParams::default()).unwrap();
        let (_, snap) = grid.generate_background_snapshot();
        assert!(snap.x.is_empty());
        assert_eq!(snap.sequence, 1);
    }

    #[test]
    fn background_snapshot_projects_settled_cells_to_cartesian() {
        let mut params = BackgroundParams::default();
        params.min_confidence_floor = 1;
        params.seed_from_first_observation = true;
        let mut grid = BackgroundGrid::new("s", 2, 8, params).unwrap();
        grid.set_ring_elevations(vec![0.0, 10.0]).unwrap();
        grid.process_frame_polar(&[pt(1, 10.0, 5.0, 0)], 0);
        let (sig, snap) = grid.generate_background_snapshot();
        assert!(!sig.is_empty());
        assert_eq!(snap.x.len(), 1);
        assert_eq!(snap.ring_elevations, vec![0.0, 10.0]);
        assert!(snap.confidence[0] > 0.0);
    }
}
