use std::collections::HashMap;
use std::sync::Arc;

use lidar_types::{BgStore, ConfigError, PolarPoint, RegionStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

use crate::cell::BackgroundCell;
use crate::params::BackgroundParams;
use crate::region::{RegionManager, RegionSnapshot};

/// Cumulative range-bucket upper bounds (metres); the bucket a value falls
/// into is the first one it is `<=`. The implicit last bucket catches
/// everything beyond 200m.
pub(crate) const RANGE_BUCKETS_M: [f64; 11] = [1.0, 2.0, 4.0, 8.0, 10.0, 12.0, 16.0, 20.0, 50.0, 100.0, 200.0];
pub(crate) const RANGE_BUCKET_COUNT: usize = RANGE_BUCKETS_M.len() + 1;

pub(crate) fn bucket_index(distance_m: f64) -> usize {
    RANGE_BUCKETS_M
        .iter()
        .position(|b| distance_m <= *b)
        .unwrap_or(RANGE_BUCKETS_M.len())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundGridSnapshot {
    pub rings: usize,
    pub azimuth_bins: usize,
    pub cells: Vec<BackgroundCell>,
    pub settled: bool,
    pub start_time_ns: Option<i64>,
    pub warmup_frames_remaining: i32,
}

struct CellDecision {
    obs_mean: f64,
    obs_min: f64,
    obs_max: f64,
    is_background: bool,
    frozen: bool,
    theta: f64,
    point_idxs: Vec<usize>,
}

/// Polar occupancy grid: one `BackgroundCell` per (ring, azimuth-bin) pair,
/// updated one frame at a time. Not internally synchronised -- callers hold
/// it behind their own lock for the duration of a frame, per the pipeline's
/// concurrency model (see DESIGN.md).
pub struct BackgroundGrid {
    sensor_id: String,
    rings: usize,
    azimuth_bins: usize,
    cells: Vec<BackgroundCell>,
    params: BackgroundParams,
    region_mgr: RegionManager,
    ring_elevations: Vec<f64>,

    settled: bool,
    start_time_ns: Option<i64>,
    warmup_frames_remaining: i32,
    pub(crate) region_restore_attempted: bool,

    store: Option<Arc<dyn BgStore>>,
    region_store: Option<Arc<dyn RegionStore>>,
    source_path: String,

    pub(crate) accept_by_range: [u64; RANGE_BUCKET_COUNT],
    pub(crate) reject_by_range: [u64; RANGE_BUCKET_COUNT],
    pub(crate) total_frames_processed: u64,
    pub(crate) total_points_processed: u64,
    pub(crate) foreground_points_last_frame: usize,
    pub(crate) total_points_last_frame: usize,
    pub(crate) last_snapshot_ns: i64,
    pub(crate) changes_since_snapshot: u32,
    pub(crate) visualiser_snapshot_seq: u64,
    pub(crate) last_frame_processing_us: u64,
}

impl BackgroundGrid {
    pub fn new(sensor_id: impl Into<String>, rings: usize, azimuth_bins: usize, params: BackgroundParams) -> Result<Self, ConfigError> {
        params.validate()?;
        let warmup_frames_remaining = params.warmup_min_frames.max(0);
        Ok(Self {
            sensor_id: sensor_id.into(),
            rings,
            azimuth_bins,
            cells: vec![BackgroundCell::default(); rings * azimuth_bins],
            region_mgr: RegionManager::new(rings, azimuth_bins),
            ring_elevations: Vec::new(),
            params,
            settled: false,
            start_time_ns: None,
            warmup_frames_remaining,
            region_restore_attempted: false,
            store: None,
            region_store: None,
            source_path: String::new(),
            accept_by_range: [0; RANGE_BUCKET_COUNT],
            reject_by_range: [0; RANGE_BUCKET_COUNT],
            total_frames_processed: 0,
            total_points_processed: 0,
            foreground_points_last_frame: 0,
            total_points_last_frame: 0,
            last_snapshot_ns: 0,
            changes_since_snapshot: 0,
            last_frame_processing_us: 0,
            visualiser_snapshot_seq: 0,
        })
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn rings(&self) -> usize {
        self.rings
    }

    pub fn azimuth_bins(&self) -> usize {
        self.azimuth_bins
    }

    pub fn get_params(&self) -> &BackgroundParams {
        &self.params
    }

    pub fn set_params(&mut self, params: BackgroundParams) -> Result<(), ConfigError> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn set_ring_elevations(&mut self, elevations: Vec<f64>) -> Result<(), ConfigError> {
        if elevations.len() != self.rings {
            return Err(ConfigError::RingElevationLengthMismatch {
                expected: self.rings,
                got: elevations.len(),
            });
        }
        self.ring_elevations = elevations;
        Ok(())
    }

    pub fn ring_elevations(&self) -> &[f64] {
        &self.ring_elevations
    }

    /// Configure the optional grid-snapshot collaborator. Consulted only
    /// through `region_store`'s linked `grid_snapshot_id` -- the grid never
    /// reads or writes its own snapshot independently of a region restore
    /// or persist-on-settle.
    pub fn set_store(&mut self, store: Arc<dyn BgStore>) {
        self.store = Some(store);
    }

    /// Configure the optional region-persistence collaborator and the
    /// source-path key used to look up/record this sensor's region
    /// snapshot (see `update_settling_state`).
    pub fn set_region_store(&mut self, store: Arc<dyn RegionStore>, source_path: impl Into<String>) {
        self.region_store = Some(store);
        self.source_path = source_path.into();
    }

    pub fn reset_grid(&mut self) {
        let before_nonzero = self.cells.iter().filter(|c| c.times_seen_count > 0).count();
        self.cells = vec![BackgroundCell::default(); self.rings * self.azimuth_bins];
        self.region_mgr.reset();
        self.settled = false;
        self.start_time_ns = None;
        self.warmup_frames_remaining = self.params.warmup_min_frames.max(0);
        self.region_restore_attempted = false;
        self.accept_by_range = [0; RANGE_BUCKET_COUNT];
        self.reject_by_range = [0; RANGE_BUCKET_COUNT];
        self.total_frames_processed = 0;
        self.total_points_processed = 0;
        self.foreground_points_last_frame = 0;
        self.total_points_last_frame = 0;
        self.changes_since_snapshot = 0;
        self.last_frame_processing_us = 0;
        trace!(target: "lidar::diag", sensor_id = %self.sensor_id, before_nonzero, "grid reset");
    }

    fn ring_index(&self, channel: u8) -> Option<usize> {
        let idx = channel.checked_sub(1)? as usize;
        if idx < self.rings {
            Some(idx)
        } else {
            None
        }
    }

    fn azimuth_bin(&self, azimuth_deg: f64) -> usize {
        let az = lidar_geometry::normalize_azimuth_deg(azimuth_deg);
        let bin = ((az / 360.0) * self.azimuth_bins as f64).floor() as isize;
        bin.clamp(0, self.azimuth_bins as isize - 1) as usize
    }

    fn cell_index(&self, channel: u8, azimuth_deg: f64) -> Option<usize> {
        let ring = self.ring_index(channel)?;
        Some(ring * self.azimuth_bins + self.azimuth_bin(azimuth_deg))
    }

    /// Same-ring neighbours at `az_bin - 1` and `az_bin + 1`, wrapping.
    fn same_ring_neighbors(&self, idx: usize) -> [usize; 2] {
        let ring = idx / self.azimuth_bins;
        let az = idx % self.azimuth_bins;
        let left = (az + self.azimuth_bins - 1) % self.azimuth_bins;
        let right = (az + 1) % self.azimuth_bins;
        [ring * self.azimuth_bins + left, ring * self.azimuth_bins + right]
    }

    fn resolved_region_params(&self, idx: usize) -> (f32, i32) {
        let region_id = self.region_mgr.get_region_for_cell(idx);
        let region_params = region_id.and_then(|id| self.region_mgr.get_region_params(id));
        let noise = region_params
            .map(|p| p.noise_relative_fraction)
            .filter(|v| *v > 0.0)
            .unwrap_or(self.params.noise_relative_fraction);
        let confirm = region_params
            .map(|p| p.neighbor_confirmation_count)
            .filter(|v| *v > 0)
            .unwrap_or(self.params.neighbor_confirmation_count);
        (noise, confirm)
    }

    fn resolved_update_alpha(&self, idx: usize) -> f32 {
        let region_id = self.region_mgr.get_region_for_cell(idx);
        let region_params = region_id.and_then(|id| self.region_mgr.get_region_params(id));
        if let Some(alpha) = region_params.map(|p| p.settle_update_fraction).filter(|v| *v > 0.0) {
            return alpha;
        }
        if self.settled && self.params.post_settle_update_fraction > 0.0 {
            self.params.post_settle_update_fraction
        } else {
            self.params.background_update_fraction
        }
    }

    /// Evaluate settling readiness and either flip to settled (triggering
    /// region identification) or tick the warmup countdown and feed
    /// `RegionManager`'s running variance estimate for another frame.
    ///
    /// `settling_period_ns` is a reserved alternate-duration field: like
    /// `max_backfill_delay` on the frame builder, the spec leaves its
    /// interaction with `warmup_duration_ns` unspecified, so it is carried
    /// in `BackgroundParams` but not consulted here (see DESIGN.md).
    fn update_settling_state(&mut self, now_ns: i64) {
        if self.settled {
            return;
        }
        if !self.region_restore_attempted {
            self.region_restore_attempted = true;
            if self.try_restore_regions(now_ns) {
                return;
            }
        }
        let start = *self.start_time_ns.get_or_insert(now_ns);

        let frames_ready = self.params.warmup_min_frames <= 0 || self.warmup_frames_remaining <= 0;
        let duration_ready = self.params.warmup_duration_ns <= 0 || now_ns.saturating_sub(start) >= self.params.warmup_duration_ns;

        if frames_ready && duration_ready {
            self.settled = true;
            self.region_mgr.identify_regions(&self.cells, self.params.max_regions, now_ns);
            self.persist_on_settle();
        } else {
            self.warmup_frames_remaining = (self.warmup_frames_remaining - 1).max(0);
            self.region_mgr.update_variance_metrics(&self.cells);
        }
    }

    /// Restoration hook (see DESIGN.md / spec §4.3): try the region store by
    /// source path first, then by this grid's current scene hash. On a hit,
    /// restore regions and -- if the snapshot links one -- the grid state
    /// too, then mark settled and skip the rest of warmup. Attempted at most
    /// once per settling cycle (`region_restore_attempted` gates the call).
    fn try_restore_regions(&mut self, _now_ns: i64) -> bool {
        let Some(region_store) = self.region_store.clone() else {
            return false;
        };
        let scene_hash = self.scene_signature();
        let payload = region_store
            .get_region_snapshot_by_source_path(&self.source_path)
            .or_else(|| region_store.get_region_snapshot_by_scene_hash(&scene_hash));
        let Some(payload) = payload else {
            return false;
        };
        let snapshot: RegionSnapshot = match serde_json::from_slice(&payload) {
            Ok(s) => s,
            Err(error) => {
                warn!(target: "lidar::ops", sensor_id = %self.sensor_id, %error, "discarding unreadable restored region snapshot");
                return false;
            }
        };
        self.region_mgr.restore_from_snapshot(&snapshot);
        if let (Some(grid_snapshot_id), Some(store)) = (snapshot.grid_snapshot_id.as_ref(), self.store.clone()) {
            if let Some(grid_bytes) = store.read_snapshot(grid_snapshot_id) {
                match serde_json::from_slice::<BackgroundGridSnapshot>(&grid_bytes) {
                    Ok(grid_snapshot) => {
                        if let Err(error) = self.restore_from_snapshot(&grid_snapshot) {
                            warn!(target: "lidar::ops", sensor_id = %self.sensor_id, %error, "linked grid snapshot shape mismatch");
                        }
                    }
                    Err(error) => warn!(target: "lidar::ops", sensor_id = %self.sensor_id, %error, "discarding unreadable linked grid snapshot"),
                }
            }
        }
        self.settled = true;
        debug!(target: "lidar::ops", sensor_id = %self.sensor_id, "regions restored from store, settling skipped");
        true
    }

    /// Persistence-on-settle (see DESIGN.md / spec §4.3): write the grid
    /// snapshot first to obtain an id, link it into the region snapshot,
    /// then write the region snapshot. Store failures are logged and
    /// otherwise ignored -- persistence is best-effort, never fatal.
    fn persist_on_settle(&mut self) {
        let Some(region_store) = self.region_store.clone() else {
            return;
        };
        let scene_hash = self.scene_signature();
        let grid_snapshot_id = self.store.clone().and_then(|store| match serde_json::to_vec(&self.to_snapshot()) {
            Ok(payload) => store.write_snapshot(&self.sensor_id, &payload),
            Err(error) => {
                warn!(target: "lidar::ops", sensor_id = %self.sensor_id, %error, "failed to serialize grid snapshot for persistence");
                None
            }
        });
        let mut region_snapshot = self.region_mgr.to_snapshot();
        region_snapshot.grid_snapshot_id = grid_snapshot_id.clone();
        let region_payload = match serde_json::to_vec(&region_snapshot) {
            Ok(p) => p,
            Err(error) => {
                warn!(target: "lidar::ops", sensor_id = %self.sensor_id, %error, "failed to serialize region snapshot for persistence");
                return;
            }
        };
        let snapshot_id = grid_snapshot_id.unwrap_or_else(|| scene_hash.clone());
        region_store.write_region_snapshot(&snapshot_id, &scene_hash, &self.source_path, &region_payload);
        debug!(target: "lidar::ops", sensor_id = %self.sensor_id, snapshot_id = %snapshot_id, "region snapshot persisted on settle");
    }

    /// Update-only variant of `process_frame_polar_with_mask`, for callers
    /// that don't need a foreground mask (e.g. background-only bootstrap).
    pub fn process_frame_polar(&mut self, points: &[PolarPoint], now_ns: i64) {
        self.process_frame_polar_with_mask(points, now_ns);
    }

    /// Classify every point against the polar background model, updating
    /// cell statistics for cells classified background this frame. Returns
    /// a mask parallel to `points`; `true` means foreground. Points whose
    /// `(channel, azimuth)` fail to resolve to a cell are always foreground.
    pub fn process_frame_polar_with_mask(&mut self, points: &[PolarPoint], now_ns: i64) -> Vec<bool> {
        let started_at = std::time::Instant::now();
        self.update_settling_state(now_ns);

        let mut mask = vec![true; points.len()];

        // Bin pass: accumulate per-cell frame statistics.
        let mut touched: HashMap<usize, (f64, f64, f64, Vec<usize>)> = HashMap::new();
        for (i, p) in points.iter().enumerate() {
            let idx = match self.cell_index(p.channel, p.azimuth_deg) {
                Some(idx) => idx,
                None => continue, // invalid ring: mask[i] stays foreground
            };
            let entry = touched.entry(idx).or_insert((0.0, f64::MAX, f64::MIN, Vec::new()));
            entry.0 += p.distance_m;
            entry.1 = entry.1.min(p.distance_m);
            entry.2 = entry.2.max(p.distance_m);
            entry.3.push(i);
        }

        // Decision pass: classify against each cell's pre-frame state, so
        // neighbour confirmation reads consistent, not-yet-updated history.
        let mut decisions: HashMap<usize, CellDecision> = HashMap::with_capacity(touched.len());
        for (idx, (sum, obs_min, obs_max, point_idxs)) in touched {
            let count = point_idxs.len() as f64;
            let obs_mean = sum / count;
            let cell = self.cells[idx];
            let (noise_rel, neighbor_confirm_required) = self.resolved_region_params(idx);
            let closeness = self.params.closeness_sensitivity_multiplier as f64;

            if cell.is_frozen(now_ns) {
                decisions.insert(
                    idx,
                    CellDecision {
                        obs_mean,
                        obs_min,
                        obs_max,
                        is_background: false,
                        frozen: true,
                        theta: 0.0,
                        point_idxs,
                    },
                );
                continue;
            }

            let theta = closeness * (cell.range_spread_m as f64 + noise_rel as f64 * obs_mean + 0.01) + self.params.safety_margin_m as f64;

            let neighbor_confirm_count = self
                .same_ring_neighbors(idx)
                .iter()
                .filter(|nb| {
                    let nb_cell = self.cells[**nb];
                    nb_cell.times_seen_count > 0
                        && (nb_cell.average_range_m as f64 - obs_mean).abs()
                            <= closeness * (nb_cell.range_spread_m as f64 + noise_rel as f64 * nb_cell.average_range_m as f64 + 0.01)
                })
                .count();

            let locked_accept = cell.locked_at_count > 0
                && (obs_mean - cell.locked_baseline as f64).abs()
                    <= self.params.locked_baseline_multiplier as f64 * cell.locked_spread as f64;

            let mut is_background = (cell.average_range_m as f64 - obs_mean).abs() <= theta
                || neighbor_confirm_count >= neighbor_confirm_required.max(0) as usize
                || locked_accept;

            if self.params.seed_from_first_observation && cell.times_seen_count == 0 {
                is_background = true;
            }

            decisions.insert(
                idx,
                CellDecision {
                    obs_mean,
                    obs_min,
                    obs_max,
                    is_background,
                    frozen: false,
                    theta,
                    point_idxs,
                },
            );
        }

        // Mutation pass.
        for (idx, decision) in decisions {
            let bucket = bucket_index(decision.obs_mean);
            for &pi in &decision.point_idxs {
                mask[pi] = !decision.is_background;
            }

            if decision.is_background {
                self.accept_by_range[bucket] += 1;
                self.update_cell_background(idx, &decision, now_ns);
            } else {
                self.reject_by_range[bucket] += 1;
                // A frozen cell's (avg, spread, times_seen) never change.
                if !decision.frozen {
                    self.update_cell_foreground(idx, &decision, now_ns);
                }
            }
            self.changes_since_snapshot += 1;
        }

        self.total_frames_processed += 1;
        self.total_points_processed += points.len() as u64;
        self.foreground_points_last_frame = mask.iter().filter(|b| **b).count();
        self.total_points_last_frame = points.len();
        self.last_frame_processing_us = started_at.elapsed().as_micros() as u64;

        trace!(target: "lidar::trace", touched = self.changes_since_snapshot, foreground = self.foreground_points_last_frame, processing_us = self.last_frame_processing_us, "processed frame");
        mask
    }

    fn update_cell_background(&mut self, idx: usize, decision: &CellDecision, now_ns: i64) {
        let cell = &mut self.cells[idx];
        let was_reacquiring = cell.recent_foreground_count > 0;
        let mut alpha = self.resolved_update_alpha(idx);
        if was_reacquiring {
            alpha = (alpha * self.params.reacquisition_boost_multiplier).min(0.5);
            cell.recent_foreground_count -= 1;
        }

        if cell.times_seen_count == 0 {
            cell.average_range_m = decision.obs_mean as f32;
            cell.range_spread_m = ((decision.obs_max - decision.obs_min) / 2.0) as f32;
            cell.times_seen_count = 1;
        } else {
            let avg_before = cell.average_range_m;
            cell.average_range_m = avg_before + alpha * (decision.obs_mean as f32 - avg_before);
            let deviation = (decision.obs_mean as f32 - avg_before).abs();
            cell.range_spread_m += alpha * (deviation - cell.range_spread_m);
            cell.times_seen_count = cell.times_seen_count.saturating_add(1);
        }
        cell.last_update_ns = now_ns;

        if cell.locked_at_count == 0 && cell.times_seen_count >= self.params.locked_baseline_threshold {
            cell.locked_baseline = cell.average_range_m;
            cell.locked_spread = cell.range_spread_m;
            cell.locked_at_count = cell.times_seen_count;
        } else if cell.locked_at_count > 0 {
            // Slow path: nudge the locked reference toward the live average
            // instead of re-snapping it outright, so drift detection still
            // sees a meaningfully stale baseline.
            cell.locked_baseline += 0.01 * (cell.average_range_m - cell.locked_baseline);
        }
    }

    fn update_cell_foreground(&mut self, idx: usize, decision: &CellDecision, now_ns: i64) {
        let cell = &mut self.cells[idx];
        let floor = if cell.locked_baseline > 0.0 { self.params.min_confidence_floor } else { 0 };
        cell.times_seen_count = cell.times_seen_count.saturating_sub(1).max(floor);

        if (cell.average_range_m as f64 - decision.obs_mean).abs() > 3.0 * decision.theta {
            cell.frozen_until_ns = now_ns + self.params.freeze_duration_ns;
        }
        cell.recent_foreground_count = cell.recent_foreground_count.saturating_add(1);
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub(crate) fn cells_ref(&self) -> &[BackgroundCell] {
        &self.cells
    }

    pub(crate) fn cells_mut(&mut self) -> &mut [BackgroundCell] {
        &mut self.cells
    }

    pub fn to_snapshot(&self) -> BackgroundGridSnapshot {
        BackgroundGridSnapshot {
            rings: self.rings,
            azimuth_bins: self.azimuth_bins,
            cells: self.cells.clone(),
            settled: self.settled,
            start_time_ns: self.start_time_ns,
            warmup_frames_remaining: self.warmup_frames_remaining,
        }
    }

    pub fn restore_from_snapshot(&mut self, snapshot: &BackgroundGridSnapshot) -> Result<(), ConfigError> {
        if snapshot.rings != self.rings || snapshot.azimuth_bins != self.azimuth_bins {
            return Err(ConfigError::RingElevationLengthMismatch {
                expected: self.rings * self.azimuth_bins,
                got: snapshot.rings * snapshot.azimuth_bins,
            });
        }
        self.cells = snapshot.cells.clone();
        self.settled = snapshot.settled;
        self.start_time_ns = snapshot.start_time_ns;
        self.warmup_frames_remaining = snapshot.warmup_frames_remaining;
        Ok(())
    }

    pub fn region_snapshot(&self) -> RegionSnapshot {
        self.region_mgr.to_snapshot()
    }

    pub fn restore_region_snapshot(&mut self, snapshot: &RegionSnapshot) {
        self.region_mgr.restore_from_snapshot(snapshot);
        self.region_restore_attempted = true;
        self.settled = true;
    }

    /// Stable identity for the currently-modelled scene: hashes topology
    /// plus quantised range/spread histograms of every cell that has been
    /// observed at least once (`times_seen_count == 0` cells are excluded,
    /// since they carry no information about the scene -- see DESIGN.md on
    /// why this makes the signature sampling-depth-sensitive by design).
    pub fn scene_signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.rings.to_le_bytes());
        hasher.update(self.azimuth_bins.to_le_bytes());
        for cell in &self.cells {
            if cell.times_seen_count == 0 {
                continue;
            }
            let quantized_range = (cell.average_range_m * 100.0).round() as i32;
            let quantized_spread = (cell.range_spread_m * 1000.0).round() as i32;
            hasher.update(quantized_range.to_le_bytes());
            hasher.update(quantized_spread.to_le_bytes());
        }
        let digest = hasher.finalize();
        hex::encode(&digest[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

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

    fn seeded_grid() -> BackgroundGrid {
        let mut params = BackgroundParams::default();
        params.warmup_duration_ns = 0;
        params.warmup_min_frames = 0;
        params.seed_from_first_observation = true;
        BackgroundGrid::new("sensor-0", 4, 16, params).unwrap()
    }

    #[test]
    fn seed_and_classify_scenario() {
        // Spec End-to-End Scenario 1.
        let mut params = BackgroundParams::default();
        params.seed_from_first_observation = true;
        params.background_update_fraction = 0.5;
        params.closeness_sensitivity_multiplier = 2.0;
        params.safety_margin_m = 0.5;
        params.neighbor_confirmation_count = 5;
        params.noise_relative_fraction = 0.01;
        params.warmup_duration_ns = 0;
        params.warmup_min_frames = 0;
        let mut grid = BackgroundGrid::new("s", 2, 8, params).unwrap();

        for _ in 0..3 {
            grid.process_frame_polar(&[pt(1, 0.0, 10.0, 0)], 0);
        }
        let mask = grid.process_frame_polar_with_mask(&[pt(1, 0.0, 10.0, 0), pt(1, 0.0, 3.0, 0)], 0);
        assert_eq!(mask, vec![false, true]);
        let idx = grid.cell_index(1, 0.0).unwrap();
        assert_eq!(grid.cells[idx].times_seen_count, 4);
        assert_relative_eq!(grid.cells[idx].average_range_m, 10.0, epsilon = 0.5);
    }

    #[test]
    fn acceptance_counting_scenario() {
        // Spec End-to-End Scenario 2.
        let mut params = BackgroundParams::default();
        params.seed_from_first_observation = true;
        params.warmup_duration_ns = 0;
        params.warmup_min_frames = 0;
        let mut grid = BackgroundGrid::new("s", 4, 180, params).unwrap();
        for _ in 0..11 {
            grid.process_frame_polar(&[pt(1, 0.0, 5.0, 0)], 0);
        }
        let metrics = grid.get_acceptance_metrics();
        assert!(metrics.accept_by_range[bucket_index(5.0)] > 0);
        assert_eq!(metrics.total_rejected(), 0);
    }

    #[test]
    fn locked_baseline_band_accepts_observation_outside_closeness_threshold() {
        // A cell that has settled past `locked_baseline_threshold` keeps
        // accepting observations within `locked_baseline_multiplier *
        // locked_spread` even when they fall outside the per-frame
        // closeness/neighbour tests (spec.md's third acceptance clause).
        let mut params = BackgroundParams::default();
        params.warmup_duration_ns = 0;
        params.warmup_min_frames = 0;
        params.closeness_sensitivity_multiplier = 0.01;
        params.safety_margin_m = 0.0;
        params.neighbor_confirmation_count = 1_000;
        let mut grid = BackgroundGrid::new("s", 1, 1, params).unwrap();

        let idx = grid.cell_index(0, 0.0).unwrap();
        grid.cells[idx].average_range_m = 10.0;
        grid.cells[idx].range_spread_m = 0.01;
        grid.cells[idx].times_seen_count = 1;
        grid.cells[idx].locked_at_count = 500;
        grid.cells[idx].locked_baseline = 10.0;
        grid.cells[idx].locked_spread = 1.0;

        // 11.5m is well outside the closeness/neighbour tests but within
        // locked_baseline (10.0) +/- multiplier (3.0) * locked_spread (1.0).
        let mask = grid.process_frame_polar_with_mask(&[pt(0, 0.0, 11.5, 0)], 0);
        assert_eq!(mask, vec![false]);
    }

    #[test]
    fn invalid_ring_is_always_foreground_and_not_counted() {
        let mut grid = seeded_grid();
        let mask = grid.process_frame_polar_with_mask(&[pt(200, 10.0, 5.0, 1_000)], 1_000);
        assert_eq!(mask, vec![true]);
        assert_eq!(grid.total_points_processed, 1);
        assert_eq!(grid.accept_by_range.iter().sum::<u64>() + grid.reject_by_range.iter().sum::<u64>(), 0);
    }

    #[test]
    fn scene_signature_ignores_unobserved_cells_and_is_stable() {
        let mut grid = seeded_grid();
        grid.process_frame_polar(&[pt(1, 10.0, 5.0, 1_000)], 1_000);
        let sig1 = grid.scene_signature();
        let sig2 = grid.scene_signature();
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 32);
    }

    #[test]
    fn snapshot_roundtrip_preserves_cell_state() {
        let mut grid = seeded_grid();
        grid.process_frame_polar(&[pt(1, 10.0, 5.0, 1_000)], 1_000);
        let snap = grid.to_snapshot();

        let mut restored = BackgroundGrid::new("sensor-0", 4, 16, BackgroundParams::default()).unwrap();
        restored.restore_from_snapshot(&snap).unwrap();
        let idx = restored.cell_index(1, 10.0).unwrap();
        assert_relative_eq!(restored.cells[idx].average_range_m, 5.0);
    }

    #[test]
    fn restore_rejects_mismatched_topology() {
        let grid = seeded_grid();
        let snap = grid.to_snapshot();
        let mut other = BackgroundGrid::new("sensor-0", 8, 16, BackgroundParams::default()).unwrap();
        assert!(other.restore_from_snapshot(&snap).is_err());
    }

    #[test]
    fn reset_grid_zeroes_state() {
        let mut grid = seeded_grid();
        grid.process_frame_polar(&[pt(1, 10.0, 5.0, 1_000)], 1_000);
        grid.reset_grid();
        assert!(grid.cells.iter().all(|c| c.times_seen_count == 0));
        assert!(!grid.is_settled());
        assert_eq!(grid.accept_by_range.iter().sum::<u64>(), 0);
    }

    #[test]
    fn neighbor_confirmation_accepts_spatially_consistent_observation() {
        // Spec End-to-End Scenario 3.
        let mut params = BackgroundParams::default();
        params.seed_from_first_observation = true;
        params.neighbor_confirmation_count = 2;
        params.closeness_sensitivity_multiplier = 0.01;
        params.safety_margin_m = 0.0;
        params.warmup_duration_ns = 0;
        params.warmup_min_frames = 0;
        let mut grid = BackgroundGrid::new("s", 3, 3, params).unwrap();
        // seed ring 1 (channel 2) at every azimuth bin with dist=10
        for az_bin in 0..3 {
            let az = az_bin as f64 * 120.0;
            grid.process_frame_polar(&[pt(2, az, 10.0, 0)], 0);
        }
        // center cell observation is slightly off but neighbours confirm
        let mask = grid.process_frame_polar_with_mask(&[pt(2, 0.0, 10.5, 0)], 0);
        assert_eq!(mask, vec![false]);
    }

    #[derive(Default)]
    struct InMemoryStore {
        grid_snapshots: parking_lot::Mutex<HashMap<String, Vec<u8>>>,
        region_by_path: parking_lot::Mutex<HashMap<String, Vec<u8>>>,
        next_id: std::sync::atomic::AtomicU64,
    }

    impl BgStore for InMemoryStore {
        fn write_snapshot(&self, _sensor_id: &str, payload: &[u8]) -> Option<String> {
            let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst).to_string();
            self.grid_snapshots.lock().insert(id.clone(), payload.to_vec());
            Some(id)
        }
        fn read_snapshot(&self, snapshot_id: &str) -> Option<Vec<u8>> {
            self.grid_snapshots.lock().get(snapshot_id).cloned()
        }
    }

    impl RegionStore for InMemoryStore {
        fn get_region_snapshot_by_source_path(&self, path: &str) -> Option<Vec<u8>> {
            self.region_by_path.lock().get(path).cloned()
        }
        fn get_region_snapshot_by_scene_hash(&self, _hash: &str) -> Option<Vec<u8>> {
            None
        }
        fn write_region_snapshot(&self, _snapshot_id: &str, _scene_hash: &str, source_path: &str, payload: &[u8]) {
            self.region_by_path.lock().insert(source_path.to_string(), payload.to_vec());
        }
    }

    #[test]
    fn settling_persists_region_and_grid_snapshot_to_store() {
        let store = Arc::new(InMemoryStore::default());
        let mut params = BackgroundParams::default();
        params.seed_from_first_observation = true;
        params.warmup_duration_ns = 0;
        params.warmup_min_frames = 0;
        let mut grid = BackgroundGrid::new("s", 2, 4, params).unwrap();
        grid.set_store(store.clone());
        grid.set_region_store(store.clone(), "scene-a");
        grid.process_frame_polar(&[pt(1, 0.0, 10.0, 0)], 0);
        assert!(grid.is_settled());
        assert!(store.region_by_path.lock().contains_key("scene-a"));
        assert!(!store.grid_snapshots.lock().is_empty());
    }

    #[test]
    fn restoring_from_store_skips_warmup_and_settles_immediately() {
        let store = Arc::new(InMemoryStore::default());
        let mut params = BackgroundParams::default();
        params.seed_from_first_observation = true;
        params.warmup_duration_ns = 0;
        params.warmup_min_frames = 0;
        let mut seeding_grid = BackgroundGrid::new("s", 2, 4, params.clone()).unwrap();
        seeding_grid.set_store(store.clone());
        seeding_grid.set_region_store(store.clone(), "scene-b");
        seeding_grid.process_frame_polar(&[pt(1, 0.0, 10.0, 0)], 0);
        assert!(seeding_grid.is_settled());

        params.warmup_min_frames = 1_000;
        params.warmup_duration_ns = 1_000_000_000;
        let mut fresh_grid = BackgroundGrid::new("s", 2, 4, params).unwrap();
        fresh_grid.set_store(store.clone());
        fresh_grid.set_region_store(store.clone(), "scene-b");
        fresh_grid.process_frame_polar(&[pt(1, 0.0, 1.0, 0)], 0);
        assert!(fresh_grid.is_settled());
    }
}
