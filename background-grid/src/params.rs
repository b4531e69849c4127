use serde::{Deserialize, Serialize};

use lidar_types::ConfigError;

/// Global tuning for one `BackgroundGrid`. Every field is documented in the
/// spec's configuration enumeration; setters validate before applying so a
/// rejected value never partially takes effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundParams {
    pub background_update_fraction: f32,
    pub post_settle_update_fraction: f32,
    pub closeness_sensitivity_multiplier: f32,
    pub safety_margin_m: f32,
    pub freeze_duration_ns: i64,
    pub neighbor_confirmation_count: i32,
    pub noise_relative_fraction: f32,
    pub seed_from_first_observation: bool,
    pub min_confidence_floor: u32,
    pub reacquisition_boost_multiplier: f32,
    pub locked_baseline_threshold: u32,
    pub locked_baseline_multiplier: f32,
    pub warmup_duration_ns: i64,
    pub warmup_min_frames: i32,
    pub sensor_movement_foreground_threshold: f32,
    pub background_drift_threshold_m: f32,
    pub background_drift_ratio_threshold: f32,
    /// Alternate settling-duration override; consulted only when
    /// `warmup_duration_ns == 0` (see DESIGN.md: open question resolution).
    pub settling_period_ns: i64,
    pub snapshot_interval_ns: i64,
    pub change_threshold_for_snapshot: u32,
    pub foreground_min_cluster_points: usize,
    pub foreground_dbscan_eps: f64,
    pub foreground_max_input_points: usize,
    pub debug_ring_min: i32,
    pub debug_ring_max: i32,
    pub debug_az_min: i32,
    pub debug_az_max: i32,
    pub max_regions: usize,
}

impl Default for BackgroundParams {
    fn default() -> Self {
        Self {
            background_update_fraction: 0.05,
            post_settle_update_fraction: 0.02,
            closeness_sensitivity_multiplier: 2.0,
            safety_margin_m: 0.1,
            freeze_duration_ns: 2_000_000_000,
            neighbor_confirmation_count: 2,
            noise_relative_fraction: 0.02,
            seed_from_first_observation: false,
            min_confidence_floor: 5,
            reacquisition_boost_multiplier: 4.0,
            locked_baseline_threshold: 200,
            locked_baseline_multiplier: 3.0,
            warmup_duration_ns: 10_000_000_000,
            warmup_min_frames: 50,
            sensor_movement_foreground_threshold: 0.20,
            background_drift_threshold_m: 0.3,
            background_drift_ratio_threshold: 0.10,
            settling_period_ns: 0,
            snapshot_interval_ns: 60_000_000_000,
            change_threshold_for_snapshot: 5_000,
            foreground_min_cluster_points: 5,
            foreground_dbscan_eps: 0.5,
            foreground_max_input_points: 8_000,
            debug_ring_min: -1,
            debug_ring_max: -1,
            debug_az_min: -1,
            debug_az_max: -1,
            max_regions: 50,
        }
    }
}

impl BackgroundParams {
    /// Boundary validation: rejected as a whole, never partially applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("background_update_fraction", self.background_update_fraction, 0.0, 1.0, false)?;
        if self.post_settle_update_fraction != 0.0 {
            check_range("post_settle_update_fraction", self.post_settle_update_fraction, 0.0, 1.0, false)?;
        }
        if self.closeness_sensitivity_multiplier <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "closeness_sensitivity_multiplier",
                range: "(0, inf)",
                value: self.closeness_sensitivity_multiplier as f64,
            });
        }
        if self.safety_margin_m < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "safety_margin_m",
                range: "[0, inf)",
                value: self.safety_margin_m as f64,
            });
        }
        if !(0..=8).contains(&self.neighbor_confirmation_count) {
            return Err(ConfigError::OutOfRange {
                field: "neighbor_confirmation_count",
                range: "[0, 8]",
                value: self.neighbor_confirmation_count as f64,
            });
        }
        check_range("noise_relative_fraction", self.noise_relative_fraction, 0.0, 1.0, true)?;
        Ok(())
    }
}

fn check_range(field: &'static str, value: f32, lo: f32, hi: f32, inclusive_lo_zero_ok: bool) -> Result<(), ConfigError> {
    let ok = if inclusive_lo_zero_ok {
        (lo..=hi).contains(&value)
    } else {
        value > lo.min(hi.min(lo)) && value <= hi && value > 0.0
    };
    if !ok {
        return Err(ConfigError::OutOfRange {
            field,
            range: "(0, 1]",
            value: value as f64,
        });
    }
    Ok(())
}

/// Per-region overrides. A field `<= 0` means "use the grid default"; this
/// lets `RegionManager` assign only the parameters a category actually wants
/// to change.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RegionParams {
    pub noise_relative_fraction: f32,
    pub neighbor_confirmation_count: i32,
    pub settle_update_fraction: f32,
}
