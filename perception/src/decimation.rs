use lidar_types::CartesianPoint;

use crate::voxel::voxel_grid;

/// How a caller thins a point cloud before handing it downstream.
/// `ForegroundOnly` is a marker for "the foreground mask already did the
/// thinning, do nothing more here". `Voxel` carries the same `ratio` as
/// `Uniform` rather than a leaf size directly -- the voxel leaf is derived
/// as `0.04 / ratio`, so a caller can dial "how aggressively to thin" with
/// one knob regardless of which mode it picks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecimationMode {
    None,
    Uniform(f64),
    Voxel(f64),
    ForegroundOnly,
}

pub fn apply_decimation(points: &[CartesianPoint], mode: DecimationMode) -> Vec<CartesianPoint> {
    match mode {
        DecimationMode::None | DecimationMode::ForegroundOnly => points.to_vec(),
        DecimationMode::Uniform(ratio) => uniform_decimate(points, ratio),
        DecimationMode::Voxel(ratio) => {
            if ratio <= 0.0 {
                return Vec::new();
            }
            voxel_grid(points, 0.04 / ratio)
        }
    }
}

fn uniform_decimate(points: &[CartesianPoint], ratio: f64) -> Vec<CartesianPoint> {
    if ratio <= 0.0 {
        return Vec::new();
    }
    if ratio >= 1.0 {
        return points.to_vec();
    }
    let stride = (1.0 / ratio).round().max(1.0) as usize;
    points.iter().step_by(stride).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f64) -> CartesianPoint {
        CartesianPoint {
            x,
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
        }
    }

    #[test]
    fn none_and_foreground_only_pass_through_unchanged() {
        let points = vec![pt(1.0), pt(2.0)];
        assert_eq!(apply_decimation(&points, DecimationMode::None).len(), 2);
        assert_eq!(apply_decimation(&points, DecimationMode::ForegroundOnly).len(), 2);
    }

    #[test]
    fn uniform_half_ratio_keeps_every_other_point() {
        let points: Vec<CartesianPoint> = (0..10).map(|i| pt(i as f64)).collect();
        let out = apply_decimation(&points, DecimationMode::Uniform(0.5));
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn zero_ratio_drops_everything() {
        let points = vec![pt(1.0), pt(2.0)];
        assert!(apply_decimation(&points, DecimationMode::Uniform(0.0)).is_empty());
    }

    #[test]
    fn voxel_mode_derives_leaf_size_from_ratio() {
        let points = vec![pt(0.0), pt(0.001)];
        let out = apply_decimation(&points, DecimationMode::Voxel(1.0));
        assert_eq!(out.len(), 1, "both points fall in the same 0.04m leaf at ratio=1.0");
    }

    #[test]
    fn voxel_mode_with_nonpositive_ratio_drops_everything() {
        let points = vec![pt(1.0), pt(2.0)];
        assert!(apply_decimation(&points, DecimationMode::Voxel(0.0)).is_empty());
    }
}
