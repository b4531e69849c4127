use lidar_types::CartesianPoint;
use std::collections::HashMap;

/// Downsample by averaging points into `leaf_size_m` voxels, then snapping
/// each voxel's representative point to whichever input point is closest to
/// that voxel's centroid (keeps a real sample rather than a synthetic blend).
pub fn voxel_grid(points: &[CartesianPoint], leaf_size_m: f64) -> Vec<CartesianPoint> {
    if leaf_size_m <= 0.0 || points.is_empty() {
        return points.to_vec();
    }

    let mut voxels: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
    for (i, p) in points.iter().enumerate() {
        let key = voxel_key(p, leaf_size_m);
        voxels.entry(key).or_default().push(i);
    }

    let mut out = Vec::with_capacity(voxels.len());
    for idxs in voxels.values() {
        let n = idxs.len() as f64;
        let (mut cx, mut cy, mut cz) = (0.0, 0.0, 0.0);
        for &i in idxs {
            cx += points[i].x;
            cy += points[i].y;
            cz += points[i].z;
        }
        cx /= n;
        cy /= n;
        cz /= n;

        let best = idxs
            .iter()
            .copied()
            .min_by(|&a, &b| {
                let da = dist2(&points[a], cx, cy, cz);
                let db = dist2(&points[b], cx, cy, cz);
                da.partial_cmp(&db).unwrap()
            })
            .expect("voxel bucket is never empty");
        out.push(points[best]);
    }
    out
}

fn voxel_key(p: &CartesianPoint, leaf_size_m: f64) -> (i64, i64, i64) {
    (
        (p.x / leaf_size_m).floor() as i64,
        (p.y / leaf_size_m).floor() as i64,
        (p.z / leaf_size_m).floor() as i64,
    )
}

fn dist2(p: &CartesianPoint, cx: f64, cy: f64, cz: f64) -> f64 {
    let (dx, dy, dz) = (p.x - cx, p.y - cy, p.z - cz);
    dx * dx + dy * dy + dz * dz
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f64, y: f64, z: f64) -> CartesianPoint {
        CartesianPoint {
            x,
            y,
            z,
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
    fn collapses_points_in_the_same_voxel() {
        let points = vec![pt(0.0, 0.0, 0.0), pt(0.05, 0.0, 0.0), pt(5.0, 5.0, 5.0)];
        let out = voxel_grid(&points, 1.0);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn zero_leaf_size_is_a_no_op() {
        let points = vec![pt(0.0, 0.0, 0.0), pt(0.05, 0.0, 0.0)];
        let out = voxel_grid(&points, 0.0);
        assert_eq!(out.len(), points.len());
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let points = vec![pt(0.0, 0.0, 0.0), pt(0.05, 0.0, 0.0), pt(5.0, 5.0, 5.0), pt(5.05, 5.0, 5.0)];
        let once = voxel_grid(&points, 1.0);
        let twice = voxel_grid(&once, 1.0);
        assert_eq!(once.len(), twice.len());
    }
}
