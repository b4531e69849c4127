use lidar_types::{CartesianPoint, WorldCluster};
use tracing::trace;

/// Direct O(n^2) region-query DBSCAN over world-frame points. Points beyond
/// `max_input_points` are uniformly decimated first so a crowded frame can't
/// blow the per-frame time budget.
pub fn cluster_points(points: &[CartesianPoint], eps_m: f64, min_points: usize, max_input_points: usize, min_cluster_diameter_m: f64) -> Vec<WorldCluster> {
    let sampled: Vec<CartesianPoint> = if max_input_points > 0 && points.len() > max_input_points {
        let stride = (points.len() as f64 / max_input_points as f64).ceil() as usize;
        points.iter().step_by(stride.max(1)).copied().collect()
    } else {
        points.to_vec()
    };

    if sampled.is_empty() {
        return Vec::new();
    }

    let n = sampled.len();
    const UNVISITED: i32 = -1;
    const NOISE: i32 = -2;
    let mut labels = vec![UNVISITED; n];
    let mut next_cluster = 0i32;

    for i in 0..n {
        if labels[i] != UNVISITED {
            continue;
        }
        let mut neighbors = region_query(&sampled, i, eps_m);
        if neighbors.len() < min_points {
            labels[i] = NOISE;
            continue;
        }
        labels[i] = next_cluster;
        let mut seed_idx = 0;
        while seed_idx < neighbors.len() {
            let j = neighbors[seed_idx];
            if labels[j] == NOISE {
                labels[j] = next_cluster;
            }
            if labels[j] == UNVISITED {
                labels[j] = next_cluster;
                let j_neighbors = region_query(&sampled, j, eps_m);
                if j_neighbors.len() >= min_points {
                    for q in j_neighbors {
                        if !neighbors.contains(&q) {
                            neighbors.push(q);
                        }
                    }
                }
            }
            seed_idx += 1;
        }
        next_cluster += 1;
    }

    let mut clusters: Vec<Vec<CartesianPoint>> = vec![Vec::new(); next_cluster as usize];
    for (i, &label) in labels.iter().enumerate() {
        if label >= 0 {
            clusters[label as usize].push(sampled[i]);
        }
    }

    let mut rejected = 0usize;
    let out: Vec<WorldCluster> = clusters
        .into_iter()
        .filter_map(|pts| {
            let cluster = WorldCluster::from_points(pts);
            if cluster.diameter() < min_cluster_diameter_m {
                rejected += 1;
                None
            } else {
                Some(cluster)
            }
        })
        .collect();

    if rejected > 0 {
        trace!(target: "lidar::diag", rejected, "dbscan: dropped degenerate clusters below diameter floor");
    }
    out
}

fn region_query(points: &[CartesianPoint], i: usize, eps_m: f64) -> Vec<usize> {
    let p = &points[i];
    let eps2 = eps_m * eps_m;
    points
        .iter()
        .enumerate()
        .filter(|(_, q)| {
            let (dx, dy, dz) = (q.x - p.x, q.y - p.y, q.z - p.z);
            dx * dx + dy * dy + dz * dz <= eps2
        })
        .map(|(idx, _)| idx)
        .collect()
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
    fn groups_a_tight_cluster_and_ignores_noise() {
        let points = vec![
            pt(0.0, 0.0, 0.0),
            pt(0.1, 0.0, 0.0),
            pt(0.0, 0.1, 0.0),
            pt(0.1, 0.1, 0.0),
            pt(50.0, 50.0, 50.0),
        ];
        let clusters = cluster_points(&points, 0.3, 3, 0, 0.05);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].point_count, 4);
    }

    #[test]
    fn rejects_clusters_below_the_diameter_floor() {
        let points = vec![pt(0.0, 0.0, 0.0), pt(0.001, 0.0, 0.0), pt(0.0, 0.001, 0.0)];
        let clusters = cluster_points(&points, 0.5, 2, 0, 0.05);
        assert!(clusters.is_empty());
    }

    #[test]
    fn downsamples_when_input_exceeds_the_cap() {
        let points: Vec<CartesianPoint> = (0..1000).map(|i| pt(i as f64 * 0.01, 0.0, 0.0)).collect();
        let clusters = cluster_points(&points, 0.02, 2, 100, 0.0);
        let total: i32 = clusters.iter().map(|c| c.point_count).sum();
        assert!(total as usize <= 120);
    }
}
