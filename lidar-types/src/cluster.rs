use crate::point::CartesianPoint;

/// A spatial cluster of world-frame foreground points, produced by the L4
/// perception stage and handed by value into the tracker.
#[derive(Debug, Clone)]
pub struct WorldCluster {
    pub points: Vec<CartesianPoint>,
    pub centroid: (f64, f64, f64),
    pub point_count: i32,
}

impl WorldCluster {
    pub fn from_points(points: Vec<CartesianPoint>) -> Self {
        let n = points.len().max(1) as f64;
        let (sx, sy, sz) = points
            .iter()
            .fold((0.0, 0.0, 0.0), |(sx, sy, sz), p| (sx + p.x, sy + p.y, sz + p.z));
        let centroid = (sx / n, sy / n, sz / n);
        let point_count = points.len() as i32;
        Self {
            points,
            centroid,
            point_count,
        }
    }

    /// 3D axis-aligned bounding box diameter, used to reject degenerate
    /// (near-point) clusters.
    pub fn diameter(&self) -> f64 {
        if self.points.len() < 2 {
            return 0.0;
        }
        let (mut min_x, mut min_y, mut min_z) = (f64::MAX, f64::MAX, f64::MAX);
        let (mut max_x, mut max_y, mut max_z) = (f64::MIN, f64::MIN, f64::MIN);
        for p in &self.points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            min_z = min_z.min(p.z);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
            max_z = max_z.max(p.z);
        }
        ((max_x - min_x).powi(2) + (max_y - min_y).powi(2) + (max_z - min_z).powi(2)).sqrt()
    }
}
