use lidar_geometry::Xyz;
use lidar_types::CartesianPoint;
use nalgebra::Isometry3;

/// Project sensor-frame points into the world frame. With no `pose`, this is
/// an identity copy; otherwise every point is run through the 4x4
/// homogeneous transform.
pub fn transform_to_world(points: &[CartesianPoint], pose: Option<&Isometry3<f64>>, _sensor_id: &str) -> Vec<CartesianPoint> {
    let local: Vec<Xyz> = points.iter().map(|p| Xyz::new(p.x, p.y, p.z)).collect();
    let world = lidar_geometry::apply_pose(&local, pose);
    points
        .iter()
        .zip(world.iter())
        .map(|(p, w)| CartesianPoint { x: w.x, y: w.y, z: w.z, ..*p })
        .collect()
}
