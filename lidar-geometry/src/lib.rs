//! Pure geometric functions used across the frame builder, background grid
//! and perception stages: spherical/Cartesian conversion, pose application,
//! azimuth normalisation and rotation coverage.
//!
//! Nothing in this crate owns state or performs I/O; every function is a
//! deterministic transform over plain numbers so it can be reused (and
//! tested) in isolation from the sensor-frame lifecycle machinery.

use nalgebra::{Isometry3, Point3, Vector3};

/// A point expressed in the sensor's local Cartesian frame (right/forward/up).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Xyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Xyz {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Normalise an azimuth in degrees into `[0, 360)`.
pub fn normalize_azimuth_deg(az: f64) -> f64 {
    let wrapped = az % 360.0;
    if wrapped < 0.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

/// Convert one polar return (range `distance_m`, `azimuth_deg`, `elevation_deg`)
/// into a sensor-frame Cartesian point.
///
/// Azimuth is measured clockwise from the forward (+y) axis, elevation is
/// measured up from the horizontal plane; this matches the convention used
/// by the upstream (out-of-scope) wire decoder.
pub fn spherical_to_cartesian(distance_m: f64, azimuth_deg: f64, elevation_deg: f64) -> Xyz {
    let az = normalize_azimuth_deg(azimuth_deg).to_radians();
    let el = elevation_deg.to_radians();
    let horizontal = distance_m * el.cos();
    let x = horizontal * az.sin();
    let y = horizontal * az.cos();
    let z = distance_m * el.sin();
    Xyz::new(x, y, z)
}

/// Azimuthal coverage of a rotation, wrap-corrected into `[0, 360]`.
///
/// `min_az` and `max_az` are raw azimuths observed during the rotation, in
/// whatever order they were produced; this function does not assume
/// `max_az >= min_az`.
pub fn coverage_deg(min_az: f64, max_az: f64) -> f64 {
    let raw = max_az - min_az;
    let cov = if raw >= 0.0 { raw } else { raw + 360.0 };
    cov.clamp(0.0, 360.0)
}

/// Apply an optional rigid-body pose (as a 4x4 homogeneous transform) to a
/// slice of sensor-frame points, producing world-frame points. With no pose,
/// this is the identity transform (a copy).
pub fn apply_pose(points: &[Xyz], pose: Option<&Isometry3<f64>>) -> Vec<Xyz> {
    match pose {
        None => points.to_vec(),
        Some(iso) => points
            .iter()
            .map(|p| {
                let transformed = iso.transform_point(&Point3::new(p.x, p.y, p.z));
                Xyz::new(transformed.x, transformed.y, transformed.z)
            })
            .collect(),
    }
}

/// Build a pose from translation + axis-angle rotation, the form in which
/// upstream calibration typically supplies a sensor mount.
pub fn pose_from_translation_rotvec(translation: Xyz, rotvec: Xyz) -> Isometry3<f64> {
    let t = Vector3::new(translation.x, translation.y, translation.z);
    let r = Vector3::new(rotvec.x, rotvec.y, rotvec.z);
    Isometry3::new(t, r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn normalize_handles_negative_and_overflow() {
        assert_relative_eq!(normalize_azimuth_deg(-10.0), 350.0);
        assert_relative_eq!(normalize_azimuth_deg(370.0), 10.0);
        assert_relative_eq!(normalize_azimuth_deg(0.0), 0.0);
    }

    #[test]
    fn coverage_wraps_when_max_less_than_min() {
        assert_relative_eq!(coverage_deg(10.0, 350.0), 340.0);
        assert_relative_eq!(coverage_deg(350.0, 2.0), 12.0);
        assert_relative_eq!(coverage_deg(0.0, 0.0), 0.0);
    }

    #[test]
    fn spherical_roundtrips_zero_elevation() {
        let p = spherical_to_cartesian(10.0, 0.0, 0.0);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(p.y, 10.0, epsilon = 1e-9);
        assert_relative_eq!(p.z, 0.0, epsilon = 1e-9);

        let p = spherical_to_cartesian(10.0, 90.0, 0.0);
        assert_relative_eq!(p.x, 10.0, epsilon = 1e-9);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn identity_pose_is_a_copy() {
        let pts = vec![Xyz::new(1.0, 2.0, 3.0)];
        let out = apply_pose(&pts, None);
        assert_eq!(out, pts);
    }
}
