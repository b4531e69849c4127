use serde::{Deserialize, Serialize};

/// One return in the sensor's native polar frame, as handed off by the
/// (out-of-scope) wire decoder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolarPoint {
    /// 1-based ring / channel index.
    pub channel: u8,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub distance_m: f64,
    pub intensity: u8,
    /// Sensor-supplied timestamp; authoritative for frame timing.
    pub timestamp_ns: i64,
    pub block_id: u16,
    pub udp_sequence: u32,
    pub raw_block_azimuth: u16,
}

/// A point projected into sensor-frame Cartesian (right/forward/up), produced
/// once at polar-to-Cartesian conversion time and carried unchanged through
/// the rest of the pipeline except for world-frame transform and
/// `classification` (stamped by foreground extraction, 1 = foreground).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CartesianPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub channel: u8,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub distance_m: f64,
    pub intensity: u8,
    pub timestamp_ns: i64,
    pub block_id: u16,
    pub udp_sequence: u32,
    pub raw_block_azimuth: u16,
    pub classification: u8,
}

impl CartesianPoint {
    pub fn from_polar(p: &PolarPoint) -> Self {
        let xyz = lidar_geometry::spherical_to_cartesian(p.distance_m, p.azimuth_deg, p.elevation_deg);
        Self {
            x: xyz.x,
            y: xyz.y,
            z: xyz.z,
            channel: p.channel,
            azimuth_deg: p.azimuth_deg,
            elevation_deg: p.elevation_deg,
            distance_m: p.distance_m,
            intensity: p.intensity,
            timestamp_ns: p.timestamp_ns,
            block_id: p.block_id,
            udp_sequence: p.udp_sequence,
            raw_block_azimuth: p.raw_block_azimuth,
            classification: 0,
        }
    }

    /// Reconstitute the originating polar point. Used by the orchestrator to
    /// re-pack a `Frame`'s Cartesian points before handing them to the
    /// background grid, which classifies in polar space.
    pub fn to_polar(&self) -> PolarPoint {
        PolarPoint {
            channel: self.channel,
            azimuth_deg: self.azimuth_deg,
            elevation_deg: self.elevation_deg,
            distance_m: self.distance_m,
            intensity: self.intensity,
            timestamp_ns: self.timestamp_ns,
            block_id: self.block_id,
            udp_sequence: self.udp_sequence,
            raw_block_azimuth: self.raw_block_azimuth,
        }
    }
}
