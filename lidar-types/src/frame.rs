use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::point::CartesianPoint;
use lidar_geometry::coverage_deg;

/// One complete rotation of the sensor.
///
/// Mutated only by its owning `FrameBuilder` while the frame is in progress;
/// becomes immutable the moment it is placed in the finalisation buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_id: String,
    pub sensor_id: String,

    pub start_ts_ns: i64,
    pub end_ts_ns: i64,
    pub start_wall: DateTime<Utc>,
    pub end_wall: DateTime<Utc>,

    pub points: Vec<CartesianPoint>,

    pub min_azimuth: f64,
    pub max_azimuth: f64,

    pub expected_seqs: BTreeSet<u32>,
    pub received_seqs: BTreeSet<u32>,
    pub missing_seqs: Vec<u32>,
    pub packet_gaps: u32,
    pub completeness_ratio: f64,
    pub spin_complete: bool,
}

impl Frame {
    pub fn new(frame_id: String, sensor_id: String, start_ts_ns: i64, start_wall: DateTime<Utc>) -> Self {
        Self {
            frame_id,
            sensor_id,
            start_ts_ns,
            end_ts_ns: start_ts_ns,
            start_wall,
            end_wall: start_wall,
            points: Vec::new(),
            min_azimuth: f64::MAX,
            max_azimuth: f64::MIN,
            expected_seqs: BTreeSet::new(),
            received_seqs: BTreeSet::new(),
            missing_seqs: Vec::new(),
            packet_gaps: 0,
            completeness_ratio: 0.0,
            spin_complete: false,
        }
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// `coverage_deg = max_az - min_az` wrap-corrected into `[0, 360]`.
    pub fn coverage_deg(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        coverage_deg(self.min_azimuth, self.max_azimuth)
    }

    /// `spin_complete = (coverage_deg >= 340) AND (point_count >= 10_000)`.
    pub fn recompute_spin_complete(&mut self) {
        self.spin_complete = self.coverage_deg() >= 340.0 && self.point_count() >= 10_000;
    }

    pub fn push(&mut self, point: CartesianPoint) {
        if point.azimuth_deg < self.min_azimuth {
            self.min_azimuth = point.azimuth_deg;
        }
        if point.azimuth_deg > self.max_azimuth {
            self.max_azimuth = point.azimuth_deg;
        }
        if point.timestamp_ns < self.start_ts_ns {
            self.start_ts_ns = point.timestamp_ns;
        }
        if point.timestamp_ns > self.end_ts_ns {
            self.end_ts_ns = point.timestamp_ns;
        }
        self.received_seqs.insert(point.udp_sequence);
        self.points.push(point);
    }

    /// `received_seqs <= expected_seqs`; ratio computed from the observed
    /// sequence range only (min..max of received), never extrapolated.
    pub fn calculate_completeness(&mut self) {
        if self.received_seqs.is_empty() {
            self.expected_seqs.clear();
            self.missing_seqs.clear();
            self.packet_gaps = 0;
            self.completeness_ratio = 0.0;
            return;
        }
        let min_seq = *self.received_seqs.first().unwrap();
        let max_seq = *self.received_seqs.last().unwrap();

        self.expected_seqs = (min_seq..=max_seq).collect();
        self.missing_seqs = self
            .expected_seqs
            .iter()
            .filter(|s| !self.received_seqs.contains(s))
            .copied()
            .collect();
        self.packet_gaps = self.missing_seqs.len() as u32;
        self.completeness_ratio = self.received_seqs.len() as f64 / self.expected_seqs.len() as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(az: f64, seq: u32) -> CartesianPoint {
        CartesianPoint {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            channel: 1,
            azimuth_deg: az,
            elevation_deg: 0.0,
            distance_m: 10.0,
            intensity: 0,
            timestamp_ns: 0,
            block_id: 0,
            udp_sequence: seq,
            raw_block_azimuth: 0,
            classification: 0,
        }
    }

    #[test]
    fn coverage_and_spin_complete_thresholds() {
        let mut f = Frame::new("s-frame-0".into(), "s".into(), 0, Utc::now());
        for i in 0..10_500u32 {
            let az = (i as f64 / 10_500.0) * 359.5;
            f.push(pt(az, i));
        }
        f.recompute_spin_complete();
        assert!(f.coverage_deg() >= 340.0);
        assert!(f.spin_complete);
    }

    #[test]
    fn completeness_ratio_from_observed_range_only() {
        let mut f = Frame::new("s-frame-0".into(), "s".into(), 0, Utc::now());
        f.push(pt(0.0, 10));
        f.push(pt(1.0, 12));
        f.push(pt(2.0, 13));
        f.calculate_completeness();
        assert_eq!(f.missing_seqs, vec![11]);
        assert_eq!(f.packet_gaps, 1);
        assert!((f.completeness_ratio - 3.0 / 4.0).abs() < 1e-12);
    }
}
