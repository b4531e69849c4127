use lidar_types::CartesianPoint;

/// Ground/ceiling removal by sensor-frame height band. Keeps a running tally
/// so the orchestrator can log `(processed, kept, below, above)` per frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeightBandFilter {
    pub floor_m: f64,
    pub ceiling_m: f64,
    pub processed: u64,
    pub kept: u64,
    pub below: u64,
    pub above: u64,
}

impl HeightBandFilter {
    pub fn new(floor_m: f64, ceiling_m: f64) -> Self {
        Self {
            floor_m,
            ceiling_m,
            ..Default::default()
        }
    }

    pub fn filter_vertical(&mut self, points: &[CartesianPoint]) -> Vec<CartesianPoint> {
        let mut kept = Vec::with_capacity(points.len());
        for p in points {
            self.processed += 1;
            if p.z < self.floor_m {
                self.below += 1;
            } else if p.z > self.ceiling_m {
                self.above += 1;
            } else {
                self.kept += 1;
                kept.push(*p);
            }
        }
        kept
    }

    pub fn reset_counters(&mut self) {
        self.processed = 0;
        self.kept = 0;
        self.below = 0;
        self.above = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(z: f64) -> CartesianPoint {
        CartesianPoint {
            x: 0.0,
            y: 0.0,
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
    fn keeps_only_the_configured_band() {
        let mut f = HeightBandFilter::new(0.0, 2.0);
        let points = vec![pt(-1.0), pt(1.0), pt(3.0)];
        let kept = f.filter_vertical(&points);
        assert_eq!(kept.len(), 1);
        assert_eq!(f.processed, 3);
        assert_eq!(f.below, 1);
        assert_eq!(f.above, 1);
        assert_eq!(f.kept, 1);
    }

    #[test]
    fn filtering_twice_is_idempotent() {
        let mut f1 = HeightBandFilter::new(0.0, 2.0);
        let points = vec![pt(-1.0), pt(1.0), pt(3.0)];
        let once = f1.filter_vertical(&points);
        let mut f2 = HeightBandFilter::new(0.0, 2.0);
        let twice = f2.filter_vertical(&once);
        assert_eq!(once.len(), twice.len());
    }
}
