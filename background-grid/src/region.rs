use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::cell::BackgroundCell;
use crate::params::RegionParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Stable,
    Variable,
    Volatile,
}

impl Category {
    /// Stable zones (walls) tolerate the loosest closeness and settle
    /// fastest; volatile zones (glass, water) need a slow, cautious update.
    fn params(self) -> RegionParams {
        match self {
            Category::Stable => RegionParams {
                noise_relative_fraction: 0.01,
                neighbor_confirmation_count: 1,
                settle_update_fraction: 0.08,
            },
            Category::Variable => RegionParams {
                noise_relative_fraction: 0.03,
                neighbor_confirmation_count: 2,
                settle_update_fraction: 0.04,
            },
            Category::Volatile => RegionParams {
                noise_relative_fraction: 0.08,
                neighbor_confirmation_count: 3,
                settle_update_fraction: 0.015,
            },
        }
    }
}

/// A contiguous group of cells sharing a parameter override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub id: i32,
    pub cell_list: Vec<u32>,
    pub params: RegionParams,
    pub mean_variance: f64,
    pub cell_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSnapshot {
    pub rings: usize,
    pub azimuth_bins: usize,
    pub regions: Vec<Region>,
    pub variance_sum: Vec<f64>,
    pub variance_count: Vec<u64>,
    pub frames_sampled: u64,
    /// Id the linked `BackgroundGridSnapshot` was written under in the
    /// `BgStore`, if persistence-on-settle wrote one alongside this region
    /// snapshot.
    pub grid_snapshot_id: Option<String>,
}

/// Clusters cells into variance-similar contiguous regions at the end of
/// settling and assigns each region its own parameter overrides.
#[derive(Debug, Clone)]
pub struct RegionManager {
    rings: usize,
    azimuth_bins: usize,
    regions: Vec<Region>,
    cell_to_region: Vec<Option<i32>>,
    variance_sum: Vec<f64>,
    variance_count: Vec<u64>,
    frames_sampled: u64,
    pub identification_complete: bool,
    pub identification_time_ns: Option<i64>,
}

impl RegionManager {
    pub fn new(rings: usize, azimuth_bins: usize) -> Self {
        let n = rings * azimuth_bins;
        Self {
            rings,
            azimuth_bins,
            regions: Vec::new(),
            cell_to_region: vec![None; n],
            variance_sum: vec![0.0; n],
            variance_count: vec![0; n],
            frames_sampled: 0,
            identification_complete: false,
            identification_time_ns: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.rings, self.azimuth_bins);
    }

    /// During settling, maintain a running mean of `range_spread_m` per cell.
    pub fn update_variance_metrics(&mut self, cells: &[BackgroundCell]) {
        for (idx, cell) in cells.iter().enumerate() {
            if cell.times_seen_count > 0 {
                self.variance_sum[idx] += cell.range_spread_m as f64;
                self.variance_count[idx] += 1;
            }
        }
        self.frames_sampled += 1;
    }

    fn mean_variance(&self, idx: usize) -> Option<f64> {
        if self.variance_count[idx] == 0 {
            None
        } else {
            Some(self.variance_sum[idx] / self.variance_count[idx] as f64)
        }
    }

    fn neighbors(&self, idx: usize) -> [usize; 4] {
        let ring = idx / self.azimuth_bins;
        let az = idx % self.azimuth_bins;
        let az_prev = (az + self.azimuth_bins - 1) % self.azimuth_bins;
        let az_next = (az + 1) % self.azimuth_bins;
        let up = if ring > 0 { ring - 1 } else { ring };
        let down = if ring + 1 < self.rings { ring + 1 } else { ring };
        [
            ring * self.azimuth_bins + az_prev,
            ring * self.azimuth_bins + az_next,
            up * self.azimuth_bins + az,
            down * self.azimuth_bins + az,
        ]
    }

    /// Partition observed cells into up to `max_regions` contiguous regions
    /// by variance category, merging the smallest component into an
    /// adjacent one when there are too many.
    pub fn identify_regions(&mut self, cells: &[BackgroundCell], max_regions: usize, now_ns: i64) {
        let n = self.rings * self.azimuth_bins;

        let mut observed: Vec<(usize, f64)> = (0..n)
            .filter_map(|idx| self.mean_variance(idx).map(|v| (idx, v)))
            .collect();

        if observed.is_empty() {
            self.identification_complete = true;
            self.identification_time_ns = Some(now_ns);
            return;
        }

        let mut sorted_vals: Vec<f64> = observed.iter().map(|(_, v)| *v).collect();
        sorted_vals.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let p33 = percentile(&sorted_vals, 0.33);
        let p66 = percentile(&sorted_vals, 0.66);

        let category_of = |v: f64| -> Category {
            if v <= p33 {
                Category::Stable
            } else if v <= p66 {
                Category::Variable
            } else {
                Category::Volatile
            }
        };

        let mut categories = vec![None; n];
        for (idx, v) in observed.drain(..) {
            categories[idx] = Some(category_of(v));
        }

        // 4-neighbour connected components over cells of equal category.
        let mut visited = vec![false; n];
        let mut components: Vec<Vec<usize>> = Vec::new();
        for start in 0..n {
            if visited[start] || categories[start].is_none() {
                continue;
            }
            let cat = categories[start].unwrap();
            let mut component = Vec::new();
            let mut queue = VecDeque::new();
            queue.push_back(start);
            visited[start] = true;
            while let Some(idx) = queue.pop_front() {
                component.push(idx);
                for nb in self.neighbors(idx) {
                    if !visited[nb] && categories[nb] == Some(cat) {
                        visited[nb] = true;
                        queue.push_back(nb);
                    }
                }
            }
            components.push(component);
        }

        // Merge smallest components into an adjacent one until within budget.
        while components.len() > max_regions {
            let (smallest_idx, _) = components
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| c.len())
                .unwrap();
            let smallest = components.remove(smallest_idx);
            let smallest_set: std::collections::HashSet<usize> = smallest.iter().copied().collect();

            let mut target = None;
            'outer: for cell in &smallest {
                for nb in self.neighbors(*cell) {
                    if !smallest_set.contains(&nb) {
                        if let Some((ci, _)) = components.iter().enumerate().find(|(_, c)| c.contains(&nb)) {
                            target = Some(ci);
                            break 'outer;
                        }
                    }
                }
            }
            match target {
                Some(ci) => components[ci].extend(smallest),
                None => {
                    // No adjacent component found (isolated); push back as-is
                    // to avoid losing cells, even though it exceeds budget.
                    components.push(smallest);
                    break;
                }
            }
        }

        self.regions.clear();
        self.cell_to_region = vec![None; n];
        for (region_id, component) in components.into_iter().enumerate() {
            let id = region_id as i32;
            let weighted: f64 = component.iter().filter_map(|idx| self.mean_variance(*idx)).sum();
            let count = component.len().max(1);
            let mean_variance = weighted / count as f64;
            let dominant_category = {
                let mut counts = [0usize; 3];
                for idx in &component {
                    if let Some(cat) = categories[*idx] {
                        counts[cat as usize] += 1;
                    }
                }
                match counts.iter().enumerate().max_by_key(|(_, c)| **c).map(|(i, _)| i) {
                    Some(0) => Category::Stable,
                    Some(1) => Category::Variable,
                    _ => Category::Volatile,
                }
            };
            for idx in &component {
                self.cell_to_region[*idx] = Some(id);
            }
            self.regions.push(Region {
                id,
                cell_list: component.iter().map(|i| *i as u32).collect(),
                params: dominant_category.params(),
                mean_variance,
                cell_count: component.len() as i32,
            });
        }

        self.identification_complete = true;
        self.identification_time_ns = Some(now_ns);
    }

    pub fn get_region_for_cell(&self, idx: usize) -> Option<i32> {
        self.cell_to_region.get(idx).copied().flatten()
    }

    pub fn get_region_params(&self, region_id: i32) -> Option<RegionParams> {
        self.regions.iter().find(|r| r.id == region_id).map(|r| r.params)
    }

    pub fn to_snapshot(&self) -> RegionSnapshot {
        RegionSnapshot {
            rings: self.rings,
            azimuth_bins: self.azimuth_bins,
            regions: self.regions.clone(),
            variance_sum: self.variance_sum.clone(),
            variance_count: self.variance_count.clone(),
            frames_sampled: self.frames_sampled,
            grid_snapshot_id: None,
        }
    }

    /// Rebuild `cell_to_region` / `regions` from a snapshot. Out-of-bound
    /// cell indices are silently skipped.
    pub fn restore_from_snapshot(&mut self, snapshot: &RegionSnapshot) {
        self.rings = snapshot.rings;
        self.azimuth_bins = snapshot.azimuth_bins;
        let n = self.rings * self.azimuth_bins;
        self.cell_to_region = vec![None; n];
        self.variance_sum = snapshot.variance_sum.clone();
        self.variance_count = snapshot.variance_count.clone();
        self.frames_sampled = snapshot.frames_sampled;
        self.regions = snapshot.regions.clone();
        for region in &self.regions {
            for idx in &region.cell_list {
                if let Some(slot) = self.cell_to_region.get_mut(*idx as usize) {
                    *slot = Some(region.id);
                }
            }
        }
        self.identification_complete = true;
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_roundtrip_preserves_region_assignment() {
        let mut mgr = RegionManager::new(2, 4);
        let cells = vec![BackgroundCell {
            range_spread_m: 0.1,
            times_seen_count: 5,
            ..Default::default()
        }; 8];
        mgr.update_variance_metrics(&cells);
        mgr.identify_regions(&cells, 50, 1_000);
        assert!(mgr.identification_complete);

        let snap = mgr.to_snapshot();
        let mut restored = RegionManager::new(2, 4);
        restored.restore_from_snapshot(&snap);

        assert_eq!(restored.region_count(), mgr.region_count());
        for idx in 0..8 {
            assert_eq!(restored.get_region_for_cell(idx), mgr.get_region_for_cell(idx));
        }
    }

    #[test]
    fn restore_skips_out_of_bound_indices() {
        let mut snapshot = RegionSnapshot {
            rings: 1,
            azimuth_bins: 4,
            regions: vec![Region {
                id: 0,
                cell_list: vec![0, 1, 99], // 99 is out of bounds
                params: RegionParams::default(),
                mean_variance: 0.0,
                cell_count: 3,
            }],
            variance_sum: vec![0.0; 4],
            variance_count: vec![0; 4],
            frames_sampled: 0,
            grid_snapshot_id: None,
        };
        snapshot.regions[0].cell_count = 3;
        let mut mgr = RegionManager::new(1, 4);
        mgr.restore_from_snapshot(&snapshot);
        assert_eq!(mgr.get_region_for_cell(0), Some(0));
        assert_eq!(mgr.get_region_for_cell(1), Some(0));
    }
}
