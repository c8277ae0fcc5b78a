//! Quantized lat/lon bucket index over a shard's agents.
//!
//! Keys are packed composite integers (two quantized i32 halves in one u64)
//! so the per-tick strike lookups never allocate key strings. Buckets hold
//! indices into the shard's contiguous agent array; agents are stationary,
//! so an agent stays in one bucket for the whole run.

use std::collections::HashMap;

#[derive(Debug)]
pub struct SpatialGrid {
    cell_deg: f64,
    buckets: HashMap<u64, Vec<u32>>,
}

fn pack(x: i32, y: i32) -> u64 {
    ((x as u32 as u64) << 32) | (y as u32 as u64)
}

impl SpatialGrid {
    pub fn new(cell_deg: f64) -> Self {
        Self {
            cell_deg,
            buckets: HashMap::new(),
        }
    }

    /// Quantized (x, y) cell coordinates for a point.
    pub fn cell_of(&self, lat: f64, lon: f64) -> (i32, i32) {
        let x = (lon / self.cell_deg).floor() as i32;
        let y = (lat / self.cell_deg).floor() as i32;
        (x, y)
    }

    pub fn insert(&mut self, lat: f64, lon: f64, index: u32) {
        let (x, y) = self.cell_of(lat, lon);
        self.buckets.entry(pack(x, y)).or_default().push(index);
    }

    /// Agent indices in the square window of `radius` cells around a point.
    ///
    /// This is the bounded-search approximation: agents outside the window
    /// are categorically unaffected regardless of true distance.
    pub fn window(&self, lat: f64, lon: f64, radius: i32) -> impl Iterator<Item = u32> + '_ {
        let (cx, cy) = self.cell_of(lat, lon);
        (cx - radius..=cx + radius).flat_map(move |x| {
            (cy - radius..=cy + radius).flat_map(move |y| {
                self.buckets
                    .get(&pack(x, y))
                    .map(|b| b.as_slice())
                    .unwrap_or(&[])
                    .iter()
                    .copied()
            })
        })
    }

    pub fn occupied_cells(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_coordinates_quantize_distinctly() {
        let grid = SpatialGrid::new(0.1);
        let (x1, y1) = grid.cell_of(27.05, -81.05);
        let (x2, y2) = grid.cell_of(27.05, -81.15);
        assert_eq!(y1, y2);
        assert_ne!(x1, x2);
        // floor, not truncation, on the negative axis
        assert_eq!(x1, -811);
        assert_eq!(y1, 270);
    }

    #[test]
    fn packed_keys_do_not_collide_across_quadrants() {
        let mut grid = SpatialGrid::new(0.1);
        grid.insert(27.0, -81.0, 0);
        grid.insert(-27.0, 81.0, 1);
        grid.insert(-27.0, -81.0, 2);
        grid.insert(27.0, 81.0, 3);
        assert_eq!(grid.occupied_cells(), 4);
    }

    #[test]
    fn window_covers_neighbors_and_skips_distant() {
        let mut grid = SpatialGrid::new(0.1);
        grid.insert(27.00, -81.00, 0); // center cell
        grid.insert(27.15, -81.15, 1); // within 2 cells
        grid.insert(27.55, -81.00, 2); // 5 cells north, outside window

        let hits: Vec<u32> = grid.window(27.00, -81.00, 2).collect();
        assert!(hits.contains(&0));
        assert!(hits.contains(&1));
        assert!(!hits.contains(&2));
    }

    #[test]
    fn each_agent_lands_in_exactly_one_bucket() {
        let mut grid = SpatialGrid::new(0.1);
        for i in 0..100u32 {
            let lat = 25.0 + f64::from(i) * 0.037;
            let lon = -87.0 + f64::from(i) * 0.051;
            grid.insert(lat, lon, i);
        }
        let total: usize = grid.buckets.values().map(Vec::len).sum();
        assert_eq!(total, 100);
    }
}
