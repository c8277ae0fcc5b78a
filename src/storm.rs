//! Storm field generation.
//!
//! A seeded engine owns a set of storm cells, advances them through a
//! growth/plateau/decay lifecycle, and emits lightning strikes. Everything
//! here draws from the [`SeededRng`] stream, so a seed replays the exact
//! same storm day.

use serde::{Deserialize, Serialize};

use crate::rng::SeededRng;
use crate::scenario::RegionBounds;

/// Minutes of simulated time per tick.
pub const TICK_MINUTES: u32 = 5;

/// One active storm cell.
///
/// `radius` is always derived from intensity (`5 + 15 * intensity`); it is
/// recomputed after every envelope step and never set directly.
#[derive(Clone, Debug)]
pub struct StormCell {
    pub id: u64,
    pub lat: f64,
    pub lon: f64,
    pub intensity: f64,
    pub age: u32,
    pub max_age: u32,
    pub radius: f64,
    vx: f64,
    vy: f64,
    lightning_timer: i32,
    pub active: bool,
}

impl StormCell {
    fn new(lat: f64, lon: f64, intensity: f64, id: u64, rng: &mut SeededRng) -> Self {
        let max_age = 36 + (rng.next() * 48.0) as u32;
        let vx = (rng.next() - 0.5) * 0.025;
        let vy = (rng.next() - 0.3) * 0.025;
        let lightning_timer = (rng.next() * 5.0) as i32;
        Self {
            id,
            lat,
            lon,
            intensity,
            age: 0,
            max_age,
            radius: 5.0 + intensity * 15.0,
            vx,
            vy,
            lightning_timer,
            active: true,
        }
    }

    /// Advance one tick: drift, age, and walk the intensity envelope.
    fn update(&mut self) {
        self.age += 1;
        self.lat += self.vy;
        self.lon += self.vx;
        self.lightning_timer -= 1;

        if (self.age as f64) < self.max_age as f64 * 0.3 {
            self.intensity = (self.intensity + 0.05).min(1.0);
        } else if (self.age as f64) > self.max_age as f64 * 0.8 {
            self.intensity = (self.intensity - 0.03).max(0.0);
        }

        self.radius = 5.0 + self.intensity * 15.0;

        if self.age > self.max_age || self.intensity < 0.1 {
            self.active = false;
        }
    }

    /// Ready to discharge? Resets the recharge countdown on success; strong
    /// cells (intensity > 0.8) recharge on a shorter cycle.
    fn should_generate_lightning(&mut self, rng: &mut SeededRng) -> bool {
        if self.lightning_timer <= 0 && self.intensity > 0.45 {
            let recharge_speed = if self.intensity > 0.8 { 2.0 } else { 4.0 };
            self.lightning_timer = 1 + (rng.next() * recharge_speed) as i32;
            return true;
        }
        false
    }

    /// Short random walk of 3-6 segments starting at the cell center.
    fn generate_lightning_path(&self, rng: &mut SeededRng) -> Vec<[f64; 2]> {
        let mut path = vec![[self.lat, self.lon]];
        let mut lat = self.lat;
        let mut lon = self.lon;

        let segments = 3 + (rng.next() * 4.0) as u32;
        for _ in 0..segments {
            lat += (rng.next() - 0.5) * 0.04;
            lon += (rng.next() - 0.5) * 0.04;
            path.push([lat, lon]);
        }

        path
    }

    fn snapshot(&self) -> StormCellState {
        StormCellState {
            id: self.id,
            lat: self.lat,
            lon: self.lon,
            radius: self.radius,
            intensity: self.intensity,
        }
    }
}

/// Wire shape of a cell inside a frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StormCellState {
    pub id: u64,
    pub lat: f64,
    pub lon: f64,
    pub radius: f64,
    pub intensity: f64,
}

/// A single strike: origin plus the jagged path below it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LightningStrike {
    pub id: String,
    pub path: Vec<[f64; 2]>,
}

impl LightningStrike {
    /// First path point; every distance check keys off this.
    pub fn origin(&self) -> [f64; 2] {
        self.path[0]
    }
}

/// Output of one engine tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StormFrame {
    pub tick: u32,
    /// Simulated minutes since midnight.
    pub timestamp: u32,
    pub cells: Vec<StormCellState>,
    pub lightning: Vec<LightningStrike>,
}

/// Owns the active cell set and the seeded stream driving it.
pub struct StormEngine {
    rng: SeededRng,
    cells: Vec<StormCell>,
    next_id: u64,
    current_tick: u32,
    spawn_timer: i32,
    bounds: RegionBounds,
    weather_state: f64,
}

enum Coast {
    East,
    West,
}

impl StormEngine {
    pub fn new(seed: u64, bounds: RegionBounds) -> Self {
        let mut rng = SeededRng::new(seed);
        // Per-run bias toward stormy days: minimum 0.4, most days 0.7+.
        let weather_state = 0.4 + rng.next() * 0.6;
        Self {
            rng,
            cells: Vec::new(),
            next_id: 0,
            current_tick: 0,
            spawn_timer: 0,
            bounds,
            weather_state,
        }
    }

    pub fn weather_state(&self) -> f64 {
        self.weather_state
    }

    /// Clustered coastal formation: 3-7 cells clumped along a shared
    /// latitude band near one coast.
    fn spawn_sea_breeze(&mut self, coast: Coast) {
        if self.weather_state < 0.2 {
            return;
        }

        let num_cells = 3 + (self.rng.next() * 5.0) as u32;
        let base_lat = self
            .rng
            .range(self.bounds.south, self.bounds.north);

        for _ in 0..num_cells {
            let lat = base_lat + (self.rng.next() - 0.5) * 0.8;
            let lon = match coast {
                Coast::East => self.bounds.east - 0.5 - self.rng.next() * 1.5,
                Coast::West => self.bounds.west + 0.5 + self.rng.next() * 1.5,
            };
            let intensity = 0.3 + self.rng.next() * 0.5;

            let id = self.next_id;
            self.next_id += 1;
            self.cells
                .push(StormCell::new(lat, lon, intensity, id, &mut self.rng));
        }
    }

    fn spawn_random_cell(&mut self) {
        let lat = self.rng.range(self.bounds.south, self.bounds.north);
        let lon = self.rng.range(self.bounds.west, self.bounds.east);
        let intensity = 0.3 + self.rng.next() * 0.5;

        let id = self.next_id;
        self.next_id += 1;
        self.cells
            .push(StormCell::new(lat, lon, intensity, id, &mut self.rng));
    }

    fn spawn_storm(&mut self) {
        // Active window roughly 10:30am-8:30pm simulated.
        let is_active_hours = self.current_tick > 80 && self.current_tick < 250;
        let spawn_chance = if is_active_hours { 0.9 } else { 0.3 };

        if self.rng.next() > spawn_chance {
            return;
        }

        let spawn_type = self.rng.next();
        if spawn_type < 0.45 {
            self.spawn_sea_breeze(Coast::East);
        } else if spawn_type < 0.90 {
            self.spawn_sea_breeze(Coast::West);
        } else {
            self.spawn_random_cell();
        }
    }

    /// Advance one tick: age and purge cells, run the spawn countdown, then
    /// collect this tick's lightning.
    pub fn tick(&mut self) -> StormFrame {
        self.current_tick += 1;

        // Cells die the tick they age out, fizzle, or drift past the
        // bounds extended by one degree; they are purged immediately.
        let bounds = self.bounds;
        self.cells.retain_mut(|cell| {
            cell.update();
            cell.active && bounds.contains_extended(cell.lat, cell.lon, 1.0)
        });

        self.spawn_timer -= 1;
        if self.spawn_timer <= 0 {
            self.spawn_storm();
            self.spawn_timer = 5 + (self.rng.next() * 10.0) as i32;
        }

        let mut lightning = Vec::new();
        let tick = self.current_tick;
        for i in 0..self.cells.len() {
            if self.cells[i].should_generate_lightning(&mut self.rng) {
                let path = self.cells[i].generate_lightning_path(&mut self.rng);
                lightning.push(LightningStrike {
                    id: format!("{}-{}", self.cells[i].id, tick),
                    path,
                });
            }
        }

        StormFrame {
            tick,
            timestamp: tick * TICK_MINUTES,
            cells: self.cells.iter().map(StormCell::snapshot).collect(),
            lightning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bounds() -> RegionBounds {
        RegionBounds::default()
    }

    #[test]
    fn identical_seeds_replay_identical_storms() {
        let mut a = StormEngine::new(777, test_bounds());
        let mut b = StormEngine::new(777, test_bounds());

        for _ in 0..288 {
            let fa = a.tick();
            let fb = b.tick();
            assert_eq!(fa.cells.len(), fb.cells.len());
            assert_eq!(fa.lightning.len(), fb.lightning.len());
            for (ca, cb) in fa.cells.iter().zip(fb.cells.iter()) {
                assert_eq!(ca.id, cb.id);
                assert_eq!(ca.lat, cb.lat);
                assert_eq!(ca.lon, cb.lon);
                assert_eq!(ca.intensity, cb.intensity);
            }
            for (la, lb) in fa.lightning.iter().zip(fb.lightning.iter()) {
                assert_eq!(la.id, lb.id);
                assert_eq!(la.path, lb.path);
            }
        }
    }

    #[test]
    fn radius_tracks_intensity_every_tick() {
        let mut engine = StormEngine::new(42, test_bounds());
        for _ in 0..288 {
            let frame = engine.tick();
            for cell in &frame.cells {
                assert!((cell.radius - (5.0 + 15.0 * cell.intensity)).abs() < 1e-12);
                assert!((0.0..=1.0).contains(&cell.intensity));
            }
        }
    }

    #[test]
    fn expired_cells_never_reappear() {
        use std::collections::HashSet;

        let mut engine = StormEngine::new(99, test_bounds());
        let mut prev_alive: HashSet<u64> = HashSet::new();
        let mut retired: HashSet<u64> = HashSet::new();
        for _ in 0..288 {
            let frame = engine.tick();
            let alive: HashSet<u64> = frame.cells.iter().map(|c| c.id).collect();
            for id in &alive {
                assert!(!retired.contains(id), "cell {id} reappeared after removal");
            }
            for id in prev_alive.difference(&alive) {
                retired.insert(*id);
            }
            prev_alive = alive;
        }
        assert!(!retired.is_empty(), "a full day should retire some cells");
    }

    #[test]
    fn strikes_start_at_a_live_cell() {
        let mut engine = StormEngine::new(2024, test_bounds());
        let mut any_strike = false;
        for _ in 0..288 {
            let frame = engine.tick();
            for bolt in &frame.lightning {
                any_strike = true;
                assert!(bolt.path.len() >= 4 && bolt.path.len() <= 7);
                let origin = bolt.origin();
                let near_a_cell = frame
                    .cells
                    .iter()
                    .any(|c| (c.lat - origin[0]).abs() < 1e-9 && (c.lon - origin[1]).abs() < 1e-9);
                assert!(near_a_cell, "strike origin should sit on a cell center");
            }
        }
        assert!(any_strike, "a full day should produce lightning");
    }

    #[test]
    fn weather_state_is_biased_stormy() {
        for seed in 0..50u64 {
            let engine = StormEngine::new(seed, test_bounds());
            assert!((0.4..=1.0).contains(&engine.weather_state()));
        }
    }
}
