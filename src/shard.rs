//! Agent shard: one worker's slice of the population.
//!
//! A shard owns its agents exclusively for the run's lifetime. Each tick it
//! runs two passes: the strike pass (bounded grid-window search around every
//! bolt) and the time-accounting pass (a straight sweep over the agent
//! array). Exposure and occupancy rolls draw from the thread RNG, not the
//! seeded storm stream — storm replay is deterministic, casualties are not.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::grid::SpatialGrid;
use crate::storm::LightningStrike;

/// Flat-plane approximation tuned for the simulated region.
const MILES_PER_DEG_LAT: f64 = 69.0;
const MILES_PER_DEG_LON: f64 = 60.0;

/// Grid cells searched in every direction around a strike (~10-mile reach
/// at the default 0.1-degree cell).
const SEARCH_RADIUS_CELLS: i32 = 2;

const WARNING_RADIUS_MILES: f64 = 10.0;
const PROXIMITY_EXEMPT_MILES: f64 = 2.0;
const LETHAL_RADIUS_MILES: f64 = 0.1;
const SHELTER_MINUTES: i32 = 30;
const MINUTES_PER_TICK: i32 = 5;

/// Sheltering policy an agent follows for the whole run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    A,
    B,
}

/// What the coordinator ships to a shard at load time. Probability and
/// protocol are derived before dispatch so the shard stays pure physics.
#[derive(Clone, Debug)]
pub struct AgentSeed {
    pub id: u64,
    pub lat: f64,
    pub lon: f64,
    pub outdoor_prob: f64,
    pub protocol: Protocol,
}

#[derive(Clone, Debug)]
struct Agent {
    #[allow(dead_code)]
    id: u64,
    lat: f64,
    lon: f64,
    outdoor_prob: f64,
    protocol: Protocol,
    shelter_timer: i32,
    struck: bool,
}

/// Per-protocol counters. `outdoors_minutes` and `struck` accumulate over
/// the run; `count` is fixed at finalize time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolStats {
    pub outdoors_minutes: u64,
    pub struck: u64,
    pub count: u64,
}

/// Both protocols' counters, shard-local until the coordinator sums them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimStats {
    pub protocol_a: ProtocolStats,
    pub protocol_b: ProtocolStats,
}

impl SimStats {
    fn protocol_mut(&mut self, protocol: Protocol) -> &mut ProtocolStats {
        match protocol {
            Protocol::A => &mut self.protocol_a,
            Protocol::B => &mut self.protocol_b,
        }
    }

    pub fn merge(&mut self, other: &SimStats) {
        self.protocol_a.outdoors_minutes += other.protocol_a.outdoors_minutes;
        self.protocol_a.struck += other.protocol_a.struck;
        self.protocol_a.count += other.protocol_a.count;
        self.protocol_b.outdoors_minutes += other.protocol_b.outdoors_minutes;
        self.protocol_b.struck += other.protocol_b.struck;
        self.protocol_b.count += other.protocol_b.count;
    }

    pub fn total_count(&self) -> u64 {
        self.protocol_a.count + self.protocol_b.count
    }

    pub fn total_struck(&self) -> u64 {
        self.protocol_a.struck + self.protocol_b.struck
    }
}

fn distance_miles(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    let dlat = (lat_a - lat_b) * MILES_PER_DEG_LAT;
    let dlon = (lon_a - lon_b) * MILES_PER_DEG_LON;
    (dlat * dlat + dlon * dlon).sqrt()
}

pub struct AgentShard {
    agents: Vec<Agent>,
    grid: SpatialGrid,
    stats: SimStats,
    finalized: bool,
}

impl AgentShard {
    pub fn new(grid_cell_deg: f64) -> Self {
        Self {
            agents: Vec::new(),
            grid: SpatialGrid::new(grid_cell_deg),
            stats: SimStats::default(),
            finalized: false,
        }
    }

    /// Append a batch to the owned population and index it. Callable
    /// repeatedly while the loader streams.
    pub fn load_batch(&mut self, batch: Vec<AgentSeed>) {
        debug_assert!(!self.finalized, "load_batch after finalize_init");
        self.agents.reserve(batch.len());
        for seed in batch {
            let index = self.agents.len() as u32;
            self.grid.insert(seed.lat, seed.lon, index);
            self.agents.push(Agent {
                id: seed.id,
                lat: seed.lat,
                lon: seed.lon,
                outdoor_prob: seed.outdoor_prob,
                protocol: seed.protocol,
                shelter_timer: 0,
                struck: false,
            });
        }
    }

    /// Tally per-protocol population counts. Exactly once, after all batches.
    pub fn finalize_init(&mut self) {
        debug_assert!(!self.finalized, "finalize_init called twice");
        self.finalized = true;
        for agent in &self.agents {
            self.stats.protocol_mut(agent.protocol).count += 1;
        }
    }

    pub fn population(&self) -> usize {
        self.agents.len()
    }

    pub fn occupied_cells(&self) -> usize {
        self.grid.occupied_cells()
    }

    /// One tick: strike pass then time-accounting pass. Returns a snapshot
    /// of the cumulative stats.
    pub fn process_tick(&mut self, strikes: &[LightningStrike], time_scalar: f64) -> SimStats {
        let mut rng = rand::thread_rng();

        let grid = &self.grid;
        let agents = &mut self.agents;
        let stats = &mut self.stats;

        for bolt in strikes {
            let [bolt_lat, bolt_lon] = bolt.origin();
            for index in grid.window(bolt_lat, bolt_lon, SEARCH_RADIUS_CELLS) {
                let agent = &mut agents[index as usize];
                if agent.struck {
                    continue;
                }

                let dist = distance_miles(agent.lat, agent.lon, bolt_lat, bolt_lon);
                let effective_prob = agent.outdoor_prob * time_scalar;

                let exposed = match agent.protocol {
                    Protocol::A => {
                        // Forewarning is the timer state before this strike
                        // rearms it; a warned agent is already inside.
                        let had_warning = agent.shelter_timer > 0;
                        if dist <= WARNING_RADIUS_MILES {
                            agent.shelter_timer = SHELTER_MINUTES;
                        }
                        !had_warning && rng.gen::<f64>() < effective_prob
                    }
                    // Inside 2 miles a Protocol B agent is assumed to be
                    // sheltering from visible proximity.
                    Protocol::B => {
                        dist > PROXIMITY_EXEMPT_MILES && rng.gen::<f64>() < effective_prob
                    }
                };

                if exposed && dist < LETHAL_RADIUS_MILES {
                    agent.struck = true;
                    stats.protocol_mut(agent.protocol).struck += 1;
                }
            }
        }

        for agent in agents.iter_mut() {
            if agent.struck {
                continue;
            }

            if agent.shelter_timer > 0 {
                agent.shelter_timer = (agent.shelter_timer - MINUTES_PER_TICK).max(0);
            }

            let sheltering = agent.protocol == Protocol::A && agent.shelter_timer > 0;
            if !sheltering && rng.gen::<f64>() < agent.outdoor_prob * time_scalar {
                stats.protocol_mut(agent.protocol).outdoors_minutes +=
                    MINUTES_PER_TICK as u64;
            }
        }

        self.stats
    }

    /// Clear struck flags and timers and re-tally counts; positions,
    /// probabilities, and protocols survive so the same population can run
    /// again without reloading.
    pub fn reset(&mut self) {
        self.stats = SimStats::default();
        for agent in &mut self.agents {
            agent.struck = false;
            agent.shelter_timer = 0;
            self.stats.protocol_mut(agent.protocol).count += 1;
        }
    }

    #[cfg(test)]
    fn shelter_timer_of(&self, index: usize) -> i32 {
        self.agents[index].shelter_timer
    }

    #[cfg(test)]
    fn struck_of(&self, index: usize) -> bool {
        self.agents[index].struck
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(id: u64, lat: f64, lon: f64, prob: f64, protocol: Protocol) -> AgentSeed {
        AgentSeed {
            id,
            lat,
            lon,
            outdoor_prob: prob,
            protocol,
        }
    }

    fn strike_at(lat: f64, lon: f64) -> LightningStrike {
        LightningStrike {
            id: "test-1".to_string(),
            path: vec![[lat, lon], [lat + 0.01, lon + 0.01]],
        }
    }

    #[test]
    fn warning_rearms_timer_to_exactly_thirty() {
        let mut shard = AgentShard::new(0.1);
        // ~0.69 miles north of the strike, well inside the 10-mile ring
        shard.load_batch(vec![seed(1, 27.01, -81.0, 0.0, Protocol::A)]);
        shard.finalize_init();

        shard.process_tick(&[strike_at(27.0, -81.0)], 1.0);
        // 30 armed by the strike, minus the same tick's 5-minute decrement
        assert_eq!(shard.shelter_timer_of(0), 25);

        // mid-countdown strike must override back to 30
        for _ in 0..2 {
            shard.process_tick(&[], 1.0);
        }
        assert_eq!(shard.shelter_timer_of(0), 15);
        shard.process_tick(&[strike_at(27.0, -81.0)], 1.0);
        assert_eq!(shard.shelter_timer_of(0), 25);
    }

    #[test]
    fn struck_is_terminal() {
        let mut shard = AgentShard::new(0.1);
        // 200 certain-to-be-outside Protocol A agents at the strike origin:
        // effectively all are struck on the first bolt.
        let batch: Vec<AgentSeed> = (0..200)
            .map(|i| seed(i, 27.0, -81.0, 1.0, Protocol::A))
            .collect();
        shard.load_batch(batch);
        shard.finalize_init();

        let stats = shard.process_tick(&[strike_at(27.0, -81.0)], 1.0);
        let struck_after_one = stats.protocol_a.struck;
        assert!(struck_after_one > 0);

        // Struck counters never move again for these agents, and their
        // timers stay frozen.
        let frozen: Vec<i32> = (0..200)
            .filter(|&i| shard.struck_of(i))
            .map(|i| shard.shelter_timer_of(i))
            .collect();
        for _ in 0..50 {
            shard.process_tick(&[strike_at(27.0, -81.0)], 1.0);
        }
        let still_frozen: Vec<i32> = (0..200)
            .filter(|&i| shard.struck_of(i))
            .map(|i| shard.shelter_timer_of(i))
            .take(frozen.len())
            .collect();
        assert_eq!(frozen, still_frozen);
    }

    #[test]
    fn protocol_b_dead_zone_inside_two_miles() {
        let mut shard = AgentShard::new(0.1);
        // Directly at the origin: distance 0 < 2 miles, structurally immune.
        let batch: Vec<AgentSeed> = (0..100)
            .map(|i| seed(i, 27.0, -81.0, 1.0, Protocol::B))
            .collect();
        shard.load_batch(batch);
        shard.finalize_init();

        for _ in 0..100 {
            let stats = shard.process_tick(&[strike_at(27.0, -81.0)], 1.0);
            assert_eq!(stats.protocol_b.struck, 0);
        }
    }

    #[test]
    fn sheltering_agent_accrues_no_outdoor_minutes() {
        let mut shard = AgentShard::new(0.1);
        shard.load_batch(vec![seed(1, 27.01, -81.0, 1.0, Protocol::A)]);
        shard.finalize_init();

        // Arm the timer, then run strike-free ticks: 25, 20, 15, 10, 5
        // remaining all shelter. Minutes only accrue once the timer hits 0.
        shard.process_tick(&[strike_at(27.0, -81.0)], 0.0);
        let mut last = shard.process_tick(&[], 0.0);
        assert_eq!(last.protocol_a.outdoors_minutes, 0);
        for _ in 0..4 {
            last = shard.process_tick(&[], 0.0);
        }
        assert_eq!(last.protocol_a.outdoors_minutes, 0);
        assert_eq!(shard.shelter_timer_of(0), 0);

        let after = shard.process_tick(&[], 1.0);
        assert_eq!(after.protocol_a.outdoors_minutes, 5);
    }

    #[test]
    fn outdoor_minutes_are_multiples_of_five() {
        let mut shard = AgentShard::new(0.1);
        let batch: Vec<AgentSeed> = (0..50)
            .map(|i| {
                let p = if i % 2 == 0 { Protocol::A } else { Protocol::B };
                seed(i, 26.0 + (i as f64) * 0.01, -82.0, 0.5, p)
            })
            .collect();
        shard.load_batch(batch);
        shard.finalize_init();

        for _ in 0..30 {
            let stats = shard.process_tick(&[], 1.0);
            assert_eq!(stats.protocol_a.outdoors_minutes % 5, 0);
            assert_eq!(stats.protocol_b.outdoors_minutes % 5, 0);
        }
    }

    #[test]
    fn reset_preserves_population_and_retallies() {
        let mut shard = AgentShard::new(0.1);
        let batch: Vec<AgentSeed> = (0..10)
            .map(|i| {
                let p = if i % 2 == 0 { Protocol::A } else { Protocol::B };
                seed(i, 27.0, -81.0, 1.0, p)
            })
            .collect();
        shard.load_batch(batch);
        shard.finalize_init();
        assert_eq!(shard.stats.protocol_a.count, 5);
        assert_eq!(shard.stats.protocol_b.count, 5);

        for _ in 0..10 {
            shard.process_tick(&[strike_at(27.0, -81.0)], 1.0);
        }

        shard.reset();
        assert_eq!(shard.population(), 10);
        assert_eq!(shard.stats.protocol_a.count, 5);
        assert_eq!(shard.stats.protocol_b.count, 5);
        assert_eq!(shard.stats.total_struck(), 0);
        assert_eq!(shard.stats.protocol_a.outdoors_minutes, 0);
        for i in 0..10 {
            assert!(!shard.struck_of(i));
            assert_eq!(shard.shelter_timer_of(i), 0);
        }
    }

    #[test]
    fn stats_serialize_with_wire_names() {
        let stats = SimStats::default();
        let json = serde_json::to_value(stats).unwrap();
        assert!(json.get("protocolA").is_some());
        assert!(json["protocolA"].get("outdoorsMinutes").is_some());
    }
}
