//! Scenario configuration: the simulated region and run geometry.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_ticks() -> u32 {
    288
}

fn default_grid_cell_deg() -> f64 {
    0.1
}

fn default_chunk_size() -> usize {
    50_000
}

fn default_agents_path() -> PathBuf {
    PathBuf::from("data/agents.json")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

/// Latitude/longitude box for the simulated region.
///
/// Defaults cover the Florida peninsula; storm cells are purged one degree
/// past these edges.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RegionBounds {
    pub north: f64,
    pub south: f64,
    pub west: f64,
    pub east: f64,
}

impl Default for RegionBounds {
    fn default() -> Self {
        Self {
            north: 31.0,
            south: 24.5,
            west: -87.6,
            east: -80.0,
        }
    }
}

impl RegionBounds {
    /// True when the point lies inside the box grown by `margin` degrees on
    /// every side.
    pub fn contains_extended(&self, lat: f64, lon: f64, margin: f64) -> bool {
        lat >= self.south - margin
            && lat <= self.north + margin
            && lon >= self.west - margin
            && lon <= self.east + margin
    }

    pub fn lat_span(&self) -> f64 {
        self.north - self.south
    }

    pub fn lon_span(&self) -> f64 {
        self.east - self.west
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub bounds: RegionBounds,
    #[serde(default = "default_ticks")]
    pub ticks: u32,
    #[serde(default = "default_grid_cell_deg")]
    pub grid_cell_deg: f64,
    /// Records per round-robin batch during population distribution.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Worker count override; defaults to `max(2, cores - 1)` when absent.
    #[serde(default)]
    pub shards: Option<usize>,
    #[serde(default = "default_agents_path")]
    pub agents_path: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            name: "florida_day".to_string(),
            description: None,
            bounds: RegionBounds::default(),
            ticks: default_ticks(),
            grid_cell_deg: default_grid_cell_deg(),
            chunk_size: default_chunk_size(),
            shards: None,
            agents_path: default_agents_path(),
            results_dir: default_results_dir(),
        }
    }
}

pub struct ScenarioLoader {
    base_dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Scenario> {
        let path = self.base_dir.join(file);
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        let scenario: Scenario = serde_yaml::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(scenario)
    }
}
