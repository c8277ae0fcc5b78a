//! Population ingestion: streaming loader and outdoor-exposure
//! classification.
//!
//! The agents file is a JSON array written one record per line; the loader
//! is best-effort by contract — lines that fail to parse are skipped and
//! counted, never fatal.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use anyhow::{Context, Result};
use rand::Rng;
use serde::Deserialize;
use tracing::warn;

use crate::scenario::RegionBounds;

/// One ingested record, position already assigned, ready for the
/// coordinator to classify and distribute.
#[derive(Clone, Debug)]
pub struct PopulationRecord {
    pub id: u64,
    pub lat: f64,
    pub lon: f64,
    pub job: String,
    pub hobbies: String,
}

/// Job keywords with high field exposure (0.75 base).
const HIGH_EXPOSURE_JOBS: &[&str] = &[
    "farm",
    "landscap",
    "construction",
    "laborer",
    "street",
    "parking",
    "dog walker",
    "police",
    "fire",
    "ranger",
    "guide",
    "messenger",
    "delivery",
    "postal",
    "geologist",
    "surveyor",
    "solar",
    "roof",
    "environmental",
];

/// Trade and mixed-exposure keywords (0.45 base).
const TRADE_JOBS: &[&str] = &[
    "electrician",
    "plumber",
    "carpenter",
    "welder",
    "mechanic",
    "hvac",
    "technician",
    "driver",
    "truck",
    "security",
    "guard",
    "bellhop",
    "photographer",
    "journalist",
    "real estate",
    "architect",
    "planner",
];

/// Strictly indoor keywords (0.05 base).
const INDOOR_JOBS: &[&str] = &[
    "software",
    "developer",
    "data",
    "clerk",
    "teller",
    "accountant",
    "analyst",
    "cfo",
    "ceo",
    "executive",
    "admin",
    "assistant",
    "receptionist",
    "attorney",
    "lawyer",
    "judge",
    "physician",
    "surgeon",
    "nurse",
    "dentist",
    "pharmacist",
    "librarian",
    "teacher",
    "professor",
    "scientist",
    "biologist",
    "chemist",
    "cashier",
    "baker",
    "chef",
    "cook",
    "bartender",
];

/// Hobby keywords that imply time outside; each one found adds 0.12,
/// capped at +0.25 total.
const OUTDOOR_HOBBIES: &[&str] = &[
    "beach",
    "fishing",
    "boating",
    "swimming",
    "snorkeling",
    "scuba",
    "diving",
    "surfing",
    "paddle",
    "kayak",
    "golf",
    "tennis",
    "hiking",
    "bird",
    "photography",
    "camp",
    "cycl",
    "bike",
    "ski",
    "sail",
    "wildlife",
    "garden",
    "collecting",
    "pickleball",
    "run",
    "jog",
    "yoga",
    "horse",
    "nature",
    "rv",
    "climb",
    "skate",
    "basket",
    "soccer",
    "baseball",
    "football",
    "astronomy",
    "restoration",
];

const HOBBY_BOOST: f64 = 0.12;
const HOBBY_BOOST_CAP: f64 = 0.25;

/// Base probability of an agent being outdoors, from its job tier plus a
/// capped hobby boost. Evaluated once at load and cached on the agent
/// record, never per tick.
pub fn outdoor_probability(job: &str, hobbies: &str) -> f64 {
    let job_lower = job.to_lowercase();

    let mut prob = 0.15;
    if HIGH_EXPOSURE_JOBS.iter().any(|k| job_lower.contains(k)) {
        prob = 0.75;
    } else if TRADE_JOBS.iter().any(|k| job_lower.contains(k)) {
        prob = 0.45;
    } else if INDOOR_JOBS.iter().any(|k| job_lower.contains(k)) {
        prob = 0.05;
    }

    if !hobbies.is_empty() {
        let hobbies_lower = hobbies.to_lowercase();
        let found = OUTDOOR_HOBBIES
            .iter()
            .filter(|k| hobbies_lower.contains(**k))
            .count();
        prob += (found as f64 * HOBBY_BOOST).min(HOBBY_BOOST_CAP);
    }

    prob.clamp(0.05, 0.95)
}

#[derive(Debug, Deserialize)]
struct RawAgentRecord {
    #[serde(rename = "agentNumber")]
    agent_number: String,
    job: String,
    #[serde(default)]
    hobbies: String,
}

/// Lazily streams records out of an agents file, skipping anything
/// malformed. Read `skipped()` after the stream is drained.
pub struct RecordStream {
    lines: Lines<BufReader<File>>,
    bounds: RegionBounds,
    skipped: u64,
}

impl RecordStream {
    pub fn open(path: impl AsRef<Path>, bounds: RegionBounds) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open agents file {}", path.display()))?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            bounds,
            skipped: 0,
        })
    }

    /// Lines dropped so far for parse or id failures.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Strip the array punctuation the writer leaves on each line.
    fn clean(line: &str) -> &str {
        let mut s = line.trim();
        if let Some(rest) = s.strip_prefix('[') {
            s = rest;
        }
        if let Some(rest) = s.strip_suffix(']').or_else(|| s.strip_suffix(',')) {
            s = rest;
        }
        s
    }
}

impl Iterator for RecordStream {
    type Item = PopulationRecord;

    fn next(&mut self) -> Option<PopulationRecord> {
        let mut rng = rand::thread_rng();
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => {
                    warn!(%err, "agents file read error; stopping stream");
                    return None;
                }
            };
            let cleaned = Self::clean(&line);
            if cleaned.is_empty() {
                continue;
            }

            let raw: RawAgentRecord = match serde_json::from_str(cleaned) {
                Ok(raw) => raw,
                Err(_) => {
                    self.skipped += 1;
                    continue;
                }
            };
            let id = match raw.agent_number.parse::<u64>() {
                Ok(id) => id,
                Err(_) => {
                    self.skipped += 1;
                    continue;
                }
            };

            // County-level placement is mocked as a uniform draw over the
            // region, as the source data carries no coordinates.
            let lat = self.bounds.south + rng.gen::<f64>() * self.bounds.lat_span();
            let lon = self.bounds.west + rng.gen::<f64>() * self.bounds.lon_span();

            return Some(PopulationRecord {
                id,
                lat,
                lon,
                job: raw.job,
                hobbies: raw.hobbies,
            });
        }
    }
}
