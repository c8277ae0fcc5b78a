//! Shard coordinator: worker threads, load distribution, tick barrier.
//!
//! Each shard runs on its own thread and owns its agents outright; the only
//! cross-shard traffic is the coordinator's command broadcast and the
//! shard's reply, over std mpsc channels. A tick is a full fan-out/fan-in
//! barrier — the run cannot advance until every shard has answered, and a
//! dead worker aborts the run (no timeout, no partial aggregation).

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use tracing::info;

use crate::population::{outdoor_probability, PopulationRecord};
use crate::shard::{AgentSeed, AgentShard, Protocol, SimStats};
use crate::storm::{LightningStrike, StormCellState};

enum ShardCommand {
    LoadBatch(Vec<AgentSeed>),
    FinalizeInit,
    Tick {
        strikes: Arc<Vec<LightningStrike>>,
        time_scalar: f64,
    },
    Reset,
    Shutdown,
}

enum ShardReply {
    InitDone { population: usize },
    TickDone(SimStats),
    ResetDone,
}

struct ShardWorker {
    command_tx: Sender<ShardCommand>,
    reply_rx: Receiver<ShardReply>,
    handle: Option<JoinHandle<()>>,
}

/// Diurnal activity scaling: a pure function of the tick index over the
/// 288-tick day.
pub fn time_of_day_scalar(tick: u32) -> f64 {
    if (80..=220).contains(&tick) {
        1.0
    } else if tick > 60 && tick < 80 {
        0.5
    } else if tick > 220 && tick < 260 {
        0.4
    } else {
        0.1
    }
}

/// Default worker count: leave one core for the coordinator, never fewer
/// than two shards.
pub fn default_shard_count() -> usize {
    let cores = thread::available_parallelism().map(|p| p.get()).unwrap_or(1);
    cores.saturating_sub(1).max(2)
}

pub struct ShardCoordinator {
    workers: Vec<ShardWorker>,
    chunk_size: usize,
    next_worker: usize,
    pending: Vec<AgentSeed>,
    loaded: u64,
}

impl ShardCoordinator {
    pub fn new(shard_count: usize, grid_cell_deg: f64, chunk_size: usize) -> Result<Self> {
        assert!(shard_count >= 1, "at least one shard required");
        assert!(chunk_size >= 1, "chunk size must be positive");

        let mut workers = Vec::with_capacity(shard_count);
        for i in 0..shard_count {
            let (command_tx, command_rx) = mpsc::channel::<ShardCommand>();
            let (reply_tx, reply_rx) = mpsc::channel::<ShardReply>();
            let handle = thread::Builder::new()
                .name(format!("lsbam-shard-{i}"))
                .spawn(move || shard_worker_loop(grid_cell_deg, &command_rx, &reply_tx))
                .map_err(|err| anyhow!("failed to spawn shard worker {i}: {err}"))?;
            workers.push(ShardWorker {
                command_tx,
                reply_rx,
                handle: Some(handle),
            });
        }

        info!(shards = shard_count, "shard workers ready");
        Ok(Self {
            workers,
            chunk_size,
            next_worker: 0,
            pending: Vec::with_capacity(chunk_size),
            loaded: 0,
        })
    }

    pub fn shard_count(&self) -> usize {
        self.workers.len()
    }

    pub fn population(&self) -> u64 {
        self.loaded
    }

    /// Consume the population stream: derive each record's outdoor
    /// probability, alternate protocols A/B by input index, and distribute
    /// round-robin batches across the shards. Blocks until every shard has
    /// acknowledged `finalize_init`.
    pub fn load_population<I>(&mut self, records: I) -> Result<u64>
    where
        I: IntoIterator<Item = PopulationRecord>,
    {
        for record in records {
            let protocol = if self.loaded % 2 == 0 {
                Protocol::A
            } else {
                Protocol::B
            };
            self.pending.push(AgentSeed {
                id: record.id,
                lat: record.lat,
                lon: record.lon,
                outdoor_prob: outdoor_probability(&record.job, &record.hobbies),
                protocol,
            });
            self.loaded += 1;

            if self.pending.len() >= self.chunk_size {
                self.flush_batch()?;
            }
        }
        if !self.pending.is_empty() {
            self.flush_batch()?;
        }

        for (i, worker) in self.workers.iter().enumerate() {
            worker
                .command_tx
                .send(ShardCommand::FinalizeInit)
                .map_err(|_| anyhow!("shard {i} disconnected during finalize"))?;
        }
        let mut distributed = 0usize;
        for (i, worker) in self.workers.iter().enumerate() {
            match worker.reply_rx.recv() {
                Ok(ShardReply::InitDone { population }) => distributed += population,
                Ok(_) => return Err(anyhow!("shard {i} sent an unexpected init reply")),
                Err(_) => return Err(anyhow!("shard {i} disconnected during finalize")),
            }
        }
        debug_assert_eq!(distributed as u64, self.loaded);

        info!(
            agents = self.loaded,
            shards = self.workers.len(),
            "population distributed"
        );
        Ok(self.loaded)
    }

    fn flush_batch(&mut self) -> Result<()> {
        let batch = std::mem::replace(&mut self.pending, Vec::with_capacity(self.chunk_size));
        let target = self.next_worker;
        self.next_worker = (self.next_worker + 1) % self.workers.len();
        self.workers[target]
            .command_tx
            .send(ShardCommand::LoadBatch(batch))
            .map_err(|_| anyhow!("shard {target} disconnected during load"))
    }

    /// Broadcast one tick to every shard and block until all reply, then
    /// sum the per-protocol counters. Cells ride along in the contract but
    /// no shard rule consumes them today; only strikes are shipped.
    pub fn tick(
        &mut self,
        _cells: &[StormCellState],
        lightning: &[LightningStrike],
        tick_index: u32,
    ) -> Result<SimStats> {
        let time_scalar = time_of_day_scalar(tick_index);
        let strikes = Arc::new(lightning.to_vec());

        for (i, worker) in self.workers.iter().enumerate() {
            worker
                .command_tx
                .send(ShardCommand::Tick {
                    strikes: Arc::clone(&strikes),
                    time_scalar,
                })
                .map_err(|_| anyhow!("shard {i} disconnected during tick"))?;
        }

        let mut merged = SimStats::default();
        for (i, worker) in self.workers.iter().enumerate() {
            match worker.reply_rx.recv() {
                Ok(ShardReply::TickDone(stats)) => merged.merge(&stats),
                Ok(_) => return Err(anyhow!("shard {i} sent an unexpected tick reply")),
                Err(_) => return Err(anyhow!("shard {i} disconnected during tick")),
            }
        }
        Ok(merged)
    }

    /// All-shard reset barrier: clears struck flags and timers, keeps the
    /// loaded population in place.
    pub fn reset(&mut self) -> Result<()> {
        for (i, worker) in self.workers.iter().enumerate() {
            worker
                .command_tx
                .send(ShardCommand::Reset)
                .map_err(|_| anyhow!("shard {i} disconnected during reset"))?;
        }
        for (i, worker) in self.workers.iter().enumerate() {
            match worker.reply_rx.recv() {
                Ok(ShardReply::ResetDone) => {}
                Ok(_) => return Err(anyhow!("shard {i} sent an unexpected reset reply")),
                Err(_) => return Err(anyhow!("shard {i} disconnected during reset")),
            }
        }
        Ok(())
    }
}

impl Drop for ShardCoordinator {
    fn drop(&mut self) {
        for worker in &self.workers {
            let _ = worker.command_tx.send(ShardCommand::Shutdown);
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

fn shard_worker_loop(
    grid_cell_deg: f64,
    command_rx: &Receiver<ShardCommand>,
    reply_tx: &Sender<ShardReply>,
) {
    let mut shard = AgentShard::new(grid_cell_deg);
    while let Ok(command) = command_rx.recv() {
        match command {
            ShardCommand::LoadBatch(batch) => shard.load_batch(batch),
            ShardCommand::FinalizeInit => {
                shard.finalize_init();
                let _ = reply_tx.send(ShardReply::InitDone {
                    population: shard.population(),
                });
            }
            ShardCommand::Tick {
                strikes,
                time_scalar,
            } => {
                let stats = shard.process_tick(&strikes, time_scalar);
                let _ = reply_tx.send(ShardReply::TickDone(stats));
            }
            ShardCommand::Reset => {
                shard.reset();
                let _ = reply_tx.send(ShardReply::ResetDone);
            }
            ShardCommand::Shutdown => break,
        }
    }
}
