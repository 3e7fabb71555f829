//! Multi-agent world driver: every agent runs the pipeline once per tick,
//! chosen actions are committed through the applier, and belief memory
//! carries what happened into the next tick.

use std::collections::BTreeMap;

use contracts::{
    ContextAtom, DecisionReport, PipelineRun, RunConfig, RunStatus, SimStep, StageFailure,
    WorldEvent, WorldSnapshot, SCHEMA_VERSION_V1,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::apply::EventLogApplier;
use crate::memory::BeliefMemory;
use crate::pipeline::PipelineError;
use crate::possibility::{PossibilityCatalog, PossibilityRule};

mod step;

#[cfg(test)]
mod tests;

/// Outcome of one agent's pipeline run, as committed by the driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    pub agent_id: String,
    pub tick: u64,
    pub chosen: Option<String>,
    pub report: Option<DecisionReport>,
    pub failure: Option<StageFailure>,
}

impl DecisionRecord {
    fn from_run(run: &PipelineRun) -> Self {
        Self {
            agent_id: run.agent_id.clone(),
            tick: run.tick,
            chosen: run
                .decision
                .as_ref()
                .and_then(|report| report.best_id().map(str::to_string)),
            report: run.decision.clone(),
            failure: run.failure.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickReport {
    pub step: SimStep,
    pub events: Vec<WorldEvent>,
    pub decisions: Vec<DecisionRecord>,
}

/// A multi-tick run that hit a pipeline error. Ticks before the failing one
/// stay committed, and their reports travel with the error.
#[derive(Debug, Error)]
#[error("run stopped at tick {failed_tick} after {} committed ticks", .committed.len())]
pub struct RunInterrupted {
    pub committed: Vec<TickReport>,
    pub failed_tick: u64,
    #[source]
    pub error: PipelineError,
}

impl TickReport {
    pub fn failures(&self) -> usize {
        self.decisions
            .iter()
            .filter(|record| record.failure.is_some())
            .count()
    }
}

pub struct LabWorld {
    config: RunConfig,
    snapshot: WorldSnapshot,
    memories: BTreeMap<String, BeliefMemory>,
    overrides: BTreeMap<String, Vec<ContextAtom>>,
    catalog: PossibilityCatalog,
    worker_threads: usize,
    pool: Option<rayon::ThreadPool>,
    applier: EventLogApplier,
    last_runs: BTreeMap<String, PipelineRun>,
}

impl LabWorld {
    pub fn new(config: RunConfig, snapshot: WorldSnapshot) -> Self {
        let memories = snapshot
            .agents
            .iter()
            .map(|agent| {
                (
                    agent.id.clone(),
                    BeliefMemory::new(agent.id.clone(), config.memory_capacity),
                )
            })
            .collect();
        let worker_threads = config.worker_threads.max(1);
        let pool = if worker_threads > 1 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(worker_threads)
                .build()
                .ok()
        } else {
            None
        };
        Self {
            config,
            snapshot,
            memories,
            overrides: BTreeMap::new(),
            catalog: PossibilityCatalog::default_catalog(),
            worker_threads,
            pool,
            applier: EventLogApplier::new(),
            last_runs: BTreeMap::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.config.run_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn snapshot(&self) -> &WorldSnapshot {
        &self.snapshot
    }

    pub fn current_tick(&self) -> u64 {
        self.snapshot.tick
    }

    pub fn events(&self) -> &[WorldEvent] {
        &self.applier.events
    }

    pub fn memory(&self, agent_id: &str) -> Option<&BeliefMemory> {
        self.memories.get(agent_id)
    }

    pub fn status(&self) -> RunStatus {
        RunStatus {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: self.config.run_id.clone(),
            current_tick: self.snapshot.tick,
            max_ticks: self.config.ticks,
            agent_count: self.snapshot.agents.len(),
            event_count: self.applier.events.len(),
        }
    }

    /// Last pipeline run of `agent_id`, with every stage frame.
    pub fn explain(&self, agent_id: &str) -> Option<&PipelineRun> {
        self.last_runs.get(agent_id)
    }

    /// Pin `atom` for every later run of `agent_id`. An override with the
    /// same id replaces the earlier one.
    pub fn set_override(&mut self, agent_id: &str, atom: ContextAtom) {
        let pinned = self.overrides.entry(agent_id.to_string()).or_default();
        pinned.retain(|existing| existing.id != atom.id);
        pinned.push(atom);
    }

    pub fn clear_overrides(&mut self, agent_id: &str) {
        self.overrides.remove(agent_id);
    }

    pub fn overrides(&self, agent_id: &str) -> &[ContextAtom] {
        self.overrides
            .get(agent_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn register_rule(&mut self, rule: Box<dyn PossibilityRule>) {
        self.catalog.register(rule);
    }
}

impl std::fmt::Debug for LabWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabWorld")
            .field("run_id", &self.config.run_id)
            .field("tick", &self.snapshot.tick)
            .field("agents", &self.snapshot.agents.len())
            .field("events", &self.applier.events.len())
            .field("worker_threads", &self.worker_threads)
            .finish()
    }
}
