use std::collections::BTreeMap;

use contracts::{ActionIntent, ContextAtom, PipelineRun, SimStep, StageId};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::*;
use crate::apply::WorldApplier;
use crate::pipeline::{run_pipeline, PipelineError, PipelineInput};

impl LabWorld {
    /// Advance one tick. Returns `None` once the configured tick count is reached.
    /// On error nothing of the tick is committed and the world stays where it was.
    pub fn step(&mut self) -> Result<Option<TickReport>, PipelineError> {
        if self.status().is_complete() {
            return Ok(None);
        }
        let tick = self.snapshot.tick.saturating_add(1);
        let mut step = SimStep::new(tick, self.config.seed);
        step.dt = self.config.dt;
        step.events = self.applier.events_at(tick - 1).cloned().collect();
        let previous_events = std::mem::replace(&mut self.snapshot.events, step.events.clone());
        self.snapshot.tick = tick;

        let evaluated = self
            .memory_atoms()
            .and_then(|memory_atoms| self.evaluate_agents(&step, &memory_atoms));
        let runs = match evaluated {
            Ok(runs) => runs,
            Err(err) => {
                self.snapshot.tick = tick - 1;
                self.snapshot.events = previous_events;
                warn!(run_id = %self.config.run_id, tick, error = %err, "tick abandoned");
                return Err(err);
            }
        };

        let mut events = Vec::new();
        let mut decisions = Vec::with_capacity(runs.len());
        for run in runs {
            decisions.push(DecisionRecord::from_run(&run));
            if let Some(event) = self.commit(&run, tick) {
                events.push(event);
            }
            self.last_runs.insert(run.agent_id.clone(), run);
        }
        self.update_memories(&events, tick);

        info!(
            run_id = %self.config.run_id,
            tick,
            agents = decisions.len(),
            events = events.len(),
            failures = decisions.iter().filter(|d| d.failure.is_some()).count(),
            "tick committed"
        );
        Ok(Some(TickReport {
            step,
            events,
            decisions,
        }))
    }

    /// Step up to `ticks` times; stops early when the run is complete.
    pub fn run(&mut self, ticks: u64) -> Result<Vec<TickReport>, RunInterrupted> {
        let mut reports = Vec::new();
        for _ in 0..ticks {
            match self.step() {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => break,
                Err(error) => {
                    return Err(RunInterrupted {
                        failed_tick: self.snapshot.tick.saturating_add(1),
                        committed: reports,
                        error,
                    })
                }
            }
        }
        Ok(reports)
    }

    fn memory_atoms(&self) -> Result<BTreeMap<String, Vec<ContextAtom>>, PipelineError> {
        self.memories
            .iter()
            .map(|(agent_id, memory)| {
                memory
                    .atoms()
                    .map(|atoms| (agent_id.clone(), atoms))
                    .map_err(|source| PipelineError::Stage {
                        stage: StageId::S0,
                        source,
                    })
            })
            .collect()
    }

    fn evaluate_agents(
        &self,
        step: &SimStep,
        memory_atoms: &BTreeMap<String, Vec<ContextAtom>>,
    ) -> Result<Vec<PipelineRun>, PipelineError> {
        let workloads: Vec<&str> = self
            .snapshot
            .agents
            .iter()
            .map(|agent| agent.id.as_str())
            .collect();

        let mut runs = match &self.pool {
            Some(pool) if workloads.len() > 1 => pool.install(|| {
                workloads
                    .into_par_iter()
                    .map(|agent_id| self.evaluate_single_agent(agent_id, step, memory_atoms))
                    .collect::<Result<Vec<_>, _>>()
            })?,
            _ => workloads
                .into_iter()
                .map(|agent_id| self.evaluate_single_agent(agent_id, step, memory_atoms))
                .collect::<Result<Vec<_>, _>>()?,
        };

        runs.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(runs)
    }

    fn evaluate_single_agent(
        &self,
        agent_id: &str,
        step: &SimStep,
        memory_atoms: &BTreeMap<String, Vec<ContextAtom>>,
    ) -> Result<PipelineRun, PipelineError> {
        let input = PipelineInput {
            agent_id,
            world: &self.snapshot,
            memory_atoms: memory_atoms.get(agent_id).map(Vec::as_slice).unwrap_or(&[]),
            overrides: self.overrides(agent_id),
            step,
            catalog: &self.catalog,
        };
        run_pipeline(&input, &self.config.pipeline)
    }

    fn commit(&mut self, run: &PipelineRun, tick: u64) -> Option<WorldEvent> {
        let location_id = self.snapshot.agent(&run.agent_id)?.location_id.clone();
        let intent = ActionIntent::from_decision(run.decision.as_ref()?, &location_id, tick)?;
        let event = self.applier.apply(&intent);
        debug!(agent = %run.agent_id, tick, event = %event.id, kind = %event.kind, "action applied");
        Some(event)
    }

    fn update_memories(&mut self, events: &[WorldEvent], tick: u64) {
        for agent in &self.snapshot.agents {
            if let Some(memory) = self.memories.get_mut(&agent.id) {
                memory.decay(tick);
                memory.record_events(events, &agent.location_id, tick);
            }
        }
    }
}
