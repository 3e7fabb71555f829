//! In-process facade over the lab world with SQLite persistence of steps,
//! events and decisions.

mod persistence;
pub mod scenario;

use std::path::Path;

use contracts::{ContextAtom, PipelineRun, RunConfig, RunStatus, SimStep, WorldEvent, WorldSnapshot};
use lab_core::{DecisionRecord, LabWorld, PipelineError, PossibilityRule, RunInterrupted};
use persistence::SqliteRunStore;
pub use persistence::{PersistedRunSummary, PersistenceError, ReplaySlice};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum LabApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("agent `{0}` is not part of the run")]
    UnknownAgent(String),
}

#[derive(Debug)]
struct PersistenceState {
    store: SqliteRunStore,
    persisted_step_count: usize,
    persisted_event_count: usize,
    persisted_decision_count: usize,
}

#[derive(Debug)]
pub struct LabApi {
    world: LabWorld,
    step_log: Vec<SimStep>,
    decision_log: Vec<DecisionRecord>,
    persistence: Option<PersistenceState>,
    last_persistence_error: Option<String>,
}

impl LabApi {
    pub fn new(config: RunConfig, snapshot: WorldSnapshot) -> Self {
        Self {
            world: LabWorld::new(config, snapshot),
            step_log: Vec::new(),
            decision_log: Vec::new(),
            persistence: None,
            last_persistence_error: None,
        }
    }

    /// The built-in demo scenario under `config`.
    pub fn demo(config: RunConfig) -> Self {
        Self::new(config, scenario::demo_world())
    }

    pub fn attach_sqlite_store(&mut self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        self.attach(SqliteRunStore::open(path)?);
        Ok(())
    }

    pub fn attach_in_memory_store(&mut self) -> Result<(), PersistenceError> {
        self.attach(SqliteRunStore::open_in_memory()?);
        Ok(())
    }

    fn attach(&mut self, store: SqliteRunStore) {
        self.persistence = Some(PersistenceState {
            store,
            persisted_step_count: 0,
            persisted_event_count: 0,
            persisted_decision_count: 0,
        });
    }

    pub fn initialize_run_storage(
        &mut self,
        replace_existing_run: bool,
    ) -> Result<(), PersistenceError> {
        let Some(state) = self.persistence.as_mut() else {
            return Err(PersistenceError::NotAttached);
        };

        let run_id = self.world.run_id().to_string();
        if state.store.run_exists(&run_id)? {
            if replace_existing_run {
                state.store.delete_run(&run_id)?;
                state.persisted_step_count = 0;
                state.persisted_event_count = 0;
                state.persisted_decision_count = 0;
            } else {
                return Err(PersistenceError::RunAlreadyExists(run_id));
            }
        }

        state
            .store
            .persist_delta(self.world.config(), &self.world.status(), &[], &[], &[])?;
        self.last_persistence_error = None;
        Ok(())
    }

    pub fn flush_persistence_checked(&mut self) -> Result<(), PersistenceError> {
        let Some(state) = self.persistence.as_mut() else {
            return Err(PersistenceError::NotAttached);
        };

        let new_steps = &self.step_log[state.persisted_step_count..];
        let new_events: Vec<(u64, WorldEvent)> = self.world.events()
            [state.persisted_event_count..]
            .iter()
            .enumerate()
            .map(|(offset, event)| ((state.persisted_event_count + offset) as u64, event.clone()))
            .collect();
        let new_decisions = &self.decision_log[state.persisted_decision_count..];

        state.store.persist_delta(
            self.world.config(),
            &self.world.status(),
            new_steps,
            &new_events,
            new_decisions,
        )?;

        state.persisted_step_count = self.step_log.len();
        state.persisted_event_count = self.world.events().len();
        state.persisted_decision_count = self.decision_log.len();
        self.last_persistence_error = None;
        Ok(())
    }

    pub fn replay_at_tick(&self, run_id: &str, tick: u64) -> Result<ReplaySlice, PersistenceError> {
        let Some(state) = self.persistence.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };

        state.store.load_replay_at_tick(run_id, tick)
    }

    pub fn load_decisions(
        &self,
        run_id: &str,
        agent_id: Option<&str>,
        from_tick: u64,
        to_tick: u64,
    ) -> Result<Vec<DecisionRecord>, PersistenceError> {
        let Some(state) = self.persistence.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };

        state
            .store
            .load_decisions(run_id, agent_id, from_tick, to_tick)
    }

    pub fn list_runs(&self) -> Result<Vec<PersistedRunSummary>, PersistenceError> {
        let Some(state) = self.persistence.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };

        state.store.list_runs()
    }

    pub fn last_persistence_error(&self) -> Option<&str> {
        self.last_persistence_error.as_deref()
    }

    pub fn run_id(&self) -> &str {
        self.world.run_id()
    }

    pub fn config(&self) -> &RunConfig {
        self.world.config()
    }

    /// Advance up to `steps` ticks and return how many were committed.
    ///
    /// Ticks committed before a pipeline error are still logged and flushed,
    /// so the step and decision logs always match the world's event log.
    pub fn step(&mut self, steps: u64) -> Result<(RunStatus, u64), LabApiError> {
        let (reports, interrupted) = match self.world.run(steps.max(1)) {
            Ok(reports) => (reports, None),
            Err(RunInterrupted {
                committed, error, ..
            }) => (committed, Some(error)),
        };
        let committed = reports.len() as u64;
        for report in reports {
            self.step_log.push(report.step);
            self.decision_log.extend(report.decisions);
        }
        self.flush_persistence_if_enabled();
        if let Some(error) = interrupted {
            return Err(error.into());
        }
        Ok((self.world.status(), committed))
    }

    /// Run until the configured tick count is reached.
    pub fn run_to_end(&mut self) -> Result<(RunStatus, u64), LabApiError> {
        let remaining = self
            .world
            .config()
            .ticks
            .saturating_sub(self.world.current_tick());
        if remaining == 0 {
            return Ok((self.world.status(), 0));
        }
        self.step(remaining)
    }

    pub fn set_override(&mut self, agent_id: &str, atom: ContextAtom) -> Result<(), LabApiError> {
        if self.world.snapshot().agent(agent_id).is_none() {
            return Err(LabApiError::UnknownAgent(agent_id.to_string()));
        }
        self.world.set_override(agent_id, atom);
        Ok(())
    }

    pub fn clear_overrides(&mut self, agent_id: &str) {
        self.world.clear_overrides(agent_id);
    }

    pub fn register_rule(&mut self, rule: Box<dyn PossibilityRule>) {
        self.world.register_rule(rule);
    }

    pub fn status(&self) -> RunStatus {
        self.world.status()
    }

    pub fn events(&self) -> &[WorldEvent] {
        self.world.events()
    }

    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.decision_log
    }

    pub fn steps(&self) -> &[SimStep] {
        &self.step_log
    }

    pub fn explain(&self, agent_id: &str) -> Option<&PipelineRun> {
        self.world.explain(agent_id)
    }

    /// Expose the underlying world for direct inspection.
    pub fn lab_world(&self) -> &LabWorld {
        &self.world
    }

    fn flush_persistence_if_enabled(&mut self) {
        if self.persistence.is_none() {
            return;
        }

        if let Err(err) = self.flush_persistence_checked() {
            warn!(run_id = %self.world.run_id(), error = %err, "persistence flush failed");
            self.last_persistence_error = Some(err.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::AtomBuilder;

    fn test_config() -> RunConfig {
        RunConfig {
            run_id: "api_test".to_string(),
            ticks: 6,
            ..RunConfig::default()
        }
    }

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();

        std::env::temp_dir().join(format!("goal_lab_{name}_{nanos}.sqlite"))
    }

    #[test]
    fn step_returns_committed_count() {
        let mut api = LabApi::demo(test_config());
        let (status, committed) = api.step(3).expect("step");
        assert_eq!(committed, 3);
        assert_eq!(status.current_tick, 3);
        assert_eq!(api.steps().len(), 3);
        assert_eq!(api.decisions().len(), 3 * 4);

        let (status, committed) = api.run_to_end().expect("run");
        assert_eq!(committed, 3);
        assert!(status.is_complete());
        assert_eq!(api.step(1).expect("step").1, 0);
    }

    #[test]
    fn overrides_require_a_known_agent() {
        let mut api = LabApi::demo(test_config());
        let atom = AtomBuilder::world("ctx:danger")
            .magnitude(0.9)
            .build()
            .expect("atom");
        assert!(api.set_override("mira", atom.clone()).is_ok());
        let err = api.set_override("nobody", atom).expect_err("unknown");
        assert!(matches!(err, LabApiError::UnknownAgent(_)));
    }

    #[test]
    fn flush_without_store_is_an_error() {
        let mut api = LabApi::demo(test_config());
        assert!(matches!(
            api.flush_persistence_checked(),
            Err(PersistenceError::NotAttached)
        ));
    }

    #[test]
    fn in_memory_store_replays_each_tick() {
        let mut api = LabApi::demo(test_config());
        api.attach_in_memory_store().expect("attach");
        api.initialize_run_storage(false).expect("init");
        api.step(2).expect("step");
        assert!(api.last_persistence_error().is_none());

        let replay = api.replay_at_tick("api_test", 2).expect("replay");
        assert_eq!(replay.step.as_ref().map(|step| step.t), Some(2));
        assert_eq!(replay.decisions.len(), 4);
        let expected: Vec<&str> = api
            .events()
            .iter()
            .filter(|event| event.tick == 2)
            .map(|event| event.id.as_str())
            .collect();
        let replayed: Vec<&str> = replay.events.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(replayed, expected);
        let runs = api.list_runs().expect("runs");
        assert_eq!(runs[0].status.current_tick, 2);
    }

    #[test]
    fn failed_tick_keeps_logs_in_step_with_the_store() {
        let mut api = LabApi::demo(test_config());
        api.attach_in_memory_store().expect("attach");
        api.initialize_run_storage(false).expect("init");
        api.step(2).expect("step");
        let events_before = api.events().len();

        let mut malformed = AtomBuilder::world("ctx:danger")
            .magnitude(0.9)
            .build()
            .expect("atom");
        malformed.id = "weather:storm".to_string();
        api.set_override("mira", malformed).expect("known agent");
        let err = api.step(3).expect_err("malformed override");
        assert!(matches!(err, LabApiError::Pipeline(_)));

        assert_eq!(api.status().current_tick, 2);
        assert_eq!(api.steps().len(), 2);
        assert_eq!(api.decisions().len(), 2 * 4);
        assert_eq!(api.events().len(), events_before);
        let replay = api.replay_at_tick("api_test", 3).expect("replay");
        assert!(replay.step.is_none());
        assert!(replay.decisions.is_empty());

        api.clear_overrides("mira");
        let (status, committed) = api.step(1).expect("recovered");
        assert_eq!(committed, 1);
        assert_eq!(status.current_tick, 3);
        let replay = api.replay_at_tick("api_test", 3).expect("replay");
        assert_eq!(replay.step.as_ref().map(|step| step.t), Some(3));
        assert_eq!(replay.decisions.len(), 4);
    }

    #[test]
    fn persists_and_replays_by_tick() {
        let config = test_config();
        let run_id = config.run_id.clone();

        let mut api = LabApi::demo(config.clone());
        let db_path = temp_db_path("replay");

        api.attach_sqlite_store(&db_path)
            .expect("should attach sqlite store");
        api.initialize_run_storage(true)
            .expect("should initialize run");
        api.run_to_end().expect("run");
        api.flush_persistence_checked()
            .expect("flush should succeed");

        let mut second = LabApi::demo(config);
        second
            .attach_sqlite_store(&db_path)
            .expect("should attach sqlite store");
        assert!(matches!(
            second.initialize_run_storage(false),
            Err(PersistenceError::RunAlreadyExists(_))
        ));

        let decisions = second
            .load_decisions(&run_id, Some("mira"), 1, 6)
            .expect("decisions");
        assert_eq!(decisions.len(), 6);
        let chosen = |records: &[DecisionRecord]| {
            records
                .iter()
                .filter(|record| record.agent_id == "mira")
                .map(|record| (record.tick, record.chosen.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(chosen(&decisions), chosen(api.decisions()));

        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("sqlite-shm"));
    }
}
