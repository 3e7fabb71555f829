use std::path::Path;

use contracts::{RunConfig, RunStatus, SimStep, WorldEvent};
use lab_core::DecisionRecord;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRunSummary {
    pub run_id: String,
    pub seed: String,
    pub status: RunStatus,
}

/// Everything recorded for one tick.
#[derive(Debug, Clone, Default)]
pub struct ReplaySlice {
    pub step: Option<SimStep>,
    pub events: Vec<WorldEvent>,
    pub decisions: Vec<DecisionRecord>,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("sqlite store is not attached")]
    NotAttached,
    #[error("run `{0}` already exists")]
    RunAlreadyExists(String),
}

#[derive(Debug)]
pub struct SqliteRunStore {
    conn: Connection,
}

impl SqliteRunStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Write the run row plus any new steps, events and decisions. Rows that
    /// already exist are left alone, so re-sending a delta is harmless.
    pub fn persist_delta(
        &mut self,
        config: &RunConfig,
        status: &RunStatus,
        steps: &[SimStep],
        events: &[(u64, WorldEvent)],
        decisions: &[DecisionRecord],
    ) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;

        upsert_run(&tx, config, status)?;

        for step in steps {
            let payload_json = serde_json::to_string(step)?;
            tx.execute(
                "INSERT OR IGNORE INTO sim_steps (run_id, tick, seed, payload_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    config.run_id.as_str(),
                    to_sql_tick(step.t),
                    step.seed.to_string(),
                    payload_json,
                ],
            )?;
        }

        for (sequence, event) in events {
            let payload_json = serde_json::to_string(event)?;
            tx.execute(
                "INSERT OR IGNORE INTO events (
                    run_id,
                    event_id,
                    sequence,
                    tick,
                    actor_id,
                    kind,
                    payload_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    config.run_id.as_str(),
                    event.id.as_str(),
                    to_sql_tick(*sequence),
                    to_sql_tick(event.tick),
                    event.actor_id.as_str(),
                    event.kind.as_str(),
                    payload_json,
                ],
            )?;
        }

        for record in decisions {
            let payload_json = serde_json::to_string(record)?;
            tx.execute(
                "INSERT OR IGNORE INTO decisions (
                    run_id,
                    tick,
                    agent_id,
                    chosen,
                    failed,
                    payload_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    config.run_id.as_str(),
                    to_sql_tick(record.tick),
                    record.agent_id.as_str(),
                    record.chosen.as_deref(),
                    if record.failure.is_some() { 1_i64 } else { 0_i64 },
                    payload_json,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn run_exists(&self, run_id: &str) -> Result<bool, PersistenceError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn delete_run(&mut self, run_id: &str) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;
        for table in ["decisions", "events", "sim_steps", "runs"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE run_id = ?1"),
                params![run_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_runs(&self) -> Result<Vec<PersistedRunSummary>, PersistenceError> {
        let mut stmt = self
            .conn
            .prepare("SELECT run_id, seed, status_json FROM runs ORDER BY run_id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (run_id, seed, status_json) = row?;
            runs.push(PersistedRunSummary {
                run_id,
                seed,
                status: serde_json::from_str(&status_json)?,
            });
        }
        Ok(runs)
    }

    pub fn load_run_config(&self, run_id: &str) -> Result<Option<RunConfig>, PersistenceError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT config_json FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(raw) => Ok(Some(serde_json::from_str::<RunConfig>(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn load_step(&self, run_id: &str, tick: u64) -> Result<Option<SimStep>, PersistenceError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload_json FROM sim_steps WHERE run_id = ?1 AND tick = ?2",
                params![run_id, to_sql_tick(tick)],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(raw) => Ok(Some(serde_json::from_str::<SimStep>(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn load_events_range(
        &self,
        run_id: &str,
        from_tick: u64,
        to_tick: u64,
    ) -> Result<Vec<WorldEvent>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload_json
             FROM events
             WHERE run_id = ?1 AND tick >= ?2 AND tick <= ?3
             ORDER BY sequence ASC",
        )?;

        let rows = stmt.query_map(
            params![run_id, to_sql_tick(from_tick), to_sql_tick(to_tick)],
            |row| row.get::<_, String>(0),
        )?;

        let mut events = Vec::new();
        for row in rows {
            let payload = row?;
            events.push(serde_json::from_str::<WorldEvent>(&payload)?);
        }

        Ok(events)
    }

    /// Decisions in `[from_tick, to_tick]`, optionally for one agent.
    pub fn load_decisions(
        &self,
        run_id: &str,
        agent_id: Option<&str>,
        from_tick: u64,
        to_tick: u64,
    ) -> Result<Vec<DecisionRecord>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload_json
             FROM decisions
             WHERE run_id = ?1 AND tick >= ?2 AND tick <= ?3
               AND (?4 IS NULL OR agent_id = ?4)
             ORDER BY tick ASC, agent_id ASC",
        )?;

        let rows = stmt.query_map(
            params![run_id, to_sql_tick(from_tick), to_sql_tick(to_tick), agent_id],
            |row| row.get::<_, String>(0),
        )?;

        let mut decisions = Vec::new();
        for row in rows {
            let payload = row?;
            decisions.push(serde_json::from_str::<DecisionRecord>(&payload)?);
        }

        Ok(decisions)
    }

    pub fn load_replay_at_tick(
        &self,
        run_id: &str,
        tick: u64,
    ) -> Result<ReplaySlice, PersistenceError> {
        Ok(ReplaySlice {
            step: self.load_step(run_id, tick)?,
            events: self.load_events_range(run_id, tick, tick)?,
            decisions: self.load_decisions(run_id, None, tick, tick)?,
        })
    }

    fn configure(&mut self) -> Result<(), PersistenceError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                schema_version TEXT NOT NULL,
                config_json TEXT NOT NULL,
                status_json TEXT NOT NULL,
                seed TEXT NOT NULL,
                ticks INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sim_steps (
                run_id TEXT NOT NULL,
                tick INTEGER NOT NULL,
                seed TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (run_id, tick)
            );

            CREATE TABLE IF NOT EXISTS events (
                run_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                tick INTEGER NOT NULL,
                actor_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (run_id, event_id),
                UNIQUE (run_id, sequence)
            );

            CREATE TABLE IF NOT EXISTS decisions (
                run_id TEXT NOT NULL,
                tick INTEGER NOT NULL,
                agent_id TEXT NOT NULL,
                chosen TEXT,
                failed INTEGER NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (run_id, tick, agent_id)
            );

            CREATE INDEX IF NOT EXISTS idx_events_run_tick ON events(run_id, tick);
            CREATE INDEX IF NOT EXISTS idx_events_run_kind_tick ON events(run_id, kind, tick);
            CREATE INDEX IF NOT EXISTS idx_decisions_run_agent_tick ON decisions(run_id, agent_id, tick);
            ",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at)
             VALUES(1, 'initial_v1', 'tick-000000')",
            [],
        )?;

        Ok(())
    }
}

fn upsert_run(
    tx: &rusqlite::Transaction<'_>,
    config: &RunConfig,
    status: &RunStatus,
) -> Result<(), PersistenceError> {
    let config_json = serde_json::to_string(config)?;
    let status_json = serde_json::to_string(status)?;

    tx.execute(
        "INSERT INTO runs (
            run_id,
            schema_version,
            config_json,
            status_json,
            seed,
            ticks,
            created_at,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(run_id) DO UPDATE SET
            schema_version = excluded.schema_version,
            config_json = excluded.config_json,
            status_json = excluded.status_json,
            seed = excluded.seed,
            ticks = excluded.ticks,
            updated_at = excluded.updated_at",
        params![
            config.run_id.as_str(),
            config.schema_version.as_str(),
            config_json,
            status_json,
            config.seed.to_string(),
            to_sql_tick(config.ticks),
            "tick-000000",
            tick_stamp(status.current_tick),
        ],
    )?;

    Ok(())
}

fn to_sql_tick(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn tick_stamp(tick: u64) -> String {
    format!("tick-{tick:06}")
}
