use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::seed_string;

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// How loudly the atom validator reports field-level problems.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    #[default]
    Lenient,
    Strict,
}

/// Scalarization weights for the cost vector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CostWeights {
    pub time: f64,
    pub energy: f64,
    pub social: f64,
    pub risk: f64,
    pub moral: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            time: 0.20,
            energy: 0.30,
            social: 0.20,
            risk: 0.20,
            moral: 0.10,
        }
    }
}

impl CostWeights {
    pub fn total(&self) -> f64 {
        self.time + self.energy + self.social + self.risk + self.moral
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecisionConfig {
    /// Gumbel temperature used when the agent carries none.
    pub temperature: f64,
    pub top_k: usize,
    pub risk_penalty: f64,
    pub lookahead_gamma: f64,
    pub lookahead_noise: f64,
    /// Number of ranked candidates the lookahead simulates.
    pub lookahead_width: usize,
    /// Adopt the lookahead winner as the decision instead of the sampled one.
    pub lookahead_choice: bool,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            temperature: 0.35,
            top_k: 4,
            risk_penalty: 0.4,
            lookahead_gamma: 0.5,
            lookahead_noise: 0.05,
            lookahead_width: 4,
            lookahead_choice: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub enable_tom: bool,
    pub enable_lookahead: bool,
    pub validation: ValidationMode,
    pub decision: DecisionConfig,
    pub cost_weights: CostWeights,
    /// Possibilities below this magnitude that are also disabled skip costing.
    pub prune_magnitude: f64,
    pub weapon_access_threshold: f64,
    pub aggression_threshold: f64,
    /// Optional enrichers by name (`proximity`, `hazard`, `lens`, `tom_bias`).
    pub enabled_stages: BTreeMap<String, bool>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_tom: true,
            enable_lookahead: false,
            validation: ValidationMode::Lenient,
            decision: DecisionConfig::default(),
            cost_weights: CostWeights::default(),
            prune_magnitude: 0.08,
            weapon_access_threshold: 0.5,
            aggression_threshold: 0.35,
            enabled_stages: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Enrichers default to on unless explicitly disabled.
    pub fn stage_enabled(&self, name: &str) -> bool {
        self.enabled_stages.get(name).copied().unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub schema_version: String,
    pub run_id: String,
    #[serde(with = "seed_string")]
    pub seed: u64,
    pub ticks: u64,
    pub dt: f64,
    /// Values above 1 evaluate agents of a tick on a rayon pool.
    pub worker_threads: usize,
    pub memory_capacity: usize,
    pub pipeline: PipelineConfig,
    pub notes: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: "run_local_001".to_string(),
            seed: 1337,
            ticks: 24,
            dt: 1.0,
            worker_threads: 1,
            memory_capacity: 64,
            pipeline: PipelineConfig::default(),
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStatus {
    pub schema_version: String,
    pub run_id: String,
    pub current_tick: u64,
    pub max_ticks: u64,
    pub agent_count: usize,
    pub event_count: usize,
}

impl RunStatus {
    pub fn is_complete(&self) -> bool {
        self.current_tick >= self.max_ticks
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "run_id={} tick={}/{} agents={} events={}",
            self.run_id, self.current_tick, self.max_ticks, self.agent_count, self.event_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_run_config_json_fills_defaults() {
        let config: RunConfig = serde_json::from_str(
            r#"{"run_id":"demo","seed":"0x2a","pipeline":{"enable_lookahead":true}}"#,
        )
        .expect("parse");
        assert_eq!(config.run_id, "demo");
        assert_eq!(config.seed, 42);
        assert!(config.pipeline.enable_lookahead);
        assert!(config.pipeline.enable_tom);
        assert_eq!(config.pipeline.decision.top_k, 4);
        assert_eq!(config.memory_capacity, 64);
    }

    #[test]
    fn default_cost_weights_sum_to_one() {
        assert!((CostWeights::default().total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stages_default_to_enabled() {
        let mut config = PipelineConfig::default();
        assert!(config.stage_enabled("lens"));
        config.enabled_stages.insert("lens".to_string(), false);
        assert!(!config.stage_enabled("lens"));
    }
}
