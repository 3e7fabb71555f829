//! Inbound world contracts: the snapshot an agent observes and the per-tick step record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::seed_string;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Underlying relationship facts one agent holds towards another, all in [0, 1].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelationBase {
    #[serde(default)]
    pub closeness: f64,
    #[serde(default)]
    pub loyalty: f64,
    #[serde(default)]
    pub hostility: f64,
    #[serde(default)]
    pub dependency: f64,
    #[serde(default)]
    pub authority: f64,
    /// Free labels such as `friend`, `lover`, `family`, `protected`, `rival`.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RelationBase {
    pub const METRICS: [&'static str; 5] =
        ["closeness", "loyalty", "hostility", "dependency", "authority"];

    pub fn metric(&self, name: &str) -> f64 {
        match name {
            "closeness" => self.closeness,
            "loyalty" => self.loyalty,
            "hostility" => self.hostility,
            "dependency" => self.dependency,
            "authority" => self.authority,
            _ => 0.0,
        }
    }
}

/// Subjective biases in [-1, 1]; 0 is a neutral observer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LensProfile {
    #[serde(default)]
    pub paranoia: f64,
    #[serde(default)]
    pub optimism: f64,
    #[serde(default)]
    pub status_sensitivity: f64,
    #[serde(default)]
    pub intimacy_bias: f64,
}

impl LensProfile {
    pub const TRAITS: [&'static str; 4] =
        ["paranoia", "optimism", "status_sensitivity", "intimacy_bias"];

    pub fn trait_value(&self, name: &str) -> f64 {
        match name {
            "paranoia" => self.paranoia,
            "optimism" => self.optimism,
            "status_sensitivity" => self.status_sensitivity,
            "intimacy_bias" => self.intimacy_bias,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentState {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub location_id: String,
    #[serde(default)]
    pub position: Position,
    /// Opaque body signals (fatigue, pain, hunger, ...) in [0, 1].
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
    #[serde(default)]
    pub relations: BTreeMap<String, RelationBase>,
    /// Access levels keyed by kind (`weapon`, `key`, ...).
    #[serde(default)]
    pub access: BTreeMap<String, f64>,
    #[serde(default)]
    pub lens: LensProfile,
    /// Per-agent sampling temperature; falls back to the pipeline default.
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl AgentState {
    pub fn new(id: impl Into<String>, location_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            location_id: location_id.into(),
            position: Position::default(),
            features: BTreeMap::new(),
            relations: BTreeMap::new(),
            access: BTreeMap::new(),
            lens: LensProfile::default(),
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hazard {
    pub id: String,
    #[serde(default)]
    pub kind: String,
    pub position: Position,
    pub radius: f64,
    pub severity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationState {
    pub id: String,
    /// Recognised keys: danger, cover, escape, publicness, surveillance,
    /// procedural_strict, privacy, scarcity, time_pressure, hierarchy, control.
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
    #[serde(default)]
    pub hazards: Vec<Hazard>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl LocationState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            features: BTreeMap::new(),
            hazards: Vec::new(),
            tags: Vec::new(),
        }
    }
}

/// A world-visible event, appended by the world-application collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldEvent {
    pub id: String,
    pub tick: u64,
    pub kind: String,
    pub actor_id: String,
    #[serde(default)]
    pub target_id: Option<String>,
    pub location_id: String,
    pub magnitude: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Event kinds read as hostile by memory-driven belief bias.
pub const HOSTILE_EVENT_KINDS: [&str; 3] = ["attack", "threaten", "insult"];
/// Event kinds read as supportive by memory-driven belief bias.
pub const SUPPORTIVE_EVENT_KINDS: [&str; 4] = ["help", "comfort", "share_secret", "gift"];

impl WorldEvent {
    pub fn is_hostile(&self) -> bool {
        HOSTILE_EVENT_KINDS.contains(&self.kind.as_str())
    }

    pub fn is_supportive(&self) -> bool {
        SUPPORTIVE_EVENT_KINDS.contains(&self.kind.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorldSnapshot {
    pub tick: u64,
    #[serde(default)]
    pub agents: Vec<AgentState>,
    #[serde(default)]
    pub locations: Vec<LocationState>,
    #[serde(default)]
    pub events: Vec<WorldEvent>,
}

impl WorldSnapshot {
    pub fn agent(&self, agent_id: &str) -> Option<&AgentState> {
        self.agents.iter().find(|agent| agent.id == agent_id)
    }

    pub fn location(&self, location_id: &str) -> Option<&LocationState> {
        self.locations
            .iter()
            .find(|location| location.id == location_id)
    }
}

/// Explicit record of one tick's time, seed and event inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimStep {
    pub t: u64,
    pub dt: f64,
    #[serde(with = "seed_string")]
    pub seed: u64,
    #[serde(default)]
    pub events: Vec<WorldEvent>,
}

impl SimStep {
    pub fn new(t: u64, seed: u64) -> Self {
        Self {
            t,
            dt: 1.0,
            seed,
            events: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_step_round_trips_with_string_seed() {
        let mut step = SimStep::new(4, u64::MAX - 3);
        step.events.push(WorldEvent {
            id: "evt:3:a:0".to_string(),
            tick: 3,
            kind: "attack".to_string(),
            actor_id: "a".to_string(),
            target_id: Some("b".to_string()),
            location_id: "yard".to_string(),
            magnitude: 0.7,
            tags: Vec::new(),
        });
        let encoded = serde_json::to_string(&step).expect("serialize");
        assert!(encoded.contains(&format!("\"{}\"", u64::MAX - 3)));
        let decoded: SimStep = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, step);
        assert!(decoded.events[0].is_hostile());
    }

    #[test]
    fn relation_metric_lookup_is_total() {
        let relation = RelationBase {
            hostility: 0.9,
            closeness: 0.1,
            ..RelationBase::default()
        };
        assert_eq!(relation.metric("hostility"), 0.9);
        assert_eq!(relation.metric("unknown"), 0.0);
    }

    #[test]
    fn partial_agent_json_uses_defaults() {
        let agent: AgentState =
            serde_json::from_str(r#"{"id":"a","location_id":"yard"}"#).expect("parse");
        assert!(agent.relations.is_empty());
        assert_eq!(agent.lens, LensProfile::default());
        assert_eq!(agent.temperature, None);
    }
}
