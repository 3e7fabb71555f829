//! Action-layer contracts: possibilities, candidates, costs, and decision reports.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::atom::ContextAtom;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PossibilityKind {
    Hide,
    Escape,
    Rest,
    Wait,
    Observe,
    Talk,
    Help,
    Comfort,
    ShareSecret,
    Avoid,
    Attack,
}

impl PossibilityKind {
    pub const ALL: [PossibilityKind; 11] = [
        PossibilityKind::Hide,
        PossibilityKind::Escape,
        PossibilityKind::Rest,
        PossibilityKind::Wait,
        PossibilityKind::Observe,
        PossibilityKind::Talk,
        PossibilityKind::Help,
        PossibilityKind::Comfort,
        PossibilityKind::ShareSecret,
        PossibilityKind::Avoid,
        PossibilityKind::Attack,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PossibilityKind::Hide => "hide",
            PossibilityKind::Escape => "escape",
            PossibilityKind::Rest => "rest",
            PossibilityKind::Wait => "wait",
            PossibilityKind::Observe => "observe",
            PossibilityKind::Talk => "talk",
            PossibilityKind::Help => "help",
            PossibilityKind::Comfort => "comfort",
            PossibilityKind::ShareSecret => "share_secret",
            PossibilityKind::Avoid => "avoid",
            PossibilityKind::Attack => "attack",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }

    /// Whether the action is directed at another agent.
    pub fn is_targeted(self) -> bool {
        matches!(
            self,
            PossibilityKind::Talk
                | PossibilityKind::Help
                | PossibilityKind::Comfort
                | PossibilityKind::ShareSecret
                | PossibilityKind::Avoid
                | PossibilityKind::Attack
        )
    }

    /// Stable key shared by the possibility, its cost, prior and score atoms.
    pub fn key(self, target_id: Option<&str>) -> String {
        match target_id {
            Some(target) => format!("{}:{}", self.as_str(), target),
            None => self.as_str().to_string(),
        }
    }
}

impl fmt::Display for PossibilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Five-component cost of an action, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CostVector {
    pub time: f64,
    pub energy: f64,
    pub social: f64,
    pub risk: f64,
    pub moral: f64,
}

/// A candidate affordance. Created fresh every tick; never mutated after costing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Possibility {
    pub id: String,
    pub kind: PossibilityKind,
    pub action_id: String,
    #[serde(default)]
    pub target_id: Option<String>,
    pub label: String,
    pub magnitude: f64,
    pub enabled: bool,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub why_atom_ids: Vec<String>,
}

impl Possibility {
    pub fn key(&self) -> String {
        self.kind.key(self.target_id.as_deref())
    }

    pub fn block(&mut self, constraint_id: impl Into<String>) {
        let constraint_id = constraint_id.into();
        if !self.blocked_by.contains(&constraint_id) {
            self.blocked_by.push(constraint_id);
        }
        self.enabled = false;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionCandidate {
    pub id: String,
    pub kind: PossibilityKind,
    pub actor_id: String,
    #[serde(default)]
    pub target_id: Option<String>,
    pub delta_goals: BTreeMap<String, f64>,
    pub cost: f64,
    pub confidence: f64,
    pub support_atoms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedAction {
    pub candidate: ActionCandidate,
    /// Σ energy·Δg − cost.
    pub q_raw: f64,
    pub penalty: f64,
    pub q: f64,
    pub goal_contributions: BTreeMap<String, f64>,
    #[serde(default)]
    pub gumbel_noise: Option<f64>,
    #[serde(default)]
    pub sample_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LookaheadEntry {
    pub candidate_id: String,
    pub q_now: f64,
    pub value_next: f64,
    pub q_lookahead: f64,
    pub predicted_state: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LookaheadReport {
    pub gamma: f64,
    pub current_state: BTreeMap<String, f64>,
    pub entries: Vec<LookaheadEntry>,
    /// Best by lookahead value; only adopted as the decision when opted in.
    #[serde(default)]
    pub best_by_lookahead: Option<String>,
    pub applied_to_choice: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DecisionReport {
    pub actor_id: String,
    #[serde(default)]
    pub best: Option<RankedAction>,
    pub ranked: Vec<RankedAction>,
    /// Ids of the top-K candidates the sample was drawn from.
    pub sampled_from: Vec<String>,
    pub temperature: f64,
    pub goal_energy: BTreeMap<String, f64>,
    pub warnings: Vec<String>,
    #[serde(default)]
    pub lookahead: Option<LookaheadReport>,
    pub decision_atoms: Vec<ContextAtom>,
}

impl DecisionReport {
    pub fn best_id(&self) -> Option<&str> {
        self.best.as_ref().map(|best| best.candidate.id.as_str())
    }
}

/// What the world-application collaborator needs to materialise a decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionIntent {
    pub actor_id: String,
    pub action_id: String,
    #[serde(default)]
    pub target_id: Option<String>,
    pub location_id: String,
    pub tick: u64,
    /// `sigmoid(Q)` of the chosen candidate.
    pub intensity: f64,
}

impl ActionIntent {
    /// `None` when the decision chose nothing.
    pub fn from_decision(report: &DecisionReport, location_id: &str, tick: u64) -> Option<Self> {
        let best = report.best.as_ref()?;
        Some(Self {
            actor_id: report.actor_id.clone(),
            action_id: best.candidate.kind.as_str().to_string(),
            target_id: best.candidate.target_id.clone(),
            location_id: location_id.to_string(),
            tick,
            intensity: 1.0 / (1.0 + (-best.q).exp()),
        })
    }
}
