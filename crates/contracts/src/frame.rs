//! Per-stage output frames and the outbound pipeline run.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{ActionCandidate, DecisionReport, Possibility};
use crate::atom::ContextAtom;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageId {
    S0,
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    S8,
    S9,
}

impl StageId {
    pub const ALL: [StageId; 10] = [
        StageId::S0,
        StageId::S1,
        StageId::S2,
        StageId::S3,
        StageId::S4,
        StageId::S5,
        StageId::S6,
        StageId::S7,
        StageId::S8,
        StageId::S9,
    ];

    pub fn title(self) -> &'static str {
        match self {
            StageId::S0 => "canonical inputs",
            StageId::S1 => "quark frames",
            StageId::S2 => "context axes",
            StageId::S3 => "subjective lens",
            StageId::S4 => "appraisal and emotion",
            StageId::S5 => "theory of mind",
            StageId::S6 => "drivers",
            StageId::S7 => "goal ecology",
            StageId::S8 => "actions and decision",
            StageId::S9 => "predicted next state",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageStats {
    pub atom_count: usize,
    pub new_count: usize,
    pub overridden_count: usize,
    pub missing_code: usize,
    pub derived_missing_trace: usize,
}

/// Atoms sharing one `code`, in accumulated order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuarkFrame {
    pub code: String,
    pub atom_ids: Vec<String>,
    pub mean_magnitude: f64,
}

/// Captured failure of a fault-isolated stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageFailure {
    pub name: String,
    pub message: String,
    /// Chain of underlying causes, outermost first.
    pub stack: Vec<String>,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageArtifacts {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quarks: Vec<QuarkFrame>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub possibilities: Vec<Possibility>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<ActionCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageFrame {
    pub stage: StageId,
    pub title: String,
    /// Accumulated atom set after this stage's merge.
    pub atoms: Vec<ContextAtom>,
    pub new_atom_ids: Vec<String>,
    pub overridden_atom_ids: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: StageStats,
    #[serde(default)]
    pub artifacts: StageArtifacts,
}

impl StageFrame {
    pub fn atom(&self, id: &str) -> Option<&ContextAtom> {
        self.atoms.iter().find(|atom| atom.id == id)
    }

    pub fn failed(&self) -> bool {
        self.artifacts.failure.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRun {
    pub agent_id: String,
    pub tick: u64,
    pub frames: Vec<StageFrame>,
    #[serde(default)]
    pub decision: Option<DecisionReport>,
    #[serde(default)]
    pub failure: Option<StageFailure>,
}

impl PipelineRun {
    pub fn frame(&self, stage: StageId) -> Option<&StageFrame> {
        self.frames.iter().find(|frame| frame.stage == stage)
    }

    /// Atom set of the last frame that completed.
    pub fn final_atoms(&self) -> &[ContextAtom] {
        self.frames
            .last()
            .map(|frame| frame.atoms.as_slice())
            .unwrap_or(&[])
    }

    pub fn warnings(&self) -> impl Iterator<Item = (StageId, &str)> {
        self.frames.iter().flat_map(|frame| {
            frame
                .warnings
                .iter()
                .map(move |warning| (frame.stage, warning.as_str()))
        })
    }
}
