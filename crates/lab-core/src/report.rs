//! Flat, serializable views over frames and decisions for external renderers.

use std::collections::BTreeMap;

use contracts::{AtomNs, AtomOrigin, ContextAtom, DecisionReport, StageFrame};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlatAtomRecord {
    pub id: String,
    pub ns: AtomNs,
    pub origin: AtomOrigin,
    pub magnitude: f64,
    pub confidence: f64,
    pub used_atom_ids: Vec<String>,
    pub label: String,
}

impl From<&ContextAtom> for FlatAtomRecord {
    fn from(atom: &ContextAtom) -> Self {
        Self {
            id: atom.id.clone(),
            ns: atom.ns,
            origin: atom.origin,
            magnitude: atom.magnitude,
            confidence: atom.confidence,
            used_atom_ids: atom.used_atom_ids().to_vec(),
            label: atom.label.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionBreakdownRow {
    pub rank: usize,
    pub candidate_id: String,
    pub kind: String,
    pub target_id: Option<String>,
    pub q_raw: f64,
    pub penalty: f64,
    pub q: f64,
    pub cost: f64,
    pub confidence: f64,
    pub goal_contributions: BTreeMap<String, f64>,
    pub sampled: bool,
    pub chosen: bool,
}

/// Atoms a frame added or replaced; `all` lists the whole accumulated set.
pub fn flatten_frame(frame: &StageFrame, all: bool) -> Vec<FlatAtomRecord> {
    frame
        .atoms
        .iter()
        .filter(|atom| {
            all || frame.new_atom_ids.contains(&atom.id)
                || frame.overridden_atom_ids.contains(&atom.id)
        })
        .map(FlatAtomRecord::from)
        .collect()
}

pub fn decision_breakdown(report: &DecisionReport) -> Vec<DecisionBreakdownRow> {
    let chosen = report.best_id();
    report
        .ranked
        .iter()
        .enumerate()
        .map(|(position, entry)| {
            let candidate = &entry.candidate;
            DecisionBreakdownRow {
                rank: position + 1,
                candidate_id: candidate.id.clone(),
                kind: candidate.kind.as_str().to_string(),
                target_id: candidate.target_id.clone(),
                q_raw: entry.q_raw,
                penalty: entry.penalty,
                q: entry.q,
                cost: candidate.cost,
                confidence: candidate.confidence,
                goal_contributions: entry.goal_contributions.clone(),
                sampled: report.sampled_from.contains(&candidate.id),
                chosen: chosen == Some(candidate.id.as_str()),
            }
        })
        .collect()
}
