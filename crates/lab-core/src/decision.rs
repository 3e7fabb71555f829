//! Decision engine: score candidates against goal energy, then sample one
//! from the top-K under temperature with Gumbel noise.

use std::collections::BTreeMap;

use contracts::{
    ActionCandidate, AtomBuilder, AtomError, ContextAtom, DecisionConfig, DecisionReport,
    RankedAction,
};

use crate::atoms::{ids, round4, sigmoid};
use crate::rng::RngChannel;

pub const EMPTY_ENERGY_WARNING: &str = "goal energy is empty; ranking reduces to cost minimisation";
const ARGMAX_TEMPERATURE: f64 = 1e-6;

pub fn score_candidate(
    candidate: &ActionCandidate,
    goal_energy: &BTreeMap<String, f64>,
    risk_penalty: f64,
) -> RankedAction {
    let goal_contributions: BTreeMap<String, f64> = candidate
        .delta_goals
        .iter()
        .map(|(goal, delta)| {
            let energy = goal_energy.get(goal).copied().unwrap_or(0.0);
            (goal.clone(), energy * delta)
        })
        .collect();
    let q_raw = goal_contributions.values().sum::<f64>() - candidate.cost;
    let penalty = risk_penalty * q_raw.abs() * (1.0 - candidate.confidence);
    RankedAction {
        candidate: candidate.clone(),
        q_raw,
        penalty,
        q: q_raw - penalty,
        goal_contributions,
        gumbel_noise: None,
        sample_score: None,
    }
}

/// Ranked by Q descending, ties broken by candidate id.
pub fn rank_candidates(
    candidates: &[ActionCandidate],
    goal_energy: &BTreeMap<String, f64>,
    risk_penalty: f64,
) -> Vec<RankedAction> {
    let mut ranked: Vec<RankedAction> = candidates
        .iter()
        .map(|candidate| score_candidate(candidate, goal_energy, risk_penalty))
        .collect();
    ranked.sort_by(|a, b| {
        b.q.total_cmp(&a.q)
            .then_with(|| a.candidate.id.cmp(&b.candidate.id))
    });
    ranked
}

pub fn decide_action(
    actor_id: &str,
    candidates: &[ActionCandidate],
    goal_energy: &BTreeMap<String, f64>,
    config: &DecisionConfig,
    rng: &mut RngChannel,
) -> Result<DecisionReport, AtomError> {
    let mut report = DecisionReport {
        actor_id: actor_id.to_string(),
        temperature: config.temperature,
        goal_energy: goal_energy.clone(),
        ..DecisionReport::default()
    };
    if goal_energy.is_empty() {
        report.warnings.push(EMPTY_ENERGY_WARNING.to_string());
    }
    if candidates.is_empty() {
        return Ok(report);
    }

    let mut ranked = rank_candidates(candidates, goal_energy, config.risk_penalty);
    let k = config.top_k.max(1).min(ranked.len());
    report.sampled_from = ranked[..k]
        .iter()
        .map(|entry| entry.candidate.id.clone())
        .collect();

    let chosen = if config.temperature <= ARGMAX_TEMPERATURE {
        0
    } else {
        let mut chosen = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (position, entry) in ranked[..k].iter_mut().enumerate() {
            let noise = rng.gumbel();
            let score = entry.q / config.temperature + noise;
            entry.gumbel_noise = Some(noise);
            entry.sample_score = Some(score);
            if score > best_score {
                best_score = score;
                chosen = position;
            }
        }
        chosen
    };

    report.best = Some(ranked[chosen].clone());
    report.ranked = ranked;
    report.decision_atoms = score_atoms(actor_id, &report.ranked, report.best_id())?;
    Ok(report)
}

/// Make `candidate_id` the decision, re-tagging the score atoms.
pub fn adopt(report: &mut DecisionReport, candidate_id: &str) -> Result<bool, AtomError> {
    let Some(entry) = report
        .ranked
        .iter()
        .find(|entry| entry.candidate.id == candidate_id)
        .cloned()
    else {
        return Ok(false);
    };
    report.best = Some(entry);
    report.decision_atoms = score_atoms(&report.actor_id, &report.ranked, report.best_id())?;
    Ok(true)
}

/// One `action:score:*` atom per ranked candidate. Support atoms from the goal
/// layer proper are never cited; the `util:*` projection is.
pub fn score_atoms(
    actor_id: &str,
    ranked: &[RankedAction],
    best_id: Option<&str>,
) -> Result<Vec<ContextAtom>, AtomError> {
    ranked
        .iter()
        .enumerate()
        .map(|(rank, entry)| {
            let candidate = &entry.candidate;
            let mut builder = AtomBuilder::derived(ids::action_score(actor_id, &candidate.id))
                .source("decision")
                .kind("action_score")
                .subject(actor_id.to_string())
                .magnitude(sigmoid(entry.q))
                .confidence(candidate.confidence)
                .uses_all(
                    candidate
                        .support_atoms
                        .iter()
                        .filter(|id| !id.starts_with("goal:"))
                        .cloned(),
                )
                .part("q_raw", round4(entry.q_raw))
                .part("penalty", round4(entry.penalty))
                .part("q", round4(entry.q))
                .part("rank", rank + 1);
            if let Some(target) = &candidate.target_id {
                builder = builder.target(target.clone());
            }
            if best_id == Some(candidate.id.as_str()) {
                builder = builder.tag("best");
            }
            if candidate.support_atoms.is_empty() {
                builder = builder.note("scored without support atoms");
            }
            builder.build()
        })
        .collect()
}
