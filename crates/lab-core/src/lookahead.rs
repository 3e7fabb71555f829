//! One-step lookahead: predict the next situation for the leading candidates
//! and value it by goal satisfaction.

use std::collections::BTreeMap;

use contracts::{
    AtomBuilder, AtomError, ContextAtom, DecisionConfig, DecisionReport, LookaheadEntry,
    LookaheadReport, PossibilityKind,
};

use crate::atoms::{ids, round4, AtomIndex};
use crate::goals::GoalDomain;
use crate::rng::RngChannel;

pub const FEATURES: [&str; 6] = [
    "danger",
    "control",
    "intimacy",
    "uncertainty",
    "fatigue",
    "exposure",
];

/// Passive change per tick regardless of the action.
const DRIFT: [(&str, f64); 2] = [("fatigue", 0.02), ("uncertainty", 0.02)];

pub fn action_deltas(kind: PossibilityKind) -> &'static [(&'static str, f64)] {
    match kind {
        PossibilityKind::Hide => &[("danger", -0.15), ("exposure", -0.3), ("control", 0.05)],
        PossibilityKind::Escape => &[
            ("danger", -0.3),
            ("exposure", -0.1),
            ("fatigue", 0.1),
            ("control", 0.1),
        ],
        PossibilityKind::Rest => &[("fatigue", -0.25), ("uncertainty", 0.02)],
        PossibilityKind::Wait => &[],
        PossibilityKind::Observe => &[("uncertainty", -0.2), ("exposure", 0.05)],
        PossibilityKind::Talk => &[("intimacy", 0.1), ("uncertainty", -0.1)],
        PossibilityKind::Help => &[("intimacy", 0.1), ("fatigue", 0.05)],
        PossibilityKind::Comfort => &[("intimacy", 0.15)],
        PossibilityKind::ShareSecret => &[("intimacy", 0.2), ("exposure", 0.1)],
        PossibilityKind::Avoid => &[("danger", -0.1), ("intimacy", -0.1)],
        PossibilityKind::Attack => &[
            ("danger", 0.2),
            ("control", 0.1),
            ("fatigue", 0.1),
            ("exposure", 0.2),
        ],
    }
}

/// Feature vector the prediction starts from.
pub fn current_state(index: &AtomIndex<'_>, agent_id: &str) -> BTreeMap<String, f64> {
    let publicness = index.value_or(&ids::ctx("publicness"), 0.0);
    let cover = index.value_or(&ids::ctx("cover"), 0.0);
    let hazard = index.value_or(&ids::haz_max(agent_id), 0.0);
    let mut state = BTreeMap::new();
    state.insert("danger".to_string(), index.value_or(&ids::ctx("danger"), 0.0));
    state.insert("control".to_string(), index.value_or(&ids::ctx("control"), 0.5));
    state.insert("intimacy".to_string(), index.value_or(&ids::ctx("intimacy"), 0.0));
    state.insert(
        "uncertainty".to_string(),
        index.value_or(&ids::ctx("uncertainty"), 0.0),
    );
    state.insert(
        "fatigue".to_string(),
        index.value_or(&ids::feat_body(agent_id, "fatigue"), 0.0),
    );
    state.insert(
        "exposure".to_string(),
        hazard.max(publicness * (1.0 - cover)),
    );
    state
}

pub fn satisfaction(domain: GoalDomain, state: &BTreeMap<String, f64>) -> f64 {
    let get = |feature: &str| state.get(feature).copied().unwrap_or(0.0);
    match domain {
        GoalDomain::Safety => 1.0 - get("danger"),
        GoalDomain::Affiliation | GoalDomain::Care => get("intimacy"),
        GoalDomain::Status => get("control"),
        GoalDomain::Autonomy => get("control") * (1.0 - get("exposure")),
        GoalDomain::Rest => 1.0 - get("fatigue"),
        GoalDomain::Exploration => 1.0 - get("uncertainty"),
    }
}

pub fn state_value(state: &BTreeMap<String, f64>, goal_energy: &BTreeMap<String, f64>) -> f64 {
    goal_energy
        .iter()
        .filter_map(|(goal, energy)| {
            GoalDomain::parse(goal).map(|domain| energy * satisfaction(domain, state))
        })
        .sum()
}

pub fn predict(
    current: &BTreeMap<String, f64>,
    kind: PossibilityKind,
    noise: f64,
    rng: &mut RngChannel,
) -> BTreeMap<String, f64> {
    let deltas = action_deltas(kind);
    FEATURES
        .iter()
        .map(|feature| {
            let base = current.get(*feature).copied().unwrap_or(0.0);
            let delta: f64 = deltas
                .iter()
                .chain(DRIFT.iter())
                .filter(|(name, _)| name == feature)
                .map(|(_, delta)| delta)
                .sum();
            let jitter = if noise > 0.0 { rng.symmetric(noise) } else { 0.0 };
            (feature.to_string(), (base + delta + jitter).clamp(0.0, 1.0))
        })
        .collect()
}

/// Evaluate the leading `lookahead_width` ranked candidates, plus the chosen
/// one when sampling picked it from further down the ranking.
pub fn run_lookahead(
    index: &AtomIndex<'_>,
    report: &DecisionReport,
    config: &DecisionConfig,
    rng: &mut RngChannel,
) -> LookaheadReport {
    let current = current_state(index, &report.actor_id);
    let width = config.lookahead_width.max(1);
    let chosen = report.best.as_ref().map(|best| best.candidate.id.as_str());
    let entries: Vec<LookaheadEntry> = report
        .ranked
        .iter()
        .enumerate()
        .filter(|(rank, entry)| *rank < width || Some(entry.candidate.id.as_str()) == chosen)
        .map(|(_, entry)| {
            let predicted = predict(&current, entry.candidate.kind, config.lookahead_noise, rng);
            let value_next = state_value(&predicted, &report.goal_energy);
            LookaheadEntry {
                candidate_id: entry.candidate.id.clone(),
                q_now: entry.q,
                value_next,
                q_lookahead: entry.q + config.lookahead_gamma * value_next,
                predicted_state: predicted,
            }
        })
        .collect();
    let best_by_lookahead = entries
        .iter()
        .max_by(|a, b| {
            a.q_lookahead
                .total_cmp(&b.q_lookahead)
                .then_with(|| b.candidate_id.cmp(&a.candidate_id))
        })
        .map(|entry| entry.candidate_id.clone());
    LookaheadReport {
        gamma: config.lookahead_gamma,
        current_state: current,
        applied_to_choice: config.lookahead_choice && best_by_lookahead.is_some(),
        entries,
        best_by_lookahead,
    }
}

/// `pred:*` atoms for the predicted state after the chosen action.
pub fn prediction_atoms(
    actor_id: &str,
    report: &DecisionReport,
) -> Result<Vec<ContextAtom>, AtomError> {
    let (Some(best), Some(lookahead)) = (report.best.as_ref(), report.lookahead.as_ref()) else {
        return Ok(Vec::new());
    };
    let Some(entry) = lookahead
        .entries
        .iter()
        .find(|entry| entry.candidate_id == best.candidate.id)
    else {
        return Ok(Vec::new());
    };
    let score_id = ids::action_score(actor_id, &best.candidate.id);
    entry
        .predicted_state
        .iter()
        .map(|(feature, value)| {
            let now = lookahead.current_state.get(feature).copied().unwrap_or(0.0);
            AtomBuilder::derived(ids::pred(feature, actor_id))
                .source("lookahead")
                .kind("prediction")
                .subject(actor_id.to_string())
                .magnitude(*value)
                .uses(score_id.clone())
                .part("action", best.candidate.id.clone())
                .part("now", round4(now))
                .build()
        })
        .collect()
}
