//! Projects goal energy onto possibilities: one candidate per enabled, costed
//! possibility with its expected effect on each goal domain.

use std::collections::BTreeMap;

use contracts::{ActionCandidate, Possibility};

use crate::atoms::{ids, mean, AtomIndex};
use crate::goals::goal_effects;

pub fn build_candidates(
    index: &AtomIndex<'_>,
    agent_id: &str,
    possibilities: &[Possibility],
) -> Vec<ActionCandidate> {
    let mut candidates = Vec::new();
    for possibility in possibilities {
        let Some(cost) = possibility.cost else {
            continue;
        };
        if !possibility.enabled {
            continue;
        }
        let key = possibility.key();
        let cost_id = ids::cost(&key);
        let prior_id = ids::action_prior(agent_id, &key);
        let prior = index.value_or(&prior_id, 0.5);
        let scale = possibility.magnitude * (0.75 + 0.5 * prior);

        let mut support = vec![possibility.id.clone(), cost_id, prior_id];
        let mut delta_goals = BTreeMap::new();
        for (domain, effect) in goal_effects(possibility.kind) {
            delta_goals.insert(domain.as_str().to_string(), effect * scale);
            support.push(ids::util_goal(agent_id, domain.as_str()));
        }
        support.retain(|id| index.contains(id));

        let confidences: Vec<f64> = support
            .iter()
            .filter_map(|id| index.get(id).map(|atom| atom.confidence))
            .collect();
        let confidence = if confidences.is_empty() {
            0.5
        } else {
            mean(&confidences)
        };

        candidates.push(ActionCandidate {
            id: key,
            kind: possibility.kind,
            actor_id: agent_id.to_string(),
            target_id: possibility.target_id.clone(),
            delta_goals,
            cost,
            confidence,
            support_atoms: support,
        });
    }
    candidates
}
