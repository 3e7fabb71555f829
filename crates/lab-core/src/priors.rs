//! Action priors: how inclined the agent already is towards each action,
//! from theory-of-mind policies and emotions, nudged by the planned goal pull
//! on the action. Goals are only read through their `util:link:*` projection.

use contracts::{AtomBuilder, AtomError, ContextAtom, Possibility, PossibilityKind};

use crate::atoms::{ids, round4, AtomIndex};

const NEUTRAL_PRIOR: f64 = 0.5;
const WAIT_PRIOR: f64 = 0.3;
/// Share of the prior taken from the goal pull when one exists.
const GOAL_PULL_WEIGHT: f64 = 0.4;

/// Policy the prior of a targeted action follows, and the emotion used when
/// no policy towards the target exists.
fn targeted_sources(kind: PossibilityKind) -> Option<(&'static str, &'static str)> {
    match kind {
        PossibilityKind::Talk => Some(("approach", "joy")),
        PossibilityKind::Help | PossibilityKind::Comfort => Some(("cooperate", "care")),
        PossibilityKind::ShareSecret => Some(("disclose", "joy")),
        PossibilityKind::Avoid => Some(("avoid", "fear")),
        PossibilityKind::Attack => Some(("confront", "anger")),
        _ => None,
    }
}

fn self_source(kind: PossibilityKind, agent_id: &str) -> Option<String> {
    match kind {
        PossibilityKind::Hide | PossibilityKind::Escape => Some(ids::emo("fear", agent_id)),
        PossibilityKind::Rest => Some(ids::emo("sadness", agent_id)),
        PossibilityKind::Observe => Some(ids::ctx("uncertainty")),
        _ => None,
    }
}

/// `action:prior:*` for every enabled, costed possibility.
pub fn derive_priors(
    index: &AtomIndex<'_>,
    agent_id: &str,
    possibilities: &[Possibility],
) -> Result<Vec<ContextAtom>, AtomError> {
    let mut atoms = Vec::new();
    for possibility in possibilities {
        if !possibility.enabled || possibility.cost.is_none() {
            continue;
        }
        let source_id = match (targeted_sources(possibility.kind), &possibility.target_id) {
            (Some((policy, emotion)), Some(target)) => {
                let policy_id = ids::tom_policy(agent_id, target, policy);
                if index.contains(&policy_id) {
                    Some(policy_id)
                } else {
                    Some(ids::emo(emotion, agent_id))
                }
            }
            _ => self_source(possibility.kind, agent_id),
        };

        let mut builder = AtomBuilder::derived(ids::action_prior(agent_id, &possibility.key()))
            .source("priors")
            .kind("action_prior")
            .subject(agent_id.to_string());
        if let Some(target) = &possibility.target_id {
            builder = builder.target(target.clone());
        }
        let (base, confidence) = match source_id.as_deref().and_then(|id| index.get(id)) {
            Some(source) => {
                builder = builder.uses(source.id.clone());
                (source.magnitude, source.confidence)
            }
            None if possibility.kind == PossibilityKind::Wait => {
                builder = builder.note("waiting carries a flat prior");
                (WAIT_PRIOR, 1.0)
            }
            None => {
                builder = builder.note("no policy or emotion evidence");
                (NEUTRAL_PRIOR, 0.5)
            }
        };
        let magnitude = match index.get(&ids::util_link(agent_id, possibility.kind.as_str())) {
            Some(pull) => {
                builder = builder
                    .uses(pull.id.clone())
                    .part("base", round4(base))
                    .part("goal_pull", round4(pull.magnitude));
                (1.0 - GOAL_PULL_WEIGHT) * base + GOAL_PULL_WEIGHT * pull.magnitude
            }
            None => base,
        };
        builder = builder.magnitude(magnitude).confidence(confidence);
        atoms.push(builder.build()?);
    }
    Ok(atoms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::world_atom;
    use crate::possibility::possibility;

    fn costed(kind: PossibilityKind, target: Option<&str>) -> Possibility {
        let mut p = possibility(kind, target, 0.5, Vec::new());
        p.cost = Some(0.2);
        p
    }

    #[test]
    fn policy_beats_emotion_fallback() {
        let atoms = vec![
            world_atom("tom:policy:alice:bob:approach", 0.7),
            world_atom("emo:joy:alice", 0.1),
            world_atom("emo:fear:alice", 0.4),
        ];
        let index = AtomIndex::new(&atoms);
        let possibilities = vec![
            costed(PossibilityKind::Talk, Some("bob")),
            costed(PossibilityKind::Talk, Some("carol")),
            costed(PossibilityKind::Hide, None),
            costed(PossibilityKind::Wait, None),
        ];
        let priors = derive_priors(&index, "alice", &possibilities).expect("priors");
        let values: Vec<f64> = priors.iter().map(|atom| atom.magnitude).collect();
        assert_eq!(values, vec![0.7, 0.1, 0.4, WAIT_PRIOR]);
        assert_eq!(priors[0].id, "action:prior:alice:talk:bob");
        assert!(priors
            .iter()
            .all(|atom| atom.used_atom_ids().iter().all(|id| !id.starts_with("goal:"))));
    }

    #[test]
    fn goal_pull_moves_the_prior_through_util_links() {
        let prior_with_pull = |pull: f64| {
            let atoms = vec![
                world_atom("emo:fear:alice", 0.4),
                world_atom("util:link:alice:escape", pull),
            ];
            let index = AtomIndex::new(&atoms);
            let possibilities = vec![costed(PossibilityKind::Escape, None)];
            derive_priors(&index, "alice", &possibilities)
                .expect("priors")
                .remove(0)
        };
        let low = prior_with_pull(0.0);
        let high = prior_with_pull(1.0);
        assert!((low.magnitude - 0.6 * 0.4).abs() < 1e-12);
        assert!((high.magnitude - (0.6 * 0.4 + 0.4)).abs() < 1e-12);
        assert_eq!(
            high.used_atom_ids(),
            ["emo:fear:alice".to_string(), "util:link:alice:escape".to_string()]
        );
    }

    #[test]
    fn uncosted_and_disabled_are_skipped() {
        let atoms = Vec::new();
        let index = AtomIndex::new(&atoms);
        let mut blocked = costed(PossibilityKind::Attack, Some("bob"));
        blocked.block("con:protocol:noViolence");
        let uncosted = possibility(PossibilityKind::Observe, None, 0.5, Vec::new());
        let priors = derive_priors(&index, "alice", &[blocked, uncosted]).expect("priors");
        assert!(priors.is_empty());
    }
}
