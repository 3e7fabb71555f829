//! S5 theory of mind: dyadic beliefs about others and the policies they imply.
//!
//! Runs as four passes merged in order: relation priors (seed and bound),
//! stranger baselines, memory-driven belief bias, and the policy layer.

use std::collections::BTreeSet;

use contracts::{AtomBuilder, AtomError, ContextAtom};

use crate::atoms::{ids, part_f64, round4, AtomIndex};
use crate::memory::recall;
use crate::merge::base_copy_of;
use crate::proximity::{nearby_others, relation_view};
use crate::relation_priors::{
    dyad_bounds, seed_value, DyadBounds, DYAD_METRICS, MIN_RELATION_STRENGTH, SEED_CONFIDENCE,
};
use crate::stage::{Derivation, StageContext};

pub const POLICIES: [&str; 5] = ["approach", "avoid", "confront", "cooperate", "disclose"];

const BASELINE_CONFIDENCE: f64 = 0.4;
const BASELINES: [(&str, f64); 3] = [("uncertainty", 0.7), ("trust", 0.4), ("threat", 0.2)];

fn related_others(index: &AtomIndex<'_>, self_id: &str) -> Vec<String> {
    let prefix = ids::rel_base_prefix(self_id);
    let others: BTreeSet<String> = index
        .prefixed(&prefix)
        .filter_map(|atom| ids::pair_other(&atom.id, &prefix).map(str::to_string))
        .collect();
    others.into_iter().collect()
}

fn dyad_others(index: &AtomIndex<'_>, self_id: &str) -> Vec<String> {
    let prefix = ids::tom_dyad_prefix(self_id);
    let others: BTreeSet<String> = index
        .prefixed(&prefix)
        .filter_map(|atom| ids::pair_other(&atom.id, &prefix).map(str::to_string))
        .collect();
    others.into_iter().collect()
}

/// Bounds for one dyad metric given what the atom set says about the pair.
fn bounds_for(index: &AtomIndex<'_>, self_id: &str, other_id: &str, metric: &str) -> DyadBounds {
    let relation = relation_view(index, self_id, other_id);
    if relation.strength < MIN_RELATION_STRENGTH {
        return DyadBounds::OPEN;
    }
    let physical = index.value_or(&ids::obs_nearby(self_id, other_id, "armed"), 0.0);
    dyad_bounds(metric, &relation.base, physical)
}

/// Override `existing` with `value`, preceded by a base copy unless one exists.
fn push_override(
    out: &mut Derivation,
    index: &AtomIndex<'_>,
    existing: &ContextAtom,
    value: f64,
    builder: impl FnOnce(AtomBuilder) -> AtomBuilder,
) -> Result<(), AtomError> {
    let base_id = ids::base_of(&existing.id);
    if !index.contains(&base_id) && !out.atoms.iter().any(|atom| atom.id == base_id) {
        out.push(base_copy_of(existing)?);
    }
    let mut overridden = AtomBuilder::derived(existing.id.clone())
        .source("tom")
        .kind("tom_dyad")
        .magnitude(value)
        .confidence(existing.confidence)
        .uses(base_id)
        .part("before", round4(existing.magnitude));
    if let Some(subject) = &existing.subject {
        overridden = overridden.subject(subject.clone());
    }
    if let Some(target) = &existing.target {
        overridden = overridden.target(target.clone());
    }
    out.push(builder(overridden).build()?);
    Ok(())
}

/// Seed missing dyads from `rel:base` and pull existing ones into their bounds.
pub fn seed_relation_priors(
    index: &AtomIndex<'_>,
    ctx: &StageContext<'_>,
) -> Result<Derivation, AtomError> {
    let self_id = ctx.agent_id;
    let mut out = Derivation::new();

    for other_id in related_others(index, self_id) {
        let relation = relation_view(index, self_id, &other_id);
        if relation.strength < MIN_RELATION_STRENGTH {
            continue;
        }
        let armed_id = ids::obs_nearby(self_id, &other_id, "armed");
        let physical = index.value_or(&armed_id, 0.0);
        let pair_prefix = format!("tom:dyad:{self_id}:{other_id}:");
        if index.prefixed(&pair_prefix).next().is_none() {
            out.qualifying += 1;
        }

        for metric in DYAD_METRICS {
            let id = ids::tom_dyad(self_id, &other_id, metric);
            let bounds = dyad_bounds(metric, &relation.base, physical);
            let cites_armed = metric == "threat" && index.contains(&armed_id);

            match index.get(&id) {
                None => {
                    let base = seed_value(metric, &relation.base);
                    let mut builder = AtomBuilder::belief(id)
                        .source("relation_priors")
                        .kind("tom_dyad")
                        .subject(self_id.to_string())
                        .target(other_id.clone())
                        .magnitude(bounds.apply(base))
                        .confidence(SEED_CONFIDENCE)
                        .tag("seeded")
                        .uses_all(relation.used.iter().cloned())
                        .part("base", round4(base))
                        .part("floor", round4(bounds.floor))
                        .part("cap", round4(bounds.cap));
                    if cites_armed {
                        builder = builder.uses(armed_id.clone());
                    }
                    out.push(builder.build()?);
                }
                Some(existing) if existing.is_pinned() => {}
                Some(existing) => {
                    let bounded = bounds.apply(existing.magnitude);
                    if (bounded - existing.magnitude).abs() <= 1e-9 {
                        continue;
                    }
                    let used = relation.used.clone();
                    let armed = cites_armed.then(|| armed_id.clone());
                    push_override(&mut out, index, existing, bounded, |builder| {
                        builder
                            .tag("bounded")
                            .uses_all(used)
                            .uses_all(armed)
                            .part("base", round4(existing.magnitude))
                            .part("floor", round4(bounds.floor))
                            .part("cap", round4(bounds.cap))
                    })?;
                }
            }
        }
    }

    Ok(out)
}

/// Co-present strangers with no relationship facts get a wary default.
pub fn dyad_baselines(
    index: &AtomIndex<'_>,
    ctx: &StageContext<'_>,
) -> Result<Derivation, AtomError> {
    let self_id = ctx.agent_id;
    let mut out = Derivation::new();

    for (other_id, _) in nearby_others(index, self_id) {
        let relation_prefix = format!("rel:base:{self_id}:{other_id}:");
        let dyad_prefix = format!("tom:dyad:{self_id}:{other_id}:");
        let has_relation = index.prefixed(&relation_prefix).next().is_some();
        let has_dyads = index.prefixed(&dyad_prefix).next().is_some();
        if has_relation || has_dyads {
            continue;
        }
        out.qualifying += 1;
        let seen_id = ids::obs_nearby(self_id, &other_id, "closeness");
        for (metric, value) in BASELINES {
            let id = ids::tom_dyad(self_id, &other_id, metric);
            if index.is_pinned(&id) {
                continue;
            }
            out.push(
                AtomBuilder::belief(id)
                    .source("tom_baseline")
                    .kind("tom_dyad")
                    .subject(self_id.to_string())
                    .target(other_id.clone())
                    .magnitude(value)
                    .confidence(BASELINE_CONFIDENCE)
                    .tag("baseline")
                    .uses(seen_id.clone())
                    .note("stranger baseline")
                    .build()?,
            );
        }
    }

    Ok(out)
}

/// Remembered harm and help, plus paranoia, skew trust and threat.
pub fn belief_bias(index: &AtomIndex<'_>, ctx: &StageContext<'_>) -> Result<Derivation, AtomError> {
    let self_id = ctx.agent_id;
    let mut out = Derivation::new();
    let paranoia_id = ids::lens_trait(self_id, "paranoia");
    let paranoia = index
        .get(&paranoia_id)
        .and_then(|atom| part_f64(atom, "raw"))
        .unwrap_or(0.0)
        .max(0.0);

    for other_id in dyad_others(index, self_id) {
        let memory = recall(index, self_id, Some(&other_id));
        if memory.harm == 0.0 && memory.help == 0.0 && paranoia == 0.0 {
            continue;
        }
        out.qualifying += 1;

        for metric in ["trust", "threat"] {
            let id = ids::tom_dyad(self_id, &other_id, metric);
            let Some(existing) = index.get(&id) else {
                continue;
            };
            if existing.is_pinned() {
                continue;
            }
            let current = existing.magnitude;
            let shifted = match metric {
                "trust" => {
                    current - 0.3 * memory.harm + 0.2 * memory.help - 0.1 * paranoia * current
                }
                _ => current + 0.3 * memory.harm + 0.1 * paranoia * (1.0 - current),
            };
            let bounds = bounds_for(index, self_id, &other_id, metric);
            let biased = bounds.apply(shifted.clamp(0.0, 1.0));
            if (biased - current).abs() <= 1e-6 {
                continue;
            }
            let used = memory.used.clone();
            let lens = (paranoia > 0.0).then(|| paranoia_id.clone());
            push_override(&mut out, index, existing, biased, |builder| {
                builder
                    .tag("biased")
                    .uses_all(used)
                    .uses_all(lens)
                    .part("harm", round4(memory.harm))
                    .part("help", round4(memory.help))
                    .part("paranoia", round4(paranoia))
                    .part("floor", round4(bounds.floor))
                    .part("cap", round4(bounds.cap))
            })?;
        }
    }

    Ok(out)
}

/// Behavioural tendencies towards each other agent, from the dyad beliefs.
pub fn derive_policies(
    index: &AtomIndex<'_>,
    ctx: &StageContext<'_>,
) -> Result<Derivation, AtomError> {
    let self_id = ctx.agent_id;
    let mut out = Derivation::new();

    for other_id in dyad_others(index, self_id) {
        out.qualifying += 1;
        let mut used = Vec::new();
        let mut read = |metric: &str, default: f64| {
            let id = ids::tom_dyad(self_id, &other_id, metric);
            match index.magnitude(&id) {
                Some(value) => {
                    used.push(id);
                    value
                }
                None => default,
            }
        };
        let trust = read("trust", 0.5);
        let threat = read("threat", 0.2);
        let intimacy = read("intimacy", 0.0);
        let uncertainty = read("uncertainty", 0.5);
        let alignment = read("alignment", 0.5);
        let respect = read("respect", 0.5);
        let dominance = read("dominance", 0.5);
        let support = read("support", 0.0);
        let anger_id = ids::emo_dyad(self_id, &other_id, "anger");
        let dyad_anger = index.magnitude(&anger_id);
        if dyad_anger.is_some() {
            used.push(anger_id);
        }
        let dyad_anger = dyad_anger.unwrap_or(0.0);

        for policy in POLICIES {
            let value = match policy {
                "approach" => 0.5 * trust + 0.3 * intimacy + 0.2 * support - 0.4 * threat,
                "avoid" => 0.6 * threat + 0.2 * uncertainty - 0.3 * trust,
                "confront" => {
                    0.5 * threat * dominance + 0.3 * (1.0 - respect) * threat + 0.2 * dyad_anger
                }
                "cooperate" => 0.5 * alignment + 0.3 * trust + 0.2 * support - 0.3 * threat,
                _ => 0.6 * trust * intimacy + 0.2 * support - 0.3 * uncertainty,
            };
            let id = ids::tom_policy(self_id, &other_id, policy);
            if index.is_pinned(&id) {
                continue;
            }
            out.push(
                AtomBuilder::derived(id)
                    .source("tom_policy")
                    .kind("tom_policy")
                    .subject(self_id.to_string())
                    .target(other_id.clone())
                    .magnitude(value)
                    .uses_all(used.iter().cloned())
                    .note(format!("{policy} tendency from dyad beliefs"))
                    .build()?,
            );
        }
    }

    Ok(out)
}

/// Strongest policy of a kind towards anyone, with the atom it came from.
pub(crate) fn strongest_policy(index: &AtomIndex<'_>, self_id: &str, policy: &str) -> Option<(f64, String)> {
    let prefix = format!("tom:policy:{self_id}:");
    let suffix = format!(":{policy}");
    index
        .prefixed(&prefix)
        .filter(|atom| atom.id.ends_with(&suffix))
        .map(|atom| (atom.magnitude, atom.id.clone()))
        .max_by(|a, b| a.0.total_cmp(&b.0).then_with(|| b.1.cmp(&a.1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{two_agent_world, world_atom, Fixture};
    use crate::merge::merge_atoms_prefer_newer;
    use contracts::RelationBase;

    fn hostile_fixture() -> Fixture {
        let mut world = two_agent_world();
        world.agents[0].relations.insert(
            "bob".to_string(),
            RelationBase {
                hostility: 0.9,
                closeness: 0.1,
                ..RelationBase::default()
            },
        );
        Fixture::new(world)
    }

    #[test]
    fn hostile_relation_seeds_wary_dyads() {
        let fixture = hostile_fixture();
        let atoms = fixture.world_atoms("alice");
        let index = AtomIndex::new(&atoms);
        let out = seed_relation_priors(&index, &fixture.ctx("alice")).expect("priors");
        let merged = merge_atoms_prefer_newer(&atoms, &out.atoms).atoms;
        let index = AtomIndex::new(&merged);
        assert!(index.value_or("tom:dyad:alice:bob:threat", 0.0) >= 0.65);
        assert!(index.value_or("tom:dyad:alice:bob:trust", 1.0) <= 0.25);
        let trust = index.get("tom:dyad:alice:bob:trust").expect("trust");
        assert_eq!(trust.confidence, SEED_CONFIDENCE);
        assert_eq!(trust.origin, contracts::AtomOrigin::Belief);
    }

    #[test]
    fn existing_dyad_above_cap_is_overridden_after_base_copy() {
        let fixture = hostile_fixture();
        let mut atoms = fixture.world_atoms("alice");
        atoms.push(world_atom("tom:dyad:alice:bob:trust", 0.9));
        let index = AtomIndex::new(&atoms);
        let out = seed_relation_priors(&index, &fixture.ctx("alice")).expect("priors");

        let base = out
            .atoms
            .iter()
            .position(|atom| atom.id == "tom:base:dyad:alice:bob:trust")
            .expect("base copy");
        let bounded = out
            .atoms
            .iter()
            .position(|atom| atom.id == "tom:dyad:alice:bob:trust")
            .expect("override");
        assert!(base < bounded);
        assert!((out.atoms[bounded].magnitude - 0.235).abs() < 1e-9);
    }

    #[test]
    fn weak_relations_are_left_alone() {
        let mut world = two_agent_world();
        world.agents[0].relations.insert(
            "bob".to_string(),
            RelationBase {
                closeness: 0.01,
                ..RelationBase::default()
            },
        );
        let fixture = Fixture::new(world);
        let atoms = fixture.world_atoms("alice");
        let index = AtomIndex::new(&atoms);
        let priors = seed_relation_priors(&index, &fixture.ctx("alice")).expect("priors");
        let baselines = dyad_baselines(&index, &fixture.ctx("alice")).expect("baselines");
        assert!(priors.atoms.is_empty());
        assert!(baselines.atoms.is_empty());
    }

    #[test]
    fn strangers_get_baselines() {
        let mut world = two_agent_world();
        world.agents[0].relations.clear();
        let fixture = Fixture::new(world);
        let atoms = fixture.world_atoms("alice");
        let index = AtomIndex::new(&atoms);
        let out = dyad_baselines(&index, &fixture.ctx("alice")).expect("baselines");
        assert_eq!(out.atoms.len(), 3);
        assert!(out.atoms.iter().all(|atom| atom.confidence == BASELINE_CONFIDENCE));
    }

    #[test]
    fn remembered_attack_lowers_trust_within_bounds() {
        let fixture = Fixture::new(two_agent_world());
        let mut atoms = fixture.world_atoms("alice");
        atoms.push(world_atom("tom:dyad:alice:bob:trust", 0.6));
        atoms.push(
            AtomBuilder::belief("mem:event:alice:e1")
                .subject("bob")
                .target("alice")
                .magnitude(1.0)
                .confidence(1.0)
                .tag("hostile")
                .build()
                .expect("memory"),
        );
        let index = AtomIndex::new(&atoms);
        let out = belief_bias(&index, &fixture.ctx("alice")).expect("bias");
        let trust = out
            .atoms
            .iter()
            .find(|atom| atom.id == "tom:dyad:alice:bob:trust")
            .expect("biased trust");
        assert!((trust.magnitude - 0.3).abs() < 1e-9);
        assert!(out.atoms.iter().any(|atom| atom.id == "tom:base:dyad:alice:bob:trust"));
    }

    #[test]
    fn policies_follow_dyads() {
        let fixture = Fixture::new(two_agent_world());
        let mut atoms = fixture.world_atoms("alice");
        atoms.push(world_atom("tom:dyad:alice:bob:trust", 0.9));
        atoms.push(world_atom("tom:dyad:alice:bob:threat", 0.0));
        atoms.push(world_atom("tom:dyad:alice:bob:intimacy", 0.8));
        let index = AtomIndex::new(&atoms);
        let out = derive_policies(&index, &fixture.ctx("alice")).expect("policies");
        assert_eq!(out.atoms.len(), POLICIES.len());
        let merged = merge_atoms_prefer_newer(&atoms, &out.atoms).atoms;
        let index = AtomIndex::new(&merged);
        let (approach, id) = strongest_policy(&index, "alice", "approach").expect("approach");
        assert_eq!(id, "tom:policy:alice:bob:approach");
        assert!(approach > index.value_or("tom:policy:alice:bob:avoid", 1.0));
    }
}
