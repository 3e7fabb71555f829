//! S0: world observations, recalled beliefs and manual overrides as one atom set.

use contracts::{AgentState, AtomBuilder, AtomError, AtomNs, ContextAtom, OVERRIDE_TAG};
use serde_json::json;

use crate::atoms::{ids, round4};
use crate::stage::StageContext;

const SOURCE: &str = "canonical";

/// Beyond this distance another agent no longer counts as nearby.
pub const NEARBY_RANGE: f64 = 10.0;

pub fn world_atoms(ctx: &StageContext<'_>, agent: &AgentState) -> Result<Vec<ContextAtom>, AtomError> {
    let mut atoms = Vec::new();

    if let Some(location) = ctx.world.location(ctx.location_id) {
        for (feature, value) in &location.features {
            atoms.push(
                AtomBuilder::world(ids::world_loc(&location.id, feature))
                    .source(SOURCE)
                    .magnitude(*value)
                    .label(format!("{} {feature}", location.id))
                    .build()?,
            );
        }
        for hazard in &location.hazards {
            atoms.push(
                AtomBuilder::world(ids::world_hazard(&location.id, &hazard.id))
                    .source(SOURCE)
                    .magnitude(hazard.severity)
                    .tag(hazard.kind.clone())
                    .part("x", hazard.position.x)
                    .part("y", hazard.position.y)
                    .part("radius", hazard.radius)
                    .label(format!("hazard {} at {}", hazard.id, location.id))
                    .build()?,
            );
        }
    }

    atoms.push(
        AtomBuilder::world(ids::world_pos(&agent.id))
            .source(SOURCE)
            .subject(agent.id.clone())
            .magnitude(1.0)
            .part("x", agent.position.x)
            .part("y", agent.position.y)
            .build()?,
    );

    for other in ctx
        .world
        .agents
        .iter()
        .filter(|other| other.id != agent.id && other.location_id == agent.location_id)
    {
        let distance = agent.position.distance(&other.position);
        let closeness = 1.0 - distance / NEARBY_RANGE;
        if closeness <= 0.0 {
            continue;
        }
        atoms.push(
            AtomBuilder::world(ids::obs_nearby(&agent.id, &other.id, "closeness"))
                .source(SOURCE)
                .subject(agent.id.clone())
                .target(other.id.clone())
                .magnitude(closeness)
                .part("distance", round4(distance))
                .label(format!("{} is near", other.name))
                .build()?,
        );
        let armed = other.access.get("weapon").copied().unwrap_or(0.0);
        if armed > 0.0 {
            atoms.push(
                AtomBuilder::world(ids::obs_nearby(&agent.id, &other.id, "armed"))
                    .source(SOURCE)
                    .subject(agent.id.clone())
                    .target(other.id.clone())
                    .magnitude(armed)
                    .label(format!("{} carries a weapon", other.name))
                    .build()?,
            );
        }
    }

    for event in ctx
        .step
        .events
        .iter()
        .filter(|event| event.location_id == agent.location_id)
    {
        let mut builder = AtomBuilder::world(ids::obs_event(&event.id))
            .source(SOURCE)
            .subject(event.actor_id.clone())
            .magnitude(event.magnitude)
            .tag(event.kind.clone())
            .part("kind", event.kind.clone())
            .part("tick", event.tick)
            .label(format!("{} did {}", event.actor_id, event.kind));
        if let Some(target) = &event.target_id {
            builder = builder.target(target.clone());
        }
        atoms.push(builder.build()?);
    }

    for (name, value) in &agent.features {
        atoms.push(
            AtomBuilder::world(ids::feat_body(&agent.id, name))
                .source(SOURCE)
                .subject(agent.id.clone())
                .magnitude(*value)
                .build()?,
        );
    }

    for (other_id, relation) in &agent.relations {
        for metric in contracts::RelationBase::METRICS {
            atoms.push(
                AtomBuilder::world(ids::rel_base(&agent.id, other_id, metric))
                    .source(SOURCE)
                    .subject(agent.id.clone())
                    .target(other_id.clone())
                    .magnitude(relation.metric(metric))
                    .build()?,
            );
        }
        for tag in &relation.tags {
            atoms.push(
                AtomBuilder::world(ids::rel_tag(&agent.id, other_id, tag))
                    .source(SOURCE)
                    .subject(agent.id.clone())
                    .target(other_id.clone())
                    .magnitude(1.0)
                    .tag(tag.clone())
                    .build()?,
            );
        }
    }

    for (kind, level) in &agent.access {
        atoms.push(
            AtomBuilder::world(ids::access(kind, &agent.id))
                .source(SOURCE)
                .subject(agent.id.clone())
                .magnitude(*level)
                .build()?,
        );
    }

    for name in contracts::LensProfile::TRAITS {
        let raw = agent.lens.trait_value(name).clamp(-1.0, 1.0);
        atoms.push(
            AtomBuilder::world(ids::lens_trait(&agent.id, name))
                .source(SOURCE)
                .subject(agent.id.clone())
                .magnitude((raw + 1.0) / 2.0)
                .part("raw", raw)
                .build()?,
        );
    }

    Ok(atoms)
}

/// Overrides merge last; the tag pins them against later recomputation.
/// Overrides arrive as raw atoms, so the id rules are checked here again.
pub fn pin_overrides(overrides: &[ContextAtom]) -> Result<Vec<ContextAtom>, AtomError> {
    overrides
        .iter()
        .cloned()
        .map(|mut atom| {
            if atom.id.trim().is_empty() {
                return Err(AtomError::EmptyId);
            }
            atom.ns = AtomNs::from_id(&atom.id).ok_or_else(|| AtomError::UnknownNamespace {
                id: atom.id.clone(),
            })?;
            if atom.used_atom_ids().contains(&atom.id) {
                return Err(AtomError::SelfReference { id: atom.id });
            }
            atom.tags.insert(OVERRIDE_TAG.to_string());
            atom.trace
                .get_or_insert_with(Default::default)
                .parts
                .insert("override".to_string(), json!(true));
            Ok(atom)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::AtomIndex;
    use crate::fixtures::{agent_at, two_agent_world, Fixture};

    #[test]
    fn nearby_others_become_closeness_observations() {
        let fixture = Fixture::new(two_agent_world());
        let index_atoms = fixture.world_atoms("alice");
        let index = AtomIndex::new(&index_atoms);
        let closeness = index
            .magnitude("obs:nearby:alice:bob:closeness")
            .expect("bob observed");
        assert!((closeness - 0.8).abs() < 1e-9);
        assert!(index.contains("rel:base:alice:bob:hostility"));
        assert!(index.contains("lens:trait:alice:paranoia"));
        assert!(index.contains("world:loc:yard:danger"));
    }

    #[test]
    fn far_agents_are_not_observed() {
        let mut world = two_agent_world();
        world.agents.push(agent_at("carol", "yard", 30.0, 0.0));
        let fixture = Fixture::new(world);
        let atoms = fixture.world_atoms("alice");
        assert!(!atoms.iter().any(|atom| atom.id.contains("carol")));
    }

    #[test]
    fn overrides_are_pinned() {
        let atom = AtomBuilder::world("ctx:danger")
            .magnitude(0.9)
            .build()
            .expect("atom");
        let pinned = pin_overrides(&[atom]).expect("pinned");
        assert!(pinned[0].is_pinned());
    }

    #[test]
    fn malformed_overrides_are_rejected() {
        let mut atom = AtomBuilder::world("ctx:danger")
            .magnitude(0.9)
            .build()
            .expect("atom");
        atom.id = "weather:storm".to_string();
        let err = pin_overrides(&[atom]).expect_err("unknown namespace");
        assert!(matches!(err, AtomError::UnknownNamespace { .. }));
    }
}
