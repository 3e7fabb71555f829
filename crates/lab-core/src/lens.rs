//! S3 subjective lens: character biases distort the objective axes.

use contracts::{AtomBuilder, AtomError};

use crate::atoms::{ids, part_f64, round4, AtomIndex};
use crate::merge::base_copy_of;
use crate::stage::{Derivation, StageContext};

const SOURCE: &str = "lens";

/// (axis, trait, gain) for every lensed axis.
pub const LENS_TABLE: [(&str, &str, f64); 7] = [
    ("danger", "paranoia", 0.4),
    ("uncertainty", "paranoia", 0.3),
    ("surveillance", "paranoia", 0.3),
    ("control", "optimism", 0.3),
    ("hierarchy", "status_sensitivity", 0.4),
    ("publicness", "status_sensitivity", 0.2),
    ("intimacy", "intimacy_bias", 0.4),
];

/// Push `x` towards 1 for a positive bias and towards 0 for a negative one.
pub fn lens_shift(x: f64, bias: f64, gain: f64) -> f64 {
    let room = if bias > 0.0 { 1.0 - x } else { x };
    (x + gain * bias * room).clamp(0.0, 1.0)
}

pub fn derive_lens(index: &AtomIndex<'_>, ctx: &StageContext<'_>) -> Result<Derivation, AtomError> {
    let self_id = ctx.agent_id;
    let mut out = Derivation::new();

    for (axis, trait_name, gain) in LENS_TABLE {
        let trait_id = ids::lens_trait(self_id, trait_name);
        let Some(trait_atom) = index.get(&trait_id) else {
            continue;
        };
        let bias = part_f64(trait_atom, "raw").unwrap_or(trait_atom.magnitude * 2.0 - 1.0);
        if bias.abs() < 1e-9 {
            continue;
        }
        out.qualifying += 1;

        let bias_id = ids::lens_bias(self_id, axis);
        out.push(
            AtomBuilder::derived(bias_id.clone())
                .source(SOURCE)
                .subject(self_id.to_string())
                .magnitude((gain * bias).abs())
                .uses(trait_id.clone())
                .part("bias", round4(bias))
                .part("gain", gain)
                .part("trait", trait_name)
                .build()?,
        );

        let axis_id = ids::ctx(axis);
        let Some(objective) = index.get(&axis_id) else {
            continue;
        };
        if objective.is_pinned() {
            continue;
        }
        let perceived = lens_shift(objective.magnitude, bias, gain);
        if (perceived - objective.magnitude).abs() <= 1e-6 {
            continue;
        }

        let base = base_copy_of(objective)?;
        let base_id = base.id.clone();
        out.push(base);
        out.push(
            AtomBuilder::derived(axis_id)
                .source(SOURCE)
                .kind("ctx_axis")
                .magnitude(perceived)
                .confidence(objective.confidence)
                .uses(base_id)
                .uses(bias_id)
                .tag("lensed")
                .part("objective", round4(objective.magnitude))
                .part("perceived", round4(perceived))
                .build()?,
        );
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{two_agent_world, world_atom, Fixture};
    use contracts::OVERRIDE_TAG;

    #[test]
    fn shift_moves_towards_bias_and_stays_bounded() {
        assert!((lens_shift(0.5, 1.0, 0.4) - 0.7).abs() < 1e-12);
        assert!((lens_shift(0.5, -1.0, 0.4) - 0.3).abs() < 1e-12);
        assert_eq!(lens_shift(1.0, 1.0, 0.4), 1.0);
        assert_eq!(lens_shift(0.0, -1.0, 0.4), 0.0);
    }

    #[test]
    fn paranoid_observer_perceives_more_danger_with_base_copy() {
        let mut world = two_agent_world();
        world.agents[0].lens.paranoia = 1.0;
        let fixture = Fixture::new(world);
        let mut atoms = fixture.world_atoms("alice");
        atoms.push(world_atom("ctx:danger", 0.5));
        let index = AtomIndex::new(&atoms);
        let out = derive_lens(&index, &fixture.ctx("alice")).expect("lens");

        let base_position = out
            .atoms
            .iter()
            .position(|atom| atom.id == "ctx:base:danger")
            .expect("base copy");
        let lensed_position = out
            .atoms
            .iter()
            .position(|atom| atom.id == "ctx:danger")
            .expect("lensed axis");
        assert!(base_position < lensed_position);
        assert_eq!(out.atoms[base_position].magnitude, 0.5);
        assert!((out.atoms[lensed_position].magnitude - 0.7).abs() < 1e-9);
        assert!(out.atoms[lensed_position]
            .used_atom_ids()
            .contains(&"ctx:base:danger".to_string()));
    }

    #[test]
    fn pinned_axes_are_not_distorted() {
        let mut world = two_agent_world();
        world.agents[0].lens.paranoia = 1.0;
        let fixture = Fixture::new(world);
        let mut atoms = fixture.world_atoms("alice");
        let mut pinned = world_atom("ctx:danger", 0.5);
        pinned.tags.insert(OVERRIDE_TAG.to_string());
        atoms.push(pinned);
        let index = AtomIndex::new(&atoms);
        let out = derive_lens(&index, &fixture.ctx("alice")).expect("lens");
        assert!(!out.atoms.iter().any(|atom| atom.id.starts_with("ctx:")));
    }

    #[test]
    fn neutral_lens_changes_nothing() {
        let fixture = Fixture::new(two_agent_world());
        let mut atoms = fixture.world_atoms("alice");
        atoms.push(world_atom("ctx:danger", 0.5));
        let index = AtomIndex::new(&atoms);
        let out = derive_lens(&index, &fixture.ctx("alice")).expect("lens");
        assert!(out.atoms.is_empty());
        assert_eq!(out.qualifying, 0);
    }
}
