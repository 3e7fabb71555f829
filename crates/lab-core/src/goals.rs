//! S7 goal ecology.
//!
//! Domain goals are the single source of truth: a logit over driver
//! pressures per domain. The ecology view, planning ranking, action links and
//! the `util:goal:*` and `util:link:*` projections are all read off those
//! energies.

use std::collections::BTreeMap;
use std::fmt;

use contracts::{AtomBuilder, AtomError, PossibilityKind};

use crate::atoms::{ids, round4, settled, sigmoid, AtomIndex, Inputs};
use crate::drivers::DriverKind;
use crate::stage::{Derivation, StageContext};

pub const PLAN_DEPTH: usize = 3;
pub const LINK_THRESHOLD: f64 = 0.2;
pub const EXECUTE_THRESHOLD: f64 = 0.6;
pub const QUEUE_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GoalDomain {
    Safety,
    Affiliation,
    Status,
    Autonomy,
    Rest,
    Care,
    Exploration,
}

impl GoalDomain {
    pub const ALL: [GoalDomain; 7] = [
        GoalDomain::Safety,
        GoalDomain::Affiliation,
        GoalDomain::Status,
        GoalDomain::Autonomy,
        GoalDomain::Rest,
        GoalDomain::Care,
        GoalDomain::Exploration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GoalDomain::Safety => "safety",
            GoalDomain::Affiliation => "affiliation",
            GoalDomain::Status => "status",
            GoalDomain::Autonomy => "autonomy",
            GoalDomain::Rest => "rest",
            GoalDomain::Care => "care",
            GoalDomain::Exploration => "exploration",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|domain| domain.as_str() == raw)
    }

    /// (primary, secondary, inhibitor) drivers.
    pub fn drivers(self) -> (DriverKind, DriverKind, DriverKind) {
        use DriverKind as D;
        match self {
            GoalDomain::Safety => (D::Safety, D::Autonomy, D::Dominance),
            GoalDomain::Affiliation => (D::Affiliation, D::Care, D::Safety),
            GoalDomain::Status => (D::Dominance, D::Autonomy, D::Care),
            GoalDomain::Autonomy => (D::Autonomy, D::Dominance, D::Affiliation),
            GoalDomain::Rest => (D::Rest, D::Safety, D::Curiosity),
            GoalDomain::Care => (D::Care, D::Affiliation, D::Dominance),
            GoalDomain::Exploration => (D::Curiosity, D::Autonomy, D::Safety),
        }
    }

    /// Name of the same goal in the ecology view.
    pub fn eco_name(self) -> &'static str {
        match self {
            GoalDomain::Safety => "survive",
            GoalDomain::Affiliation => "bond",
            GoalDomain::Status => "dominate",
            GoalDomain::Autonomy => "escape_control",
            GoalDomain::Rest => "recover",
            GoalDomain::Care => "protect_other",
            GoalDomain::Exploration => "explore",
        }
    }
}

impl fmt::Display for GoalDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcoMode {
    Execute,
    Queue,
    Drop,
}

impl EcoMode {
    pub fn for_energy(energy: f64) -> Self {
        if energy >= EXECUTE_THRESHOLD {
            EcoMode::Execute
        } else if energy >= QUEUE_THRESHOLD {
            EcoMode::Queue
        } else {
            EcoMode::Drop
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EcoMode::Execute => "execute",
            EcoMode::Queue => "queue",
            EcoMode::Drop => "drop",
        }
    }
}

/// How much an action moves each goal domain, in [-1, 1].
pub fn goal_effects(kind: PossibilityKind) -> &'static [(GoalDomain, f64)] {
    use GoalDomain as G;
    match kind {
        PossibilityKind::Hide => &[
            (G::Safety, 0.6),
            (G::Autonomy, -0.1),
            (G::Status, -0.2),
            (G::Exploration, -0.2),
            (G::Rest, 0.1),
        ],
        PossibilityKind::Escape => &[
            (G::Safety, 0.8),
            (G::Autonomy, 0.2),
            (G::Status, -0.3),
            (G::Affiliation, -0.2),
            (G::Rest, -0.2),
        ],
        PossibilityKind::Rest => &[(G::Rest, 0.8), (G::Safety, -0.1), (G::Exploration, -0.1)],
        PossibilityKind::Wait => &[(G::Rest, 0.2), (G::Safety, 0.1)],
        PossibilityKind::Observe => &[(G::Exploration, 0.6), (G::Safety, 0.2)],
        PossibilityKind::Talk => &[(G::Affiliation, 0.5), (G::Exploration, 0.3), (G::Status, 0.1)],
        PossibilityKind::Help => &[(G::Care, 0.7), (G::Affiliation, 0.3), (G::Rest, -0.2)],
        PossibilityKind::Comfort => &[(G::Care, 0.6), (G::Affiliation, 0.4)],
        PossibilityKind::ShareSecret => &[
            (G::Affiliation, 0.7),
            (G::Safety, -0.2),
            (G::Autonomy, -0.1),
        ],
        PossibilityKind::Avoid => &[(G::Safety, 0.4), (G::Autonomy, 0.3), (G::Affiliation, -0.3)],
        PossibilityKind::Attack => &[
            (G::Status, 0.6),
            (G::Safety, 0.3),
            (G::Care, -0.6),
            (G::Affiliation, -0.5),
            (G::Autonomy, 0.3),
        ],
    }
}

pub fn domain_energy(primary: f64, secondary: f64, inhibitor: f64) -> f64 {
    sigmoid(-1.5 + 3.0 * primary + 0.8 * secondary - 0.6 * inhibitor)
}

/// Goal energies keyed by domain name, read from the `util:goal:*` projection.
pub fn goal_energy(index: &AtomIndex<'_>, agent_id: &str) -> BTreeMap<String, f64> {
    let prefix = ids::util_goal_prefix(agent_id);
    index
        .prefixed(&prefix)
        .filter_map(|atom| {
            let domain = atom.id.strip_prefix(&prefix)?;
            Some((domain.to_string(), atom.magnitude))
        })
        .collect()
}

pub fn derive_goals(index: &AtomIndex<'_>, ctx: &StageContext<'_>) -> Result<Derivation, AtomError> {
    let self_id = ctx.agent_id;
    let mut out = Derivation::new();
    out.qualifying = index.prefixed("drv:").count();

    let mut energies: Vec<(GoalDomain, f64)> = Vec::with_capacity(GoalDomain::ALL.len());
    for domain in GoalDomain::ALL {
        let (primary, secondary, inhibitor) = domain.drivers();
        let mut inputs = Inputs::new();
        let p = inputs.read(index, &ids::drv(primary.as_str(), self_id));
        let s = inputs.read(index, &ids::drv(secondary.as_str(), self_id));
        let h = inputs.read(index, &ids::drv(inhibitor.as_str(), self_id));
        let computed = domain_energy(p, s, h);
        let id = ids::goal_domain(self_id, domain.as_str());
        energies.push((domain, settled(index, &id, computed)));
        if index.is_pinned(&id) {
            continue;
        }
        let mut builder = AtomBuilder::derived(id)
            .source("goals")
            .kind("goal_domain")
            .subject(self_id.to_string())
            .magnitude(computed)
            .part("primary", round4(p))
            .part("secondary", round4(s))
            .part("inhibitor", round4(h));
        builder = if inputs.is_empty() {
            builder.note("no driver pressure; resting energy")
        } else {
            builder.uses_all(inputs.into_ids())
        };
        out.push(builder.build()?);
    }

    for (domain, energy) in &energies {
        let id = ids::goal_eco(self_id, domain.eco_name());
        if index.is_pinned(&id) {
            continue;
        }
        let mode = EcoMode::for_energy(*energy);
        out.push(
            AtomBuilder::derived(id)
                .source("goals")
                .kind("goal_eco")
                .subject(self_id.to_string())
                .magnitude(*energy)
                .uses(ids::goal_domain(self_id, domain.as_str()))
                .tag(mode.as_str())
                .part("mode", mode.as_str())
                .build()?,
        );
    }

    // Strongest planned pull on each action, with the links it came from.
    let mut pulls: BTreeMap<PossibilityKind, (f64, Vec<String>)> = BTreeMap::new();
    let mut ranked = energies.clone();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (rank, (domain, energy)) in ranked.iter().take(PLAN_DEPTH).enumerate() {
        let domain_id = ids::goal_domain(self_id, domain.as_str());
        let plan_id = ids::goal_plan(self_id, domain.as_str());
        if !index.is_pinned(&plan_id) {
            out.push(
                AtomBuilder::derived(plan_id)
                    .source("goals")
                    .kind("goal_plan")
                    .subject(self_id.to_string())
                    .magnitude(*energy)
                    .uses(domain_id.clone())
                    .part("rank", rank + 1)
                    .build()?,
            );
        }
        for kind in PossibilityKind::ALL {
            let link_id = ids::goal_link(self_id, domain.as_str(), kind.as_str());
            let pinned = index.is_pinned(&link_id);
            let effect = goal_effects(kind)
                .iter()
                .find(|(target, _)| target == domain)
                .map_or(0.0, |(_, effect)| *effect);
            if !pinned && effect <= LINK_THRESHOLD {
                continue;
            }
            let strength = settled(index, &link_id, effect);
            let pull = pulls.entry(kind).or_insert((0.0, Vec::new()));
            pull.0 = f64::max(pull.0, strength * energy);
            pull.1.push(link_id.clone());
            if pinned {
                continue;
            }
            out.push(
                AtomBuilder::derived(link_id)
                    .source("goals")
                    .kind("goal_link")
                    .subject(self_id.to_string())
                    .magnitude(effect)
                    .uses(domain_id.clone())
                    .part("action", kind.as_str())
                    .part("energy", round4(*energy))
                    .build()?,
            );
        }
    }

    // Utility projection: the only goal-layer atoms the action layer may cite.
    for (domain, energy) in &energies {
        let id = ids::util_goal(self_id, domain.as_str());
        if index.is_pinned(&id) {
            continue;
        }
        out.push(
            AtomBuilder::derived(id)
                .source("goals")
                .kind("util_goal")
                .subject(self_id.to_string())
                .magnitude(*energy)
                .uses(ids::goal_domain(self_id, domain.as_str()))
                .build()?,
        );
    }
    for (kind, (pull, link_ids)) in pulls {
        let id = ids::util_link(self_id, kind.as_str());
        if index.is_pinned(&id) {
            continue;
        }
        out.push(
            AtomBuilder::derived(id)
                .source("goals")
                .kind("util_link")
                .subject(self_id.to_string())
                .magnitude(pull)
                .uses_all(link_ids)
                .part("action", kind.as_str())
                .build()?,
        );
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{two_agent_world, world_atom, Fixture};
    use crate::merge::merge_atoms_prefer_newer;

    #[test]
    fn energy_is_a_driver_logit() {
        assert!((domain_energy(0.0, 0.0, 0.0) - sigmoid(-1.5)).abs() < 1e-12);
        assert!(domain_energy(1.0, 0.0, 0.0) > domain_energy(1.0, 0.0, 1.0));
        assert_eq!(EcoMode::for_energy(0.7), EcoMode::Execute);
        assert_eq!(EcoMode::for_energy(0.3), EcoMode::Queue);
        assert_eq!(EcoMode::for_energy(0.1), EcoMode::Drop);
    }

    #[test]
    fn safety_pressure_leads_the_plan_and_projects_to_util() {
        let fixture = Fixture::new(two_agent_world());
        let mut atoms = fixture.world_atoms("alice");
        atoms.push(world_atom("drv:safety:alice", 0.9));
        let index = AtomIndex::new(&atoms);
        let out = derive_goals(&index, &fixture.ctx("alice")).expect("goals");
        let merged = merge_atoms_prefer_newer(&atoms, &out.atoms).atoms;
        let index = AtomIndex::new(&merged);

        let plan = index.get("goal:plan:alice:safety").expect("plan");
        assert_eq!(plan.trace.as_ref().and_then(|t| t.parts.get("rank")), Some(&serde_json::json!(1)));
        assert!(index.contains("goal:link:alice:safety:escape"));
        assert!(index.contains("goal:eco:alice:survive"));
        let energy = goal_energy(&index, "alice");
        assert_eq!(energy.len(), GoalDomain::ALL.len());
        assert!(energy["safety"] > energy["rest"]);
        let util = index.get("util:goal:alice:safety").expect("util");
        assert_eq!(util.used_atom_ids(), ["goal:domain:alice:safety".to_string()]);
        let pull = index.get("util:link:alice:escape").expect("escape pull");
        assert!(pull
            .used_atom_ids()
            .contains(&"goal:link:alice:safety:escape".to_string()));
        assert!((pull.magnitude - 0.8 * energy["safety"]).abs() < 1e-9);
    }

    #[test]
    fn pinned_link_sets_the_action_pull() {
        let fixture = Fixture::new(two_agent_world());
        let pull_with_link = |strength: f64| {
            let mut atoms = fixture.world_atoms("alice");
            atoms.push(world_atom("drv:safety:alice", 0.9));
            let mut link = world_atom("goal:link:alice:safety:rest", strength);
            link.tags.insert(contracts::OVERRIDE_TAG.to_string());
            atoms.push(link);
            let index = AtomIndex::new(&atoms);
            let out = derive_goals(&index, &fixture.ctx("alice")).expect("goals");
            assert!(out.atoms.iter().all(|atom| atom.id != "goal:link:alice:safety:rest"));
            out.atoms
                .iter()
                .find(|atom| atom.id == "util:link:alice:rest")
                .map(|atom| atom.magnitude)
        };
        let low = pull_with_link(0.0).expect("pinned link still projects");
        let high = pull_with_link(1.0).expect("pull");
        assert!(high > low);
        assert!(high > 0.5);
    }

    #[test]
    fn every_action_has_a_positive_effect() {
        for kind in PossibilityKind::ALL {
            assert!(goal_effects(kind).iter().any(|(_, effect)| *effect > 0.0), "{kind}");
        }
    }
}
