//! Action costs: a five-component vector per possibility, scalarized with
//! configurable weights.

use contracts::{
    AtomBuilder, AtomError, ContextAtom, CostVector, CostWeights, Possibility, PossibilityKind,
};
use serde_json::json;

use crate::atoms::{ids, round4, AtomIndex, Inputs};

/// Situation terms every cost formula draws from.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostInputs {
    pub fatigue: f64,
    pub pain: f64,
    pub time_pressure: f64,
    pub publicness: f64,
    pub surveillance: f64,
    pub procedural_strict: f64,
    /// Threat of the target when there is one, otherwise appraised threat.
    pub threat: f64,
}

pub fn cost_vector(kind: PossibilityKind, c: &CostInputs) -> CostVector {
    let (time, energy, social, risk, moral) = match kind {
        PossibilityKind::Hide => (
            0.3 + 0.4 * c.time_pressure,
            0.1 + 0.2 * c.fatigue,
            0.2 * c.publicness,
            0.1 + 0.2 * c.surveillance,
            0.0,
        ),
        PossibilityKind::Escape => (
            0.4 + 0.3 * c.time_pressure,
            0.4 + 0.4 * c.fatigue + 0.2 * c.pain,
            0.2 * c.publicness,
            0.2 + 0.3 * c.threat,
            0.0,
        ),
        PossibilityKind::Rest => (
            0.5 + 0.4 * c.time_pressure,
            0.0,
            0.1 * c.publicness,
            0.4 * c.threat,
            0.0,
        ),
        PossibilityKind::Wait => (0.3 + 0.5 * c.time_pressure, 0.05, 0.05, 0.2 * c.threat, 0.0),
        PossibilityKind::Observe => (
            0.2 + 0.3 * c.time_pressure,
            0.1 + 0.1 * c.fatigue,
            0.1 * c.surveillance,
            0.1 + 0.2 * c.threat,
            0.0,
        ),
        PossibilityKind::Talk => (
            0.2 + 0.2 * c.time_pressure,
            0.1 + 0.1 * c.fatigue,
            0.1 + 0.2 * c.publicness,
            0.3 * c.threat,
            0.0,
        ),
        PossibilityKind::Help => (
            0.3 + 0.2 * c.time_pressure,
            0.3 + 0.3 * c.fatigue + 0.2 * c.pain,
            0.1,
            0.2 * c.threat,
            0.0,
        ),
        PossibilityKind::Comfort => (
            0.2 + 0.2 * c.time_pressure,
            0.1 + 0.1 * c.fatigue,
            0.1 + 0.2 * c.publicness,
            0.2 * c.threat,
            0.0,
        ),
        PossibilityKind::ShareSecret => (
            0.2,
            0.05,
            0.2 + 0.5 * c.publicness + 0.3 * c.surveillance,
            0.3 + 0.3 * c.threat,
            0.1,
        ),
        PossibilityKind::Avoid => (
            0.1 + 0.1 * c.time_pressure,
            0.1 + 0.1 * c.fatigue,
            0.2 + 0.2 * c.publicness,
            0.1,
            0.05,
        ),
        PossibilityKind::Attack => (
            0.2 + 0.1 * c.time_pressure,
            0.4 + 0.3 * c.fatigue + 0.2 * c.pain,
            0.3 + 0.4 * c.publicness + 0.3 * c.surveillance,
            0.4 + 0.4 * c.threat,
            0.6 + 0.4 * c.procedural_strict,
        ),
    };
    CostVector {
        time: time.clamp(0.0, 1.0),
        energy: energy.clamp(0.0, 1.0),
        social: social.clamp(0.0, 1.0),
        risk: risk.clamp(0.0, 1.0),
        moral: moral.clamp(0.0, 1.0),
    }
}

/// Weighted mean of the components.
pub fn scalarize(vector: &CostVector, weights: &CostWeights) -> f64 {
    let total = weights.total();
    if total <= 0.0 {
        return 0.0;
    }
    (weights.time * vector.time
        + weights.energy * vector.energy
        + weights.social * vector.social
        + weights.risk * vector.risk
        + weights.moral * vector.moral)
        / total
}

pub fn is_pruned(possibility: &Possibility, prune_magnitude: f64) -> bool {
    !possibility.enabled && possibility.magnitude < prune_magnitude
}

fn cost_inputs(index: &AtomIndex<'_>, agent_id: &str, target: Option<&str>) -> (CostInputs, Inputs) {
    let mut i = Inputs::new();
    let mut inputs = CostInputs {
        fatigue: i.read(index, &ids::feat_body(agent_id, "fatigue")),
        pain: i.read(index, &ids::feat_body(agent_id, "pain")),
        time_pressure: i.read(index, &ids::ctx("timePressure")),
        publicness: i.read(index, &ids::ctx("publicness")),
        surveillance: i.read(index, &ids::ctx("surveillance")),
        procedural_strict: i.read(index, &ids::ctx("proceduralStrict")),
        threat: 0.0,
    };
    let dyad = target.map(|other| ids::tom_dyad(agent_id, other, "threat"));
    inputs.threat = match dyad.filter(|id| index.contains(id)) {
        Some(id) => i.read(index, &id),
        None => i.read(index, &ids::app("threat", agent_id)),
    };
    (inputs, i)
}

/// Cost every possibility that is not pruned; returns the `cost:*` atoms.
pub fn derive_costs(
    index: &AtomIndex<'_>,
    agent_id: &str,
    weights: &CostWeights,
    prune_magnitude: f64,
    possibilities: &mut [Possibility],
) -> Result<Vec<ContextAtom>, AtomError> {
    let mut atoms = Vec::new();
    for possibility in possibilities.iter_mut() {
        if is_pruned(possibility, prune_magnitude) {
            continue;
        }
        let (inputs, mut used) = cost_inputs(index, agent_id, possibility.target_id.as_deref());
        let vector = cost_vector(possibility.kind, &inputs);
        let scalar = scalarize(&vector, weights);
        possibility.cost = Some(scalar);
        used.push(&possibility.id);

        let mut builder = AtomBuilder::derived(ids::cost(&possibility.key()))
            .source("cost")
            .kind("action_cost")
            .subject(agent_id.to_string())
            .magnitude(scalar)
            .uses_all(used.into_ids())
            .part(
                "vector",
                json!({
                    "time": round4(vector.time),
                    "energy": round4(vector.energy),
                    "social": round4(vector.social),
                    "risk": round4(vector.risk),
                    "moral": round4(vector.moral),
                }),
            )
            .part("threat", round4(inputs.threat));
        if let Some(target) = &possibility.target_id {
            builder = builder.target(target.clone());
        }
        atoms.push(builder.build()?);
    }
    Ok(atoms)
}
