//! S2 context axes (`ctx:*`) from location features, proximity, hazards and memory.

use std::collections::BTreeMap;

use contracts::{AtomBuilder, AtomError};
use serde_json::json;

use crate::atoms::{ids, noisy_or, round4, settled, AtomIndex, Inputs};
use crate::memory::recall;
use crate::proximity::{nearby_others, relation_view};
use crate::stage::{Derivation, StageContext};

const SOURCE: &str = "axes";

pub const AXES: [&str; 14] = [
    "danger",
    "control",
    "intimacy",
    "hierarchy",
    "publicness",
    "surveillance",
    "proceduralStrict",
    "privacy",
    "scarcity",
    "timePressure",
    "uncertainty",
    "cover",
    "escape",
    "crowd",
];

/// Location feature key backing an axis, where the names differ.
fn feature_key(axis: &str) -> &str {
    match axis {
        "proceduralStrict" => "procedural_strict",
        "timePressure" => "time_pressure",
        other => other,
    }
}

struct AxisBuilder<'i, 'a> {
    index: &'i AtomIndex<'a>,
    ctx: &'i StageContext<'i>,
    values: BTreeMap<&'static str, f64>,
    out: Derivation,
}

impl<'i, 'a> AxisBuilder<'i, 'a> {
    fn loc(&self, inputs: &mut Inputs, axis: &str) -> Option<f64> {
        let id = ids::world_loc(self.ctx.location_id, feature_key(axis));
        self.index.get(&id).map(|atom| {
            inputs.push(&id);
            atom.magnitude
        })
    }

    fn axis(&self, inputs: &mut Inputs, axis: &str) -> f64 {
        inputs.push(&ids::ctx(axis));
        self.values.get(axis).copied().unwrap_or(0.0)
    }

    /// Emit one axis unless it is pinned; later axes read the settled value.
    fn emit(
        &mut self,
        axis: &'static str,
        computed: f64,
        inputs: Inputs,
        parts: serde_json::Value,
    ) -> Result<(), AtomError> {
        let id = ids::ctx(axis);
        let value = settled(self.index, &id, computed);
        self.values.insert(axis, value);
        if self.index.is_pinned(&id) {
            return Ok(());
        }
        let mut builder = AtomBuilder::derived(id)
            .source(SOURCE)
            .kind("ctx_axis")
            .magnitude(computed)
            .part("inputs", parts);
        if inputs.is_empty() {
            builder = builder.note("no evidence; axis at its default");
        } else {
            builder = builder.uses_all(inputs.into_ids());
        }
        self.out.push(builder.build()?);
        Ok(())
    }
}

pub fn derive_axes(index: &AtomIndex<'_>, ctx: &StageContext<'_>) -> Result<Derivation, AtomError> {
    let self_id = ctx.agent_id;
    let mut axes = AxisBuilder {
        index,
        ctx,
        values: BTreeMap::new(),
        out: Derivation::new(),
    };
    axes.out.qualifying = index
        .prefixed(&format!("world:loc:{}:", ctx.location_id))
        .count();

    for axis in [
        "publicness",
        "surveillance",
        "proceduralStrict",
        "scarcity",
        "cover",
        "escape",
    ] {
        let mut inputs = Inputs::new();
        let value = axes.loc(&mut inputs, axis).unwrap_or(0.0);
        axes.emit(axis, value, inputs, json!({ "location": round4(value) }))?;
    }

    let mut inputs = Inputs::new();
    let crowd = inputs.read(index, &ids::prox("crowd", self_id));
    axes.emit("crowd", crowd, inputs, json!({ "crowd": round4(crowd) }))?;

    let mut inputs = Inputs::new();
    let loc_danger = axes.loc(&mut inputs, "danger").unwrap_or(0.0);
    let hazard = inputs.read(index, &ids::haz_max(self_id));
    let rival = inputs.read(index, &ids::prox("rival", self_id));
    let memory = recall(index, self_id, None);
    for id in &memory.used {
        inputs.push(id);
    }
    let danger = noisy_or(&[loc_danger, 0.8 * hazard, 0.6 * memory.hostility, 0.5 * rival]);
    axes.emit(
        "danger",
        danger,
        inputs,
        json!({
            "location": round4(loc_danger),
            "hazard": round4(hazard),
            "memory": round4(memory.hostility),
            "rival": round4(rival),
        }),
    )?;

    let mut inputs = Inputs::new();
    let danger = axes.axis(&mut inputs, "danger");
    let loc_control = axes.loc(&mut inputs, "control").unwrap_or(0.0);
    let escape = axes.axis(&mut inputs, "escape");
    let control = 0.4 * (1.0 - danger) + 0.3 * loc_control + 0.3 * escape;
    axes.emit(
        "control",
        control,
        inputs,
        json!({ "danger": round4(danger), "location": round4(loc_control), "escape": round4(escape) }),
    )?;

    let mut inputs = Inputs::new();
    let publicness = axes.axis(&mut inputs, "publicness");
    let privacy = match axes.loc(&mut inputs, "privacy") {
        Some(value) => value,
        None => 1.0 - publicness,
    };
    axes.emit("privacy", privacy, inputs, json!({ "publicness": round4(publicness) }))?;

    let mut inputs = Inputs::new();
    let ally = inputs.read(index, &ids::prox("ally", self_id));
    let privacy = axes.axis(&mut inputs, "privacy");
    let intimacy = 0.7 * ally + 0.3 * privacy;
    axes.emit(
        "intimacy",
        intimacy,
        inputs,
        json!({ "ally": round4(ally), "privacy": round4(privacy) }),
    )?;

    let mut inputs = Inputs::new();
    let loc_hierarchy = axes.loc(&mut inputs, "hierarchy").unwrap_or(0.0);
    let mut present_authority = 0.0_f64;
    for (other_id, proximity) in nearby_others(index, self_id) {
        let relation = relation_view(index, self_id, &other_id);
        let weighted = relation.base.authority * proximity;
        if weighted > 0.0 {
            inputs.push(&ids::rel_base(self_id, &other_id, "authority"));
            inputs.push(&ids::obs_nearby(self_id, &other_id, "closeness"));
        }
        present_authority = present_authority.max(weighted);
    }
    let hierarchy = loc_hierarchy.max(present_authority);
    axes.emit(
        "hierarchy",
        hierarchy,
        inputs,
        json!({ "location": round4(loc_hierarchy), "authority": round4(present_authority) }),
    )?;

    let mut inputs = Inputs::new();
    let loc_pressure = axes.loc(&mut inputs, "timePressure").unwrap_or(0.0);
    let hazard = inputs.read(index, &ids::haz_max(self_id));
    let time_pressure = noisy_or(&[loc_pressure, 0.5 * hazard]);
    axes.emit(
        "timePressure",
        time_pressure,
        inputs,
        json!({ "location": round4(loc_pressure), "hazard": round4(hazard) }),
    )?;

    let mut inputs = Inputs::new();
    let loc_uncertainty = axes.loc(&mut inputs, "uncertainty").unwrap_or(0.0);
    let stranger = inputs.read(index, &ids::prox("stranger", self_id));
    let crowd = axes.axis(&mut inputs, "crowd");
    let uncertainty = noisy_or(&[loc_uncertainty, 0.6 * stranger, 0.2 * crowd]);
    axes.emit(
        "uncertainty",
        uncertainty,
        inputs,
        json!({ "stranger": round4(stranger), "crowd": round4(crowd) }),
    )?;

    Ok(axes.out)
}
