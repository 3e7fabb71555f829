//! Hazard geometry: how close the observer stands to each hazard in its location.

use contracts::{AtomBuilder, AtomError, Position};

use crate::atoms::{ids, part_f64, round4, AtomIndex};
use crate::stage::{Derivation, StageContext};

const SOURCE: &str = "hazard";

/// Full exposure at the hazard centre, fading to zero at twice its radius.
pub fn exposure(distance: f64, radius: f64, severity: f64) -> f64 {
    if radius <= 0.0 {
        return 0.0;
    }
    (1.0 - distance / (2.0 * radius)).clamp(0.0, 1.0) * severity
}

pub fn derive_hazards(
    index: &AtomIndex<'_>,
    ctx: &StageContext<'_>,
) -> Result<Derivation, AtomError> {
    let self_id = ctx.agent_id;
    let mut out = Derivation::new();
    let prefix = format!("world:hazard:{}:", ctx.location_id);
    let hazards: Vec<_> = index.prefixed(&prefix).collect();
    out.qualifying = hazards.len();
    if hazards.is_empty() {
        return Ok(out);
    }

    let pos_id = ids::world_pos(self_id);
    let Some(pos_atom) = index.get(&pos_id) else {
        out.warn(format!("no position atom for {self_id}; hazard geometry skipped"));
        return Ok(out);
    };
    let here = Position::new(
        part_f64(pos_atom, "x").unwrap_or(0.0),
        part_f64(pos_atom, "y").unwrap_or(0.0),
    );

    let mut worst = 0.0_f64;
    let mut all_used = vec![pos_id.clone()];
    for hazard in hazards {
        let Some(hazard_id) = hazard.id.strip_prefix(&prefix) else {
            continue;
        };
        all_used.push(hazard.id.clone());
        let centre = Position::new(
            part_f64(hazard, "x").unwrap_or(0.0),
            part_f64(hazard, "y").unwrap_or(0.0),
        );
        let radius = part_f64(hazard, "radius").unwrap_or(0.0);
        let distance = here.distance(&centre);
        let value = exposure(distance, radius, hazard.magnitude);
        worst = worst.max(value);
        if value <= 0.0 {
            continue;
        }
        out.push(
            AtomBuilder::derived(ids::haz_near(self_id, hazard_id))
                .source(SOURCE)
                .subject(self_id.to_string())
                .magnitude(value)
                .uses(pos_id.clone())
                .uses(hazard.id.clone())
                .part("distance", round4(distance))
                .part("radius", radius)
                .part("severity", hazard.magnitude)
                .build()?,
        );
    }

    out.push(
        AtomBuilder::derived(ids::haz_max(self_id))
            .source(SOURCE)
            .subject(self_id.to_string())
            .magnitude(worst)
            .uses_all(all_used)
            .build()?,
    );
    Ok(out)
}
