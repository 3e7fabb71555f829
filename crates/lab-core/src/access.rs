//! Access control over possibilities: actions that need an item the agent
//! cannot reach stay listed but disabled.

use contracts::{AtomBuilder, AtomError, ContextAtom, Possibility, PossibilityKind};

use crate::atoms::{ids, round4, AtomIndex};

/// Magnitude left on an affordance the agent lacks the means for.
pub const NO_ACCESS_MAGNITUDE: f64 = 0.02;

/// Item each kind requires, if any.
pub fn required_access(kind: PossibilityKind) -> Option<&'static str> {
    match kind {
        PossibilityKind::Attack => Some("weapon"),
        _ => None,
    }
}

/// Gate possibilities on `access:<kind>:<self>`. Returns the constraint atoms.
pub fn apply_access(
    index: &AtomIndex<'_>,
    agent_id: &str,
    threshold: f64,
    possibilities: &mut [Possibility],
) -> Result<Vec<ContextAtom>, AtomError> {
    let mut constraints: Vec<ContextAtom> = Vec::new();
    for possibility in possibilities.iter_mut() {
        let Some(item) = required_access(possibility.kind) else {
            continue;
        };
        let access_id = ids::access(item, agent_id);
        let level = index.value_or(&access_id, 0.0);
        if index.contains(&access_id) && !possibility.why_atom_ids.contains(&access_id) {
            possibility.why_atom_ids.push(access_id.clone());
        }
        if level >= threshold {
            continue;
        }

        let constraint_id = ids::con_access_weapon(agent_id);
        if !constraints.iter().any(|atom| atom.id == constraint_id) {
            let mut builder = AtomBuilder::derived(constraint_id.clone())
                .source("access")
                .kind("con_access")
                .subject(agent_id.to_string())
                .magnitude(1.0 - level)
                .part("level", round4(level))
                .part("threshold", threshold);
            builder = if index.contains(&access_id) {
                builder.uses(access_id.clone())
            } else {
                builder.note(format!("no {item} access recorded"))
            };
            constraints.push(builder.build()?);
        }
        possibility.block(constraint_id);
        possibility.magnitude = NO_ACCESS_MAGNITUDE;
    }
    Ok(constraints)
}
