//! Structural checks over an atom set. Findings are warnings, never errors.

use std::collections::BTreeSet;

use contracts::{AtomNs, ContextAtom, StageStats, ValidationMode};

use crate::atoms::AtomIndex;

pub fn validate_atoms(atoms: &[ContextAtom], mode: ValidationMode) -> Vec<String> {
    let mut warnings = Vec::new();
    let index = AtomIndex::new(atoms);

    let mut seen = BTreeSet::new();
    for atom in atoms {
        if !seen.insert(atom.id.as_str()) {
            warnings.push(format!("duplicate atom id `{}`", atom.id));
        }
        if atom.used_atom_ids().iter().any(|used| used == &atom.id) {
            warnings.push(format!("atom `{}` cites itself in its trace", atom.id));
        }
    }

    for (action_id, goal_id) in goal_boundary_violations(&index) {
        warnings.push(format!(
            "action atom `{action_id}` reaches goal atom `{goal_id}` without a util projection"
        ));
    }

    if mode == ValidationMode::Strict {
        for atom in atoms {
            if !(0.0..=1.0).contains(&atom.magnitude) {
                warnings.push(format!(
                    "atom `{}` magnitude {} outside [0, 1]",
                    atom.id, atom.magnitude
                ));
            }
            if !(0.0..=1.0).contains(&atom.confidence) {
                warnings.push(format!(
                    "atom `{}` confidence {} outside [0, 1]",
                    atom.id, atom.confidence
                ));
            }
            if atom.code.is_none() {
                warnings.push(format!("atom `{}` has no code", atom.id));
            }
            if atom.is_derived() && atom.trace.is_none() {
                warnings.push(format!("derived atom `{}` has no trace", atom.id));
            }
            if AtomNs::from_id(&atom.id) != Some(atom.ns) {
                warnings.push(format!(
                    "atom `{}` carries namespace `{}` that disagrees with its id",
                    atom.id, atom.ns
                ));
            }
        }
    }

    warnings
}

/// Pairs of (action atom, goal atom) where the goal is reachable through the
/// trace closure. `util:*` atoms are the sanctioned projection, so traversal
/// does not descend into them.
pub fn goal_boundary_violations(index: &AtomIndex<'_>) -> Vec<(String, String)> {
    let mut violations = Vec::new();
    for atom in index.atoms().iter().filter(|atom| atom.ns == AtomNs::Action) {
        for goal_id in reachable_goals(index, &atom.id) {
            violations.push((atom.id.clone(), goal_id));
        }
    }
    violations
}

fn reachable_goals<'a>(index: &AtomIndex<'a>, start: &'a str) -> BTreeSet<String> {
    let mut goals = BTreeSet::new();
    let mut visited = BTreeSet::new();
    let mut stack = vec![start];
    while let Some(current) = stack.pop() {
        if !visited.insert(current) {
            continue;
        }
        let Some(atom) = index.get(current) else {
            continue;
        };
        for used in atom.used_atom_ids() {
            match AtomNs::from_id(used) {
                Some(AtomNs::Goal) => {
                    goals.insert(used.clone());
                }
                Some(AtomNs::Util) => {}
                _ => {
                    if let Some(next) = index.get(used) {
                        stack.push(next.id.as_str());
                    }
                }
            }
        }
    }

    goals
}

pub fn stage_stats(atoms: &[ContextAtom], new_count: usize, overridden_count: usize) -> StageStats {
    StageStats {
        atom_count: atoms.len(),
        new_count,
        overridden_count,
        missing_code: atoms.iter().filter(|atom| atom.code.is_none()).count(),
        derived_missing_trace: atoms
            .iter()
            .filter(|atom| atom.is_derived() && atom.trace.is_none())
            .count(),
    }
}
