//! Id-keyed atom merging where the newer atom wins outright.

use std::collections::BTreeMap;

use contracts::{AtomError, ContextAtom};

use crate::atoms::ids;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeResult {
    pub atoms: Vec<ContextAtom>,
    /// Ids absent from the old set, in first-appearance order.
    pub new_ids: Vec<String>,
    /// Ids present in both sets whose winning atom differs from the old one.
    pub overridden_ids: Vec<String>,
}

/// Merge `new` over `old`. Old order is kept with in-place replacement and
/// unseen ids are appended; a later duplicate inside `new` replaces an earlier one.
pub fn merge_atoms_prefer_newer(old: &[ContextAtom], new: &[ContextAtom]) -> MergeResult {
    let mut atoms = old.to_vec();
    let mut position: BTreeMap<String, usize> = atoms
        .iter()
        .enumerate()
        .map(|(index, atom)| (atom.id.clone(), index))
        .collect();
    let mut new_ids = Vec::new();

    for atom in new {
        match position.get(&atom.id) {
            Some(index) => atoms[*index] = atom.clone(),
            None => {
                position.insert(atom.id.clone(), atoms.len());
                new_ids.push(atom.id.clone());
                atoms.push(atom.clone());
            }
        }
    }

    let overridden_ids = old
        .iter()
        .zip(atoms.iter())
        .filter(|(before, after)| before != after)
        .map(|(before, _)| before.id.clone())
        .collect();

    MergeResult {
        atoms,
        new_ids,
        overridden_ids,
    }
}

/// Sibling copy at `ns:base:...` preserving the value an override is about to replace.
pub fn base_copy_of(atom: &ContextAtom) -> Result<ContextAtom, AtomError> {
    atom.relabelled(ids::base_of(&atom.id), "pre-override value")
}
