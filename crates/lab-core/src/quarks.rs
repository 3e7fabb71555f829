//! S1: regroup atoms by their stable `code`. No new facts.

use std::collections::BTreeMap;

use contracts::{ContextAtom, QuarkFrame};

pub fn quark_frames(atoms: &[ContextAtom]) -> Vec<QuarkFrame> {
    let mut groups: BTreeMap<&str, Vec<&ContextAtom>> = BTreeMap::new();
    for atom in atoms {
        if let Some(code) = atom.code.as_deref() {
            groups.entry(code).or_default().push(atom);
        }
    }

    groups
        .into_iter()
        .map(|(code, members)| QuarkFrame {
            code: code.to_string(),
            mean_magnitude: members.iter().map(|atom| atom.magnitude).sum::<f64>()
                / members.len() as f64,
            atom_ids: members.into_iter().map(|atom| atom.id.clone()).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::world_atom;

    #[test]
    fn atoms_group_by_code_in_code_order() {
        let mut uncoded = world_atom("ctx:cover", 0.9);
        uncoded.code = None;
        let atoms = vec![
            world_atom("rel:base:a:b:closeness", 0.2),
            world_atom("ctx:danger", 0.4),
            world_atom("rel:base:a:c:closeness", 0.6),
            uncoded,
        ];
        let frames = quark_frames(&atoms);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].code, "ctx.ctx_danger");
        assert_eq!(frames[1].code, "rel.rel_base");
        assert_eq!(frames[1].atom_ids.len(), 2);
        assert!((frames[1].mean_magnitude - 0.4).abs() < 1e-12);
    }
}
