//! Social proximity: who is around and how they relate to the observer.

use contracts::{AtomBuilder, AtomError, RelationBase};
use serde_json::json;

use crate::atoms::{ids, round4, AtomIndex};
use crate::stage::{Derivation, StageContext};

const SOURCE: &str = "proximity";

/// Relation tags read as allied.
pub const ALLY_TAGS: [&str; 4] = ["friend", "lover", "family", "protected"];
const CROWD_SIZE: f64 = 6.0;

/// Relationship facts of self towards `other`, as visible in the atom set.
#[derive(Debug, Clone, Default)]
pub(crate) struct RelationView {
    pub base: RelationBase,
    pub used: Vec<String>,
    pub strength: f64,
}

pub(crate) fn relation_view(index: &AtomIndex<'_>, self_id: &str, other_id: &str) -> RelationView {
    let mut view = RelationView::default();
    let mut values = [0.0; 5];
    for (slot, metric) in RelationBase::METRICS.iter().enumerate() {
        let id = ids::rel_base(self_id, other_id, metric);
        if let Some(value) = index.magnitude(&id) {
            values[slot] = value;
            view.used.push(id);
        }
    }
    let tag_prefix = format!("rel:tag:{self_id}:{other_id}:");
    for atom in index.prefixed(&tag_prefix) {
        if let Some(tag) = atom.id.strip_prefix(&tag_prefix) {
            view.base.tags.push(tag.to_string());
            view.used.push(atom.id.clone());
        }
    }
    view.base.closeness = values[0];
    view.base.loyalty = values[1];
    view.base.hostility = values[2];
    view.base.dependency = values[3];
    view.base.authority = values[4];
    view.strength = values.iter().copied().fold(0.0, f64::max);
    view
}

impl RelationView {
    pub fn has_any_tag(&self, tags: &[&str]) -> bool {
        self.base.tags.iter().any(|tag| tags.contains(&tag.as_str()))
    }

    pub fn affinity(&self) -> f64 {
        let mut affinity = self.base.closeness.max(self.base.loyalty);
        if self.has_any_tag(&ALLY_TAGS) {
            affinity = affinity.max(0.8);
        }
        (affinity - self.base.hostility).max(0.0)
    }

    pub fn rivalry(&self) -> f64 {
        let mut hostility = self.base.hostility;
        if self.has_any_tag(&["rival"]) {
            hostility = hostility.max(0.8);
        }
        (hostility - 0.5 * self.base.closeness).max(0.0)
    }
}

/// Other agents with a closeness observation, with their proximity.
pub(crate) fn nearby_others(index: &AtomIndex<'_>, self_id: &str) -> Vec<(String, f64)> {
    let prefix = ids::obs_nearby_prefix(self_id);
    index
        .prefixed(&prefix)
        .filter(|atom| atom.id.ends_with(":closeness"))
        .filter_map(|atom| {
            ids::pair_other(&atom.id, &prefix).map(|other| (other.to_string(), atom.magnitude))
        })
        .collect()
}

pub fn derive_proximity(
    index: &AtomIndex<'_>,
    ctx: &StageContext<'_>,
) -> Result<Derivation, AtomError> {
    let self_id = ctx.agent_id;
    let mut out = Derivation::new();
    let nearby = nearby_others(index, self_id);
    out.qualifying = nearby.len();
    if nearby.is_empty() {
        return Ok(out);
    }

    let mut ally = (0.0_f64, Vec::new());
    let mut rival = (0.0_f64, Vec::new());
    let mut stranger = (0.0_f64, Vec::new());
    let mut all_used = Vec::new();

    for (other_id, proximity) in &nearby {
        let closeness_id = ids::obs_nearby(self_id, other_id, "closeness");
        all_used.push(closeness_id.clone());
        let relation = relation_view(index, self_id, other_id);
        let mut used = relation.used.clone();
        used.push(closeness_id);

        let ally_score = proximity * relation.affinity();
        if ally_score > ally.0 {
            ally = (ally_score, used.clone());
        }
        let rival_score = proximity * relation.rivalry();
        if rival_score > rival.0 {
            rival = (rival_score, used.clone());
        }
        if relation.strength < 0.05 && *proximity > stranger.0 {
            stranger = (*proximity, used);
        }
    }

    for (kind, (value, used)) in [("ally", ally), ("rival", rival), ("stranger", stranger)] {
        if used.is_empty() {
            continue;
        }
        out.push(
            AtomBuilder::derived(ids::prox(kind, self_id))
                .source(SOURCE)
                .subject(self_id.to_string())
                .magnitude(value)
                .uses_all(used)
                .part("value", round4(value))
                .build()?,
        );
    }

    let crowd = nearby.len() as f64 / CROWD_SIZE;
    out.push(
        AtomBuilder::derived(ids::prox("crowd", self_id))
            .source(SOURCE)
            .subject(self_id.to_string())
            .magnitude(crowd)
            .uses_all(all_used)
            .part("count", json!(nearby.len()))
            .build()?,
    );

    Ok(out)
}
