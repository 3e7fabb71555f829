//! Read-side helpers over an accumulated atom set, id formatters and scalar math.

use std::collections::BTreeMap;
use std::ops::Bound;

use contracts::ContextAtom;

/// Borrowed id lookup over an atom slice. Later duplicates shadow earlier ones.
#[derive(Debug)]
pub struct AtomIndex<'a> {
    atoms: &'a [ContextAtom],
    by_id: BTreeMap<&'a str, usize>,
}

impl<'a> AtomIndex<'a> {
    pub fn new(atoms: &'a [ContextAtom]) -> Self {
        let by_id = atoms
            .iter()
            .enumerate()
            .map(|(index, atom)| (atom.id.as_str(), index))
            .collect();
        Self { atoms, by_id }
    }

    pub fn atoms(&self) -> &'a [ContextAtom] {
        self.atoms
    }

    pub fn get(&self, id: &str) -> Option<&'a ContextAtom> {
        self.by_id.get(id).map(|index| &self.atoms[*index])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn magnitude(&self, id: &str) -> Option<f64> {
        self.get(id).map(|atom| atom.magnitude)
    }

    pub fn value_or(&self, id: &str, default: f64) -> f64 {
        self.magnitude(id).unwrap_or(default)
    }

    pub fn is_pinned(&self, id: &str) -> bool {
        self.get(id).is_some_and(ContextAtom::is_pinned)
    }

    /// Atoms whose id starts with `prefix`, in id order.
    pub fn prefixed<'p>(&'p self, prefix: &'p str) -> impl Iterator<Item = &'a ContextAtom> + 'p {
        let atoms = self.atoms;
        self.by_id
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(id, _)| id.starts_with(prefix))
            .map(move |(_, index)| &atoms[*index])
    }
}

/// Records which atoms an enricher read, so the trace cites exactly its inputs.
#[derive(Debug, Default)]
pub struct Inputs {
    used: Vec<String>,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a magnitude, remembering the id when it exists.
    pub fn read(&mut self, index: &AtomIndex<'_>, id: &str) -> f64 {
        match index.get(id) {
            Some(atom) => {
                self.push(id);
                atom.magnitude
            }
            None => 0.0,
        }
    }

    pub fn read_or(&mut self, index: &AtomIndex<'_>, id: &str, default: f64) -> f64 {
        match index.get(id) {
            Some(atom) => {
                self.push(id);
                atom.magnitude
            }
            None => default,
        }
    }

    pub fn push(&mut self, id: &str) {
        if !self.used.iter().any(|used| used == id) {
            self.used.push(id.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.used
    }

    pub fn into_ids(self) -> Vec<String> {
        self.used
    }
}

pub fn noisy_or(values: &[f64]) -> f64 {
    1.0 - values
        .iter()
        .map(|value| 1.0 - contracts::clamp01(*value))
        .product::<f64>()
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Value later formulas should see: a pinned atom keeps its magnitude.
pub fn settled(index: &AtomIndex<'_>, id: &str, computed: f64) -> f64 {
    match index.get(id) {
        Some(atom) if atom.is_pinned() => atom.magnitude,
        _ => computed,
    }
}

pub fn part_f64(atom: &ContextAtom, key: &str) -> Option<f64> {
    atom.trace.as_ref()?.parts.get(key)?.as_f64()
}

/// Round for trace parts so reports stay readable.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// One formatter per id family; every builder goes through these.
pub mod ids {
    pub fn world_loc(location_id: &str, feature: &str) -> String {
        format!("world:loc:{location_id}:{feature}")
    }

    pub fn world_hazard(location_id: &str, hazard_id: &str) -> String {
        format!("world:hazard:{location_id}:{hazard_id}")
    }

    pub fn world_pos(agent_id: &str) -> String {
        format!("world:pos:{agent_id}")
    }

    pub fn obs_nearby(self_id: &str, other_id: &str, metric: &str) -> String {
        format!("obs:nearby:{self_id}:{other_id}:{metric}")
    }

    pub fn obs_nearby_prefix(self_id: &str) -> String {
        format!("obs:nearby:{self_id}:")
    }

    pub fn obs_event(event_id: &str) -> String {
        format!("obs:event:{event_id}")
    }

    pub fn feat_body(agent_id: &str, name: &str) -> String {
        format!("feat:body:{agent_id}:{name}")
    }

    pub fn rel_base(self_id: &str, other_id: &str, metric: &str) -> String {
        format!("rel:base:{self_id}:{other_id}:{metric}")
    }

    pub fn rel_base_prefix(self_id: &str) -> String {
        format!("rel:base:{self_id}:")
    }

    pub fn rel_tag(self_id: &str, other_id: &str, tag: &str) -> String {
        format!("rel:tag:{self_id}:{other_id}:{tag}")
    }

    pub fn access(kind: &str, agent_id: &str) -> String {
        format!("access:{kind}:{agent_id}")
    }

    pub fn lens_trait(agent_id: &str, name: &str) -> String {
        format!("lens:trait:{agent_id}:{name}")
    }

    pub fn lens_bias(agent_id: &str, axis: &str) -> String {
        format!("lens:bias:{agent_id}:{axis}")
    }

    pub fn mem_event(agent_id: &str, event_id: &str) -> String {
        format!("mem:event:{agent_id}:{event_id}")
    }

    pub fn mem_event_prefix(agent_id: &str) -> String {
        format!("mem:event:{agent_id}:")
    }

    pub fn ctx(axis: &str) -> String {
        format!("ctx:{axis}")
    }

    pub fn prox(kind: &str, agent_id: &str) -> String {
        format!("prox:{kind}:{agent_id}")
    }

    pub fn haz_near(agent_id: &str, hazard_id: &str) -> String {
        format!("haz:near:{agent_id}:{hazard_id}")
    }

    pub fn haz_max(agent_id: &str) -> String {
        format!("haz:max:{agent_id}")
    }

    pub fn app(name: &str, agent_id: &str) -> String {
        format!("app:{name}:{agent_id}")
    }

    pub fn emo(name: &str, agent_id: &str) -> String {
        format!("emo:{name}:{agent_id}")
    }

    pub fn emo_dyad(self_id: &str, other_id: &str, name: &str) -> String {
        format!("emo:dyad:{self_id}:{other_id}:{name}")
    }

    pub fn tom_dyad(self_id: &str, other_id: &str, metric: &str) -> String {
        format!("tom:dyad:{self_id}:{other_id}:{metric}")
    }

    pub fn tom_dyad_prefix(self_id: &str) -> String {
        format!("tom:dyad:{self_id}:")
    }

    pub fn tom_policy(self_id: &str, other_id: &str, policy: &str) -> String {
        format!("tom:policy:{self_id}:{other_id}:{policy}")
    }

    pub fn sb(pressure: &str, agent_id: &str) -> String {
        format!("sb:{pressure}:{agent_id}")
    }

    pub fn drv(kind: &str, agent_id: &str) -> String {
        format!("drv:{kind}:{agent_id}")
    }

    pub fn goal_domain(agent_id: &str, domain: &str) -> String {
        format!("goal:domain:{agent_id}:{domain}")
    }

    pub fn goal_eco(agent_id: &str, eco: &str) -> String {
        format!("goal:eco:{agent_id}:{eco}")
    }

    pub fn goal_plan(agent_id: &str, domain: &str) -> String {
        format!("goal:plan:{agent_id}:{domain}")
    }

    pub fn goal_link(agent_id: &str, domain: &str, action: &str) -> String {
        format!("goal:link:{agent_id}:{domain}:{action}")
    }

    pub fn util_goal(agent_id: &str, domain: &str) -> String {
        format!("util:goal:{agent_id}:{domain}")
    }

    pub fn util_goal_prefix(agent_id: &str) -> String {
        format!("util:goal:{agent_id}:")
    }

    pub fn util_link(agent_id: &str, action: &str) -> String {
        format!("util:link:{agent_id}:{action}")
    }

    pub fn aff(key: &str) -> String {
        format!("aff:{key}")
    }

    pub const CON_NO_VIOLENCE: &str = "con:protocol:noViolence";

    pub fn con_gate_attack(self_id: &str, other_id: &str) -> String {
        format!("con:gate:attack:{self_id}:{other_id}")
    }

    pub fn con_taboo_attack(self_id: &str, other_id: &str) -> String {
        format!("con:taboo:attack:{self_id}:{other_id}")
    }

    pub fn con_privacy_share_secret(self_id: &str, other_id: &str) -> String {
        format!("con:privacy:shareSecret:{self_id}:{other_id}")
    }

    pub fn con_access_weapon(agent_id: &str) -> String {
        format!("con:access:weapon:{agent_id}")
    }

    pub fn cost(key: &str) -> String {
        format!("cost:{key}")
    }

    pub fn action_prior(agent_id: &str, key: &str) -> String {
        format!("action:prior:{agent_id}:{key}")
    }

    pub fn action_score(agent_id: &str, key: &str) -> String {
        format!("action:score:{agent_id}:{key}")
    }

    pub fn pred(feature: &str, agent_id: &str) -> String {
        format!("pred:{feature}:{agent_id}")
    }

    /// Sibling id holding the pre-override value: `ctx:danger` -> `ctx:base:danger`.
    pub fn base_of(id: &str) -> String {
        match id.split_once(':') {
            Some((ns, rest)) => format!("{ns}:base:{rest}"),
            None => format!("{id}:base"),
        }
    }

    /// Other agent id from an `obs:nearby:<self>:<other>:<metric>` style id.
    pub fn pair_other<'a>(id: &'a str, prefix: &str) -> Option<&'a str> {
        id.strip_prefix(prefix)?.split(':').next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::AtomBuilder;

    fn atom(id: &str, magnitude: f64) -> ContextAtom {
        AtomBuilder::world(id)
            .magnitude(magnitude)
            .build()
            .expect("atom")
    }

    #[test]
    fn index_prefers_later_duplicates_and_scans_prefixes() {
        let atoms = vec![
            atom("ctx:danger", 0.2),
            atom("obs:nearby:a:b:closeness", 0.5),
            atom("obs:nearby:a:c:closeness", 0.4),
            atom("ctx:danger", 0.7),
        ];
        let index = AtomIndex::new(&atoms);
        assert_eq!(index.magnitude("ctx:danger"), Some(0.7));
        assert_eq!(index.prefixed("obs:nearby:a:").count(), 2);
        assert_eq!(index.value_or("ctx:cover", 0.3), 0.3);
    }

    #[test]
    fn inputs_only_record_existing_atoms() {
        let atoms = vec![atom("ctx:danger", 0.4)];
        let index = AtomIndex::new(&atoms);
        let mut inputs = Inputs::new();
        assert_eq!(inputs.read(&index, "ctx:danger"), 0.4);
        assert_eq!(inputs.read(&index, "ctx:cover"), 0.0);
        inputs.read(&index, "ctx:danger");
        assert_eq!(inputs.ids(), ["ctx:danger".to_string()]);
    }

    #[test]
    fn base_ids_insert_after_namespace() {
        assert_eq!(ids::base_of("ctx:danger"), "ctx:base:danger");
        assert_eq!(
            ids::base_of("tom:dyad:a:b:trust"),
            "tom:base:dyad:a:b:trust"
        );
        assert_eq!(
            ids::pair_other("obs:nearby:a:bob:closeness", "obs:nearby:a:"),
            Some("bob")
        );
    }

    #[test]
    fn noisy_or_combines_independent_evidence() {
        assert_eq!(noisy_or(&[]), 0.0);
        assert!((noisy_or(&[0.5, 0.5]) - 0.75).abs() < 1e-12);
        assert_eq!(noisy_or(&[1.0, 0.2]), 1.0);
    }
}
