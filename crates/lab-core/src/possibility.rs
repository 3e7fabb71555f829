//! Possibility catalog: registry of rules that turn the enriched atom set into
//! a menu of affordances plus the constraint atoms that gate them.

use std::fmt;

use contracts::{AtomBuilder, AtomError, ContextAtom, PipelineConfig, Possibility, PossibilityKind};
use thiserror::Error;

use crate::atoms::{ids, round4, AtomIndex, Inputs};
use crate::proximity::{nearby_others, relation_view, ALLY_TAGS};

/// Others whose observed closeness is below this are not socially reachable.
pub const SOCIAL_REACH: f64 = 0.2;
pub const NO_VIOLENCE_STRICTNESS: f64 = 0.6;
pub const PRIVACY_PUBLICNESS: f64 = 0.7;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error(transparent)]
    Atom(#[from] AtomError),
    #[error("possibility rule {rule} failed: {message}")]
    Rule { rule: String, message: String },
}

/// What a rule may read.
#[derive(Debug, Clone, Copy)]
pub struct RuleView<'i, 'a> {
    pub agent_id: &'i str,
    pub index: &'i AtomIndex<'a>,
    pub config: &'i PipelineConfig,
}

#[derive(Debug, Default)]
pub struct RuleOutput {
    pub possibilities: Vec<Possibility>,
    pub constraints: Vec<ContextAtom>,
}

impl RuleOutput {
    fn constrain(&mut self, atom: ContextAtom) {
        if !self.constraints.iter().any(|existing| existing.id == atom.id) {
            self.constraints.push(atom);
        }
    }
}

pub trait PossibilityRule: Send + Sync {
    fn name(&self) -> &str;
    fn derive(&self, view: &RuleView<'_, '_>) -> Result<RuleOutput, RuleError>;
}

/// Ordered registry of possibility rules.
pub struct PossibilityCatalog {
    rules: Vec<Box<dyn PossibilityRule>>,
}

impl PossibilityCatalog {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// The built-in rules, in evaluation order.
    pub fn default_catalog() -> Self {
        let mut catalog = Self::empty();
        catalog.register(Box::new(HideRule));
        catalog.register(Box::new(EscapeRule));
        catalog.register(Box::new(RestRule));
        catalog.register(Box::new(WaitRule));
        catalog.register(Box::new(ObserveRule));
        catalog.register(Box::new(SocialRule));
        catalog.register(Box::new(AttackRule));
        catalog
    }

    pub fn register(&mut self, rule: Box<dyn PossibilityRule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    /// Run every rule, then let every constraint block what it names.
    pub fn derive_all(&self, view: &RuleView<'_, '_>) -> Result<RuleOutput, RuleError> {
        let mut merged = RuleOutput::default();
        for rule in &self.rules {
            let output = rule.derive(view)?;
            for possibility in output.possibilities {
                match merged
                    .possibilities
                    .iter_mut()
                    .find(|existing| existing.id == possibility.id)
                {
                    Some(existing) => *existing = possibility,
                    None => merged.possibilities.push(possibility),
                }
            }
            for constraint in output.constraints {
                merged.constrain(constraint);
            }
        }
        apply_constraints(view.agent_id, &mut merged.possibilities, &merged.constraints);
        Ok(merged)
    }
}

impl Default for PossibilityCatalog {
    fn default() -> Self {
        Self::default_catalog()
    }
}

impl fmt::Debug for PossibilityCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PossibilityCatalog")
            .field("rules", &self.rule_names())
            .finish()
    }
}

/// Blocking is monotonic: a constraint only ever disables.
pub fn apply_constraints(agent_id: &str, possibilities: &mut [Possibility], constraints: &[ContextAtom]) {
    for constraint in constraints {
        for possibility in possibilities.iter_mut() {
            let target = possibility.target_id.as_deref().unwrap_or("");
            let blocks = match possibility.kind {
                PossibilityKind::Attack => {
                    constraint.id == ids::CON_NO_VIOLENCE
                        || constraint.id == ids::con_gate_attack(agent_id, target)
                        || constraint.id == ids::con_taboo_attack(agent_id, target)
                }
                PossibilityKind::ShareSecret => {
                    constraint.id == ids::con_privacy_share_secret(agent_id, target)
                }
                _ => false,
            };
            if blocks {
                possibility.block(constraint.id.clone());
            }
        }
    }
}

pub fn possibility(
    kind: PossibilityKind,
    target_id: Option<&str>,
    magnitude: f64,
    why_atom_ids: Vec<String>,
) -> Possibility {
    let key = kind.key(target_id);
    let label = match target_id {
        Some(target) => format!("{} {}", kind.as_str().replace('_', " "), target),
        None => kind.as_str().replace('_', " "),
    };
    Possibility {
        id: ids::aff(&key),
        kind,
        action_id: kind.as_str().to_string(),
        target_id: target_id.map(str::to_string),
        label,
        magnitude: contracts::clamp01(magnitude),
        enabled: true,
        cost: None,
        blocked_by: Vec::new(),
        why_atom_ids,
    }
}

/// One `aff:*` atom per possibility, citing its evidence and its blockers.
pub fn affordance_atoms(agent_id: &str, possibilities: &[Possibility]) -> Result<Vec<ContextAtom>, AtomError> {
    possibilities
        .iter()
        .map(|possibility| {
            let mut builder = AtomBuilder::derived(possibility.id.clone())
                .source("possibilities")
                .kind(format!("aff_{}", possibility.kind.as_str()))
                .subject(agent_id.to_string())
                .magnitude(possibility.magnitude)
                .label(possibility.label.clone())
                .tag(if possibility.enabled { "enabled" } else { "blocked" })
                .uses_all(possibility.why_atom_ids.iter().cloned())
                .uses_all(possibility.blocked_by.iter().cloned())
                .part("enabled", possibility.enabled);
            if let Some(target) = &possibility.target_id {
                builder = builder.target(target.clone());
            }
            if possibility.why_atom_ids.is_empty() && possibility.blocked_by.is_empty() {
                builder = builder.note("unconditional affordance");
            }
            builder.build()
        })
        .collect()
}

fn read_ctx(view: &RuleView<'_, '_>, inputs: &mut Inputs, axis: &str) -> f64 {
    inputs.read(view.index, &ids::ctx(axis))
}

struct HideRule;

impl PossibilityRule for HideRule {
    fn name(&self) -> &str {
        "hide"
    }

    fn derive(&self, view: &RuleView<'_, '_>) -> Result<RuleOutput, RuleError> {
        let mut i = Inputs::new();
        let cover = read_ctx(view, &mut i, "cover");
        let danger = read_ctx(view, &mut i, "danger");
        let mut hide = possibility(
            PossibilityKind::Hide,
            None,
            cover * (0.4 + 0.6 * danger),
            i.into_ids(),
        );
        hide.enabled = cover >= 0.2;
        Ok(RuleOutput {
            possibilities: vec![hide],
            ..RuleOutput::default()
        })
    }
}

struct EscapeRule;

impl PossibilityRule for EscapeRule {
    fn name(&self) -> &str {
        "escape"
    }

    fn derive(&self, view: &RuleView<'_, '_>) -> Result<RuleOutput, RuleError> {
        let mut i = Inputs::new();
        let escape = read_ctx(view, &mut i, "escape");
        let danger = read_ctx(view, &mut i, "danger");
        let mut leave = possibility(
            PossibilityKind::Escape,
            None,
            escape * (0.4 + 0.6 * danger),
            i.into_ids(),
        );
        leave.enabled = escape >= 0.2;
        Ok(RuleOutput {
            possibilities: vec![leave],
            ..RuleOutput::default()
        })
    }
}

struct RestRule;

impl PossibilityRule for RestRule {
    fn name(&self) -> &str {
        "rest"
    }

    fn derive(&self, view: &RuleView<'_, '_>) -> Result<RuleOutput, RuleError> {
        let mut i = Inputs::new();
        let fatigue = i.read(view.index, &ids::feat_body(view.agent_id, "fatigue"));
        let danger = read_ctx(view, &mut i, "danger");
        let mut rest = possibility(
            PossibilityKind::Rest,
            None,
            (0.3 + 0.7 * fatigue) * (1.0 - 0.7 * danger),
            i.into_ids(),
        );
        rest.enabled = danger < 0.8;
        Ok(RuleOutput {
            possibilities: vec![rest],
            ..RuleOutput::default()
        })
    }
}

struct WaitRule;

impl PossibilityRule for WaitRule {
    fn name(&self) -> &str {
        "wait"
    }

    fn derive(&self, _view: &RuleView<'_, '_>) -> Result<RuleOutput, RuleError> {
        Ok(RuleOutput {
            possibilities: vec![possibility(PossibilityKind::Wait, None, 0.3, Vec::new())],
            ..RuleOutput::default()
        })
    }
}

struct ObserveRule;

impl PossibilityRule for ObserveRule {
    fn name(&self) -> &str {
        "observe"
    }

    fn derive(&self, view: &RuleView<'_, '_>) -> Result<RuleOutput, RuleError> {
        let mut i = Inputs::new();
        let uncertainty = read_ctx(view, &mut i, "uncertainty");
        Ok(RuleOutput {
            possibilities: vec![possibility(
                PossibilityKind::Observe,
                None,
                0.3 + 0.5 * uncertainty,
                i.into_ids(),
            )],
            ..RuleOutput::default()
        })
    }
}

/// Talk, help, comfort, share a secret with, or avoid each reachable other.
struct SocialRule;

impl PossibilityRule for SocialRule {
    fn name(&self) -> &str {
        "social"
    }

    fn derive(&self, view: &RuleView<'_, '_>) -> Result<RuleOutput, RuleError> {
        let self_id = view.agent_id;
        let index = view.index;
        let mut out = RuleOutput::default();

        for (other_id, proximity) in nearby_others(index, self_id) {
            if proximity < SOCIAL_REACH {
                continue;
            }
            let mut shared = Inputs::new();
            shared.push(&ids::obs_nearby(self_id, &other_id, "closeness"));
            let trust = shared.read_or(index, &ids::tom_dyad(self_id, &other_id, "trust"), 0.5);
            let intimacy = shared.read(index, &ids::tom_dyad(self_id, &other_id, "intimacy"));
            let threat = shared.read_or(index, &ids::tom_dyad(self_id, &other_id, "threat"), 0.2);
            let policy = |name: &str, inputs: &mut Inputs, default: f64| {
                inputs.read_or(index, &ids::tom_policy(self_id, &other_id, name), default)
            };
            let target = Some(other_id.as_str());

            let mut i = Inputs::new();
            let approach = policy("approach", &mut i, 0.5 * trust);
            let talk = proximity * (0.4 + 0.6 * approach.max(trust));
            out.possibilities.push(possibility(
                PossibilityKind::Talk,
                target,
                talk,
                with_shared(&shared, i),
            ));

            let mut i = Inputs::new();
            let cooperate = policy("cooperate", &mut i, 0.5 * trust);
            out.possibilities.push(possibility(
                PossibilityKind::Help,
                target,
                proximity * (0.2 + 0.8 * cooperate),
                with_shared(&shared, i),
            ));

            let mut i = Inputs::new();
            let affection = i.read(index, &ids::emo_dyad(self_id, &other_id, "affection"));
            let mut comfort = possibility(
                PossibilityKind::Comfort,
                target,
                proximity * (0.3 + 0.7 * intimacy.max(affection)),
                with_shared(&shared, i),
            );
            comfort.enabled = trust >= 0.3;
            out.possibilities.push(comfort);

            let mut i = Inputs::new();
            let disclose = policy("disclose", &mut i, 0.0);
            let publicness = read_ctx(view, &mut i, "publicness");
            let mut share = possibility(
                PossibilityKind::ShareSecret,
                target,
                proximity * (0.2 + 0.8 * disclose),
                with_shared(&shared, i),
            );
            share.enabled = trust >= 0.5;
            out.possibilities.push(share);
            if publicness > PRIVACY_PUBLICNESS {
                out.constrain(
                    AtomBuilder::derived(ids::con_privacy_share_secret(self_id, &other_id))
                        .source("possibilities")
                        .kind("con_privacy")
                        .subject(self_id.to_string())
                        .target(other_id.clone())
                        .magnitude(publicness)
                        .uses(ids::ctx("publicness"))
                        .part("publicness", round4(publicness))
                        .build()?,
                );
            }

            let mut i = Inputs::new();
            let avoid = policy("avoid", &mut i, threat);
            out.possibilities.push(possibility(
                PossibilityKind::Avoid,
                target,
                0.2 + 0.8 * avoid,
                with_shared(&shared, i),
            ));
        }

        Ok(out)
    }
}

fn with_shared(shared: &Inputs, own: Inputs) -> Vec<String> {
    let mut ids = Inputs::new();
    for id in shared.ids().iter().chain(own.ids()) {
        ids.push(id);
    }
    ids.into_ids()
}

/// Attack on each reachable other. Low aggression, the no-violence protocol
/// and relationship taboos each arrive as a blocking constraint.
struct AttackRule;

impl PossibilityRule for AttackRule {
    fn name(&self) -> &str {
        "attack"
    }

    fn derive(&self, view: &RuleView<'_, '_>) -> Result<RuleOutput, RuleError> {
        let self_id = view.agent_id;
        let index = view.index;
        let mut out = RuleOutput::default();

        let mut base = Inputs::new();
        let anger = base.read(index, &ids::emo("anger", self_id));
        let danger = read_ctx(view, &mut base, "danger");
        let mut strict_inputs = Inputs::new();
        let strictness = read_ctx(view, &mut strict_inputs, "proceduralStrict");

        for (other_id, proximity) in nearby_others(index, self_id) {
            if proximity < SOCIAL_REACH {
                continue;
            }
            let mut i = Inputs::new();
            i.push(&ids::obs_nearby(self_id, &other_id, "closeness"));
            let threat = i.read(index, &ids::tom_dyad(self_id, &other_id, "threat"));
            let aggression = 0.55 * anger + 0.30 * danger + 0.15 * threat;
            let why = with_shared(&base, i);
            if aggression < view.config.aggression_threshold {
                out.constrain(
                    AtomBuilder::derived(ids::con_gate_attack(self_id, &other_id))
                        .source("possibilities")
                        .kind("con_gate")
                        .subject(self_id.to_string())
                        .target(other_id.clone())
                        .magnitude(aggression)
                        .uses_all(why.iter().cloned())
                        .part("threshold", round4(view.config.aggression_threshold))
                        .note("no aggression drive")
                        .build()?,
                );
            }
            out.possibilities.push(possibility(
                PossibilityKind::Attack,
                Some(&other_id),
                aggression * (0.5 + 0.5 * proximity),
                why,
            ));

            if strictness > NO_VIOLENCE_STRICTNESS {
                out.constrain(
                    AtomBuilder::derived(ids::CON_NO_VIOLENCE)
                        .source("possibilities")
                        .kind("con_protocol")
                        .magnitude(strictness)
                        .uses_all(strict_inputs.ids().iter().cloned())
                        .part("proceduralStrict", round4(strictness))
                        .build()?,
                );
            }

            let relation = relation_view(index, self_id, &other_id);
            if relation.has_any_tag(&ALLY_TAGS) {
                let tagged: Vec<String> = relation
                    .used
                    .iter()
                    .filter(|id| id.starts_with("rel:tag:"))
                    .cloned()
                    .collect();
                out.constrain(
                    AtomBuilder::derived(ids::con_taboo_attack(self_id, &other_id))
                        .source("possibilities")
                        .kind("con_taboo")
                        .subject(self_id.to_string())
                        .target(other_id.clone())
                        .magnitude(1.0)
                        .uses_all(tagged)
                        .note("attacking a close tie is taboo")
                        .build()?,
                );
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{two_agent_world, world_atom, Fixture};

    fn derive(atoms: &[ContextAtom], config: &PipelineConfig) -> RuleOutput {
        let index = AtomIndex::new(atoms);
        let view = RuleView {
            agent_id: "alice",
            index: &index,
            config,
        };
        PossibilityCatalog::default_catalog()
            .derive_all(&view)
            .expect("possibilities")
    }

    fn find<'a>(output: &'a RuleOutput, id: &str) -> Option<&'a Possibility> {
        output.possibilities.iter().find(|p| p.id == id)
    }

    #[test]
    fn calm_agent_gets_no_attack_but_social_options() {
        let fixture = Fixture::new(two_agent_world());
        let atoms = fixture.world_atoms("alice");
        let out = derive(&atoms, &fixture.config);
        let attack = find(&out, "aff:attack:bob").expect("attack");
        assert!(!attack.enabled);
        assert_eq!(attack.blocked_by, vec![ids::con_gate_attack("alice", "bob")]);
        assert!(find(&out, "aff:talk:bob").is_some_and(|p| p.enabled));
        assert!(find(&out, "aff:wait").is_some_and(|p| p.enabled));
    }

    #[test]
    fn angry_agent_attack_is_blocked_by_protocol() {
        let fixture = Fixture::new(two_agent_world());
        let mut atoms = fixture.world_atoms("alice");
        atoms.push(world_atom("emo:anger:alice", 0.8));
        atoms.push(world_atom("ctx:danger", 0.6));
        atoms.push(world_atom("ctx:proceduralStrict", 0.9));
        let out = derive(&atoms, &fixture.config);
        let attack = find(&out, "aff:attack:bob").expect("attack");
        assert!(!attack.enabled);
        assert_eq!(attack.blocked_by, vec![ids::CON_NO_VIOLENCE.to_string()]);
        assert!(out.constraints.iter().any(|c| c.id == ids::CON_NO_VIOLENCE));
    }

    #[test]
    fn allies_are_taboo_targets() {
        let mut world = two_agent_world();
        if let Some(relation) = world.agents[0].relations.get_mut("bob") {
            relation.tags.push("friend".to_string());
        }
        let fixture = Fixture::new(world);
        let mut atoms = fixture.world_atoms("alice");
        atoms.push(world_atom("emo:anger:alice", 0.9));
        let out = derive(&atoms, &fixture.config);
        let attack = find(&out, "aff:attack:bob").expect("attack");
        assert_eq!(attack.blocked_by, vec![ids::con_taboo_attack("alice", "bob")]);
    }

    #[test]
    fn public_places_forbid_secrets() {
        let fixture = Fixture::new(two_agent_world());
        let mut atoms = fixture.world_atoms("alice");
        atoms.push(world_atom("ctx:publicness", 0.9));
        atoms.push(world_atom("tom:dyad:alice:bob:trust", 0.8));
        let out = derive(&atoms, &fixture.config);
        let share = find(&out, "aff:share_secret:bob").expect("share");
        assert!(!share.enabled);
        assert_eq!(share.blocked_by.len(), 1);
    }

    struct Broken;

    impl PossibilityRule for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn derive(&self, _view: &RuleView<'_, '_>) -> Result<RuleOutput, RuleError> {
            Err(RuleError::Rule {
                rule: "broken".to_string(),
                message: "cannot read".to_string(),
            })
        }
    }

    #[test]
    fn custom_rule_errors_surface() {
        let mut catalog = PossibilityCatalog::default_catalog();
        catalog.register(Box::new(Broken));
        assert_eq!(catalog.rule_names().last(), Some(&"broken"));
        let atoms = Vec::new();
        let index = AtomIndex::new(&atoms);
        let config = PipelineConfig::default();
        let view = RuleView {
            agent_id: "alice",
            index: &index,
            config: &config,
        };
        let err = catalog.derive_all(&view).expect_err("broken rule");
        assert!(err.to_string().contains("cannot read"));
    }

    #[test]
    fn affordances_cite_blockers() {
        let mut attack = possibility(PossibilityKind::Attack, Some("bob"), 0.5, vec!["emo:anger:alice".into()]);
        attack.block(ids::CON_NO_VIOLENCE);
        let atoms = affordance_atoms("alice", &[attack]).expect("aff");
        assert!(atoms[0].has_tag("blocked"));
        assert!(atoms[0]
            .used_atom_ids()
            .contains(&ids::CON_NO_VIOLENCE.to_string()));
    }
}
