use contracts::{
    AgentState, AtomBuilder, ContextAtom, LocationState, PipelineConfig, PipelineRun, Position,
    RelationBase, RunConfig, SimStep, StageId, WorldEvent, WorldSnapshot,
};
use lab_core::atoms::{part_f64, AtomIndex};
use lab_core::pipeline::{run_pipeline, PipelineInput};
use lab_core::possibility::{PossibilityRule, RuleError, RuleOutput, RuleView};
use lab_core::relation_priors::dyad_bounds;
use lab_core::validate::goal_boundary_violations;
use lab_core::{merge_atoms_prefer_newer, BeliefMemory, LabWorld, PossibilityCatalog};
use proptest::prelude::*;

fn yard(danger: f64, strict: f64) -> LocationState {
    let mut yard = LocationState::new("yard");
    yard.features.insert("danger".to_string(), danger);
    yard.features.insert("cover".to_string(), 0.4);
    yard.features.insert("escape".to_string(), 0.5);
    yard.features.insert("publicness".to_string(), 0.3);
    yard.features.insert("procedural_strict".to_string(), strict);
    yard
}

fn world(relation: RelationBase, weapon: f64, danger: f64, strict: f64) -> WorldSnapshot {
    let mut alice = AgentState::new("alice", "yard");
    alice.relations.insert("bob".to_string(), relation);
    alice.access.insert("weapon".to_string(), weapon);
    alice.features.insert("fatigue".to_string(), 0.2);
    let mut bob = AgentState::new("bob", "yard");
    bob.position = Position::new(2.0, 0.0);
    WorldSnapshot {
        tick: 1,
        agents: vec![alice, bob],
        locations: vec![yard(danger, strict)],
        events: Vec::new(),
    }
}

/// Alice's memory of Bob attacking her with the given force.
fn remembered_attack(force: f64) -> Vec<ContextAtom> {
    let mut memory = BeliefMemory::new("alice", 8);
    let attack = WorldEvent {
        id: "ev_bob_attack".to_string(),
        tick: 0,
        kind: "attack".to_string(),
        actor_id: "bob".to_string(),
        target_id: Some("alice".to_string()),
        location_id: "yard".to_string(),
        magnitude: force,
        tags: Vec::new(),
    };
    memory.record_events(&[attack], "yard", 0);
    memory.atoms().expect("memory atoms")
}

const BOUNDED_METRICS: [&str; 4] = ["trust", "threat", "intimacy", "support"];

fn neutral_relation() -> RelationBase {
    RelationBase {
        closeness: 0.2,
        hostility: 0.1,
        ..RelationBase::default()
    }
}

fn pinned(id: &str, magnitude: f64) -> ContextAtom {
    AtomBuilder::world(id)
        .magnitude(magnitude)
        .build()
        .expect("override atom")
}

fn run_with(
    world: &WorldSnapshot,
    overrides: &[ContextAtom],
    catalog: &PossibilityCatalog,
    config: &PipelineConfig,
    seed: u64,
) -> PipelineRun {
    run_remembering(world, &[], overrides, catalog, config, seed)
}

fn run_remembering(
    world: &WorldSnapshot,
    memory_atoms: &[ContextAtom],
    overrides: &[ContextAtom],
    catalog: &PossibilityCatalog,
    config: &PipelineConfig,
    seed: u64,
) -> PipelineRun {
    let step = SimStep::new(world.tick, seed);
    let input = PipelineInput {
        agent_id: "alice",
        world,
        memory_atoms,
        overrides,
        step: &step,
        catalog,
    };
    run_pipeline(&input, config).expect("pipeline run")
}

fn run(world: &WorldSnapshot, overrides: &[ContextAtom]) -> PipelineRun {
    run_with(
        world,
        overrides,
        &PossibilityCatalog::default_catalog(),
        &PipelineConfig::default(),
        42,
    )
}

fn affordance_enabled(run: &PipelineRun, id: &str) -> Option<bool> {
    run.frame(StageId::S8)?
        .artifacts
        .possibilities
        .iter()
        .find(|possibility| possibility.id == id)
        .map(|possibility| possibility.enabled)
}

#[test]
fn scenario_1_calm_agent_with_weapon_cannot_attack() {
    let world = world(neutral_relation(), 0.9, 0.1, 0.0);
    let overrides = vec![pinned("emo:anger:alice", 0.1), pinned("ctx:danger", 0.1)];
    let run = run(&world, &overrides);
    assert_eq!(affordance_enabled(&run, "aff:attack:bob"), Some(false));
    assert_eq!(affordance_enabled(&run, "aff:talk:bob"), Some(true));
    let s8 = run.frame(StageId::S8).expect("S8");
    let attack = s8.atom("aff:attack:bob").expect("attack affordance");
    assert!(attack.has_tag("blocked"));
}

#[test]
fn scenario_2_angry_armed_agent_in_danger_can_attack() {
    let world = world(neutral_relation(), 0.9, 0.65, 0.0);
    let overrides = vec![pinned("emo:anger:alice", 0.8), pinned("ctx:danger", 0.65)];
    let run = run(&world, &overrides);
    assert_eq!(affordance_enabled(&run, "aff:attack:bob"), Some(true));
}

#[test]
fn scenario_3_procedural_strictness_forbids_violence() {
    let world = world(neutral_relation(), 0.9, 0.65, 0.9);
    let overrides = vec![
        pinned("emo:anger:alice", 0.8),
        pinned("ctx:danger", 0.65),
        pinned("ctx:proceduralStrict", 0.9),
    ];
    let run = run(&world, &overrides);
    assert_eq!(affordance_enabled(&run, "aff:attack:bob"), Some(false));
    let s8 = run.frame(StageId::S8).expect("S8");
    assert!(s8.atom("con:protocol:noViolence").is_some());
}

#[test]
fn scenario_4_hostile_relation_seeds_wary_dyads() {
    let relation = RelationBase {
        hostility: 0.9,
        closeness: 0.1,
        ..RelationBase::default()
    };
    let run = run(&world(relation, 0.0, 0.2, 0.0), &[]);
    let s5 = run.frame(StageId::S5).expect("S5");
    let threat = s5.atom("tom:dyad:alice:bob:threat").expect("threat");
    let trust = s5.atom("tom:dyad:alice:bob:trust").expect("trust");
    assert!(threat.magnitude >= 0.65, "threat {}", threat.magnitude);
    assert!(trust.magnitude <= 0.25, "trust {}", trust.magnitude);
}

struct InventoryOutage;

impl PossibilityRule for InventoryOutage {
    fn name(&self) -> &str {
        "inventory"
    }

    fn derive(&self, _view: &RuleView<'_, '_>) -> Result<RuleOutput, RuleError> {
        Err(RuleError::Rule {
            rule: "inventory".to_string(),
            message: "inventory service unavailable".to_string(),
        })
    }
}

#[test]
fn scenario_5_action_stage_failure_keeps_earlier_stages() {
    let world = world(neutral_relation(), 0.0, 0.2, 0.0);
    let mut catalog = PossibilityCatalog::default_catalog();
    catalog.register(Box::new(InventoryOutage));
    let healthy = run(&world, &[]);
    let failed = run_with(&world, &[], &catalog, &PipelineConfig::default(), 42);

    for stage in &StageId::ALL[..8] {
        let expected = healthy.frame(*stage).expect("healthy frame");
        let actual = failed.frame(*stage).expect("failed frame");
        assert_eq!(expected.atoms, actual.atoms, "{stage}");
    }
    let s7 = failed.frame(StageId::S7).expect("S7");
    let s8 = failed.frame(StageId::S8).expect("S8");
    assert_eq!(s7.atoms, s8.atoms);
    assert!(failed.decision.is_none());
    let failure = failed.failure.expect("failure");
    assert_eq!(failure.name, "S8");
    assert!(failure
        .stack
        .iter()
        .any(|line| line.contains("inventory service unavailable")));
}

#[test]
fn goal_links_reach_action_priors_through_utility() {
    let snapshot = world(neutral_relation(), 0.0, 0.4, 0.0);
    let prior_with_link = |strength: f64| {
        let overrides = vec![
            pinned("drv:safety:alice", 0.9),
            pinned("goal:link:alice:safety:escape", strength),
        ];
        let run = run(&snapshot, &overrides);
        let s8 = run.frame(StageId::S8).expect("S8");
        let prior = s8.atom("action:prior:alice:escape").expect("escape prior").clone();
        let violations = goal_boundary_violations(&AtomIndex::new(run.final_atoms()));
        assert!(violations.is_empty(), "{violations:?}");
        prior
    };
    let low = prior_with_link(0.0);
    let high = prior_with_link(1.0);
    assert!(high.magnitude > low.magnitude);
    assert!(high
        .used_atom_ids()
        .contains(&"util:link:alice:escape".to_string()));
    assert!(high.used_atom_ids().iter().all(|id| !id.starts_with("goal:")));
}

#[test]
fn world_event_log_is_independent_of_worker_threads() {
    let snapshot = world(neutral_relation(), 0.6, 0.4, 0.0);
    let config = |worker_threads| RunConfig {
        run_id: "threads".to_string(),
        seed: 77,
        ticks: 6,
        worker_threads,
        ..RunConfig::default()
    };
    let mut sequential = LabWorld::new(config(1), snapshot.clone());
    let mut parallel = LabWorld::new(config(4), snapshot);
    sequential.run(6).expect("sequential run");
    parallel.run(6).expect("parallel run");
    assert_eq!(sequential.events(), parallel.events());
    assert!(!sequential.events().is_empty());
}

fn axis_atoms(values: &[f64]) -> Vec<ContextAtom> {
    values
        .iter()
        .enumerate()
        .map(|(n, value)| pinned(&format!("ctx:axis{n}"), *value))
        .collect()
}

proptest! {
    #[test]
    fn property_1_merge_is_idempotent(
        old in prop::collection::vec(0.0_f64..1.0, 0..8),
        new in prop::collection::vec(0.0_f64..1.0, 0..8),
    ) {
        let old = axis_atoms(&old);
        let new = axis_atoms(&new);
        let once = merge_atoms_prefer_newer(&old, &new);
        let twice = merge_atoms_prefer_newer(&once.atoms, &new);
        prop_assert_eq!(&once.atoms, &twice.atoms);
        prop_assert!(twice.new_ids.is_empty());
        prop_assert!(twice.overridden_ids.is_empty());
    }

    #[test]
    fn property_2_derived_atoms_never_cite_themselves(
        danger in 0.0_f64..1.0,
        strict in 0.0_f64..1.0,
        hostility in 0.0_f64..1.0,
        closeness in 0.0_f64..1.0,
    ) {
        let relation = RelationBase { hostility, closeness, ..RelationBase::default() };
        let run = run(&world(relation, 0.7, danger, strict), &[]);
        for frame in &run.frames {
            for atom in &frame.atoms {
                prop_assert!(
                    !atom.used_atom_ids().contains(&atom.id),
                    "{} cites itself in {}", atom.id, frame.stage
                );
            }
        }
    }

    #[test]
    fn property_3_actions_reach_goals_only_through_utility(
        danger in 0.0_f64..1.0,
        hostility in 0.0_f64..1.0,
        seed in 1_u64..10_000,
    ) {
        let relation = RelationBase { hostility, closeness: 0.3, ..RelationBase::default() };
        let config = PipelineConfig { enable_lookahead: true, ..PipelineConfig::default() };
        let run = run_with(
            &world(relation, 0.7, danger, 0.0),
            &[],
            &PossibilityCatalog::default_catalog(),
            &config,
            seed,
        );
        let atoms = run.final_atoms();
        let violations = goal_boundary_violations(&AtomIndex::new(atoms));
        prop_assert!(violations.is_empty(), "{:?}", violations);
    }

    #[test]
    fn property_4_no_violence_protocol_disables_every_attack(
        anger in 0.0_f64..1.0,
        danger in 0.0_f64..1.0,
        strict in 0.61_f64..1.0,
    ) {
        let overrides = vec![pinned("emo:anger:alice", anger), pinned("ctx:proceduralStrict", strict)];
        let run = run(&world(neutral_relation(), 1.0, danger, strict), &overrides);
        let s8 = run.frame(StageId::S8).expect("S8");
        for possibility in &s8.artifacts.possibilities {
            if possibility.id.starts_with("aff:attack:") {
                prop_assert!(!possibility.enabled);
            }
        }
    }

    #[test]
    fn property_5_dyads_stay_within_relation_bounds(
        hostility in 0.1_f64..1.0,
        closeness in 0.0_f64..1.0,
        loyalty in 0.0_f64..1.0,
        armed in proptest::option::of(0.1_f64..1.0),
        harm in 0.2_f64..1.0,
    ) {
        let relation = RelationBase { hostility, closeness, loyalty, ..RelationBase::default() };
        let mut snapshot = world(relation.clone(), 0.0, 0.2, 0.0);
        if let Some(weapon) = armed {
            snapshot.agents[1].access.insert("weapon".to_string(), weapon);
        }
        let physical = armed.unwrap_or(0.0);
        let catalog = PossibilityCatalog::default_catalog();

        // Seeded values are exactly the bounded seed.
        let mut unbiased = PipelineConfig::default();
        unbiased.enabled_stages.insert("tom_bias".to_string(), false);
        let run = run_with(&snapshot, &[], &catalog, &unbiased, 9);
        let s5 = run.frame(StageId::S5).expect("S5");
        for metric in BOUNDED_METRICS {
            let dyad = s5.atom(&format!("tom:dyad:alice:bob:{metric}")).expect("seeded dyad");
            let bounds = dyad_bounds(metric, &relation, physical);
            prop_assert!(bounds.floor <= dyad.magnitude + 1e-9, "{metric} below floor");
            prop_assert!(dyad.magnitude <= bounds.cap + 1e-9, "{metric} above cap");
            let base = part_f64(dyad, "base").expect("base part");
            prop_assert!((dyad.magnitude - bounds.apply(base)).abs() < 1e-3, "{metric}");
        }
        if armed.is_some() {
            let threat = s5.atom("tom:dyad:alice:bob:threat").expect("threat");
            prop_assert!(threat.used_atom_ids().contains(&"obs:nearby:alice:bob:armed".to_string()));
        }

        // A remembered attack pushes the beliefs, but never past the bounds.
        let memory = remembered_attack(harm);
        let run = run_remembering(&snapshot, &memory, &[], &catalog, &PipelineConfig::default(), 9);
        let s5 = run.frame(StageId::S5).expect("S5");
        for metric in BOUNDED_METRICS {
            let dyad = s5.atom(&format!("tom:dyad:alice:bob:{metric}")).expect("biased dyad");
            let bounds = dyad_bounds(metric, &relation, physical);
            prop_assert!(bounds.floor <= dyad.magnitude + 1e-9, "{metric} below floor after bias");
            prop_assert!(dyad.magnitude <= bounds.cap + 1e-9, "{metric} above cap after bias");
        }
    }

    #[test]
    fn property_6_decisions_are_reproducible_under_a_fixed_seed(seed in 1_u64..u64::MAX) {
        let snapshot = world(neutral_relation(), 0.5, 0.5, 0.0);
        let catalog = PossibilityCatalog::default_catalog();
        let config = PipelineConfig::default();
        let first = run_with(&snapshot, &[], &catalog, &config, seed);
        let second = run_with(&snapshot, &[], &catalog, &config, seed);
        prop_assert_eq!(first.decision, second.decision);
    }
}
