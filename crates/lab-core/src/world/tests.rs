use super::*;
use crate::fixtures::{two_agent_world, world_atom};
use crate::possibility::{RuleError, RuleOutput, RuleView};
use contracts::StageId;

fn config(worker_threads: usize) -> RunConfig {
    RunConfig {
        run_id: "world_test".to_string(),
        seed: 2024,
        ticks: 5,
        worker_threads,
        ..RunConfig::default()
    }
}

#[test]
fn step_commits_one_event_per_deciding_agent() {
    let mut world = LabWorld::new(config(1), two_agent_world());
    let report = world.step().expect("step").expect("tick");
    assert_eq!(report.step.t, 1);
    assert_eq!(report.decisions.len(), 2);
    assert_eq!(report.decisions[0].agent_id, "alice");
    assert_eq!(report.decisions[1].agent_id, "bob");
    let chosen = report
        .decisions
        .iter()
        .filter(|record| record.chosen.is_some())
        .count();
    assert_eq!(report.events.len(), chosen);
    assert_eq!(world.events().len(), chosen);
    assert!(world.explain("alice").is_some());
    assert_eq!(world.status().current_tick, 1);
}

#[test]
fn events_of_one_tick_feed_the_next() {
    let mut world = LabWorld::new(config(1), two_agent_world());
    let first = world.step().expect("step").expect("tick");
    let second = world.step().expect("step").expect("tick");
    assert_eq!(second.step.events, first.events);
    let memory = world.memory("alice").expect("memory");
    assert!(memory
        .entries
        .iter()
        .all(|entry| entry.event.location_id == "yard"));
}

#[test]
fn run_stops_at_configured_ticks() {
    let mut world = LabWorld::new(config(1), two_agent_world());
    let reports = world.run(10).expect("run");
    assert_eq!(reports.len(), 5);
    assert!(world.status().is_complete());
    assert!(world.step().expect("step").is_none());
}

#[test]
fn parallel_evaluation_matches_sequential() {
    let mut sequential = LabWorld::new(config(1), two_agent_world());
    let mut parallel = LabWorld::new(config(4), two_agent_world());
    sequential.run(5).expect("run");
    parallel.run(5).expect("run");
    assert_eq!(sequential.events(), parallel.events());
}

#[test]
fn overrides_reach_the_agent_pipeline() {
    let mut world = LabWorld::new(config(1), two_agent_world());
    world.set_override("alice", world_atom("ctx:danger", 0.1));
    world.set_override("alice", world_atom("ctx:danger", 0.9));
    assert_eq!(world.overrides("alice").len(), 1);
    world.step().expect("step");
    let run = world.explain("alice").expect("run");
    let danger = run
        .frame(StageId::S7)
        .and_then(|frame| frame.atom("ctx:danger"))
        .expect("danger");
    assert_eq!(danger.magnitude, 0.9);
    world.clear_overrides("alice");
    assert!(world.overrides("alice").is_empty());
}

struct Refusing;

impl PossibilityRule for Refusing {
    fn name(&self) -> &str {
        "refusing"
    }

    fn derive(&self, view: &RuleView<'_, '_>) -> Result<RuleOutput, RuleError> {
        Err(RuleError::Rule {
            rule: "refusing".to_string(),
            message: format!("no menu for {}", view.agent_id),
        })
    }
}

#[test]
fn failing_rule_skips_actions_without_stopping_the_world() {
    let mut world = LabWorld::new(config(1), two_agent_world());
    world.register_rule(Box::new(Refusing));
    let report = world.step().expect("step").expect("tick");
    assert_eq!(report.failures(), 2);
    assert!(report.events.is_empty());
    assert!(world.step().expect("step").is_some());
}

#[test]
fn pipeline_error_abandons_the_tick_and_keeps_committed_ones() {
    let mut world = LabWorld::new(config(1), two_agent_world());
    world.step().expect("step").expect("tick");
    let events_before = world.events().to_vec();

    let mut malformed = world_atom("ctx:danger", 0.5);
    malformed.id = "weather:storm".to_string();
    world.set_override("bob", malformed);
    let interrupted = world.run(3).expect_err("malformed override");
    assert!(interrupted.committed.is_empty());
    assert_eq!(interrupted.failed_tick, 2);
    assert!(matches!(
        interrupted.error,
        PipelineError::Stage {
            stage: StageId::S0,
            ..
        }
    ));
    assert_eq!(world.current_tick(), 1);
    assert_eq!(world.events(), events_before.as_slice());

    world.clear_overrides("bob");
    let reports = world.run(2).expect("run");
    assert_eq!(reports[0].step.t, 2);
}
