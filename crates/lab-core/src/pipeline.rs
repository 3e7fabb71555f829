//! Stage runner: S0 through S9 for one agent and one tick.
//!
//! Atoms move between stages only through `merge_atoms_prefer_newer`. Every
//! stage leaves a frame holding the accumulated atom set. S8 is fault
//! isolated; everything else propagates builder errors.

use std::error::Error as StdError;

use contracts::{
    ActionCandidate, AtomError, ContextAtom, DecisionReport, PipelineConfig, PipelineRun,
    Possibility, SimStep, StageArtifacts, StageFailure, StageFrame, StageId, ValidationMode,
    WorldSnapshot,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::access::apply_access;
use crate::appraisal::derive_appraisal;
use crate::atoms::AtomIndex;
use crate::axes::derive_axes;
use crate::candidates::build_candidates;
use crate::canonical::{pin_overrides, world_atoms};
use crate::cost::derive_costs;
use crate::decision::{adopt, decide_action};
use crate::drivers::derive_drivers;
use crate::goals::{derive_goals, goal_energy};
use crate::hazard::derive_hazards;
use crate::lens::derive_lens;
use crate::lookahead::{prediction_atoms, run_lookahead};
use crate::merge::merge_atoms_prefer_newer;
use crate::possibility::{affordance_atoms, PossibilityCatalog, RuleError, RuleView};
use crate::priors::derive_priors;
use crate::proximity::derive_proximity;
use crate::quarks::quark_frames;
use crate::rng::RngChannel;
use crate::stage::{Derivation, StageContext};
use crate::tom::{belief_bias, derive_policies, dyad_baselines, seed_relation_priors};
use crate::validate::{stage_stats, validate_atoms};

pub const TOM_DISABLED_WARNING: &str = "theory of mind disabled; no dyads or policies derived";

/// Everything one pipeline run reads.
#[derive(Debug, Clone, Copy)]
pub struct PipelineInput<'a> {
    pub agent_id: &'a str,
    pub world: &'a WorldSnapshot,
    /// Persisted belief atoms of this agent.
    pub memory_atoms: &'a [ContextAtom],
    /// Manual overrides; pinned for the whole run.
    pub overrides: &'a [ContextAtom],
    pub step: &'a SimStep,
    pub catalog: &'a PossibilityCatalog,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("agent `{0}` is not in the world snapshot")]
    UnknownAgent(String),
    #[error("stage {stage} failed")]
    Stage {
        stage: StageId,
        #[source]
        source: AtomError,
    },
}

/// Failure inside the action stage.
#[derive(Debug, Error)]
enum ActionStageError {
    #[error("possibility derivation failed")]
    Rule(#[from] RuleError),
    #[error("action atom construction failed")]
    Atom(#[from] AtomError),
}

impl ActionStageError {
    fn into_failure(self) -> StageFailure {
        let mut stack = Vec::new();
        let mut cause: Option<&(dyn StdError + 'static)> = self.source();
        while let Some(err) = cause {
            stack.push(err.to_string());
            cause = err.source();
        }
        StageFailure {
            name: StageId::S8.to_string(),
            message: self.to_string(),
            stack,
        }
    }
}

/// Atom set of one stage while its enrichers run.
struct Accumulator {
    start: Vec<ContextAtom>,
    atoms: Vec<ContextAtom>,
    warnings: Vec<String>,
}

impl Accumulator {
    fn new(atoms: Vec<ContextAtom>) -> Self {
        Self {
            start: atoms.clone(),
            atoms,
            warnings: Vec::new(),
        }
    }

    fn index(&self) -> AtomIndex<'_> {
        AtomIndex::new(&self.atoms)
    }

    fn absorb(&mut self, enricher: &str, derivation: Derivation) {
        if let Some(warning) = derivation.missing_enrichment(enricher) {
            self.warnings.push(warning);
        }
        self.warnings.extend(derivation.warnings);
        self.merge(enricher, derivation.atoms);
    }

    /// Merge, except that computed atoms never replace pinned ones.
    fn merge(&mut self, enricher: &str, atoms: Vec<ContextAtom>) {
        let kept: Vec<ContextAtom> = {
            let index = AtomIndex::new(&self.atoms);
            let warnings = &mut self.warnings;
            atoms
                .into_iter()
                .filter(|atom| {
                    let collides = index.is_pinned(&atom.id) && !atom.is_pinned();
                    if collides {
                        warnings.push(format!(
                            "{enricher} tried to replace pinned atom `{}`",
                            atom.id
                        ));
                    }
                    !collides
                })
                .collect()
        };
        self.atoms = merge_atoms_prefer_newer(&self.atoms, &kept).atoms;
    }

    fn finish(
        self,
        agent_id: &str,
        stage: StageId,
        mode: ValidationMode,
        artifacts: StageArtifacts,
    ) -> StageFrame {
        let overridden: Vec<String> = self
            .start
            .iter()
            .zip(self.atoms.iter())
            .filter(|(before, after)| before != after)
            .map(|(before, _)| before.id.clone())
            .collect();
        let new: Vec<String> = self
            .atoms
            .iter()
            .skip(self.start.len())
            .map(|atom| atom.id.clone())
            .collect();
        let mut warnings = self.warnings;
        warnings.extend(validate_atoms(&self.atoms, mode));
        let stats = stage_stats(&self.atoms, new.len(), overridden.len());

        debug!(
            agent = agent_id,
            %stage,
            atoms = stats.atom_count,
            new = stats.new_count,
            overridden = stats.overridden_count,
            "stage complete"
        );
        for warning in &warnings {
            warn!(agent = agent_id, %stage, "{warning}");
        }

        StageFrame {
            stage,
            title: stage.title().to_string(),
            atoms: self.atoms,
            new_atom_ids: new,
            overridden_atom_ids: overridden,
            warnings,
            stats,
            artifacts,
        }
    }
}

fn staged<T>(stage: StageId, result: Result<T, AtomError>) -> Result<T, PipelineError> {
    result.map_err(|source| PipelineError::Stage { stage, source })
}

pub fn run_pipeline(input: &PipelineInput<'_>, config: &PipelineConfig) -> Result<PipelineRun, PipelineError> {
    let agent = input
        .world
        .agent(input.agent_id)
        .ok_or_else(|| PipelineError::UnknownAgent(input.agent_id.to_string()))?;
    let ctx = StageContext {
        agent_id: input.agent_id,
        location_id: &agent.location_id,
        world: input.world,
        step: input.step,
        config,
    };
    let mode = config.validation;
    let mut frames: Vec<StageFrame> = Vec::with_capacity(StageId::ALL.len());

    // S0
    let mut acc = Accumulator::new(Vec::new());
    let observed = staged(StageId::S0, world_atoms(&ctx, agent))?;
    acc.merge("world", observed);
    acc.merge("memory", input.memory_atoms.to_vec());
    let pinned = staged(StageId::S0, pin_overrides(input.overrides))?;
    acc.atoms = merge_atoms_prefer_newer(&acc.atoms, &pinned).atoms;
    let frame = acc.finish(ctx.agent_id, StageId::S0, mode, StageArtifacts::default());
    let mut atoms = frame.atoms.clone();
    frames.push(frame);

    // S1
    let acc = Accumulator::new(atoms);
    let artifacts = StageArtifacts {
        quarks: quark_frames(&acc.atoms),
        ..StageArtifacts::default()
    };
    let frame = acc.finish(ctx.agent_id, StageId::S1, mode, artifacts);
    atoms = frame.atoms.clone();
    frames.push(frame);

    // S2
    let mut acc = Accumulator::new(atoms);
    if config.stage_enabled("proximity") {
        let derivation = staged(StageId::S2, derive_proximity(&acc.index(), &ctx))?;
        acc.absorb("proximity", derivation);
    }
    if config.stage_enabled("hazard") {
        let derivation = staged(StageId::S2, derive_hazards(&acc.index(), &ctx))?;
        acc.absorb("hazard", derivation);
    }
    let derivation = staged(StageId::S2, derive_axes(&acc.index(), &ctx))?;
    acc.absorb("axes", derivation);
    let frame = acc.finish(ctx.agent_id, StageId::S2, mode, StageArtifacts::default());
    atoms = frame.atoms.clone();
    frames.push(frame);

    // S3
    let mut acc = Accumulator::new(atoms);
    if config.stage_enabled("lens") {
        let derivation = staged(StageId::S3, derive_lens(&acc.index(), &ctx))?;
        acc.absorb("lens", derivation);
    } else {
        acc.warnings.push("lens disabled; axes left objective".to_string());
    }
    let frame = acc.finish(ctx.agent_id, StageId::S3, mode, StageArtifacts::default());
    atoms = frame.atoms.clone();
    frames.push(frame);

    // S4
    let mut acc = Accumulator::new(atoms);
    let derivation = staged(StageId::S4, derive_appraisal(&acc.index(), &ctx))?;
    acc.absorb("appraisal", derivation);
    let frame = acc.finish(ctx.agent_id, StageId::S4, mode, StageArtifacts::default());
    atoms = frame.atoms.clone();
    frames.push(frame);

    // S5
    let mut acc = Accumulator::new(atoms);
    if config.enable_tom {
        let derivation = staged(StageId::S5, seed_relation_priors(&acc.index(), &ctx))?;
        acc.absorb("relation_priors", derivation);
        let derivation = staged(StageId::S5, dyad_baselines(&acc.index(), &ctx))?;
        acc.absorb("tom_baseline", derivation);
        if config.stage_enabled("tom_bias") {
            let derivation = staged(StageId::S5, belief_bias(&acc.index(), &ctx))?;
            acc.absorb("tom_bias", derivation);
        }
        let derivation = staged(StageId::S5, derive_policies(&acc.index(), &ctx))?;
        acc.absorb("tom_policy", derivation);
    } else {
        acc.warnings.push(TOM_DISABLED_WARNING.to_string());
    }
    let frame = acc.finish(ctx.agent_id, StageId::S5, mode, StageArtifacts::default());
    atoms = frame.atoms.clone();
    frames.push(frame);

    // S6
    let mut acc = Accumulator::new(atoms);
    let derivation = staged(StageId::S6, derive_drivers(&acc.index(), &ctx))?;
    acc.absorb("drivers", derivation);
    let frame = acc.finish(ctx.agent_id, StageId::S6, mode, StageArtifacts::default());
    atoms = frame.atoms.clone();
    frames.push(frame);

    // S7
    let mut acc = Accumulator::new(atoms);
    let derivation = staged(StageId::S7, derive_goals(&acc.index(), &ctx))?;
    acc.absorb("goals", derivation);
    let frame = acc.finish(ctx.agent_id, StageId::S7, mode, StageArtifacts::default());
    atoms = frame.atoms.clone();
    frames.push(frame);

    // S8
    let (frame, decision, failure) = match run_action_stage(&atoms, &ctx, input, agent.temperature) {
        Ok(outcome) => {
            let artifacts = StageArtifacts {
                possibilities: outcome.possibilities,
                candidates: outcome.candidates,
                decision: Some(outcome.decision.clone()),
                ..StageArtifacts::default()
            };
            let frame = outcome.acc.finish(ctx.agent_id, StageId::S8, mode, artifacts);
            (frame, Some(outcome.decision), None)
        }
        Err(err) => {
            let failure = err.into_failure();
            warn!(agent = ctx.agent_id, error = %failure, "action stage failed; no action this tick");
            let mut acc = Accumulator::new(atoms);
            acc.warnings.push(format!("{failure}"));
            let artifacts = StageArtifacts {
                failure: Some(failure.clone()),
                ..StageArtifacts::default()
            };
            let frame = acc.finish(ctx.agent_id, StageId::S8, mode, artifacts);
            (frame, None, Some(failure))
        }
    };
    atoms = frame.atoms.clone();
    frames.push(frame);

    // S9
    let mut acc = Accumulator::new(atoms);
    if config.enable_lookahead {
        if let Some(report) = &decision {
            let predicted = staged(StageId::S9, prediction_atoms(ctx.agent_id, report))?;
            if predicted.is_empty() && report.best.is_some() {
                acc.warnings
                    .push("lookahead produced no prediction for the chosen action".to_string());
            }
            acc.merge("lookahead", predicted);
        }
    }
    frames.push(acc.finish(ctx.agent_id, StageId::S9, mode, StageArtifacts::default()));

    Ok(PipelineRun {
        agent_id: ctx.agent_id.to_string(),
        tick: input.step.t,
        frames,
        decision,
        failure,
    })
}

struct ActionOutcome {
    acc: Accumulator,
    possibilities: Vec<Possibility>,
    candidates: Vec<ActionCandidate>,
    decision: DecisionReport,
}

fn run_action_stage(
    atoms: &[ContextAtom],
    ctx: &StageContext<'_>,
    input: &PipelineInput<'_>,
    temperature: Option<f64>,
) -> Result<ActionOutcome, ActionStageError> {
    let config = ctx.config;
    let agent_id = ctx.agent_id;
    let mut acc = Accumulator::new(atoms.to_vec());

    let derived = {
        let index = acc.index();
        let view = RuleView {
            agent_id,
            index: &index,
            config,
        };
        input.catalog.derive_all(&view)?
    };
    let mut possibilities = derived.possibilities;
    let access = apply_access(
        &acc.index(),
        agent_id,
        config.weapon_access_threshold,
        &mut possibilities,
    )?;
    let affordances = affordance_atoms(agent_id, &possibilities)?;
    acc.merge("constraints", derived.constraints);
    acc.merge("access", access);
    acc.merge("possibilities", affordances);

    let costs = derive_costs(
        &acc.index(),
        agent_id,
        &config.cost_weights,
        config.prune_magnitude,
        &mut possibilities,
    )?;
    acc.merge("cost", costs);
    let priors = derive_priors(&acc.index(), agent_id, &possibilities)?;
    acc.merge("priors", priors);

    let candidates = build_candidates(&acc.index(), agent_id, &possibilities);
    let energy = goal_energy(&acc.index(), agent_id);
    let mut decision_config = config.decision.clone();
    if let Some(temperature) = temperature {
        decision_config.temperature = temperature;
    }
    let mut rng = RngChannel::new(ctx.step.seed, agent_id, ctx.step.t, "decision");
    let mut decision = decide_action(agent_id, &candidates, &energy, &decision_config, &mut rng)?;

    if config.enable_lookahead && decision.best.is_some() {
        let mut rng = RngChannel::new(ctx.step.seed, agent_id, ctx.step.t, "lookahead");
        let lookahead = run_lookahead(&acc.index(), &decision, &decision_config, &mut rng);
        if lookahead.applied_to_choice {
            if let Some(best) = &lookahead.best_by_lookahead {
                adopt(&mut decision, best)?;
            }
        }
        decision.lookahead = Some(lookahead);
    }
    acc.warnings.extend(decision.warnings.iter().cloned());
    acc.merge("decision", decision.decision_atoms.clone());

    Ok(ActionOutcome {
        acc,
        possibilities,
        candidates,
        decision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{two_agent_world, world_atom};
    use crate::possibility::{PossibilityRule, RuleOutput};

    struct Failing;

    impl PossibilityRule for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn derive(&self, _view: &RuleView<'_, '_>) -> Result<RuleOutput, RuleError> {
            Err(RuleError::Rule {
                rule: "failing".to_string(),
                message: "inventory unavailable".to_string(),
            })
        }
    }

    fn run(world: &WorldSnapshot, overrides: &[ContextAtom], catalog: &PossibilityCatalog, config: &PipelineConfig) -> PipelineRun {
        let step = SimStep::new(world.tick, 7);
        let input = PipelineInput {
            agent_id: "alice",
            world,
            memory_atoms: &[],
            overrides,
            step: &step,
            catalog,
        };
        run_pipeline(&input, config).expect("pipeline")
    }

    #[test]
    fn every_stage_leaves_a_frame_and_a_decision() {
        let world = two_agent_world();
        let catalog = PossibilityCatalog::default_catalog();
        let run = run(&world, &[], &catalog, &PipelineConfig::default());
        let stages: Vec<StageId> = run.frames.iter().map(|frame| frame.stage).collect();
        assert_eq!(stages, StageId::ALL.to_vec());
        assert!(run.decision.as_ref().and_then(|d| d.best.as_ref()).is_some());
        assert!(run.failure.is_none());
        let s8 = run.frame(StageId::S8).expect("S8");
        assert!(!s8.artifacts.possibilities.is_empty());
        assert!(s8.atoms.iter().any(|atom| atom.id.starts_with("action:score:alice:")));
    }

    #[test]
    fn pinned_override_survives_every_stage() {
        let world = two_agent_world();
        let catalog = PossibilityCatalog::default_catalog();
        let overrides = vec![world_atom("ctx:danger", 0.95)];
        let run = run(&world, &overrides, &catalog, &PipelineConfig::default());
        for frame in &run.frames[2..] {
            let danger = frame.atom("ctx:danger").expect("danger");
            assert_eq!(danger.magnitude, 0.95, "{}", frame.stage);
            assert!(danger.is_pinned());
        }
    }

    #[test]
    fn action_stage_failure_is_isolated() {
        let world = two_agent_world();
        let mut catalog = PossibilityCatalog::default_catalog();
        catalog.register(Box::new(Failing));
        let run = run(&world, &[], &catalog, &PipelineConfig::default());
        let s7 = run.frame(StageId::S7).expect("S7");
        let s8 = run.frame(StageId::S8).expect("S8");
        assert_eq!(s7.atoms, s8.atoms);
        assert!(s8.failed());
        assert!(run.decision.is_none());
        let failure = run.failure.expect("failure");
        assert!(failure.stack.iter().any(|line| line.contains("inventory unavailable")));
    }

    #[test]
    fn disabling_tom_is_reported() {
        let world = two_agent_world();
        let catalog = PossibilityCatalog::default_catalog();
        let config = PipelineConfig {
            enable_tom: false,
            ..PipelineConfig::default()
        };
        let run = run(&world, &[], &catalog, &config);
        let s5 = run.frame(StageId::S5).expect("S5");
        assert!(s5.warnings.iter().any(|w| w == TOM_DISABLED_WARNING));
        assert!(s5.new_atom_ids.is_empty());
    }

    #[test]
    fn lookahead_predicts_when_enabled() {
        let world = two_agent_world();
        let catalog = PossibilityCatalog::default_catalog();
        let config = PipelineConfig {
            enable_lookahead: true,
            ..PipelineConfig::default()
        };
        let run = run(&world, &[], &catalog, &config);
        let decision = run.decision.as_ref().expect("decision");
        assert!(decision.lookahead.is_some());
        let s9 = run.frame(StageId::S9).expect("S9");
        assert!(s9.new_atom_ids.iter().any(|id| id == "pred:danger:alice"));
    }

    #[test]
    fn sampled_choice_outside_lookahead_width_is_still_predicted() {
        let world = two_agent_world();
        let catalog = PossibilityCatalog::default_catalog();
        let mut config = PipelineConfig {
            enable_lookahead: true,
            ..PipelineConfig::default()
        };
        config.decision.temperature = 50.0;
        config.decision.lookahead_width = 1;

        let mut outside_width = 0;
        for seed in 0..40 {
            let step = SimStep::new(world.tick, seed);
            let input = PipelineInput {
                agent_id: "alice",
                world: &world,
                memory_atoms: &[],
                overrides: &[],
                step: &step,
                catalog: &catalog,
            };
            let run = run_pipeline(&input, &config).expect("pipeline");
            let decision = run.decision.as_ref().expect("decision");
            let best = decision.best.as_ref().expect("best");
            if decision.ranked[0].candidate.id != best.candidate.id {
                outside_width += 1;
            }
            let lookahead = decision.lookahead.as_ref().expect("lookahead");
            assert!(lookahead
                .entries
                .iter()
                .any(|entry| entry.candidate_id == best.candidate.id));
            let s9 = run.frame(StageId::S9).expect("S9");
            assert!(s9.new_atom_ids.iter().any(|id| id == "pred:danger:alice"), "seed {seed}");
            assert!(s9.warnings.is_empty(), "seed {seed}: {:?}", s9.warnings);
        }
        assert!(outside_width > 0);
    }

    #[test]
    fn unknown_agent_is_an_error() {
        let world = two_agent_world();
        let catalog = PossibilityCatalog::default_catalog();
        let step = SimStep::new(0, 1);
        let input = PipelineInput {
            agent_id: "nobody",
            world: &world,
            memory_atoms: &[],
            overrides: &[],
            step: &step,
            catalog: &catalog,
        };
        let err = run_pipeline(&input, &PipelineConfig::default()).expect_err("unknown");
        assert!(matches!(err, PipelineError::UnknownAgent(_)));
    }
}
