//! Staged, explainable inference pipeline: world facts become provenance-tagged
//! atoms, atoms become emotions, beliefs about others and goals, and goals
//! become one sampled action per agent and tick.

pub mod access;
pub mod appraisal;
pub mod apply;
pub mod atoms;
pub mod axes;
pub mod candidates;
pub mod canonical;
pub mod cost;
pub mod decision;
pub mod drivers;
pub mod goals;
pub mod hazard;
pub mod lens;
pub mod lookahead;
pub mod memory;
pub mod merge;
pub mod pipeline;
pub mod possibility;
pub mod priors;
pub mod proximity;
pub mod quarks;
pub mod relation_priors;
pub mod report;
pub mod rng;
pub mod stage;
pub mod tom;
pub mod validate;
pub mod world;

#[cfg(test)]
mod fixtures;

pub use apply::{EventLogApplier, WorldApplier};
pub use memory::BeliefMemory;
pub use merge::{merge_atoms_prefer_newer, MergeResult};
pub use pipeline::{run_pipeline, PipelineError, PipelineInput};
pub use possibility::{PossibilityCatalog, PossibilityRule, RuleError, RuleOutput, RuleView};
pub use report::{decision_breakdown, flatten_frame, DecisionBreakdownRow, FlatAtomRecord};
pub use rng::RngChannel;
pub use validate::validate_atoms;
pub use world::{DecisionRecord, LabWorld, RunInterrupted, TickReport};
