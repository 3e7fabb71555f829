//! Cross-boundary contracts for the goal-lab pipeline, world driver, persistence and CLI.

pub mod action;
pub mod atom;
pub mod config;
pub mod frame;
pub mod seed_string;
pub mod world;

pub use action::{
    ActionCandidate, ActionIntent, CostVector, DecisionReport, LookaheadEntry, LookaheadReport,
    Possibility, PossibilityKind, RankedAction,
};
pub use atom::{
    clamp01, AtomBuilder, AtomError, AtomNs, AtomOrigin, AtomTrace, ContextAtom, OVERRIDE_TAG,
};
pub use config::{
    CostWeights, DecisionConfig, PipelineConfig, RunConfig, RunStatus, ValidationMode,
    SCHEMA_VERSION_V1,
};
pub use frame::{
    PipelineRun, QuarkFrame, StageArtifacts, StageFailure, StageFrame, StageId, StageStats,
};
pub use world::{
    AgentState, Hazard, LensProfile, LocationState, Position, RelationBase, SimStep,
    WorldEvent, WorldSnapshot, HOSTILE_EVENT_KINDS, SUPPORTIVE_EVENT_KINDS,
};
