//! Small worlds shared by unit tests.

use contracts::{
    AgentState, AtomBuilder, ContextAtom, LocationState, PipelineConfig, Position, RelationBase,
    SimStep, WorldSnapshot,
};

use crate::canonical;
use crate::stage::StageContext;

pub fn agent_at(id: &str, location_id: &str, x: f64, y: f64) -> AgentState {
    let mut agent = AgentState::new(id, location_id);
    agent.position = Position::new(x, y);
    agent
}

/// Alice and Bob two units apart in a mildly dangerous yard.
pub fn two_agent_world() -> WorldSnapshot {
    let mut yard = LocationState::new("yard");
    yard.features.insert("danger".to_string(), 0.2);
    yard.features.insert("cover".to_string(), 0.5);
    yard.features.insert("escape".to_string(), 0.4);
    yard.features.insert("publicness".to_string(), 0.3);

    let mut alice = agent_at("alice", "yard", 0.0, 0.0);
    alice.features.insert("fatigue".to_string(), 0.3);
    alice.relations.insert(
        "bob".to_string(),
        RelationBase {
            closeness: 0.2,
            hostility: 0.1,
            ..RelationBase::default()
        },
    );
    let bob = agent_at("bob", "yard", 2.0, 0.0);

    WorldSnapshot {
        tick: 0,
        agents: vec![alice, bob],
        locations: vec![yard],
        events: Vec::new(),
    }
}

pub fn world_atom(id: &str, magnitude: f64) -> ContextAtom {
    AtomBuilder::world(id)
        .magnitude(magnitude)
        .build()
        .expect("fixture atom")
}

pub struct Fixture {
    pub world: WorldSnapshot,
    pub step: SimStep,
    pub config: PipelineConfig,
}

impl Fixture {
    pub fn new(world: WorldSnapshot) -> Self {
        let step = SimStep::new(world.tick, 42);
        Self {
            world,
            step,
            config: PipelineConfig::default(),
        }
    }

    pub fn ctx<'a>(&'a self, agent_id: &'a str) -> StageContext<'a> {
        let location_id = self
            .world
            .agent(agent_id)
            .map(|agent| agent.location_id.as_str())
            .unwrap_or("");
        StageContext {
            agent_id,
            location_id,
            world: &self.world,
            step: &self.step,
            config: &self.config,
        }
    }

    pub fn world_atoms(&self, agent_id: &str) -> Vec<ContextAtom> {
        let agent = self.world.agent(agent_id).expect("fixture agent");
        canonical::world_atoms(&self.ctx(agent_id), agent).expect("world atoms")
    }
}
