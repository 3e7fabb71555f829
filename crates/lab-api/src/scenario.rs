//! Built-in demo scenario: a tense market square and a quiet alley next to it.

use contracts::{
    AgentState, Hazard, LensProfile, LocationState, Position, RelationBase, WorldSnapshot,
};

fn location(id: &str, features: &[(&str, f64)], tags: &[&str]) -> LocationState {
    let mut location = LocationState::new(id);
    for (key, value) in features {
        location.features.insert((*key).to_string(), *value);
    }
    location.tags = tags.iter().map(|tag| (*tag).to_string()).collect();
    location
}

fn relation(closeness: f64, loyalty: f64, hostility: f64, tags: &[&str]) -> RelationBase {
    RelationBase {
        closeness,
        loyalty,
        hostility,
        tags: tags.iter().map(|tag| (*tag).to_string()).collect(),
        ..RelationBase::default()
    }
}

fn agent(id: &str, name: &str, location_id: &str, x: f64, y: f64) -> AgentState {
    let mut agent = AgentState::new(id, location_id);
    agent.name = name.to_string();
    agent.position = Position::new(x, y);
    agent
}

pub fn demo_world() -> WorldSnapshot {
    let mut market = location(
        "market",
        &[
            ("danger", 0.35),
            ("cover", 0.3),
            ("escape", 0.6),
            ("publicness", 0.8),
            ("surveillance", 0.5),
            ("procedural_strict", 0.4),
            ("scarcity", 0.5),
            ("time_pressure", 0.3),
        ],
        &["public"],
    );
    market.hazards.push(Hazard {
        id: "collapsed_stall".to_string(),
        kind: "structural".to_string(),
        position: Position::new(4.0, 1.0),
        radius: 3.0,
        severity: 0.6,
    });
    let alley = location(
        "alley",
        &[
            ("danger", 0.2),
            ("cover", 0.7),
            ("escape", 0.3),
            ("publicness", 0.1),
            ("privacy", 0.8),
        ],
        &["private"],
    );

    let mut mira = agent("mira", "Mira", "market", 0.0, 0.0);
    mira.features.insert("fatigue".to_string(), 0.4);
    mira.features.insert("hunger".to_string(), 0.3);
    mira.relations
        .insert("tomas".to_string(), relation(0.1, 0.0, 0.8, &["rival"]));
    mira.relations
        .insert("ilse".to_string(), relation(0.7, 0.6, 0.0, &["friend"]));
    mira.access.insert("weapon".to_string(), 0.7);
    mira.lens = LensProfile {
        paranoia: 0.4,
        ..LensProfile::default()
    };

    let mut tomas = agent("tomas", "Tomas", "market", 3.0, 0.0);
    tomas.features.insert("pain".to_string(), 0.2);
    tomas
        .relations
        .insert("mira".to_string(), relation(0.1, 0.0, 0.6, &[]));
    tomas.access.insert("weapon".to_string(), 0.9);
    tomas.lens = LensProfile {
        status_sensitivity: 0.6,
        optimism: -0.2,
        ..LensProfile::default()
    };
    tomas.temperature = Some(0.6);

    let mut ilse = agent("ilse", "Ilse", "market", 1.0, 2.0);
    ilse.features.insert("fatigue".to_string(), 0.7);
    ilse.relations
        .insert("mira".to_string(), relation(0.8, 0.7, 0.0, &["friend"]));
    ilse.lens = LensProfile {
        optimism: 0.5,
        intimacy_bias: 0.4,
        ..LensProfile::default()
    };

    let mut oren = agent("oren", "Oren", "alley", 0.0, 0.0);
    oren.features.insert("fatigue".to_string(), 0.2);

    WorldSnapshot {
        tick: 0,
        agents: vec![mira, tomas, ilse, oren],
        locations: vec![market, alley],
        events: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_agent_stands_in_a_known_location() {
        let world = demo_world();
        assert_eq!(world.agents.len(), 4);
        for agent in &world.agents {
            assert!(world.location(&agent.location_id).is_some(), "{}", agent.id);
            for other in agent.relations.keys() {
                assert!(world.agent(other).is_some(), "{} -> {other}", agent.id);
            }
        }
    }
}
