//! World application boundary. The pipeline only proposes; an applier turns
//! an intent into a world-visible event.

use contracts::{ActionIntent, WorldEvent, HOSTILE_EVENT_KINDS, SUPPORTIVE_EVENT_KINDS};

pub trait WorldApplier {
    fn apply(&mut self, intent: &ActionIntent) -> WorldEvent;
}

/// Appends every applied intent to an in-memory event log.
#[derive(Debug, Clone, Default)]
pub struct EventLogApplier {
    pub events: Vec<WorldEvent>,
}

impl EventLogApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events applied during `tick`.
    pub fn events_at(&self, tick: u64) -> impl Iterator<Item = &WorldEvent> {
        self.events.iter().filter(move |event| event.tick == tick)
    }
}

impl WorldApplier for EventLogApplier {
    fn apply(&mut self, intent: &ActionIntent) -> WorldEvent {
        let seq = self.events_at(intent.tick).count();
        let mut tags = Vec::new();
        if HOSTILE_EVENT_KINDS.contains(&intent.action_id.as_str()) {
            tags.push("hostile".to_string());
        }
        if SUPPORTIVE_EVENT_KINDS.contains(&intent.action_id.as_str()) {
            tags.push("supportive".to_string());
        }
        let event = WorldEvent {
            id: format!("evt:{}:{}:{seq}", intent.tick, intent.actor_id),
            tick: intent.tick,
            kind: intent.action_id.clone(),
            actor_id: intent.actor_id.clone(),
            target_id: intent.target_id.clone(),
            location_id: intent.location_id.clone(),
            magnitude: contracts::clamp01(intent.intensity),
            tags,
        };
        self.events.push(event.clone());
        event
    }
}
