//! Per-agent belief memory: the only state that survives between ticks.

use contracts::{AtomBuilder, AtomError, ContextAtom, WorldEvent};

use crate::atoms::{ids, AtomIndex};

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    pub event: WorldEvent,
    pub recorded_tick: u64,
    pub confidence: f64,
    pub salience: f64,
}

#[derive(Debug, Clone)]
pub struct BeliefMemory {
    pub agent_id: String,
    pub entries: Vec<MemoryEntry>,
    pub max_capacity: usize,
}

impl BeliefMemory {
    pub fn new(agent_id: impl Into<String>, max_capacity: usize) -> Self {
        Self {
            agent_id: agent_id.into(),
            entries: Vec::new(),
            max_capacity: max_capacity.max(1),
        }
    }

    /// Store events that happened where the agent stands. Already known events are skipped.
    pub fn record_events(&mut self, events: &[WorldEvent], location_id: &str, tick: u64) {
        for event in events.iter().filter(|event| event.location_id == location_id) {
            if self
                .entries
                .iter()
                .any(|entry| entry.event.id == event.id)
            {
                continue;
            }
            let involved = event.actor_id == self.agent_id
                || event.target_id.as_deref() == Some(self.agent_id.as_str());
            let salience = if involved {
                0.5 + 0.5 * event.magnitude
            } else {
                0.6 * event.magnitude
            };
            self.entries.push(MemoryEntry {
                event: event.clone(),
                recorded_tick: tick,
                confidence: 0.9,
                salience: salience.clamp(0.0, 1.0),
            });
        }
        self.enforce_capacity();
    }

    pub fn decay(&mut self, current_tick: u64) {
        for entry in &mut self.entries {
            let age = current_tick.saturating_sub(entry.recorded_tick) as f64;
            let decay = 0.01 + age / 480.0 + (1.0 - entry.salience) * 0.03;
            entry.confidence = (entry.confidence - decay).clamp(0.0, 1.0);
        }
        self.entries.retain(|entry| entry.confidence > 0.0);
    }

    fn enforce_capacity(&mut self) {
        if self.entries.len() <= self.max_capacity {
            return;
        }

        self.entries.sort_by(|a, b| {
            a.salience
                .total_cmp(&b.salience)
                .then(a.recorded_tick.cmp(&b.recorded_tick))
                .then(a.confidence.total_cmp(&b.confidence))
        });

        let over = self.entries.len() - self.max_capacity;
        self.entries.drain(0..over);
        self.entries.sort_by(|a, b| {
            a.recorded_tick
                .cmp(&b.recorded_tick)
                .then_with(|| a.event.id.cmp(&b.event.id))
        });
    }

    /// Belief atoms re-read by the next tick's canonical stage.
    pub fn atoms(&self) -> Result<Vec<ContextAtom>, AtomError> {
        self.entries
            .iter()
            .map(|entry| {
                let event = &entry.event;
                let mut builder = AtomBuilder::belief(ids::mem_event(&self.agent_id, &event.id))
                    .source("memory")
                    .kind("mem_event")
                    .subject(event.actor_id.clone())
                    .magnitude(event.magnitude)
                    .confidence(entry.confidence)
                    .tag(event.kind.clone())
                    .part("tick", event.tick)
                    .part("salience", entry.salience)
                    .label(format!("remembers {} doing {}", event.actor_id, event.kind));
                if let Some(target) = &event.target_id {
                    builder = builder.target(target.clone());
                }
                if event.is_hostile() {
                    builder = builder.tag("hostile");
                }
                if event.is_supportive() {
                    builder = builder.tag("supportive");
                }
                builder.build()
            })
            .collect()
    }
}

/// What recalled events say about danger and about one other agent.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recall {
    /// Strongest remembered hostility at all.
    pub hostility: f64,
    /// Strongest remembered hostility aimed at self.
    pub harm: f64,
    /// Strongest remembered support aimed at self.
    pub help: f64,
    pub used: Vec<String>,
}

/// Summarise recalled events, optionally only those by `actor`.
pub(crate) fn recall(index: &AtomIndex<'_>, self_id: &str, actor: Option<&str>) -> Recall {
    let mut recall = Recall::default();
    for atom in index.prefixed(&ids::mem_event_prefix(self_id)) {
        if let Some(actor) = actor {
            if atom.subject.as_deref() != Some(actor) {
                continue;
            }
        }
        let weight = atom.magnitude * atom.confidence;
        let aimed_at_self = atom.target.as_deref() == Some(self_id);
        if atom.has_tag("hostile") {
            recall.hostility = recall.hostility.max(weight);
            if aimed_at_self {
                recall.harm = recall.harm.max(weight);
            }
            recall.used.push(atom.id.clone());
        } else if atom.has_tag("supportive") && aimed_at_self {
            recall.help = recall.help.max(weight);
            recall.used.push(atom.id.clone());
        }
    }
    recall
}
