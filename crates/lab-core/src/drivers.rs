//! S6: motivational pressures. A scoreboard of raw pressures (`sb:*`), then
//! driver atoms (`drv:*`) with the two strongest amplified.

use std::fmt;

use contracts::{AtomBuilder, AtomError};

use crate::atoms::{ids, round4, settled, AtomIndex, Inputs};
use crate::tom::strongest_policy;
use crate::stage::{Derivation, StageContext};

pub const URGENCY_THRESHOLD: f64 = 0.6;
const TOP_BOOST: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DriverKind {
    Safety,
    Affiliation,
    Dominance,
    Autonomy,
    Rest,
    Care,
    Curiosity,
}

impl DriverKind {
    pub const ALL: [DriverKind; 7] = [
        DriverKind::Safety,
        DriverKind::Affiliation,
        DriverKind::Dominance,
        DriverKind::Autonomy,
        DriverKind::Rest,
        DriverKind::Care,
        DriverKind::Curiosity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DriverKind::Safety => "safety",
            DriverKind::Affiliation => "affiliation",
            DriverKind::Dominance => "dominance",
            DriverKind::Autonomy => "autonomy",
            DriverKind::Rest => "rest",
            DriverKind::Care => "care",
            DriverKind::Curiosity => "curiosity",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverReading {
    pub kind: DriverKind,
    pub pressure: f64,
}

/// Settled pressures for one agent, in `DriverKind::ALL` order.
#[derive(Debug, Clone, Default)]
pub struct DriverBoard {
    pub readings: Vec<DriverReading>,
}

impl DriverBoard {
    pub fn pressure(&self, kind: DriverKind) -> f64 {
        self.readings
            .iter()
            .find(|reading| reading.kind == kind)
            .map_or(0.0, |reading| reading.pressure)
    }

    pub fn top_pressures(&self, n: usize) -> Vec<(DriverKind, f64)> {
        let mut values: Vec<(DriverKind, f64)> = self
            .readings
            .iter()
            .map(|reading| (reading.kind, reading.pressure))
            .collect();
        values.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        values.truncate(n.min(values.len()));
        values
    }

    pub fn any_urgent(&self) -> bool {
        self.readings
            .iter()
            .any(|reading| reading.pressure >= URGENCY_THRESHOLD)
    }

    /// Read the board back from `drv:*` atoms.
    pub fn from_atoms(index: &AtomIndex<'_>, self_id: &str) -> Self {
        let readings = DriverKind::ALL
            .iter()
            .map(|kind| DriverReading {
                kind: *kind,
                pressure: index.value_or(&ids::drv(kind.as_str(), self_id), 0.0),
            })
            .collect();
        Self { readings }
    }
}

fn strongest_dyad_emotion(index: &AtomIndex<'_>, self_id: &str, emotion: &str, inputs: &mut Inputs) -> f64 {
    let prefix = format!("emo:dyad:{self_id}:");
    let suffix = format!(":{emotion}");
    let strongest = index
        .prefixed(&prefix)
        .filter(|atom| atom.id.ends_with(&suffix))
        .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude).then_with(|| b.id.cmp(&a.id)));
    match strongest {
        Some(atom) => {
            inputs.push(&atom.id);
            atom.magnitude
        }
        None => 0.0,
    }
}

fn strongest_policy_input(index: &AtomIndex<'_>, self_id: &str, policy: &str, inputs: &mut Inputs) -> f64 {
    match strongest_policy(index, self_id, policy) {
        Some((value, id)) => {
            inputs.push(&id);
            value
        }
        None => 0.0,
    }
}

/// Raw pressure for one driver with the atoms it read.
fn pressure(index: &AtomIndex<'_>, self_id: &str, kind: DriverKind) -> (f64, Inputs) {
    let mut i = Inputs::new();
    let emo = |name: &str| ids::emo(name, self_id);
    let value = match kind {
        DriverKind::Safety => {
            let fear = i.read(index, &emo("fear"));
            let threat = i.read(index, &ids::app("threat", self_id));
            fear.max(0.8 * threat)
        }
        DriverKind::Affiliation => {
            let approach = strongest_policy_input(index, self_id, "approach", &mut i);
            let sadness = i.read(index, &emo("sadness"));
            let care = i.read(index, &emo("care"));
            0.5 * approach + 0.3 * sadness + 0.2 * care
        }
        DriverKind::Dominance => {
            let anger = i.read(index, &emo("anger"));
            let confront = strongest_policy_input(index, self_id, "confront", &mut i);
            let hierarchy = i.read(index, &ids::ctx("hierarchy"));
            0.6 * anger + 0.3 * confront + 0.1 * hierarchy
        }
        DriverKind::Autonomy => {
            let blockage = i.read(index, &ids::app("blockage", self_id));
            let surveillance = i.read(index, &ids::ctx("surveillance"));
            let control = i.read_or(index, &ids::ctx("control"), 1.0);
            0.5 * blockage + 0.3 * surveillance + 0.2 * (1.0 - control)
        }
        DriverKind::Rest => {
            let fatigue = i.read(index, &ids::feat_body(self_id, "fatigue"));
            let pain = i.read(index, &ids::feat_body(self_id, "pain"));
            0.7 * fatigue + 0.3 * pain
        }
        DriverKind::Care => {
            let care = i.read(index, &emo("care"));
            let affection = strongest_dyad_emotion(index, self_id, "affection", &mut i);
            0.6 * care + 0.4 * affection
        }
        DriverKind::Curiosity => {
            let uncertainty = i.read(index, &ids::ctx("uncertainty"));
            let fear = i.read(index, &emo("fear"));
            0.6 * uncertainty * (1.0 - fear)
        }
    };
    (value.clamp(0.0, 1.0), i)
}

pub fn derive_drivers(index: &AtomIndex<'_>, ctx: &StageContext<'_>) -> Result<Derivation, AtomError> {
    let self_id = ctx.agent_id;
    let mut out = Derivation::new();
    out.qualifying = index.prefixed("emo:").count() + index.prefixed("ctx:").count();

    let mut board = DriverBoard::default();
    for kind in DriverKind::ALL {
        let (raw, inputs) = pressure(index, self_id, kind);
        let id = ids::sb(kind.as_str(), self_id);
        board.readings.push(DriverReading {
            kind,
            pressure: settled(index, &id, raw),
        });
        if index.is_pinned(&id) {
            continue;
        }
        let mut builder = AtomBuilder::derived(id)
            .source("drivers")
            .kind("scoreboard")
            .subject(self_id.to_string())
            .magnitude(raw);
        builder = if inputs.is_empty() {
            builder.note("no pressure inputs present")
        } else {
            builder.uses_all(inputs.into_ids())
        };
        out.push(builder.build()?);
    }

    let leaders: Vec<DriverKind> = board
        .top_pressures(2)
        .into_iter()
        .filter(|(_, pressure)| *pressure > 0.0)
        .map(|(kind, _)| kind)
        .collect();
    for reading in &board.readings {
        let id = ids::drv(reading.kind.as_str(), self_id);
        if index.is_pinned(&id) {
            continue;
        }
        let leading = leaders.contains(&reading.kind);
        let value = if leading {
            (reading.pressure * TOP_BOOST).min(1.0)
        } else {
            reading.pressure
        };
        let mut builder = AtomBuilder::derived(id)
            .source("drivers")
            .kind("driver")
            .subject(self_id.to_string())
            .magnitude(value)
            .uses(ids::sb(reading.kind.as_str(), self_id))
            .part("pressure", round4(reading.pressure))
            .part("leading", leading);
        if value >= URGENCY_THRESHOLD {
            builder = builder.tag("urgent");
        }
        out.push(builder.build()?);
    }

    Ok(out)
}
