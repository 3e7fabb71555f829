//! Relationship facts as priors and hard bounds on theory-of-mind dyads.

use contracts::RelationBase;

pub const DYAD_METRICS: [&str; 8] = [
    "trust",
    "threat",
    "intimacy",
    "uncertainty",
    "alignment",
    "respect",
    "dominance",
    "support",
];

/// Relations weaker than this never produce beliefs.
pub const MIN_RELATION_STRENGTH: f64 = 0.05;
pub const SEED_CONFIDENCE: f64 = 0.65;

pub fn relation_strength(relation: &RelationBase) -> f64 {
    RelationBase::METRICS
        .iter()
        .map(|metric| relation.metric(metric))
        .fold(0.0, f64::max)
}

/// Linear seed for a dyad metric that has no value yet.
pub fn seed_value(metric: &str, relation: &RelationBase) -> f64 {
    let c = relation.closeness;
    let l = relation.loyalty;
    let h = relation.hostility;
    let d = relation.dependency;
    let a = relation.authority;
    let value = match metric {
        "trust" => 0.5 + 0.45 * c + 0.25 * l - 0.6 * h,
        "threat" => 0.1 + 0.8 * h + 0.1 * a - 0.2 * c,
        "intimacy" => 0.7 * c + 0.2 * d,
        "uncertainty" => 0.6 - 0.4 * relation_strength(relation),
        "alignment" => 0.5 + 0.4 * l + 0.2 * c - 0.5 * h,
        "respect" => 0.4 + 0.5 * a + 0.1 * l - 0.2 * h,
        "dominance" => 0.5 + 0.4 * a - 0.2 * d,
        "support" => 0.3 + 0.5 * c + 0.3 * l - 0.4 * h,
        _ => 0.5,
    };
    value.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DyadBounds {
    pub floor: f64,
    pub cap: f64,
}

impl DyadBounds {
    pub const OPEN: DyadBounds = DyadBounds { floor: 0.0, cap: 1.0 };

    /// `min(max(value, floor), cap)`.
    pub fn apply(&self, value: f64) -> f64 {
        value.max(self.floor).min(self.cap)
    }
}

/// `physical_threat` is the embodied threat of the other (e.g. visibly armed).
pub fn dyad_bounds(metric: &str, relation: &RelationBase, physical_threat: f64) -> DyadBounds {
    let c = relation.closeness;
    let l = relation.loyalty;
    let h = relation.hostility;
    let (floor, cap) = match metric {
        "trust" => (0.3 * c * (1.0 - h), 1.0 - 0.85 * h),
        "threat" => (0.6 * h + 0.3 * physical_threat, 1.0 - 0.5 * c * (1.0 - h)),
        "intimacy" => (0.5 * c, 1.0 - 0.6 * h),
        "support" => (0.3 * l, 1.0 - 0.7 * h),
        _ => (0.0, 1.0),
    };
    let cap = cap.clamp(0.0, 1.0);
    DyadBounds {
        // A crossing floor yields to the cap.
        floor: floor.clamp(0.0, 1.0).min(cap),
        cap,
    }
}
