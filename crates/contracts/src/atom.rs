//! Context atoms: the single unit of knowledge flowing through the pipeline.
//!
//! An atom is addressed by a structured id (`ns:category:subject[:target][:metric]`).
//! Two atoms carrying the same id are the same fact at different points of its
//! derivation history, so ids must be a pure function of what the atom is about.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Tag carried by manual override atoms. Derivers never recompute a pinned id.
pub const OVERRIDE_TAG: &str = "override";

/// Coarse namespace of an atom, parsed from the id prefix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AtomNs {
    /// Raw world facts (locations, hazards, positions).
    World,
    /// Direct observations made this tick.
    Obs,
    /// Recalled belief memory.
    Mem,
    /// Opaque physiological / body signals.
    Feat,
    /// Relationship base facts.
    Rel,
    /// Capability access (weapons, keys, ...).
    Access,
    /// Context axes.
    Ctx,
    /// Subjective lens traits and biases.
    Lens,
    /// Hazard geometry.
    Haz,
    /// Social proximity.
    Prox,
    /// Cognitive appraisals.
    App,
    /// Emotions, including dyadic emotions.
    Emo,
    /// Theory of mind dyads and policies.
    Tom,
    /// Motivational scoreboard.
    Sb,
    /// Drivers consumed by goal scoring.
    Drv,
    /// Goal layer.
    Goal,
    /// Goal projections readable by the action layer.
    Util,
    /// Possibilities (affordances).
    Aff,
    /// Constraints.
    Con,
    /// Cost vectors.
    Cost,
    /// Action layer: priors and decision scores.
    Action,
    /// Predicted next state.
    Pred,
}

impl AtomNs {
    pub const ALL: [AtomNs; 22] = [
        AtomNs::World,
        AtomNs::Obs,
        AtomNs::Mem,
        AtomNs::Feat,
        AtomNs::Rel,
        AtomNs::Access,
        AtomNs::Ctx,
        AtomNs::Lens,
        AtomNs::Haz,
        AtomNs::Prox,
        AtomNs::App,
        AtomNs::Emo,
        AtomNs::Tom,
        AtomNs::Sb,
        AtomNs::Drv,
        AtomNs::Goal,
        AtomNs::Util,
        AtomNs::Aff,
        AtomNs::Con,
        AtomNs::Cost,
        AtomNs::Action,
        AtomNs::Pred,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AtomNs::World => "world",
            AtomNs::Obs => "obs",
            AtomNs::Mem => "mem",
            AtomNs::Feat => "feat",
            AtomNs::Rel => "rel",
            AtomNs::Access => "access",
            AtomNs::Ctx => "ctx",
            AtomNs::Lens => "lens",
            AtomNs::Haz => "haz",
            AtomNs::Prox => "prox",
            AtomNs::App => "app",
            AtomNs::Emo => "emo",
            AtomNs::Tom => "tom",
            AtomNs::Sb => "sb",
            AtomNs::Drv => "drv",
            AtomNs::Goal => "goal",
            AtomNs::Util => "util",
            AtomNs::Aff => "aff",
            AtomNs::Con => "con",
            AtomNs::Cost => "cost",
            AtomNs::Action => "action",
            AtomNs::Pred => "pred",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ns| ns.as_str() == prefix)
    }

    /// Parse the namespace of a full atom id (`ctx:danger` -> `Ctx`).
    pub fn from_id(id: &str) -> Option<Self> {
        id.split(':').next().and_then(Self::from_prefix)
    }
}

impl fmt::Display for AtomNs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an atom was observed, recalled, or computed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AtomOrigin {
    World,
    Belief,
    Derived,
}

impl AtomOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            AtomOrigin::World => "world",
            AtomOrigin::Belief => "belief",
            AtomOrigin::Derived => "derived",
        }
    }
}

/// Provenance record of a derived atom.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AtomTrace {
    #[serde(default)]
    pub used_atom_ids: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub parts: BTreeMap<String, Value>,
}

impl AtomTrace {
    pub fn is_empty(&self) -> bool {
        self.used_atom_ids.is_empty() && self.notes.is_empty() && self.parts.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextAtom {
    pub id: String,
    pub ns: AtomNs,
    pub kind: String,
    pub origin: AtomOrigin,
    pub source: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    pub magnitude: f64,
    pub confidence: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub trace: Option<AtomTrace>,
}

impl ContextAtom {
    pub fn is_pinned(&self) -> bool {
        self.tags.contains(OVERRIDE_TAG)
    }

    pub fn is_derived(&self) -> bool {
        self.origin == AtomOrigin::Derived
    }

    pub fn used_atom_ids(&self) -> &[String] {
        self.trace
            .as_ref()
            .map(|trace| trace.used_atom_ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Copy of this atom under a different id, keeping provenance pointing at
    /// whatever the original cited. Used for base copies before an override.
    pub fn relabelled(&self, id: impl Into<String>, note: &str) -> Result<ContextAtom, AtomError> {
        let id = id.into();
        let ns = AtomNs::from_id(&id).ok_or_else(|| AtomError::UnknownNamespace { id: id.clone() })?;
        let mut trace = self.trace.clone().unwrap_or_default();
        trace.used_atom_ids.retain(|used| used != &id);
        trace.notes.push(note.to_string());
        let mut copy = self.clone();
        copy.id = id;
        copy.ns = ns;
        copy.trace = Some(trace);
        copy.tags.remove(OVERRIDE_TAG);
        copy.tags.insert("base_copy".to_string());
        Ok(copy)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AtomError {
    #[error("atom id is empty")]
    EmptyId,
    #[error("atom id `{id}` has no known namespace prefix")]
    UnknownNamespace { id: String },
    #[error("derived atom `{id}` cites itself in its trace")]
    SelfReference { id: String },
    #[error("derived atom `{id}` has no trace")]
    MissingTrace { id: String },
}

/// Clamp to [0, 1]; non-finite values collapse to 0.
pub fn clamp01(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Step-wise constructor enforcing the atom invariants at build time.
#[derive(Debug, Clone)]
pub struct AtomBuilder {
    id: String,
    origin: AtomOrigin,
    kind: Option<String>,
    source: String,
    subject: Option<String>,
    target: Option<String>,
    magnitude: f64,
    confidence: f64,
    tags: BTreeSet<String>,
    label: Option<String>,
    code: Option<String>,
    used: Vec<String>,
    notes: Vec<String>,
    parts: BTreeMap<String, Value>,
}

impl AtomBuilder {
    pub fn new(id: impl Into<String>, origin: AtomOrigin) -> Self {
        Self {
            id: id.into(),
            origin,
            kind: None,
            source: "unknown".to_string(),
            subject: None,
            target: None,
            magnitude: 0.0,
            confidence: 1.0,
            tags: BTreeSet::new(),
            label: None,
            code: None,
            used: Vec::new(),
            notes: Vec::new(),
            parts: BTreeMap::new(),
        }
    }

    pub fn world(id: impl Into<String>) -> Self {
        Self::new(id, AtomOrigin::World)
    }

    pub fn belief(id: impl Into<String>) -> Self {
        Self::new(id, AtomOrigin::Belief)
    }

    pub fn derived(id: impl Into<String>) -> Self {
        Self::new(id, AtomOrigin::Derived)
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn magnitude(mut self, magnitude: f64) -> Self {
        self.magnitude = clamp01(magnitude);
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp01(confidence);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Record that the atom was computed from `id`. Duplicates are ignored.
    pub fn uses(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.used.contains(&id) {
            self.used.push(id);
        }
        self
    }

    pub fn uses_all<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            self = self.uses(id);
        }
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn part(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parts.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<ContextAtom, AtomError> {
        if self.id.trim().is_empty() {
            return Err(AtomError::EmptyId);
        }
        let ns = AtomNs::from_id(&self.id).ok_or_else(|| AtomError::UnknownNamespace {
            id: self.id.clone(),
        })?;
        if self.used.iter().any(|used| used == &self.id) {
            return Err(AtomError::SelfReference { id: self.id });
        }

        let trace = AtomTrace {
            used_atom_ids: self.used,
            notes: self.notes,
            parts: self.parts,
        };
        if self.origin == AtomOrigin::Derived
            && trace.used_atom_ids.is_empty()
            && trace.notes.is_empty()
        {
            return Err(AtomError::MissingTrace { id: self.id });
        }

        let kind = self.kind.unwrap_or_else(|| default_kind(&self.id, ns));
        let code = self.code.unwrap_or_else(|| format!("{}.{}", ns.as_str(), kind));
        let label = self.label.unwrap_or_else(|| self.id.clone());

        Ok(ContextAtom {
            id: self.id,
            ns,
            kind,
            origin: self.origin,
            source: self.source,
            subject: self.subject,
            target: self.target,
            magnitude: self.magnitude,
            confidence: self.confidence,
            tags: self.tags,
            label,
            code: Some(code),
            trace: if trace.is_empty() { None } else { Some(trace) },
        })
    }
}

fn default_kind(id: &str, ns: AtomNs) -> String {
    match id.split(':').nth(1) {
        Some(category) if !category.is_empty() => format!("{}_{}", ns.as_str(), category),
        _ => ns.as_str().to_string(),
    }
}
