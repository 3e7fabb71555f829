//! Shared inputs and outputs of the enrichers.

use contracts::{ContextAtom, PipelineConfig, SimStep, WorldSnapshot};

/// Everything an enricher may read besides the accumulated atoms.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub agent_id: &'a str,
    pub location_id: &'a str,
    pub world: &'a WorldSnapshot,
    pub step: &'a SimStep,
    pub config: &'a PipelineConfig,
}

/// Output of one enricher.
#[derive(Debug, Default)]
pub struct Derivation {
    pub atoms: Vec<ContextAtom>,
    pub warnings: Vec<String>,
    /// Inputs that should have produced something. Zero output with qualifying
    /// inputs is reported as a missing enrichment.
    pub qualifying: usize,
}

impl Derivation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, atom: ContextAtom) {
        self.atoms.push(atom);
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn missing_enrichment(&self, enricher: &str) -> Option<String> {
        (self.qualifying > 0 && self.atoms.is_empty()).then(|| {
            format!(
                "{enricher} produced no atoms despite {} qualifying inputs",
                self.qualifying
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_enrichment_needs_qualifying_inputs() {
        let mut derivation = Derivation::new();
        assert!(derivation.missing_enrichment("hazard").is_none());
        derivation.qualifying = 2;
        let warning = derivation.missing_enrichment("hazard").expect("warning");
        assert!(warning.contains("2 qualifying"));
    }
}
