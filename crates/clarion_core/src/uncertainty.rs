//! Uncertainty Model: certainty and regret of beliefs, calls and whole states.

use crate::belief::{ArgumentBelief, BeliefState, CandidateCall};
use serde::Serialize;

/// Entropy of `probs` divided by `ln(len)`; zero for fewer than two entries.
pub fn normalized_entropy(probs: &[f64]) -> f64 {
    if probs.len() < 2 {
        return 0.0;
    }
    let h: f64 = probs
        .iter()
        .filter(|p| **p > 0.0)
        .map(|p| -p * p.ln())
        .sum();
    (h / (probs.len() as f64).ln()).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UncertaintyModel {
    /// Weight of candidate-selection ambiguity in overall certainty.
    pub selection_weight: f64,
}

impl Default for UncertaintyModel {
    fn default() -> Self {
        Self {
            selection_weight: 1.0,
        }
    }
}

/// Snapshot of the uncertainty of a belief state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertaintyReport {
    pub overall: f64,
    pub selection: f64,
    pub regret: f64,
    /// Per candidate: tool name, prior and call certainty.
    pub calls: Vec<(String, f64, f64)>,
}

impl UncertaintyModel {
    pub fn new(selection_weight: f64) -> Self {
        Self { selection_weight }
    }

    pub fn argument_certainty(&self, belief: &ArgumentBelief) -> f64 {
        belief.certainty()
    }

    /// Weighted mean of argument certainties. A call without arguments is certain.
    pub fn call_certainty(&self, call: &CandidateCall) -> f64 {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for (spec, belief) in call.arguments() {
            weighted += spec.weight * belief.certainty();
            total += spec.weight;
        }
        if total <= 0.0 {
            1.0
        } else {
            (weighted / total).clamp(0.0, 1.0)
        }
    }

    /// Certainty about which candidate is intended.
    pub fn selection_certainty(&self, state: &BeliefState) -> f64 {
        1.0 - normalized_entropy(&state.priors())
    }

    pub fn overall_certainty(&self, state: &BeliefState) -> f64 {
        let expected: f64 = state
            .candidates()
            .iter()
            .map(|c| c.prior * self.call_certainty(c))
            .sum();
        let penalty = self.selection_weight * normalized_entropy(&state.priors());
        (expected - penalty).clamp(0.0, 1.0)
    }

    /// Prior-weighted `Σ weight·(1 − certainty)` over every argument.
    pub fn regret(&self, state: &BeliefState) -> f64 {
        state
            .candidates()
            .iter()
            .map(|c| {
                c.prior
                    * c.arguments()
                        .map(|(spec, belief)| spec.weight * (1.0 - belief.certainty()))
                        .sum::<f64>()
            })
            .sum()
    }

    pub fn report(&self, state: &BeliefState) -> CertaintyReport {
        CertaintyReport {
            overall: self.overall_certainty(state),
            selection: self.selection_certainty(state),
            regret: self.regret(state),
            calls: state
                .candidates()
                .iter()
                .map(|c| (c.tool().to_string(), c.prior, self.call_certainty(c)))
                .collect(),
        }
    }
}
