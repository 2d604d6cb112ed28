//! Belief State Model.
//!
//! A [`BeliefState`] holds the competing interpretations of one request as
//! [`CandidateCall`]s with explicit priors. Each candidate carries one
//! [`ArgumentBelief`] per declared argument. Beliefs are stored sparsely: an
//! explicit list of `(value, mass)` plus a residual mass spread evenly over
//! every domain value not listed, so a uniform belief over a range of a
//! million pages costs nothing.

use crate::error::{ClarionError, Result};
use crate::registry::{ArgumentSpec, ToolSpec};
use crate::value::{ArgValue, Domain, WeightedValue};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Masses at or below this are treated as zero.
pub const MASS_EPSILON: f64 = 1e-12;

/// Visit/observation key of the "which call is intended" pseudo-argument.
pub const CALL_SELECTION_KEY: &str = "@call";

const REJECTION_TRIES: usize = 64;

// ============================================================================
// ArgumentBelief
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgumentBelief {
    explicit: Vec<(ArgValue, f64)>,
    residual: f64,
    /// Effective cardinality: the declared domain plus any out-of-domain
    /// values admitted by widening.
    cardinality: u64,
}

impl ArgumentBelief {
    pub fn uniform(domain: &Domain) -> Self {
        let cardinality = domain.cardinality().max(1);
        if cardinality == 1 {
            if let Some(only) = domain.value_at(0) {
                return Self {
                    explicit: vec![(only, 1.0)],
                    residual: 0.0,
                    cardinality,
                };
            }
        }
        Self {
            explicit: vec![],
            residual: 1.0,
            cardinality,
        }
    }

    pub fn resolved(domain: &Domain, value: ArgValue) -> Self {
        Self {
            explicit: vec![(value, 1.0)],
            residual: 0.0,
            cardinality: domain.cardinality().max(1),
        }
    }

    /// Build a belief from extracted weights. Out-of-domain and non-positive
    /// entries are dropped. When the listed weights sum below one, the
    /// remainder is spread over the unlisted values.
    pub fn from_weights(domain: &Domain, weights: &[WeightedValue]) -> Self {
        let mut explicit: Vec<(ArgValue, f64)> = Vec::new();
        for wv in weights {
            if !domain.contains(&wv.value) {
                tracing::warn!("Dropping extracted value {} outside domain ({})", wv.value, domain.describe());
                continue;
            }
            if !wv.weight.is_finite() || wv.weight <= 0.0 {
                continue;
            }
            match explicit.iter_mut().find(|(v, _)| *v == wv.value) {
                Some((_, m)) => *m += wv.weight,
                None => explicit.push((wv.value.clone(), wv.weight)),
            }
        }
        let total: f64 = explicit.iter().map(|(_, m)| m).sum();
        if total <= MASS_EPSILON {
            return Self::uniform(domain);
        }

        let cardinality = domain.cardinality().max(1);
        let unlisted = cardinality.saturating_sub(explicit.len() as u64);
        let mut belief = Self {
            explicit,
            residual: 0.0,
            cardinality,
        };
        if total < 1.0 && unlisted > 0 {
            belief.residual = 1.0 - total;
        } else {
            for (_, m) in &mut belief.explicit {
                *m /= total;
            }
        }
        belief
    }

    pub fn cardinality(&self) -> u64 {
        self.cardinality
    }

    fn unlisted(&self) -> u64 {
        self.cardinality.saturating_sub(self.explicit.len() as u64)
    }

    fn residual_share(&self) -> f64 {
        match self.unlisted() {
            0 => 0.0,
            n => self.residual / n as f64,
        }
    }

    fn is_listed(&self, value: &ArgValue) -> bool {
        self.explicit.iter().any(|(v, _)| v == value)
    }

    /// Probability of `value` under this belief.
    pub fn mass(&self, domain: &Domain, value: &ArgValue) -> f64 {
        if let Some((_, m)) = self.explicit.iter().find(|(v, _)| v == value) {
            return *m;
        }
        if domain.contains(value) {
            self.residual_share()
        } else {
            0.0
        }
    }

    /// Shannon entropy in nats.
    pub fn entropy(&self) -> f64 {
        let mut h = 0.0;
        for (_, p) in &self.explicit {
            if *p > MASS_EPSILON {
                h -= p * p.ln();
            }
        }
        let unlisted = self.unlisted();
        if self.residual > MASS_EPSILON && unlisted > 0 {
            h -= self.residual * (self.residual / unlisted as f64).ln();
        }
        h.max(0.0)
    }

    /// `1 - H/ln(D)`, or 1 for a single-valued domain.
    pub fn certainty(&self) -> f64 {
        if self.cardinality <= 1 {
            return 1.0;
        }
        (1.0 - self.entropy() / (self.cardinality as f64).ln()).clamp(0.0, 1.0)
    }

    pub fn is_resolved(&self) -> bool {
        self.explicit.iter().any(|(_, m)| *m >= 1.0 - 1e-9)
    }

    /// Most probable listed value, if it beats every unlisted value.
    pub fn map_value(&self) -> Option<&ArgValue> {
        let mut best: Option<&(ArgValue, f64)> = None;
        for entry in &self.explicit {
            if best.map_or(true, |b| entry.1 > b.1) {
                best = Some(entry);
            }
        }
        let (value, mass) = best?;
        (*mass > MASS_EPSILON && *mass > self.residual_share() + MASS_EPSILON).then_some(value)
    }

    /// Apply an observation of `value` with the given confidence.
    ///
    /// Returns `true` when the value had zero mass and the belief had to be
    /// widened first.
    pub fn observe(&mut self, domain: &Domain, value: &ArgValue, confidence: f64) -> bool {
        let confidence = confidence.clamp(0.0, 1.0);
        let widened = self.mass(domain, value) <= MASS_EPSILON;
        if widened {
            self.widen(domain, value);
        }
        self.materialize(domain, value);

        if self.cardinality <= 1 {
            for (v, m) in &mut self.explicit {
                *m = if v == value { 1.0 } else { 0.0 };
            }
            self.residual = 0.0;
            return widened;
        }

        let other = (1.0 - confidence) / (self.cardinality - 1) as f64;
        for (v, m) in &mut self.explicit {
            *m *= if v == value { confidence } else { other };
        }
        self.residual *= other;
        self.normalize();
        widened
    }

    /// Reset to uniform over the declared domain, forgetting widened values.
    pub fn reset_to_domain(&mut self, domain: &Domain) {
        *self = Self::uniform(domain);
    }

    fn widen(&mut self, domain: &Domain, value: &ArgValue) {
        let mut fresh = Self::uniform(domain);
        if !domain.contains(value) {
            fresh.cardinality += 1;
            let share = 1.0 / fresh.cardinality as f64;
            for (_, m) in &mut fresh.explicit {
                *m *= 1.0 - share;
            }
            fresh.residual *= 1.0 - share;
            fresh.explicit.push((value.clone(), share));
        }
        *self = fresh;
    }

    fn materialize(&mut self, domain: &Domain, value: &ArgValue) {
        if self.is_listed(value) || !domain.contains(value) {
            return;
        }
        let share = self.residual_share();
        self.explicit.push((value.clone(), share));
        self.residual = if self.unlisted() == 0 {
            0.0
        } else {
            (self.residual - share).max(0.0)
        };
    }

    fn normalize(&mut self) {
        let total: f64 = self.explicit.iter().map(|(_, m)| m).sum::<f64>() + self.residual;
        if total <= MASS_EPSILON {
            let flat = 1.0 / self.cardinality as f64;
            for (_, m) in &mut self.explicit {
                *m = flat;
            }
            self.residual = self.unlisted() as f64 * flat;
            return;
        }
        for (_, m) in &mut self.explicit {
            *m /= total;
        }
        self.residual /= total;
    }

    /// Number of values with non-zero mass.
    pub fn support_size(&self) -> u64 {
        let listed = self.explicit.iter().filter(|(_, m)| *m > MASS_EPSILON).count() as u64;
        if self.residual > MASS_EPSILON {
            listed + self.unlisted()
        } else {
            listed
        }
    }

    /// All values with non-zero mass, or `None` when there are more than `limit`.
    pub fn support(&self, domain: &Domain, limit: u64) -> Option<Vec<(ArgValue, f64)>> {
        if self.support_size() > limit {
            return None;
        }
        let mut out: Vec<(ArgValue, f64)> = self
            .explicit
            .iter()
            .filter(|(_, m)| *m > MASS_EPSILON)
            .cloned()
            .collect();
        if self.residual > MASS_EPSILON {
            let share = self.residual_share();
            out.extend(
                domain
                    .values(u64::MAX)
                    .filter(|v| !self.is_listed(v))
                    .map(|v| (v, share)),
            );
        }
        Some(out)
    }

    /// Draw one value according to the belief.
    pub fn sample<R: Rng + ?Sized>(&self, domain: &Domain, rng: &mut R) -> Option<ArgValue> {
        let u: f64 = rng.gen();
        let mut acc = 0.0;
        for (v, m) in &self.explicit {
            acc += m;
            if u < acc && *m > MASS_EPSILON {
                return Some(v.clone());
            }
        }
        if self.residual <= MASS_EPSILON || self.unlisted() == 0 {
            return self
                .explicit
                .iter()
                .rev()
                .find(|(_, m)| *m > MASS_EPSILON)
                .map(|(v, _)| v.clone());
        }
        let card = domain.cardinality();
        for _ in 0..REJECTION_TRIES {
            let v = domain.value_at(rng.gen_range(0..card))?;
            if !self.is_listed(&v) {
                return Some(v);
            }
        }
        domain.values(u64::MAX).find(|v| !self.is_listed(v))
    }
}

// ============================================================================
// CandidateCall
// ============================================================================

/// One interpretation of the request: a tool plus beliefs over its arguments.
#[derive(Debug, Clone)]
pub struct CandidateCall {
    pub spec: Arc<ToolSpec>,
    /// Aligned with `spec.arguments()`.
    pub beliefs: Vec<ArgumentBelief>,
    pub prior: f64,
}

/// A call with concrete argument values, ready for validation and execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCall {
    pub tool: String,
    pub arguments: BTreeMap<String, ArgValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

impl CandidateCall {
    /// Candidate with every argument uniform.
    pub fn new(spec: Arc<ToolSpec>, prior: f64) -> Self {
        let beliefs = spec
            .arguments()
            .iter()
            .map(|a| ArgumentBelief::uniform(&a.domain))
            .collect();
        Self { spec, beliefs, prior }
    }

    pub fn with_belief(mut self, argument: &str, belief: ArgumentBelief) -> Result<Self> {
        let idx = self.spec.argument_index(argument).ok_or_else(|| {
            ClarionError::config(format!("{} has no argument '{}'", self.spec.name(), argument))
        })?;
        self.beliefs[idx] = belief;
        Ok(self)
    }

    pub fn tool(&self) -> &str {
        self.spec.name()
    }

    pub fn argument(&self, name: &str) -> Option<(&ArgumentSpec, &ArgumentBelief)> {
        let idx = self.spec.argument_index(name)?;
        Some((&self.spec.arguments()[idx], &self.beliefs[idx]))
    }

    pub fn arguments(&self) -> impl Iterator<Item = (&ArgumentSpec, &ArgumentBelief)> {
        self.spec.arguments().iter().zip(self.beliefs.iter())
    }

    /// Visit key of one of this candidate's arguments.
    pub fn visit_key(&self, argument: &str) -> String {
        format!("{}.{}", self.spec.name(), argument)
    }

    pub fn resolve(&self) -> ResolvedCall {
        let mut arguments = BTreeMap::new();
        let mut unresolved = Vec::new();
        for (spec, belief) in self.arguments() {
            match belief.map_value() {
                Some(v) => {
                    arguments.insert(spec.name.clone(), v.clone());
                }
                None => unresolved.push(spec.name.clone()),
            }
        }
        ResolvedCall {
            tool: self.spec.name().to_string(),
            arguments,
            unresolved,
        }
    }
}

// ============================================================================
// Observations
// ============================================================================

fn full_confidence() -> f64 {
    1.0
}

/// A structured answer about one targeted argument (or about which call is meant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    Value {
        argument: String,
        value: ArgValue,
        #[serde(default = "full_confidence")]
        confidence: f64,
    },
    Call {
        tool: String,
        #[serde(default = "full_confidence")]
        confidence: f64,
    },
    /// The requester does not know; no update.
    Unknown { argument: String },
    /// Uninterpretable text, parsed against the declaring domains on apply.
    FreeText { argument: String, text: String },
}

impl Observation {
    pub fn value(argument: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        Observation::Value {
            argument: argument.into(),
            value: value.into(),
            confidence: 1.0,
        }
    }

    pub fn call(tool: impl Into<String>) -> Self {
        Observation::Call {
            tool: tool.into(),
            confidence: 1.0,
        }
    }
}

/// What applying an observation changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyReport {
    /// Visit keys whose beliefs had to be widened.
    pub widened: Vec<String>,
    /// Number of argument beliefs updated.
    pub updated: usize,
}

impl ApplyReport {
    pub fn merge(&mut self, other: ApplyReport) {
        self.widened.extend(other.widened);
        self.updated += other.updated;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QaExchange {
    pub question: String,
    pub answer: String,
    pub observations: Vec<Observation>,
}

// ============================================================================
// BeliefState
// ============================================================================

#[derive(Debug, Clone)]
pub struct BeliefState {
    request: String,
    candidates: Vec<CandidateCall>,
    history: Vec<QaExchange>,
}

impl BeliefState {
    /// Priors are normalized to sum to one; all-zero priors become uniform.
    pub fn new(request: impl Into<String>, mut candidates: Vec<CandidateCall>) -> Result<Self> {
        if candidates.is_empty() {
            return Err(ClarionError::config("belief state needs at least one candidate call"));
        }
        if let Some(bad) = candidates.iter().find(|c| !c.prior.is_finite() || c.prior < 0.0) {
            return Err(ClarionError::config(format!(
                "candidate '{}' has invalid prior {}",
                bad.tool(),
                bad.prior
            )));
        }
        let total: f64 = candidates.iter().map(|c| c.prior).sum();
        let k = candidates.len() as f64;
        for c in &mut candidates {
            c.prior = if total > MASS_EPSILON { c.prior / total } else { 1.0 / k };
        }
        Ok(Self {
            request: request.into(),
            candidates,
            history: Vec::new(),
        })
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn candidates(&self) -> &[CandidateCall] {
        &self.candidates
    }

    pub fn priors(&self) -> Vec<f64> {
        self.candidates.iter().map(|c| c.prior).collect()
    }

    pub fn history(&self) -> &[QaExchange] {
        &self.history
    }

    pub fn record(&mut self, exchange: QaExchange) {
        self.history.push(exchange);
    }

    /// Highest-prior candidate; the earliest wins ties.
    pub fn most_probable(&self) -> &CandidateCall {
        let mut best = &self.candidates[0];
        for c in &self.candidates[1..] {
            if c.prior > best.prior {
                best = c;
            }
        }
        best
    }

    /// Candidates ordered by descending prior (stable).
    pub fn ranked(&self) -> Vec<&CandidateCall> {
        let mut ranked: Vec<&CandidateCall> = self.candidates.iter().collect();
        ranked.sort_by(|a, b| b.prior.partial_cmp(&a.prior).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    /// Indices of candidates that declare `argument`.
    pub fn declaring(&self, argument: &str) -> Vec<usize> {
        self.candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.spec.argument_index(argument).is_some())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn apply_observation(&mut self, observation: &Observation) -> ApplyReport {
        match observation {
            Observation::Value {
                argument,
                value,
                confidence,
            } => self.observe_value(argument, value, *confidence),
            Observation::FreeText { argument, text } => {
                let value = self.parse_free_text(argument, text);
                self.observe_value(argument, &value, 1.0)
            }
            Observation::Call { tool, confidence } => self.observe_call(tool, *confidence),
            Observation::Unknown { .. } => ApplyReport::default(),
        }
    }

    /// Reset the named arguments of every candidate of `tool` to uniform
    /// over the declared domain. Returns the number of beliefs reset.
    pub fn widen_arguments(&mut self, tool: &str, arguments: &[String]) -> usize {
        let mut reset = 0;
        for candidate in self.candidates.iter_mut().filter(|c| c.spec.name() == tool) {
            let spec = Arc::clone(&candidate.spec);
            for name in arguments {
                if let Some(idx) = spec.argument_index(name) {
                    candidate.beliefs[idx].reset_to_domain(&spec.arguments()[idx].domain);
                    reset += 1;
                }
            }
        }
        reset
    }

    fn parse_free_text(&self, argument: &str, text: &str) -> ArgValue {
        for i in self.declaring(argument) {
            if let Some((spec, _)) = self.candidates[i].argument(argument) {
                if let Some(v) = spec.domain.parse(text) {
                    return v;
                }
            }
        }
        let trimmed = text.trim();
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => ArgValue::Number(n),
            _ => ArgValue::Text(trimmed.to_string()),
        }
    }

    fn observe_value(&mut self, argument: &str, value: &ArgValue, confidence: f64) -> ApplyReport {
        let confidence = confidence.clamp(0.0, 1.0);
        let mut report = ApplyReport::default();

        // (candidate index, argument index, mass of the observed value)
        let masses: Vec<(usize, usize, f64)> = self
            .declaring(argument)
            .into_iter()
            .filter_map(|i| {
                let c = &self.candidates[i];
                let a = c.spec.argument_index(argument)?;
                Some((i, a, c.beliefs[a].mass(&c.spec.arguments()[a].domain, value)))
            })
            .collect();
        if masses.is_empty() {
            tracing::debug!("No candidate declares '{}', observation ignored", argument);
            return report;
        }

        if masses.iter().all(|(_, _, m)| *m <= MASS_EPSILON) {
            tracing::warn!(
                "{}",
                ClarionError::InconsistentAnswer {
                    argument: argument.to_string(),
                    value: value.to_string(),
                }
            );
            for &(i, a, _) in &masses {
                let candidate = &mut self.candidates[i];
                let spec = Arc::clone(&candidate.spec);
                candidate.beliefs[a].observe(&spec.arguments()[a].domain, value, confidence);
                report.widened.push(candidate.visit_key(argument));
                report.updated += 1;
            }
            return report;
        }

        let d_ref = masses
            .iter()
            .map(|&(i, a, _)| self.candidates[i].beliefs[a].cardinality())
            .max()
            .unwrap_or(1)
            .max(1);
        let mut likelihoods = vec![1.0 / d_ref as f64; self.candidates.len()];
        for &(i, a, mass) in &masses {
            let d = self.candidates[i].beliefs[a].cardinality().max(1) as f64;
            likelihoods[i] = confidence * mass + (1.0 - confidence) / d;
        }

        for &(i, a, mass) in &masses {
            if mass > MASS_EPSILON {
                let candidate = &mut self.candidates[i];
                let spec = Arc::clone(&candidate.spec);
                candidate.beliefs[a].observe(&spec.arguments()[a].domain, value, confidence);
                report.updated += 1;
            }
        }
        if !self.reweight(&likelihoods) {
            tracing::debug!("Observation {}={} left candidate priors unchanged", argument, value);
        }
        report
    }

    fn observe_call(&mut self, tool: &str, confidence: f64) -> ApplyReport {
        let confidence = confidence.clamp(0.0, 1.0);
        let mut report = ApplyReport::default();
        let k = self.candidates.len();
        let matching: Vec<bool> = self.candidates.iter().map(|c| c.spec.name() == tool).collect();

        if !matching.iter().any(|m| *m) {
            tracing::warn!("Answer names tool '{}' which no candidate proposes, resetting priors", tool);
            self.reset_priors();
            report.widened.push(CALL_SELECTION_KEY.to_string());
            return report;
        }
        report.updated = 1;
        if k == 1 {
            return report;
        }

        let other = (1.0 - confidence) / (k - 1) as f64;
        let likelihoods: Vec<f64> = matching
            .iter()
            .map(|m| if *m { confidence } else { other })
            .collect();
        if !self.reweight(&likelihoods) {
            self.reset_priors();
            self.reweight(&likelihoods);
            report.widened.push(CALL_SELECTION_KEY.to_string());
        }
        report
    }

    fn reset_priors(&mut self) {
        let k = self.candidates.len() as f64;
        for c in &mut self.candidates {
            c.prior = 1.0 / k;
        }
    }

    /// Bayesian prior update. Returns `false` (and changes nothing) when
    /// every candidate would end up with zero mass.
    fn reweight(&mut self, likelihoods: &[f64]) -> bool {
        let posterior: Vec<f64> = self
            .candidates
            .iter()
            .zip(likelihoods)
            .map(|(c, l)| c.prior * l)
            .collect();
        let total: f64 = posterior.iter().sum();
        if total <= MASS_EPSILON {
            return false;
        }
        for (c, p) in self.candidates.iter_mut().zip(posterior) {
            c.prior = p / total;
        }
        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn formats() -> Domain {
        Domain::enumerated(["pptx", "doc", "png", "jpg"])
    }

    fn convert(prior: f64) -> CandidateCall {
        let spec = ToolSpec::new(
            "convert",
            "",
            vec![ArgumentSpec::new("format", formats())],
        )
        .unwrap();
        CandidateCall::new(Arc::new(spec), prior)
    }

    fn export(prior: f64) -> CandidateCall {
        let spec = ToolSpec::new(
            "export",
            "",
            vec![ArgumentSpec::new("format", Domain::enumerated(["png", "svg"]))],
        )
        .unwrap();
        CandidateCall::new(Arc::new(spec), prior)
    }

    #[test]
    fn test_uniform_has_zero_certainty() {
        let b = ArgumentBelief::uniform(&formats());
        assert!(approx(b.certainty(), 0.0));
        assert!(approx(b.mass(&formats(), &ArgValue::from("png")), 0.25));
        assert!(b.map_value().is_none());
    }

    #[test]
    fn test_single_value_domain_is_certain() {
        let d = Domain::range(3.0, 3.0, 1.0);
        let b = ArgumentBelief::uniform(&d);
        assert_eq!(b.certainty(), 1.0);
        assert_eq!(b.map_value(), Some(&ArgValue::Number(3.0)));
    }

    #[test]
    fn test_observe_collapses_with_full_confidence() {
        let d = formats();
        let mut b = ArgumentBelief::uniform(&d);
        let widened = b.observe(&d, &ArgValue::from("png"), 1.0);
        assert!(!widened);
        assert!(b.is_resolved());
        assert_eq!(b.certainty(), 1.0);
        assert_eq!(b.map_value(), Some(&ArgValue::from("png")));
    }

    #[test]
    fn test_observe_partial_confidence() {
        let d = formats();
        let mut b = ArgumentBelief::uniform(&d);
        b.observe(&d, &ArgValue::from("doc"), 0.7);
        // 0.25*0.7 vs 0.25*0.1 for each of the other three
        assert!(approx(b.mass(&d, &ArgValue::from("doc")), 0.7));
        assert!(approx(b.mass(&d, &ArgValue::from("pptx")), 0.1));
        let c = b.certainty();
        assert!(c > 0.0 && c < 1.0);
    }

    #[test]
    fn test_out_of_domain_answer_widens() {
        let d = formats();
        let mut b = ArgumentBelief::uniform(&d);
        let widened = b.observe(&d, &ArgValue::from("pdf"), 1.0);
        assert!(widened);
        assert_eq!(b.cardinality(), 5);
        assert_eq!(b.map_value(), Some(&ArgValue::from("pdf")));

        b.reset_to_domain(&d);
        assert_eq!(b.cardinality(), 4);
        assert!(approx(b.certainty(), 0.0));
    }

    #[test]
    fn test_answer_with_zero_mass_widens_inside_domain() {
        let d = formats();
        let mut b = ArgumentBelief::resolved(&d, ArgValue::from("png"));
        assert!(b.observe(&d, &ArgValue::from("jpg"), 1.0));
        assert_eq!(b.map_value(), Some(&ArgValue::from("jpg")));
        assert_eq!(b.cardinality(), 4);
    }

    #[test]
    fn test_from_weights_keeps_remainder_as_residual() {
        let d = Domain::range(1.0, 100.0, 1.0);
        let b = ArgumentBelief::from_weights(
            &d,
            &[WeightedValue {
                value: ArgValue::Number(4.0),
                weight: 0.6,
            }],
        );
        assert!(approx(b.mass(&d, &ArgValue::Number(4.0)), 0.6));
        assert!(approx(b.mass(&d, &ArgValue::Number(5.0)), 0.4 / 99.0));
        assert_eq!(b.support_size(), 100);
        assert!(b.support(&d, 10).is_none());
    }

    #[test]
    fn test_sample_stays_in_support() {
        use rand::SeedableRng;
        let d = Domain::range(1.0, 1000.0, 1.0);
        let mut b = ArgumentBelief::uniform(&d);
        b.observe(&d, &ArgValue::Number(10.0), 0.5);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let v = b.sample(&d, &mut rng).unwrap();
            assert!(d.contains(&v));
        }
    }

    #[test]
    fn test_new_normalizes_priors() {
        let state = BeliefState::new("r", vec![convert(2.0), export(6.0)]).unwrap();
        assert!(approx(state.priors()[0], 0.25));
        assert_eq!(state.most_probable().tool(), "export");
        assert!(BeliefState::new("r", vec![]).is_err());
    }

    #[test]
    fn test_value_observation_reweights_candidates() {
        let mut state = BeliefState::new("r", vec![convert(0.5), export(0.5)]).unwrap();
        // "svg" is only possible for export
        let report = state.apply_observation(&Observation::value("format", "svg"));
        assert!(report.widened.is_empty());
        assert!(approx(state.priors()[1], 1.0));
        assert_eq!(state.most_probable().tool(), "export");
    }

    #[test]
    fn test_shared_value_keeps_both_candidates() {
        let mut state = BeliefState::new("r", vec![convert(0.5), export(0.5)]).unwrap();
        state.apply_observation(&Observation::value("format", "png"));
        // p(png)=1/4 under convert, 1/2 under export
        assert!(approx(state.priors()[0], 1.0 / 3.0));
        for c in state.candidates() {
            assert!(c.beliefs[0].is_resolved());
        }
    }

    #[test]
    fn test_inconsistent_value_widens_and_keeps_priors() {
        let mut state = BeliefState::new("r", vec![convert(0.3), export(0.7)]).unwrap();
        let report = state.apply_observation(&Observation::value("format", "pdf"));
        assert_eq!(report.widened, vec!["convert.format".to_string(), "export.format".to_string()]);
        assert!(approx(state.priors()[0], 0.3));
        assert_eq!(state.candidates()[0].resolve().arguments["format"], ArgValue::from("pdf"));
    }

    #[test]
    fn test_call_observation() {
        let mut state = BeliefState::new("r", vec![convert(0.5), export(0.5)]).unwrap();
        state.apply_observation(&Observation::call("convert"));
        assert!(approx(state.priors()[0], 1.0));

        let mut state = BeliefState::new("r", vec![convert(0.5), export(0.5)]).unwrap();
        state.apply_observation(&Observation::Call {
            tool: "convert".into(),
            confidence: 0.8,
        });
        assert!(approx(state.priors()[0], 0.8));
    }

    #[test]
    fn test_unknown_tool_resets_priors() {
        let mut state = BeliefState::new("r", vec![convert(0.9), export(0.1)]).unwrap();
        let report = state.apply_observation(&Observation::call("rotate"));
        assert_eq!(report.widened, vec![CALL_SELECTION_KEY.to_string()]);
        assert!(approx(state.priors()[0], 0.5));
    }

    #[test]
    fn test_free_text_parses_against_domain() {
        let mut state = BeliefState::new("r", vec![convert(1.0)]).unwrap();
        state.apply_observation(&Observation::FreeText {
            argument: "format".into(),
            text: "PNG".into(),
        });
        assert_eq!(
            state.most_probable().resolve().arguments["format"],
            ArgValue::from("png")
        );
    }

    #[test]
    fn test_unknown_observation_is_noop() {
        let mut state = BeliefState::new("r", vec![convert(1.0)]).unwrap();
        let before = state.candidates()[0].beliefs.clone();
        let report = state.apply_observation(&Observation::Unknown {
            argument: "format".into(),
        });
        assert_eq!(report, ApplyReport::default());
        assert_eq!(state.candidates()[0].beliefs, before);
    }

    #[test]
    fn test_resolve_leaves_uncertain_arguments_open() {
        let state = BeliefState::new("r", vec![convert(1.0)]).unwrap();
        let call = state.most_probable().resolve();
        assert!(call.arguments.is_empty());
        assert_eq!(call.unresolved, vec!["format".to_string()]);
    }

    #[test]
    fn test_widen_arguments_resets_declared_domain() {
        let mut state = BeliefState::new("r", vec![convert(1.0)]).unwrap();
        state.apply_observation(&Observation::value("format", "pdf"));
        assert_eq!(state.widen_arguments("convert", &["format".to_string()]), 1);
        assert_eq!(state.candidates()[0].beliefs[0].cardinality(), 4);
    }
}
