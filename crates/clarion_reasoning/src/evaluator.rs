//! Question Evaluator: EVPI and regret reduction of a candidate question.
//!
//! A question is scored by hypothesizing each answer it could receive,
//! applying that answer to a copy of the belief state, and averaging the
//! resulting gain in certainty (EVPI) and drop in regret. Answer outcomes are
//! enumerated exactly when the joint space is small and sampled with a fixed
//! seed otherwise, so scoring the same question twice gives the same result.

use crate::questions::QuestionCandidate;
use clarion_core::belief::MASS_EPSILON;
use clarion_core::{ArgValue, BeliefState, EngineConfig, Observation, UncertaintyModel};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QuestionScore {
    pub evpi: f64,
    pub delta_regret: f64,
}

impl QuestionScore {
    pub fn value(&self) -> f64 {
        self.evpi + self.delta_regret
    }
}

/// One answer variable of a question.
#[derive(Debug, Clone, PartialEq)]
enum Variable {
    Argument(String),
    Call,
}

/// A value a variable may take.
#[derive(Debug, Clone)]
enum Outcome {
    Value(ArgValue),
    Tool(String),
}

type Joint = (Vec<Outcome>, f64);

#[derive(Debug, Clone)]
pub struct Evaluator {
    model: UncertaintyModel,
    max_enumeration: u64,
    sample_size: usize,
    sample_seed: u64,
    response_confidence: f64,
}

impl Evaluator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            model: UncertaintyModel::new(config.selection_weight),
            max_enumeration: config.max_enumeration,
            sample_size: config.sample_size,
            sample_seed: config.sample_seed,
            response_confidence: config.response_confidence,
        }
    }

    pub fn model(&self) -> &UncertaintyModel {
        &self.model
    }

    pub fn evaluate(&self, question: &QuestionCandidate, state: &BeliefState) -> QuestionScore {
        let mut variables: Vec<Variable> = question
            .argument_names()
            .into_iter()
            .map(|n| Variable::Argument(n.to_string()))
            .collect();
        if question.asks_call_selection() {
            variables.push(Variable::Call);
        }
        if variables.is_empty() {
            return QuestionScore::default();
        }

        let outcomes = self
            .enumerate(&variables, state)
            .unwrap_or_else(|| self.sample(&variables, state));

        let certainty = self.model.overall_certainty(state);
        let regret = self.model.regret(state);
        let mut evpi = 0.0;
        let mut delta_regret = 0.0;
        let mut total = 0.0;
        for (joint, p) in &outcomes {
            let mut hypothetical = state.clone();
            for (variable, outcome) in variables.iter().zip(joint) {
                hypothetical.apply_observation(&observation(variable, outcome));
            }
            evpi += p * (self.model.overall_certainty(&hypothetical) - certainty);
            delta_regret += p * (regret - self.model.regret(&hypothetical));
            total += p;
        }
        if total <= MASS_EPSILON {
            return QuestionScore::default();
        }

        QuestionScore {
            evpi: (evpi / total).max(0.0) * self.response_confidence,
            delta_regret: (delta_regret / total).max(0.0) * self.response_confidence,
        }
    }

    /// Exact joint outcomes, or `None` if the product space is too large.
    fn enumerate(&self, variables: &[Variable], state: &BeliefState) -> Option<Vec<Joint>> {
        let mut supports = Vec::with_capacity(variables.len());
        let mut size: u64 = 1;
        for variable in variables {
            let support = match variable {
                Variable::Argument(name) => argument_support(state, name, self.max_enumeration)?,
                Variable::Call => call_support(state),
            };
            size = size.saturating_mul(support.len() as u64);
            if size > self.max_enumeration {
                return None;
            }
            supports.push(support);
        }

        let mut joints: Vec<Joint> = vec![(Vec::new(), 1.0)];
        for support in supports {
            let mut next = Vec::with_capacity(joints.len() * support.len());
            for (partial, p) in &joints {
                for (outcome, q) in &support {
                    let mut extended = partial.clone();
                    extended.push(outcome.clone());
                    next.push((extended, p * q));
                }
            }
            joints = next;
        }
        Some(joints)
    }

    fn sample(&self, variables: &[Variable], state: &BeliefState) -> Vec<Joint> {
        let mut rng = StdRng::seed_from_u64(self.sample_seed);
        let weight = 1.0 / self.sample_size as f64;
        let mut joints = Vec::with_capacity(self.sample_size);
        for _ in 0..self.sample_size {
            let drawn: Option<Vec<Outcome>> = variables
                .iter()
                .map(|v| match v {
                    Variable::Argument(name) => sample_argument(state, name, &mut rng).map(Outcome::Value),
                    Variable::Call => sample_call(state, &mut rng).map(Outcome::Tool),
                })
                .collect();
            if let Some(joint) = drawn {
                joints.push((joint, weight));
            }
        }
        joints
    }
}

fn observation(variable: &Variable, outcome: &Outcome) -> Observation {
    match (variable, outcome) {
        (Variable::Argument(name), Outcome::Value(v)) => Observation::value(name.clone(), v.clone()),
        (_, Outcome::Tool(tool)) => Observation::call(tool.clone()),
        (Variable::Call, Outcome::Value(v)) => Observation::call(v.to_string()),
    }
}

/// Normalized answer prior override of a spec.
fn answer_prior(prior: &[clarion_core::WeightedValue]) -> Vec<(ArgValue, f64)> {
    let total: f64 = prior.iter().map(|w| w.weight.max(0.0)).sum();
    prior
        .iter()
        .filter(|w| w.weight > 0.0 && total > 0.0)
        .map(|w| (w.value.clone(), w.weight / total))
        .collect()
}

/// Prior-weighted mixture of the declaring candidates' answer distributions.
fn argument_support(state: &BeliefState, name: &str, limit: u64) -> Option<Vec<(Outcome, f64)>> {
    let mut mixture: Vec<(ArgValue, f64)> = Vec::new();
    let mut weight = 0.0;
    for candidate in state.candidates().iter().filter(|c| c.prior > MASS_EPSILON) {
        let Some((spec, belief)) = candidate.argument(name) else { continue };
        let dist = match &spec.answer_prior {
            Some(prior) => answer_prior(prior),
            None => belief.support(&spec.domain, limit)?,
        };
        for (value, mass) in dist {
            match mixture.iter_mut().find(|(v, _)| *v == value) {
                Some((_, m)) => *m += candidate.prior * mass,
                None => mixture.push((value, candidate.prior * mass)),
            }
        }
        if mixture.len() as u64 > limit {
            return None;
        }
        weight += candidate.prior;
    }
    if weight <= MASS_EPSILON {
        return Some(Vec::new());
    }
    Some(
        mixture
            .into_iter()
            .filter(|(_, m)| *m > MASS_EPSILON)
            .map(|(v, m)| (Outcome::Value(v), m / weight))
            .collect(),
    )
}

/// Distinct tools with their summed priors.
fn call_support(state: &BeliefState) -> Vec<(Outcome, f64)> {
    let mut tools: Vec<(String, f64)> = Vec::new();
    for c in state.candidates().iter().filter(|c| c.prior > MASS_EPSILON) {
        match tools.iter_mut().find(|(t, _)| t == c.tool()) {
            Some((_, p)) => *p += c.prior,
            None => tools.push((c.tool().to_string(), c.prior)),
        }
    }
    tools.into_iter().map(|(t, p)| (Outcome::Tool(t), p)).collect()
}

fn sample_argument(state: &BeliefState, name: &str, rng: &mut StdRng) -> Option<ArgValue> {
    let declaring: Vec<_> = state
        .candidates()
        .iter()
        .filter(|c| c.prior > MASS_EPSILON && c.argument(name).is_some())
        .collect();
    let index = WeightedIndex::new(declaring.iter().map(|c| c.prior)).ok()?;
    let (spec, belief) = declaring[index.sample(rng)].argument(name)?;
    match &spec.answer_prior {
        Some(prior) => {
            let dist = answer_prior(prior);
            let pick = WeightedIndex::new(dist.iter().map(|(_, m)| *m)).ok()?;
            Some(dist[pick.sample(rng)].0.clone())
        }
        None => belief.sample(&spec.domain, rng),
    }
}

fn sample_call(state: &BeliefState, rng: &mut StdRng) -> Option<String> {
    let candidates = state.candidates();
    let index = WeightedIndex::new(candidates.iter().map(|c| c.prior)).ok()?;
    Some(candidates[index.sample(rng)].tool().to_string())
}
