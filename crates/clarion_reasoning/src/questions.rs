//! Question Candidate Generator.
//!
//! Proposes clarifying questions for the uncertain parts of a belief state.
//! Generation is deterministic: the same state always yields the same list
//! in the same order.

use clarion_core::belief::MASS_EPSILON;
use clarion_core::{normalized_entropy, BeliefState, EngineConfig, CALL_SELECTION_KEY};
use serde::Serialize;
use std::collections::BTreeMap;

/// What a question asks about.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionTarget {
    /// An argument of one candidate call.
    Argument {
        candidate: usize,
        tool: String,
        argument: String,
    },
    /// Which candidate call is intended.
    CallSelection,
}

impl QuestionTarget {
    pub fn visit_key(&self) -> String {
        match self {
            QuestionTarget::Argument { tool, argument, .. } => format!("{}.{}", tool, argument),
            QuestionTarget::CallSelection => CALL_SELECTION_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionCandidate {
    /// Plan step the targets belong to.
    pub step: usize,
    pub targets: Vec<QuestionTarget>,
    /// Sorted visit keys joined by `+`.
    pub key: String,
}

impl QuestionCandidate {
    pub fn new(targets: Vec<QuestionTarget>) -> Self {
        let mut keys: Vec<String> = targets.iter().map(|t| t.visit_key()).collect();
        keys.sort();
        keys.dedup();
        Self {
            step: 0,
            key: keys.join("+"),
            targets,
        }
    }

    /// Move the question to a later plan step. Visit keys of steps after
    /// the first are prefixed with `<step>:` so their counts stay apart.
    pub fn with_step(mut self, step: usize) -> Self {
        if step > 0 {
            self.key = self
                .key
                .split('+')
                .map(|k| format!("{}:{}", step, k))
                .collect::<Vec<_>>()
                .join("+");
        }
        self.step = step;
        self
    }

    pub fn call_selection() -> Self {
        Self::new(vec![QuestionTarget::CallSelection])
    }

    /// Distinct visit keys, sorted.
    pub fn visit_keys(&self) -> Vec<String> {
        self.key.split('+').map(str::to_string).collect()
    }

    /// Distinct argument names in target order.
    pub fn argument_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for t in &self.targets {
            if let QuestionTarget::Argument { argument, .. } = t {
                if !names.contains(&argument.as_str()) {
                    names.push(argument);
                }
            }
        }
        names
    }

    pub fn asks_call_selection(&self) -> bool {
        self.targets.contains(&QuestionTarget::CallSelection)
    }

    fn identity(&self) -> Vec<QuestionTarget> {
        let mut sorted = self.targets.clone();
        sorted.sort();
        sorted.dedup();
        sorted
    }
}

/// Generate the clarifying questions for `state`.
///
/// Order: one question per argument name (first appearance), then one
/// compound question per correlation component spanning several names,
/// then the call-selection question.
pub fn generate(state: &BeliefState, config: &EngineConfig) -> Vec<QuestionCandidate> {
    // Name groups in first-appearance order.
    let mut names: Vec<String> = Vec::new();
    let mut by_name: Vec<Vec<QuestionTarget>> = Vec::new();
    // (candidate, correlation group) -> name indices
    let mut correlated: BTreeMap<(usize, String), Vec<usize>> = BTreeMap::new();

    for (i, candidate) in state.candidates().iter().enumerate() {
        if candidate.prior <= MASS_EPSILON {
            continue;
        }
        for (spec, belief) in candidate.arguments() {
            let threshold = spec.threshold.unwrap_or(config.argument_threshold);
            if belief.certainty() >= threshold {
                continue;
            }
            let idx = match names.iter().position(|n| *n == spec.name) {
                Some(idx) => idx,
                None => {
                    names.push(spec.name.clone());
                    by_name.push(Vec::new());
                    names.len() - 1
                }
            };
            by_name[idx].push(QuestionTarget::Argument {
                candidate: i,
                tool: candidate.tool().to_string(),
                argument: spec.name.clone(),
            });
            if let Some(group) = &spec.correlation_group {
                correlated.entry((i, group.clone())).or_default().push(idx);
            }
        }
    }

    let mut questions: Vec<QuestionCandidate> =
        by_name.iter().cloned().map(QuestionCandidate::new).collect();

    // Correlation components over name indices.
    let mut parent: Vec<usize> = (0..names.len()).collect();
    for members in correlated.values() {
        for pair in members.windows(2) {
            let (a, b) = (find(&mut parent, pair[0]), find(&mut parent, pair[1]));
            if a != b {
                parent[a.max(b)] = a.min(b);
            }
        }
    }
    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for idx in 0..names.len() {
        let root = find(&mut parent, idx);
        components.entry(root).or_default().push(idx);
    }
    for members in components.values().filter(|m| m.len() > 1) {
        let targets = members.iter().flat_map(|&m| by_name[m].iter().cloned()).collect();
        questions.push(QuestionCandidate::new(targets));
    }

    let priors = state.priors();
    let live = priors.iter().filter(|p| **p > MASS_EPSILON).count();
    if live > 1 && 1.0 - normalized_entropy(&priors) < config.argument_threshold {
        questions.push(QuestionCandidate::call_selection());
    }

    let mut seen: Vec<Vec<QuestionTarget>> = Vec::new();
    questions.retain(|q| {
        let id = q.identity();
        if seen.contains(&id) {
            false
        } else {
            seen.push(id);
            true
        }
    });
    questions
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use clarion_core::{ArgValue, ArgumentBelief, ArgumentSpec, CandidateCall, Domain, ToolSpec};
    use std::sync::Arc;

    fn candidate(tool: &str, args: Vec<ArgumentSpec>, prior: f64) -> CandidateCall {
        CandidateCall::new(Arc::new(ToolSpec::new(tool, "", args).unwrap()), prior)
    }

    #[test]
    fn test_groups_same_name_across_candidates() {
        let fmt = || ArgumentSpec::new("format", Domain::enumerated(["png", "jpg"]));
        let state = BeliefState::new(
            "r",
            vec![candidate("convert", vec![fmt()], 0.5), candidate("export", vec![fmt()], 0.5)],
        )
        .unwrap();
        let qs = generate(&state, &EngineConfig::default());
        assert_eq!(qs.len(), 2);
        assert_eq!(qs[0].targets.len(), 2);
        assert_eq!(qs[0].key, "convert.format+export.format");
        assert!(qs[1].asks_call_selection());
        assert_eq!(qs[1].key, "@call");
    }

    #[test]
    fn test_correlated_arguments_form_compound() {
        let state = BeliefState::new(
            "r",
            vec![candidate(
                "resize",
                vec![
                    ArgumentSpec::new("width", Domain::range(1.0, 10.0, 1.0)).correlated("size"),
                    ArgumentSpec::new("height", Domain::range(1.0, 10.0, 1.0)).correlated("size"),
                    ArgumentSpec::new("keep_ratio", Domain::boolean()),
                ],
                1.0,
            )],
        )
        .unwrap();
        let qs = generate(&state, &EngineConfig::default());
        let keys: Vec<&str> = qs.iter().map(|q| q.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["resize.width", "resize.height", "resize.keep_ratio", "resize.height+resize.width"]
        );
        assert_eq!(qs[3].argument_names(), vec!["width", "height"]);
    }

    #[test]
    fn test_certain_arguments_are_not_targets() {
        let d = Domain::enumerated(["a", "b"]);
        let c = candidate("t", vec![ArgumentSpec::new("x", d.clone())], 1.0)
            .with_belief("x", ArgumentBelief::resolved(&d, ArgValue::from("a")))
            .unwrap();
        let state = BeliefState::new("r", vec![c]).unwrap();
        assert!(generate(&state, &EngineConfig::default()).is_empty());
    }

    #[test]
    fn test_zero_prior_candidates_contribute_nothing() {
        let d = || ArgumentSpec::new("x", Domain::enumerated(["a", "b"]));
        let state = BeliefState::new(
            "r",
            vec![candidate("t", vec![d()], 1.0), candidate("u", vec![d()], 0.0)],
        )
        .unwrap();
        let qs = generate(&state, &EngineConfig::default());
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].key, "t.x");
    }

    #[test]
    fn test_generation_is_deterministic() {
        let fmt = || ArgumentSpec::new("format", Domain::enumerated(["png", "jpg"])).correlated("g");
        let page = || ArgumentSpec::new("page", Domain::range(1.0, 5.0, 1.0)).correlated("g");
        let state = BeliefState::new(
            "r",
            vec![candidate("a", vec![fmt(), page()], 0.3), candidate("b", vec![page()], 0.7)],
        )
        .unwrap();
        let config = EngineConfig::default();
        assert_eq!(generate(&state, &config), generate(&state, &config));
    }

    #[test]
    fn test_later_steps_get_their_own_visit_keys() {
        let fmt = || ArgumentSpec::new("format", Domain::enumerated(["png", "jpg"])).correlated("g");
        let page = || ArgumentSpec::new("page", Domain::range(1.0, 5.0, 1.0)).correlated("g");
        let state = BeliefState::new("r", vec![candidate("a", vec![fmt(), page()], 1.0)]).unwrap();
        let compound = generate(&state, &EngineConfig::default())
            .into_iter()
            .find(|q| q.targets.len() == 2)
            .unwrap();
        assert_eq!(compound.clone().with_step(0).key, compound.key);
        let later = compound.with_step(2);
        assert_eq!(later.step, 2);
        assert_eq!(later.visit_keys(), vec!["2:a.format".to_string(), "2:a.page".to_string()]);
    }
}
