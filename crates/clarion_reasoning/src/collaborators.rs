//! Contracts of the external collaborators the loop talks to.
//!
//! The decision engine never produces or understands natural language
//! itself. A [`QuestionPhraser`] turns a selected question into text and
//! interprets the reply into structured observations; an [`AnswerSource`]
//! produces the reply (a person, a simulator, or a model role-playing one).

use crate::questions::QuestionCandidate;
use anyhow::Result;
use async_trait::async_trait;
use clarion_core::belief::MASS_EPSILON;
use clarion_core::{ArgValue, BeliefState, Observation, SessionInput};
use serde::Serialize;

/// Options listed per argument when phrasing a question.
pub const MAX_LISTED_OPTIONS: usize = 5;

/// Supports larger than this are described by their domain instead of listed.
const MAX_OPTION_SCAN: u64 = 64;

/// A selected question together with the text it was asked with.
#[derive(Debug, Clone)]
pub struct PhrasedQuestion {
    pub text: String,
    pub question: QuestionCandidate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Text(String),
    /// The answer source chose not to answer.
    Declined,
}

#[async_trait]
pub trait QuestionPhraser: Send + Sync {
    fn name(&self) -> &str;

    /// Natural-language text for `question` in the context of `state`.
    async fn phrase(&self, question: &QuestionCandidate, state: &BeliefState) -> Result<String>;

    /// Structured observations for each targeted argument. An empty list or
    /// `Observation::Unknown` means the answer carried no usable information.
    async fn interpret(&self, answer: &str, question: &QuestionCandidate, state: &BeliefState)
        -> Result<Vec<Observation>>;
}

#[async_trait]
pub trait AnswerSource: Send + Sync {
    fn name(&self) -> &str;

    /// Answer `question`. Sources that only see text use `question.text`;
    /// simulators may also inspect the structured targets.
    async fn answer(&self, question: &PhrasedQuestion, input: &SessionInput) -> Result<Answer>;
}

/// What the current belief says about one targeted argument.
#[derive(Debug, Clone, Serialize)]
pub struct TargetView {
    pub argument: String,
    pub description: String,
    /// Rendered declared domain of the most probable declaring candidate.
    pub domain: String,
    /// Most probable values, best first. Empty when the support is too
    /// large to list.
    pub options: Vec<(ArgValue, f64)>,
}

/// Per-argument views of the targets of `question`.
pub fn target_views(question: &QuestionCandidate, state: &BeliefState) -> Vec<TargetView> {
    question
        .argument_names()
        .into_iter()
        .filter_map(|name| argument_view(state, name))
        .collect()
}

fn argument_view(state: &BeliefState, name: &str) -> Option<TargetView> {
    let mut declaring: Vec<_> = state
        .candidates()
        .iter()
        .filter(|c| c.prior > MASS_EPSILON && c.argument(name).is_some())
        .collect();
    declaring.sort_by(|a, b| b.prior.total_cmp(&a.prior));
    let (spec, _) = declaring.first()?.argument(name)?;

    let mut options: Vec<(ArgValue, f64)> = Vec::new();
    let mut listable = true;
    for candidate in &declaring {
        let Some((s, belief)) = candidate.argument(name) else { continue };
        match belief.support(&s.domain, MAX_OPTION_SCAN) {
            Some(support) => {
                for (value, mass) in support {
                    match options.iter_mut().find(|(v, _)| *v == value) {
                        Some((_, m)) => *m += candidate.prior * mass,
                        None => options.push((value, candidate.prior * mass)),
                    }
                }
            }
            None => listable = false,
        }
    }
    if !listable {
        options.clear();
    }
    options.sort_by(|a, b| b.1.total_cmp(&a.1));
    options.truncate(MAX_LISTED_OPTIONS);

    Some(TargetView {
        argument: name.to_string(),
        description: spec.description.clone(),
        domain: spec.domain.describe(),
        options,
    })
}

/// Distinct candidate tools with their summed priors, most probable first.
pub fn tool_options(state: &BeliefState) -> Vec<(String, f64)> {
    let mut tools: Vec<(String, f64)> = Vec::new();
    for c in state.candidates() {
        match tools.iter_mut().find(|(t, _)| t == c.tool()) {
            Some((_, p)) => *p += c.prior,
            None => tools.push((c.tool().to_string(), c.prior)),
        }
    }
    tools.sort_by(|a, b| b.1.total_cmp(&a.1));
    tools
}
