//! Selector: UCB bandit policy over scored questions.

use crate::evaluator::QuestionScore;
use crate::questions::QuestionCandidate;
use clarion_core::EngineConfig;
use serde::Serialize;
use std::collections::BTreeMap;

const TIE_EPSILON: f64 = 1e-12;

/// Per-session visit counters. Never decrease within a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuestionStats {
    visits: BTreeMap<String, u64>,
    total: u64,
}

impl QuestionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visits of a single argument key.
    pub fn visits(&self, key: &str) -> u64 {
        self.visits.get(key).copied().unwrap_or(0)
    }

    /// Visit count of a question: the maximum over the keys it touches, so a
    /// compound question only looks familiar once every part has been asked.
    pub fn question_visits(&self, question: &QuestionCandidate) -> u64 {
        question
            .visit_keys()
            .iter()
            .map(|k| self.visits(k))
            .max()
            .unwrap_or(0)
    }

    /// Total questions asked (`N`).
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn record(&mut self, question: &QuestionCandidate) {
        for key in question.visit_keys() {
            *self.visits.entry(key).or_insert(0) += 1;
        }
        self.total += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredQuestion {
    pub question: QuestionCandidate,
    pub evpi: f64,
    pub delta_regret: f64,
    pub visits: u64,
    pub exploration: f64,
    pub ucb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    NoCandidates,
    BelowThreshold { best: f64, threshold: f64 },
    BudgetExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Index into the scored list.
    Ask(usize),
    Stop(StopReason),
}

#[derive(Debug, Clone)]
pub struct Selector {
    config: EngineConfig,
}

impl Selector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// `c * sqrt(ln(N + 1) / (n_k + 1))`
    pub fn exploration_bonus(&self, visits: u64, total: u64) -> f64 {
        self.config.exploration_constant * (((total + 1) as f64).ln() / (visits + 1) as f64).sqrt()
    }

    pub fn ucb(&self, score: &QuestionScore, visits: u64, total: u64) -> f64 {
        score.value() + self.exploration_bonus(visits, total)
    }

    pub fn score_all(
        &self,
        questions: Vec<QuestionCandidate>,
        scores: &[QuestionScore],
        stats: &QuestionStats,
    ) -> Vec<ScoredQuestion> {
        questions
            .into_iter()
            .zip(scores)
            .map(|(question, score)| {
                let visits = stats.question_visits(&question);
                let exploration = self.exploration_bonus(visits, stats.total());
                ScoredQuestion {
                    question,
                    evpi: score.evpi,
                    delta_regret: score.delta_regret,
                    visits,
                    exploration,
                    ucb: score.value() + exploration,
                }
            })
            .collect()
    }

    /// Pick the next question or stop. Selecting records the visit before
    /// any answer is known.
    pub fn select(&self, scored: &[ScoredQuestion], stats: &mut QuestionStats, turn: u32) -> Selection {
        if stats.total() >= self.config.max_questions as u64 {
            return Selection::Stop(StopReason::BudgetExhausted);
        }
        let mut best: Option<usize> = None;
        for (i, q) in scored.iter().enumerate() {
            best = match best {
                None => Some(i),
                Some(b) => {
                    let current = &scored[b];
                    let better = q.ucb > current.ucb + TIE_EPSILON
                        || ((q.ucb - current.ucb).abs() <= TIE_EPSILON && q.visits < current.visits);
                    Some(if better { i } else { b })
                }
            };
        }
        let Some(index) = best else {
            return Selection::Stop(StopReason::NoCandidates);
        };

        let threshold = self.config.threshold_at(turn);
        let top = scored[index].ucb;
        if top < threshold {
            return Selection::Stop(StopReason::BelowThreshold { best: top, threshold });
        }
        stats.record(&scored[index].question);
        Selection::Ask(index)
    }
}
