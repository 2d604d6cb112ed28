//! Argument values and the domains they are declared over.
//!
//! A domain is either an enumerated finite set or a bounded numeric range with
//! a step. Ranges are never materialized; values are addressed by index.

use serde::{Deserialize, Serialize};
use std::fmt;

const NUMERIC_TOLERANCE: f64 = 1e-9;

/// Largest number of values a range domain may declare.
pub const MAX_RANGE_CARDINALITY: u64 = 1 << 40;

// ============================================================================
// ArgValue
// ============================================================================

/// A single scalar value an argument can take.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ArgValue {
    /// Case-insensitive comparison against free text (surrounding quotes ignored).
    pub fn matches_text(&self, text: &str) -> bool {
        let cleaned = text.trim().trim_matches(|c| c == '"' || c == '\'');
        self.to_string().eq_ignore_ascii_case(cleaned)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl PartialEq for ArgValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ArgValue::Bool(a), ArgValue::Bool(b)) => a == b,
            (ArgValue::Number(a), ArgValue::Number(b)) => (a - b).abs() <= NUMERIC_TOLERANCE,
            (ArgValue::Text(a), ArgValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Bool(b) => write!(f, "{}", b),
            ArgValue::Number(n) if n.fract().abs() < NUMERIC_TOLERANCE && n.abs() < 1e15 => {
                write!(f, "{}", n.round() as i64)
            }
            ArgValue::Number(n) => write!(f, "{}", n),
            ArgValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::Text(s.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        ArgValue::Text(s)
    }
}

impl From<f64> for ArgValue {
    fn from(n: f64) -> Self {
        ArgValue::Number(n)
    }
}

impl From<i64> for ArgValue {
    fn from(n: i64) -> Self {
        ArgValue::Number(n as f64)
    }
}

impl From<bool> for ArgValue {
    fn from(b: bool) -> Self {
        ArgValue::Bool(b)
    }
}

/// A value paired with a non-negative weight, used for extracted
/// distributions and answer-prior overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedValue {
    pub value: ArgValue,
    pub weight: f64,
}

// ============================================================================
// Domain
// ============================================================================

/// Declared value domain of an argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Domain {
    Enumerated {
        values: Vec<ArgValue>,
    },
    Range {
        min: f64,
        max: f64,
        #[serde(default = "default_step")]
        step: f64,
    },
}

fn default_step() -> f64 {
    1.0
}

impl Domain {
    pub fn enumerated<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ArgValue>,
    {
        Domain::Enumerated {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(min: f64, max: f64, step: f64) -> Self {
        Domain::Range { min, max, step }
    }

    pub fn boolean() -> Self {
        Domain::enumerated([true, false])
    }

    /// Check structural validity. Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Domain::Enumerated { values } => {
                if values.is_empty() {
                    return Err("enumerated domain has no values".to_string());
                }
                for (i, v) in values.iter().enumerate() {
                    if let ArgValue::Number(n) = v {
                        if !n.is_finite() {
                            return Err(format!("non-finite value {} in domain", n));
                        }
                    }
                    if values[..i].contains(v) {
                        return Err(format!("duplicate value {} in domain", v));
                    }
                }
                Ok(())
            }
            Domain::Range { min, max, step } => {
                if !min.is_finite() || !max.is_finite() || !step.is_finite() {
                    return Err("range bounds must be finite".to_string());
                }
                if *step <= 0.0 {
                    return Err(format!("range step must be positive, got {}", step));
                }
                if max < min {
                    return Err(format!("range max {} is below min {}", max, min));
                }
                if range_steps(*min, *max, *step) + 1.0 > MAX_RANGE_CARDINALITY as f64 {
                    return Err(format!(
                        "range {}..{} in steps of {} has more than {} values",
                        min, max, step, MAX_RANGE_CARDINALITY
                    ));
                }
                Ok(())
            }
        }
    }

    /// Number of distinct values. Always ≥ 1 for a valid domain.
    pub fn cardinality(&self) -> u64 {
        match self {
            Domain::Enumerated { values } => values.len() as u64,
            Domain::Range { min, max, step } => (range_steps(*min, *max, *step) as u64).saturating_add(1),
        }
    }

    /// Copy of a range domain with its maximum lowered to `bound`, snapped
    /// down onto the `min + k * step` grid. A bound at or above the current
    /// maximum, and any enumerated domain, is returned unchanged.
    pub fn capped(&self, bound: f64) -> Domain {
        match self {
            Domain::Range { min, max, step } if bound < *max => {
                let snapped = min + range_steps(*min, bound, *step).max(0.0) * step;
                Domain::Range {
                    min: *min,
                    max: (snapped * 1e9).round() / 1e9,
                    step: *step,
                }
            }
            _ => self.clone(),
        }
    }

    pub fn value_at(&self, index: u64) -> Option<ArgValue> {
        if index >= self.cardinality() {
            return None;
        }
        match self {
            Domain::Enumerated { values } => values.get(index as usize).cloned(),
            Domain::Range { min, step, .. } => {
                let raw = min + index as f64 * step;
                Some(ArgValue::Number((raw * 1e9).round() / 1e9))
            }
        }
    }

    pub fn index_of(&self, value: &ArgValue) -> Option<u64> {
        match self {
            Domain::Enumerated { values } => {
                values.iter().position(|v| v == value).map(|i| i as u64)
            }
            Domain::Range { min, step, .. } => {
                let x = value.as_f64()?;
                let k = (x - min) / step;
                let rounded = k.round();
                if (k - rounded).abs() > 1e-6 || rounded < 0.0 {
                    return None;
                }
                let idx = rounded as u64;
                (idx < self.cardinality()).then_some(idx)
            }
        }
    }

    pub fn contains(&self, value: &ArgValue) -> bool {
        self.index_of(value).is_some()
    }

    /// Parse free text into a domain value, if it names one.
    pub fn parse(&self, text: &str) -> Option<ArgValue> {
        match self {
            Domain::Enumerated { values } => values.iter().find(|v| v.matches_text(text)).cloned(),
            Domain::Range { .. } => {
                let n: f64 = text.trim().parse().ok()?;
                let candidate = ArgValue::Number(n);
                self.index_of(&candidate).and_then(|i| self.value_at(i))
            }
        }
    }

    /// Iterate over at most `limit` values in index order.
    pub fn values(&self, limit: u64) -> impl Iterator<Item = ArgValue> + '_ {
        (0..self.cardinality().min(limit)).filter_map(move |i| self.value_at(i))
    }

    /// Short description used in question phrasing and prompts.
    pub fn describe(&self) -> String {
        match self {
            Domain::Enumerated { values } => {
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                format!("one of: {}", rendered.join(", "))
            }
            Domain::Range { min, max, step } if (*step - 1.0).abs() < NUMERIC_TOLERANCE => format!(
                "a number between {} and {}",
                ArgValue::Number(*min),
                ArgValue::Number(*max)
            ),
            Domain::Range { min, max, step } => format!(
                "a number between {} and {} in steps of {}",
                ArgValue::Number(*min),
                ArgValue::Number(*max),
                ArgValue::Number(*step)
            ),
        }
    }
}

/// Whole steps between `min` and `max`.
fn range_steps(min: f64, max: f64, step: f64) -> f64 {
    ((max - min) / step + NUMERIC_TOLERANCE).floor()
}

// ============================================================================
// Tests
// ============================================================================
