use crate::error::{ClarionError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarionConfig {
    pub engine: EngineConfig,
    pub llm: LlmConfig,
    pub retry: RetryPolicy,
    pub session: SessionConfig,
}

impl ClarionConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied and the result validated.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: ClarionConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Try to load from path; if the file doesn't exist or is invalid, return
    /// defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({:#}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CLARION_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("CLARION_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("CLARION_LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("CLARION_MAX_QUESTIONS") {
            if let Ok(n) = v.parse() {
                self.engine.max_questions = n;
            }
        }
        if let Ok(v) = std::env::var("CLARION_EXPLORATION") {
            if let Ok(n) = v.parse() {
                self.engine.exploration_constant = n;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.retry.validate()?;
        if self.session.max_concurrent == 0 {
            return Err(ClarionError::config("session.max_concurrent must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

/// Immutable parameters of the decision engine, handed to each session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Arguments below this certainty are question targets (unless the
    /// argument declares its own threshold).
    pub argument_threshold: f64,
    /// Overall certainty at which the loop proceeds to execution.
    pub certainty_threshold: f64,
    /// UCB exploration constant `c`.
    pub exploration_constant: f64,
    /// Termination threshold at turn 0; decays linearly by `threshold_decay`
    /// per turn down to `min_threshold`.
    pub base_threshold: f64,
    pub threshold_decay: f64,
    pub min_threshold: f64,
    pub max_questions: u32,
    /// Hard cap on turns; reaching it aborts with a best-effort result.
    pub max_turns: u32,
    /// Largest joint outcome space enumerated exactly during evaluation.
    pub max_enumeration: u64,
    pub sample_size: usize,
    pub sample_seed: u64,
    /// Expected reliability of answers; scales EVPI and ΔRegret.
    pub response_confidence: f64,
    pub selection_weight: f64,
    pub max_validation_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            argument_threshold: 0.9,
            certainty_threshold: 0.9,
            exploration_constant: 1.0,
            base_threshold: 0.1,
            threshold_decay: 0.05,
            min_threshold: 0.01,
            max_questions: 5,
            max_turns: 10,
            max_enumeration: 256,
            sample_size: 64,
            sample_seed: 7,
            response_confidence: 1.0,
            selection_weight: 1.0,
            max_validation_retries: 2,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        let unit = [
            ("argument_threshold", self.argument_threshold),
            ("certainty_threshold", self.certainty_threshold),
            ("response_confidence", self.response_confidence),
        ];
        for (name, v) in unit {
            if !(0.0..=1.0).contains(&v) {
                return Err(ClarionError::config(format!("engine.{} must lie in [0, 1], got {}", name, v)));
            }
        }
        let non_negative = [
            ("exploration_constant", self.exploration_constant),
            ("base_threshold", self.base_threshold),
            ("threshold_decay", self.threshold_decay),
            ("min_threshold", self.min_threshold),
            ("selection_weight", self.selection_weight),
        ];
        for (name, v) in non_negative {
            if !v.is_finite() || v < 0.0 {
                return Err(ClarionError::config(format!("engine.{} must be non-negative, got {}", name, v)));
            }
        }
        if self.max_enumeration == 0 || self.sample_size == 0 {
            return Err(ClarionError::config("engine.max_enumeration and engine.sample_size must be positive"));
        }
        if self.max_turns == 0 {
            return Err(ClarionError::config("engine.max_turns must be at least 1"));
        }
        Ok(())
    }

    /// Termination threshold at the given turn.
    pub fn threshold_at(&self, turn: u32) -> f64 {
        (self.base_threshold - self.threshold_decay * turn as f64).max(self.min_threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `template` (no LLM), `ollama`, `openai` or `mock`.
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "template".to_string(),
            model: "llama3.1".to_string(),
            base_url: None,
            max_tokens: 512,
            temperature: 0.2,
        }
    }
}

/// Bounded exponential backoff for collaborator calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ClarionError::config("retry.max_attempts must be at least 1"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ClarionError::config(format!(
                "retry.backoff_factor must be >= 1, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub timeout_secs: u64,
    pub collaborator_timeout_secs: u64,
    pub max_concurrent: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            collaborator_timeout_secs: 60,
            max_concurrent: 8,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
