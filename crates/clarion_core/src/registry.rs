//! Domain registry: static description of tools and their arguments.
//!
//! Tools are registered explicitly at startup, each as a validated
//! [`ToolSpec`] plus an optional executor capability. After assembly the
//! registry is shared read-only behind an `Arc`.

use crate::belief::ResolvedCall;
use crate::error::{ClarionError, Result};
use crate::session::SessionContext;
use crate::tools::ToolExecutor;
use crate::value::{Domain, WeightedValue};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

const REQUIRED_WEIGHT: f64 = 1.0;
const OPTIONAL_WEIGHT: f64 = 0.5;

// ============================================================================
// ArgumentSpec
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ArgumentSpec {
    pub name: String,
    pub description: String,
    pub domain: Domain,
    pub required: bool,
    /// Importance weight in call certainty and regret.
    pub weight: f64,
    /// Per-argument certainty threshold; the engine default applies when unset.
    pub threshold: Option<f64>,
    /// Arguments of one tool sharing a group are asked about together.
    pub correlation_group: Option<String>,
    /// Session context field that caps a range domain from above.
    pub bound_by: Option<String>,
    /// External override of the hypothesized answer distribution.
    pub answer_prior: Option<Vec<WeightedValue>>,
}

impl ArgumentSpec {
    pub fn new(name: impl Into<String>, domain: Domain) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            domain,
            required: true,
            weight: REQUIRED_WEIGHT,
            threshold: None,
            correlation_group: None,
            bound_by: None,
            answer_prior: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self.weight = OPTIONAL_WEIGHT;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn correlated(mut self, group: impl Into<String>) -> Self {
        self.correlation_group = Some(group.into());
        self
    }

    pub fn bounded_by(mut self, field: impl Into<String>) -> Self {
        self.bound_by = Some(field.into());
        self
    }

    pub fn with_answer_prior(mut self, prior: Vec<WeightedValue>) -> Self {
        self.answer_prior = Some(prior);
        self
    }

    fn validate(&self, tool: &str) -> Result<()> {
        let fail = |reason: String| {
            ClarionError::config(format!("{}.{}: {}", tool, self.name, reason))
        };
        if self.name.trim().is_empty() {
            return Err(ClarionError::config(format!("{}: argument with empty name", tool)));
        }
        self.domain.validate().map_err(fail)?;
        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err(fail(format!("weight must be positive, got {}", self.weight)));
        }
        if let Some(t) = self.threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(fail(format!("threshold must lie in [0, 1], got {}", t)));
            }
        }
        if self.bound_by.is_some() && !matches!(self.domain, Domain::Range { .. }) {
            return Err(fail("bound_by requires a range domain".to_string()));
        }
        if let Some(prior) = &self.answer_prior {
            let mut total = 0.0;
            for wv in prior {
                if !self.domain.contains(&wv.value) {
                    return Err(fail(format!("answer prior value {} outside domain", wv.value)));
                }
                if !wv.weight.is_finite() || wv.weight < 0.0 {
                    return Err(fail(format!("answer prior weight {} is invalid", wv.weight)));
                }
                total += wv.weight;
            }
            if total <= 0.0 {
                return Err(fail("answer prior has no positive weight".to_string()));
            }
        }
        Ok(())
    }
}

// ============================================================================
// ToolSpec
// ============================================================================

/// A tool and its ordered arguments. Immutable once constructed.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    name: String,
    description: String,
    arguments: Vec<ArgumentSpec>,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        arguments: Vec<ArgumentSpec>,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ClarionError::config("tool with empty name"));
        }
        for (i, arg) in arguments.iter().enumerate() {
            arg.validate(&name)?;
            if arguments[..i].iter().any(|a| a.name == arg.name) {
                return Err(ClarionError::config(format!(
                    "{}: duplicate argument '{}'",
                    name, arg.name
                )));
            }
        }
        Ok(Self {
            name,
            description: description.into(),
            arguments,
        })
    }

    pub fn from_definition(def: ToolDefinition) -> Result<Self> {
        let arguments = def
            .arguments
            .into_iter()
            .map(|a| {
                let weight = a.weight.unwrap_or(if a.required {
                    REQUIRED_WEIGHT
                } else {
                    OPTIONAL_WEIGHT
                });
                ArgumentSpec {
                    name: a.name,
                    description: a.description,
                    domain: a.domain,
                    required: a.required,
                    weight,
                    threshold: a.threshold,
                    correlation_group: a.correlation_group,
                    bound_by: a.bound_by,
                    answer_prior: a.answer_prior,
                }
            })
            .collect();
        Self::new(def.name, def.description, arguments)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn arguments(&self) -> &[ArgumentSpec] {
        &self.arguments
    }

    pub fn argument(&self, name: &str) -> Option<&ArgumentSpec> {
        self.arguments.iter().find(|a| a.name == name)
    }

    pub fn argument_index(&self, name: &str) -> Option<usize> {
        self.arguments.iter().position(|a| a.name == name)
    }

    /// Session-local copy with data-dependent ranges capped by the context.
    /// A bound can only shrink a range; one above the declared maximum
    /// leaves it as declared.
    pub fn narrowed(&self, context: &SessionContext) -> Result<Self> {
        let mut narrowed = self.clone();
        for arg in &mut narrowed.arguments {
            let Some(field) = &arg.bound_by else { continue };
            let Some(bound) = context.number(field) else { continue };
            if let Domain::Range { min, .. } = &arg.domain {
                if !bound.is_finite() || bound < *min {
                    return Err(ClarionError::config(format!(
                        "{}.{}: context bound {}={} is below range minimum {}",
                        self.name, arg.name, field, bound, min
                    )));
                }
                arg.domain = arg.domain.capped(bound);
            }
        }
        Ok(narrowed)
    }

    /// Check a resolved call against this spec's constraints.
    pub fn validate_call(&self, call: &ResolvedCall) -> Result<()> {
        if call.tool != self.name {
            return Err(ClarionError::Validation {
                tool: call.tool.clone(),
                arguments: vec![],
                reason: format!("call does not target '{}'", self.name),
            });
        }
        let mut offending = Vec::new();
        let mut reasons = Vec::new();
        for arg in &self.arguments {
            match call.arguments.get(&arg.name) {
                Some(value) if !arg.domain.contains(value) => {
                    offending.push(arg.name.clone());
                    reasons.push(format!("{}={} outside declared domain", arg.name, value));
                }
                None if arg.required => {
                    offending.push(arg.name.clone());
                    reasons.push(format!("{} is missing", arg.name));
                }
                _ => {}
            }
        }
        for name in call.arguments.keys() {
            if self.argument(name).is_none() {
                offending.push(name.clone());
                reasons.push(format!("{} is not an argument of {}", name, self.name));
            }
        }
        if offending.is_empty() {
            Ok(())
        } else {
            Err(ClarionError::Validation {
                tool: self.name.clone(),
                arguments: offending,
                reason: reasons.join("; "),
            })
        }
    }
}

// ============================================================================
// Definitions (file format)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<ArgumentDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArgumentDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub domain: Domain,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub correlation_group: Option<String>,
    #[serde(default)]
    pub bound_by: Option<String>,
    #[serde(default)]
    pub answer_prior: Option<Vec<WeightedValue>>,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ToolFile {
    tools: Vec<ToolDefinition>,
}

/// Load tool definitions from a `.toml` (`[[tools]]` tables) or `.json` file.
pub fn load_tool_definitions<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<ToolDefinition>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tool file: {}", path.display()))?;
    parse_tool_definitions(&content, path.extension().and_then(|e| e.to_str()).unwrap_or(""))
        .with_context(|| format!("Failed to parse tool file: {}", path.display()))
}

/// Parse tool definitions. `format` is `"json"` or anything else for TOML.
pub fn parse_tool_definitions(content: &str, format: &str) -> anyhow::Result<Vec<ToolDefinition>> {
    let file: ToolFile = if format.eq_ignore_ascii_case("json") {
        serde_json::from_str(content)?
    } else {
        toml::from_str(content)?
    };
    Ok(file.tools)
}

// ============================================================================
// ToolRegistry
// ============================================================================

pub struct RegisteredTool {
    pub spec: Arc<ToolSpec>,
    executor: Option<Arc<dyn ToolExecutor>>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from parsed definitions, without executors.
    pub fn from_definitions(defs: Vec<ToolDefinition>) -> Result<Self> {
        let mut registry = Self::new();
        for def in defs {
            registry.register(ToolSpec::from_definition(def)?, None)?;
        }
        Ok(registry)
    }

    /// Register a tool. A name may only be registered once.
    pub fn register(
        &mut self,
        spec: ToolSpec,
        executor: Option<Arc<dyn ToolExecutor>>,
    ) -> Result<()> {
        let name = spec.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ClarionError::config(format!("tool '{}' registered twice", name)));
        }
        tracing::debug!(
            "Registered tool: {} ({} arguments, executor: {})",
            name,
            spec.arguments().len(),
            executor.as_ref().map(|e| e.name()).unwrap_or("none")
        );
        self.tools.insert(
            name,
            RegisteredTool {
                spec: Arc::new(spec),
                executor,
            },
        );
        Ok(())
    }

    /// Attach an executor to an already registered tool.
    pub fn attach_executor(&mut self, tool: &str, executor: Arc<dyn ToolExecutor>) -> Result<()> {
        match self.tools.get_mut(tool) {
            Some(entry) => {
                entry.executor = Some(executor);
                Ok(())
            }
            None => Err(ClarionError::config(format!("cannot attach executor to unknown tool '{}'", tool))),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ToolSpec>> {
        self.tools.get(name).map(|t| &t.spec)
    }

    pub fn executor(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.tools.get(name).and_then(|t| t.executor.clone())
    }

    pub fn specs(&self) -> impl Iterator<Item = &Arc<ToolSpec>> {
        self.tools.values().map(|t| &t.spec)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate a resolved call against the registered (un-narrowed) spec.
    pub fn validate(&self, call: &ResolvedCall) -> Result<()> {
        match self.get(&call.tool) {
            Some(spec) => spec.validate_call(call),
            None => Err(ClarionError::Validation {
                tool: call.tool.clone(),
                arguments: vec![],
                reason: "unknown tool".to_string(),
            }),
        }
    }

    /// Human-readable listing used in prompts and the `tools` CLI command.
    pub fn describe(&self) -> String {
        let mut out = Vec::new();
        for spec in self.specs() {
            let mut block = format!("Tool: {}\nDescription: {}\nArguments:", spec.name(), spec.description());
            for arg in spec.arguments() {
                block.push_str(&format!("\n  - {}: {}", arg.name, arg.domain.describe()));
                if !arg.description.is_empty() {
                    block.push_str(&format!(" ({})", arg.description));
                }
                if !arg.required {
                    block.push_str(" [optional]");
                }
            }
            out.push(block);
        }
        out.join("\n\n")
    }
}

// ============================================================================
// Tests
// ============================================================================
