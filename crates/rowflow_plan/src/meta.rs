//! Trans and step metadata.
//!
//! A [`TransMeta`] is plain data: it can be built in code or deserialized
//! from any serde format by the host. Step-specific settings travel as an
//! opaque JSON value that each step kind decodes itself.

use indexmap::{IndexMap, IndexSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use rowflow_core::VariableSpace;

/// Default capacity of every row set
pub const DEFAULT_ROW_SET_SIZE: usize = 10_000;

/// Result type for metadata operations
pub type PlanResult<T> = Result<T, PlanError>;

/// Errors raised while assembling a trans definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// A step with this name is already defined
    #[error("Step already exists: {name}")]
    StepExists {
        /// Step name
        name: String,
    },

    /// A hop or lookup references an undefined step
    #[error("Step not found: {name}")]
    UnknownStep {
        /// Step name
        name: String,
    },

    /// Adding the hop would close a loop
    #[error("Hop {from} -> {to} would create a cycle")]
    Cycle {
        /// Hop origin
        from: String,
        /// Hop destination
        to: String,
    },

    /// A step has an error hop already
    #[error("Step {step} already sends error rows to {existing}")]
    DuplicateErrorHop {
        /// Step name
        step: String,
        /// Current error target
        existing: String,
    },

    /// Step settings could not be decoded
    #[error("Invalid settings for step {step}: {reason}")]
    Config {
        /// Step name
        step: String,
        /// Decoder message
        reason: String,
    },
}

/// How a step spreads its rows over several outputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    /// Each row goes to the next output in turn
    #[default]
    RoundRobin,
    /// Each row goes to every output
    CopyToAll,
}

/// Definition of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMeta {
    /// Unique step name
    pub name: String,
    /// Step kind, the key used to look up its factory
    pub kind: String,
    /// Number of parallel copies
    #[serde(default = "default_copies")]
    pub copies: usize,
    /// Output distribution
    #[serde(default)]
    pub distribution: Distribution,
    /// Kind-specific settings
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_copies() -> usize {
    1
}

impl StepMeta {
    /// Create a single-copy step without settings
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            copies: 1,
            distribution: Distribution::RoundRobin,
            config: serde_json::Value::Null,
        }
    }

    /// Set the number of copies
    #[must_use]
    pub fn with_copies(mut self, copies: usize) -> Self {
        self.copies = copies;
        self
    }

    /// Set the kind-specific settings
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Send every row to every output instead of distributing
    #[must_use]
    pub fn copy_rows(mut self) -> Self {
        self.distribution = Distribution::CopyToAll;
        self
    }

    /// Decode the settings into a kind-specific type.
    ///
    /// Missing settings decode as an empty object so that types with
    /// defaults for every field accept them.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Config`] if decoding fails
    pub fn config_as<T: DeserializeOwned>(&self) -> PlanResult<T> {
        let value = match &self.config {
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|e| PlanError::Config {
            step: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

/// A directed link between two steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    /// Producing step
    pub from: String,
    /// Consuming step
    pub to: String,
    /// Disabled hops are ignored when wiring
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Error hops carry rejected rows only
    #[serde(default)]
    pub error: bool,
}

fn default_enabled() -> bool {
    true
}

impl Hop {
    /// Create an enabled data hop
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            enabled: true,
            error: false,
        }
    }
}

/// Definition of a whole pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransMeta {
    /// Pipeline name
    pub name: String,
    /// Steps by name, in definition order
    pub steps: IndexMap<String, StepMeta>,
    /// Hops between steps
    #[serde(default)]
    pub hops: Vec<Hop>,
    /// Variables resolved into step settings at init
    #[serde(default)]
    pub variables: IndexMap<String, String>,
    /// Capacity of every row set
    #[serde(default = "default_row_set_size")]
    pub row_set_size: usize,
    /// Check schema compatibility on multi-input steps
    #[serde(default)]
    pub safe_mode: bool,
}

fn default_row_set_size() -> usize {
    DEFAULT_ROW_SET_SIZE
}

impl TransMeta {
    /// Create an empty pipeline
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: IndexMap::new(),
            hops: Vec::new(),
            variables: IndexMap::new(),
            row_set_size: DEFAULT_ROW_SET_SIZE,
            safe_mode: false,
        }
    }

    /// Set the row set capacity
    #[must_use]
    pub fn with_row_set_size(mut self, size: usize) -> Self {
        self.row_set_size = size;
        self
    }

    /// Enable safe mode
    #[must_use]
    pub fn with_safe_mode(mut self, safe: bool) -> Self {
        self.safe_mode = safe;
        self
    }

    /// Set a variable
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Add a step
    ///
    /// # Errors
    ///
    /// Returns error if the name is taken
    pub fn add_step(&mut self, step: StepMeta) -> PlanResult<()> {
        if self.steps.contains_key(&step.name) {
            return Err(PlanError::StepExists { name: step.name });
        }
        self.steps.insert(step.name.clone(), step);
        Ok(())
    }

    /// Add a data hop
    ///
    /// # Errors
    ///
    /// Returns error if an endpoint is unknown or the hop closes a loop
    pub fn add_hop(&mut self, from: &str, to: &str) -> PlanResult<()> {
        self.push_hop(Hop::new(from, to))
    }

    /// Add an error hop: rows rejected by `from` are sent to `to`
    ///
    /// # Errors
    ///
    /// Returns error if an endpoint is unknown, the hop closes a loop or
    /// `from` already has an error hop
    pub fn add_error_hop(&mut self, from: &str, to: &str) -> PlanResult<()> {
        if let Some(existing) = self.error_target(from) {
            return Err(PlanError::DuplicateErrorHop {
                step: from.to_string(),
                existing: existing.to_string(),
            });
        }
        let mut hop = Hop::new(from, to);
        hop.error = true;
        self.push_hop(hop)
    }

    fn push_hop(&mut self, hop: Hop) -> PlanResult<()> {
        for name in [&hop.from, &hop.to] {
            if !self.steps.contains_key(name) {
                return Err(PlanError::UnknownStep { name: name.clone() });
            }
        }
        if hop.from == hop.to || self.downstream_of(&hop.to).contains(hop.from.as_str()) {
            return Err(PlanError::Cycle {
                from: hop.from,
                to: hop.to,
            });
        }
        self.hops.push(hop);
        Ok(())
    }

    /// Step by name
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepMeta> {
        self.steps.get(name)
    }

    /// Enabled hops
    pub fn active_hops(&self) -> impl Iterator<Item = &Hop> {
        self.hops.iter().filter(|h| h.enabled)
    }

    /// Steps feeding `name`, through data or error hops
    #[must_use]
    pub fn previous_steps(&self, name: &str) -> Vec<&str> {
        self.active_hops()
            .filter(|h| h.to == name)
            .map(|h| h.from.as_str())
            .collect()
    }

    /// Steps receiving the regular output of `name`
    #[must_use]
    pub fn next_steps(&self, name: &str) -> Vec<&str> {
        self.active_hops()
            .filter(|h| h.from == name && !h.error)
            .map(|h| h.to.as_str())
            .collect()
    }

    /// Step receiving the rejected rows of `name`
    #[must_use]
    pub fn error_target(&self, name: &str) -> Option<&str> {
        self.active_hops()
            .find(|h| h.from == name && h.error)
            .map(|h| h.to.as_str())
    }

    /// Every step reachable from `name` (excluding `name` itself unless it
    /// lies on a loop)
    #[must_use]
    pub fn downstream_of(&self, name: &str) -> IndexSet<&str> {
        let mut reachable = IndexSet::new();
        let mut stack = vec![name];
        while let Some(current) = stack.pop() {
            for hop in self.active_hops().filter(|h| h.from == current) {
                if reachable.insert(hop.to.as_str()) {
                    stack.push(hop.to.as_str());
                }
            }
        }
        reachable
    }

    /// Variable space holding this pipeline's variables
    #[must_use]
    pub fn variable_space(&self) -> VariableSpace {
        let mut space = VariableSpace::new();
        for (name, value) in &self.variables {
            space.set_variable(name.clone(), value.clone());
        }
        space
    }

    /// Total number of step copies
    #[must_use]
    pub fn copy_count(&self) -> usize {
        self.steps.values().map(|s| s.copies).sum()
    }
}
