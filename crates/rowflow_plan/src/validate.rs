//! Trans validator.
//!
//! Hop construction through [`TransMeta::add_hop`] already rejects unknown
//! steps and loops; the validator re-checks metadata that was deserialized or
//! edited directly.

use indexmap::IndexSet;

use super::meta::TransMeta;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The trans has no steps
    #[error("Trans has no steps")]
    Empty,
    /// Step name is blank or differs from its map key
    #[error("Invalid step name: '{name}'")]
    InvalidName {
        /// Offending name
        name: String,
    },
    /// A step declares zero copies
    #[error("Step {step} must run at least one copy")]
    NoCopies {
        /// Step name
        step: String,
    },
    /// Hop references an undefined step
    #[error("Hop references unknown step {step}")]
    UnknownStep {
        /// Missing step
        step: String,
    },
    /// Loop in the step graph
    #[error("Cycle detected involving steps: {steps:?}")]
    Cycle {
        /// Steps on the loop
        steps: Vec<String>,
    },
    /// Two error hops leave one step
    #[error("Step {step} has more than one error hop")]
    MultipleErrorHops {
        /// Step name
        step: String,
    },
    /// Row sets must hold at least one row
    #[error("Row set size must be at least 1")]
    RowSetSize,
}

/// Validator for trans metadata
pub struct Validator {
    /// Require at least one step
    pub require_steps: bool,
    /// Maximum allowed step copies (0 = no limit)
    pub max_copies: usize,
}

impl Validator {
    /// Create a new validator
    #[must_use]
    pub fn new() -> Self {
        Self {
            require_steps: true,
            max_copies: 0,
        }
    }

    /// Set whether an empty trans is an error
    #[must_use]
    pub fn with_require_steps(mut self, require: bool) -> Self {
        self.require_steps = require;
        self
    }

    /// Set the maximum number of copies of a single step
    #[must_use]
    pub fn with_max_copies(mut self, max: usize) -> Self {
        self.max_copies = max;
        self
    }

    /// Validate a trans
    ///
    /// # Errors
    ///
    /// Returns every problem found
    pub fn validate(&self, meta: &TransMeta) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.require_steps && meta.steps.is_empty() {
            errors.push(ValidationError::Empty);
        }
        if meta.row_set_size == 0 {
            errors.push(ValidationError::RowSetSize);
        }

        for (key, step) in &meta.steps {
            if step.name.trim().is_empty() || &step.name != key {
                errors.push(ValidationError::InvalidName {
                    name: step.name.clone(),
                });
            }
            if step.copies == 0 || (self.max_copies > 0 && step.copies > self.max_copies) {
                errors.push(ValidationError::NoCopies {
                    step: step.name.clone(),
                });
            }
        }

        let mut hops_ok = true;
        for hop in meta.active_hops() {
            for name in [&hop.from, &hop.to] {
                if !meta.steps.contains_key(name) {
                    hops_ok = false;
                    errors.push(ValidationError::UnknownStep { step: name.clone() });
                }
            }
        }

        let mut with_error_hop = IndexSet::new();
        for hop in meta.active_hops().filter(|h| h.error) {
            if !with_error_hop.insert(hop.from.as_str()) {
                errors.push(ValidationError::MultipleErrorHops {
                    step: hop.from.clone(),
                });
            }
        }

        if hops_ok {
            if let Err(e) = self.check_cycles(meta) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn check_cycles(&self, meta: &TransMeta) -> Result<(), ValidationError> {
        let mut visited = IndexSet::new();
        let mut rec_stack = IndexSet::new();

        for name in meta.steps.keys() {
            if self.dfs_cycle(name, meta, &mut visited, &mut rec_stack) {
                return Err(ValidationError::Cycle {
                    steps: rec_stack.iter().map(|s| (*s).to_string()).collect(),
                });
            }
        }

        Ok(())
    }

    fn dfs_cycle<'a>(
        &self,
        name: &'a str,
        meta: &'a TransMeta,
        visited: &mut IndexSet<&'a str>,
        rec_stack: &mut IndexSet<&'a str>,
    ) -> bool {
        if rec_stack.contains(name) {
            return true;
        }
        if visited.contains(name) {
            return false;
        }

        visited.insert(name);
        rec_stack.insert(name);

        for hop in meta.active_hops().filter(|h| h.from == name) {
            if self.dfs_cycle(hop.to.as_str(), meta, visited, rec_stack) {
                return true;
            }
        }

        rec_stack.shift_remove(name);
        false
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{Hop, StepMeta};

    fn two_steps() -> TransMeta {
        let mut meta = TransMeta::new("t");
        meta.add_step(StepMeta::new("a", "DataGrid")).unwrap();
        meta.add_step(StepMeta::new("b", "Dummy")).unwrap();
        meta.add_hop("a", "b").unwrap();
        meta
    }

    #[test]
    fn test_validator_new() {
        let validator = Validator::new();
        assert!(validator.require_steps);
        assert_eq!(validator.max_copies, 0);
    }

    #[test]
    fn test_validate_ok() {
        assert!(Validator::new().validate(&two_steps()).is_ok());
    }

    #[test]
    fn test_validate_empty() {
        let meta = TransMeta::new("empty");
        let errors = Validator::new().validate(&meta).unwrap_err();
        assert_eq!(errors, vec![ValidationError::Empty]);
        assert!(Validator::new().with_require_steps(false).validate(&meta).is_ok());
    }

    #[test]
    fn test_validate_cycle_from_raw_hops() {
        let mut meta = two_steps();
        meta.hops.push(Hop::new("b", "a"));
        let errors = Validator::new().validate(&meta).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::Cycle { .. })));
    }

    #[test]
    fn test_validate_unknown_step() {
        let mut meta = two_steps();
        meta.hops.push(Hop::new("b", "ghost"));
        let errors = Validator::new().validate(&meta).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::UnknownStep { step: "ghost".to_string() }]
        );
    }

    #[test]
    fn test_validate_copies_and_row_set_size() {
        let mut meta = two_steps().with_row_set_size(0);
        meta.steps.get_mut("b").unwrap().copies = 0;
        let errors = Validator::new().validate(&meta).unwrap_err();
        assert!(errors.contains(&ValidationError::RowSetSize));
        assert!(errors.contains(&ValidationError::NoCopies { step: "b".to_string() }));

        let mut meta = two_steps();
        meta.steps.get_mut("b").unwrap().copies = 8;
        assert!(Validator::new().with_max_copies(4).validate(&meta).is_err());
    }

    #[test]
    fn test_validate_multiple_error_hops() {
        let mut meta = two_steps();
        meta.add_step(StepMeta::new("c", "Dummy")).unwrap();
        for to in ["b", "c"] {
            let mut hop = Hop::new("a", to);
            hop.error = true;
            meta.hops.push(hop);
        }
        let errors = Validator::new().validate(&meta).unwrap_err();
        assert!(errors.contains(&ValidationError::MultipleErrorHops { step: "a".to_string() }));
    }
}
