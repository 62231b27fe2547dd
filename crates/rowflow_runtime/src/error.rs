//! Runtime error types.

use rowflow_core::CoreError;
use rowflow_plan::{PlanError, ValidationError};

/// Boxed error from an external collaborator
pub type ExternalError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Row set errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowSetError {
    /// The row set was marked done or cancelled
    #[error("Row set {name} is closed")]
    Closed {
        /// Row set name
        name: String,
    },
}

/// Errors raised by a step copy
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Invalid wiring or settings, detected at init
    #[error("Configuration error in step {step}: {reason}")]
    Config {
        /// Step name
        step: String,
        /// What is wrong
        reason: String,
    },

    /// Unrecoverable failure while processing rows
    #[error("Processing error in step {step}: {reason}")]
    Process {
        /// Step name
        step: String,
        /// What went wrong
        reason: String,
    },

    /// A collaborator outside the engine failed
    #[error("External resource error in step {step}: {source}")]
    External {
        /// Step name
        step: String,
        /// Underlying error
        #[source]
        source: ExternalError,
    },

    /// Every output of the step was closed by its consumer
    #[error("All outputs are closed")]
    OutputClosed,

    /// Data model error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Settings could not be decoded
    #[error(transparent)]
    Plan(#[from] PlanError),
}

impl StepError {
    /// Shorthand for a configuration error
    #[must_use]
    pub fn config(step: &str, reason: impl Into<String>) -> Self {
        Self::Config {
            step: step.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a processing error
    #[must_use]
    pub fn process(step: &str, reason: impl Into<String>) -> Self {
        Self::Process {
            step: step.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the trans coordinator
#[derive(Debug, thiserror::Error)]
pub enum TransError {
    /// The metadata failed validation
    #[error("Trans validation failed: {}", format_validation(.0))]
    Validation(Vec<ValidationError>),

    /// No factory is registered for a step kind
    #[error("Unknown step kind '{kind}' for step {step}")]
    UnknownKind {
        /// Step name
        step: String,
        /// Requested kind
        kind: String,
    },

    /// A step instance could not be constructed
    #[error("Unable to create step {step}: {source}")]
    Construction {
        /// Step name
        step: String,
        /// Factory error
        #[source]
        source: StepError,
    },

    /// One or more copies failed to initialize
    #[error("Unable to initialize steps: {}", .steps.join(", "))]
    InitFailed {
        /// `step.copy` of each failed copy
        steps: Vec<String>,
    },

    /// A copy thread could not be spawned
    #[error("Unable to start thread for {copy}: {source}")]
    Spawn {
        /// `step.copy`
        copy: String,
        /// OS error
        #[source]
        source: std::io::Error,
    },

    /// Operation called in the wrong lifecycle phase
    #[error("Invalid trans state: {reason}")]
    InvalidState {
        /// What was expected
        reason: String,
    },

    /// Unknown step or copy
    #[error("Step copy not found: {copy}")]
    CopyNotFound {
        /// `step.copy`
        copy: String,
    },
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_display() {
        let err = StepError::config("Add sequence", "maximum is not a number");
        assert_eq!(
            err.to_string(),
            "Configuration error in step Add sequence: maximum is not a number"
        );
    }

    #[test]
    fn test_external_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = StepError::External {
            step: "seq".to_string(),
            source: Box::new(io),
        };
        assert!(err.to_string().contains("refused"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_trans_error_display() {
        let err = TransError::InitFailed {
            steps: vec!["a.0".to_string(), "b.1".to_string()],
        };
        assert_eq!(err.to_string(), "Unable to initialize steps: a.0, b.1");

        let err = TransError::Validation(vec![ValidationError::Empty, ValidationError::RowSetSize]);
        assert_eq!(
            err.to_string(),
            "Trans validation failed: Trans has no steps; Row set size must be at least 1"
        );
    }
}
