//! Step kind registry.
//!
//! Maps a step kind name (the `kind` of a [`StepMeta`]) to a factory that
//! builds one fresh [`Step`] instance per copy.

use std::sync::Arc;

use indexmap::IndexMap;
use rowflow_plan::StepMeta;

use crate::error::StepError;
use crate::step::Step;

/// Builds one step copy from its definition
pub type StepFactory = Arc<dyn Fn(&StepMeta) -> Result<Box<dyn Step>, StepError> + Send + Sync>;

/// Error from registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Kind already registered
    #[error("Step kind already registered: {kind}")]
    AlreadyRegistered {
        /// Kind name
        kind: String,
    },
    /// Kind not registered
    #[error("Step kind not found: {kind}")]
    NotFound {
        /// Kind name
        kind: String,
    },
}

/// Registry of step kinds
#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: IndexMap<String, StepFactory>,
}

impl StepRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Register a factory for `kind`
    ///
    /// # Errors
    ///
    /// Returns error if the kind is already registered
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&StepMeta) -> Result<Box<dyn Step>, StepError> + Send + Sync + 'static,
    {
        let kind = kind.into();
        if self.factories.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered { kind });
        }
        self.factories.insert(kind, Arc::new(factory));
        Ok(())
    }

    /// Register a factory for `kind`, replacing any previous one
    #[must_use]
    pub fn with_step<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&StepMeta) -> Result<Box<dyn Step>, StepError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    /// Remove a kind
    ///
    /// # Errors
    ///
    /// Returns error if the kind is not registered
    pub fn unregister(&mut self, kind: &str) -> Result<(), RegistryError> {
        self.factories
            .shift_remove(kind)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound {
                kind: kind.to_string(),
            })
    }

    /// Factory for `kind`
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<StepFactory> {
        self.factories.get(kind).cloned()
    }

    /// Build a step copy for `meta`; `None` if its kind is unknown
    pub fn create(&self, meta: &StepMeta) -> Option<Result<Box<dyn Step>, StepError>> {
        self.factories.get(&meta.kind).map(|factory| factory(meta))
    }

    /// Check if a kind is registered
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, in registration order
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Number of registered kinds
    #[must_use]
    pub fn count(&self) -> usize {
        self.factories.len()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("kinds", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StepContext;
    use crate::step::ProcessOutcome;

    struct Noop;

    impl Step for Noop {
        fn process_row(&mut self, _ctx: &mut StepContext) -> Result<ProcessOutcome, StepError> {
            Ok(ProcessOutcome::Done)
        }
    }

    fn registry() -> StepRegistry {
        let mut registry = StepRegistry::new();
        registry
            .register("Noop", |_: &StepMeta| Ok(Box::new(Noop) as Box<dyn Step>))
            .unwrap();
        registry
    }

    #[test]
    fn test_register_and_create() {
        let registry = registry();
        assert!(registry.contains("Noop"));
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.list(), vec!["Noop".to_string()]);

        let meta = StepMeta::new("n", "Noop");
        assert!(matches!(registry.create(&meta), Some(Ok(_))));
        assert!(registry.create(&StepMeta::new("x", "Missing")).is_none());
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = registry();
        let result = registry.register("Noop", |_: &StepMeta| Ok(Box::new(Noop) as Box<dyn Step>));
        assert_eq!(
            result,
            Err(RegistryError::AlreadyRegistered { kind: "Noop".to_string() })
        );
    }

    #[test]
    fn test_with_step_replaces() {
        let registry = registry().with_step("Noop", |meta: &StepMeta| {
            Err(StepError::config(&meta.name, "replaced"))
        });
        assert_eq!(registry.count(), 1);
        let meta = StepMeta::new("n", "Noop");
        assert!(matches!(registry.create(&meta), Some(Err(StepError::Config { .. }))));
    }

    #[test]
    fn test_unregister() {
        let mut registry = registry();
        registry.unregister("Noop").unwrap();
        assert!(!registry.contains("Noop"));
        assert!(registry.unregister("Noop").is_err());
        assert!(registry.get("Noop").is_none());
    }
}
