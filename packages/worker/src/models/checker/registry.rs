use std::collections::HashMap;
use std::sync::Arc;

use common::judge_job::CheckerSpec;
use dashmap::DashMap;
use tracing::debug;

use super::builtin::{
    CaseInsensitiveChecker, ExactChecker, PrecisionChecker, SortChecker, TrimChecker,
};
use super::{Checker, CheckerError};

/// Builds a checker from its optional parameter string.
pub type CheckerFactory = fn(Option<&str>) -> Result<Arc<dyn Checker>, CheckerError>;

/// Maps checker keys to statically compiled implementations.
///
/// Instances are built once per `(key, parameter)` and shared afterwards.
pub struct CheckerRegistry {
    factories: HashMap<String, CheckerFactory>,
    cache: DashMap<(String, Option<String>), Arc<dyn Checker>>,
}

impl CheckerRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            cache: DashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("ExactChecker", |_| Ok(Arc::new(ExactChecker)));
        registry.register("TrimChecker", |_| Ok(Arc::new(TrimChecker)));
        registry.register("SortChecker", |_| Ok(Arc::new(SortChecker)));
        registry.register("CaseInsensitiveChecker", |_| {
            Ok(Arc::new(CaseInsensitiveChecker))
        });
        registry.register("PrecisionChecker", |param| {
            Ok(Arc::new(PrecisionChecker::from_parameter(param)?))
        });
        registry
    }

    /// Register a factory under `key`, replacing any previous one.
    pub fn register(&mut self, key: impl Into<String>, factory: CheckerFactory) {
        let key = key.into();
        self.cache.retain(|(cached, _), _| *cached != key);
        self.factories.insert(key, factory);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn get(&self, spec: &CheckerSpec) -> Result<Arc<dyn Checker>, CheckerError> {
        let key = spec.registry_key();
        let cache_key = (key, spec.parameter.clone());
        if let Some(checker) = self.cache.get(&cache_key) {
            return Ok(Arc::clone(checker.value()));
        }

        let factory = self
            .factories
            .get(&cache_key.0)
            .ok_or_else(|| CheckerError::Unknown(cache_key.0.clone()))?;
        let checker = factory(spec.parameter.as_deref())?;
        debug!(checker = %cache_key.0, "Loaded checker");

        Ok(Arc::clone(
            self.cache.entry(cache_key).or_insert(checker).value(),
        ))
    }
}

impl Default for CheckerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
