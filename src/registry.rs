//! The cache of live logger handles, keyed by category name.

use std::collections::BTreeMap;

use crate::backend::{Backend, Logger};
use crate::config::{Configuration, Level};

/// A snapshot of the registry as handed to observers.
pub type Registry = BTreeMap<String, Logger>;

/// Maps category names to the handles the backend issued for them. Handles are only ever
/// replaced, never reused across a backend reconfiguration and never removed.
#[derive(Debug, Default)]
pub struct LoggerRegistry {
    loggers: Registry,
}

impl LoggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the backend for a fresh handle for `category` and store it. Must only be called after
    /// the backend has been reconfigured with a configuration that defines `category`.
    pub fn refresh(&mut self, backend: &dyn Backend, category: &str) -> Logger {
        let logger = backend.handle(category);
        self.loggers.insert(category.to_owned(), logger.clone());

        logger
    }

    /// Refresh the handle of every category in `config`.
    pub fn refresh_all(&mut self, backend: &dyn Backend, config: &Configuration) {
        for category in config.categories.keys() {
            self.refresh(backend, category);
        }
    }

    pub fn get(&self, category: &str) -> Option<Logger> {
        self.loggers.get(category).cloned()
    }

    pub fn contains(&self, category: &str) -> bool {
        self.loggers.contains_key(category)
    }

    /// The level each handle reports, which is what the backend actually has active.
    pub fn level(&self, category: &str) -> Option<Level> {
        self.loggers.get(category).map(|logger| logger.level())
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }

    /// A copy of the registry. The handles themselves are shared.
    pub fn snapshot(&self) -> Registry {
        self.loggers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingBackend;
    use std::sync::Arc;

    #[test]
    fn refresh_replaces_handles() {
        let backend = RecordingBackend::new();
        let mut registry = LoggerRegistry::new();

        let first = registry.refresh(&backend, "net");
        let second = registry.refresh(&backend, "net");

        assert_eq!(registry.len(), 1);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&registry.get("net").unwrap(), &second));
    }

    #[test]
    fn refresh_all_covers_every_configured_category() {
        let backend = RecordingBackend::new();
        let config = Configuration::default().merged(
            &crate::PartialConfiguration::default()
                .with_category("a", crate::PartialCategory::level(Level::Info))
                .with_category("b", crate::PartialCategory::level(Level::Error)),
        );
        backend.reconfigure_unchecked(&config);

        let mut registry = LoggerRegistry::new();
        registry.refresh_all(&backend, &config);

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.level("a"), Some(Level::Info));
        assert_eq!(registry.level("b"), Some(Level::Error));
        assert_eq!(registry.level("default"), Some(Level::Off));
    }
}
