//! The built-in backend. Writes plain or colored lines to STDOUT, STDERR, or files, or forwards
//! them to the `log` facade.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::{Backend, Logger};
use crate::config::{Category, Configuration, Level, DEFAULT_CATEGORY};
use crate::error::BackendError;
use crate::logger::{ConsoleLogger, SharedTarget};
use crate::target::AppenderTarget;

/// A backend that opens one [`AppenderTarget`] per configured appender. Until the first
/// [`reconfigure()`][Backend::reconfigure()] every category is turned off.
#[derive(Debug, Default)]
pub struct ConsoleBackend {
    active: RwLock<Arc<Active>>,
}

/// The opened appenders and category settings from the last accepted configuration.
#[derive(Debug, Default)]
struct Active {
    targets: BTreeMap<String, SharedTarget>,
    categories: BTreeMap<String, Category>,
}

impl ConsoleBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for ConsoleBackend {
    fn reconfigure(&self, config: &Configuration) -> Result<(), BackendError> {
        if !config.categories.contains_key(DEFAULT_CATEGORY) {
            return Err(BackendError::MissingDefaultCategory);
        }

        for (name, category) in &config.categories {
            if category.appenders.is_empty() {
                return Err(BackendError::NoAppenders(name.clone()));
            }

            if let Some(appender) = category
                .appenders
                .iter()
                .find(|appender| !config.appenders.contains_key(*appender))
            {
                return Err(BackendError::UnknownAppender {
                    category: name.clone(),
                    appender: appender.clone(),
                });
            }
        }

        // Everything is opened before the new state is swapped in, so a failing appender leaves
        // the previous configuration active
        let mut targets = BTreeMap::new();
        for (name, descriptor) in &config.appenders {
            let target = AppenderTarget::from_descriptor(name, descriptor)?;
            targets.insert(name.clone(), Arc::new(Mutex::new(target)));
        }

        let active = Arc::new(Active {
            targets,
            categories: config.categories.clone(),
        });
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = active;

        Ok(())
    }

    fn handle(&self, category: &str) -> Logger {
        let active = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let settings = active
            .categories
            .get(category)
            .or_else(|| active.categories.get(DEFAULT_CATEGORY));
        let (level, targets) = match settings {
            Some(settings) => (
                settings.level,
                settings
                    .appenders
                    .iter()
                    .filter_map(|appender| active.targets.get(appender).cloned())
                    .collect(),
            ),
            None => (Level::Off, Vec::new()),
        };

        Arc::new(ConsoleLogger {
            category: category.to_owned(),
            level,
            targets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LoggerHandle;
    use crate::config::{PartialCategory, PartialConfiguration};
    use serde_json::json;

    #[test]
    fn unconfigured_backend_is_silent() {
        let backend = ConsoleBackend::new();

        assert_eq!(backend.handle("anything").level(), Level::Off);
    }

    #[test]
    fn unknown_categories_use_default() {
        let backend = ConsoleBackend::new();
        let config = Configuration::default().merged(&PartialConfiguration::category(
            DEFAULT_CATEGORY,
            PartialCategory::level(Level::Warn),
        ));
        backend.reconfigure(&config).unwrap();

        let logger = backend.handle("unregistered");
        assert_eq!(logger.category(), "unregistered");
        assert_eq!(logger.level(), Level::Warn);
    }

    #[test]
    fn rejects_dangling_appender_references() {
        let backend = ConsoleBackend::new();
        backend.reconfigure(&Configuration::default()).unwrap();

        let config = Configuration::default().merged(&PartialConfiguration::category(
            "db",
            PartialCategory {
                level: Some(Level::Debug),
                appenders: Some(vec![String::from("missing")]),
            },
        ));
        assert!(matches!(
            backend.reconfigure(&config),
            Err(BackendError::UnknownAppender { ref category, ref appender })
                if category == "db" && appender == "missing"
        ));

        // The previous configuration is still active
        assert_eq!(backend.handle("db").level(), Level::Off);
    }

    #[test]
    fn rejects_unknown_appender_types_without_swapping() {
        let backend = ConsoleBackend::new();
        let accepted = Configuration::default().merged(&PartialConfiguration::category(
            DEFAULT_CATEGORY,
            PartialCategory::level(Level::Info),
        ));
        backend.reconfigure(&accepted).unwrap();

        let rejected = accepted.merged(
            &PartialConfiguration::default()
                .with_appender("out", json!({ "type": "carrier-pigeon" }))
                .with_category(DEFAULT_CATEGORY, PartialCategory::level(Level::Trace)),
        );
        assert!(backend.reconfigure(&rejected).is_err());
        assert_eq!(backend.handle(DEFAULT_CATEGORY).level(), Level::Info);
    }

    #[test]
    fn rejects_categories_without_appenders() {
        let backend = ConsoleBackend::new();
        let config = Configuration::default().merged(&PartialConfiguration::category(
            "empty",
            PartialCategory {
                level: None,
                appenders: Some(Vec::new()),
            },
        ));

        assert!(matches!(
            backend.reconfigure(&config),
            Err(BackendError::NoAppenders(ref name)) if name == "empty"
        ));
    }
}
