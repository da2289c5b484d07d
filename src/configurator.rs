//! The public category API. Every mutation goes through the same merge, reconfigure, commit,
//! persist, and notify sequence.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backend::{Backend, Logger};
use crate::config::{
    ConfigStore, Configuration, Level, PartialCategory, PartialConfiguration, DEFAULT_CATEGORY,
};
use crate::error::{BackendError, ConfigError, PersistenceError, UsageError};
use crate::observer::{ObserverBus, ObserverEntry};
use crate::registry::{LoggerRegistry, Registry};
use crate::storage::{self, PersistencePort, Storage};

/// Owns the configuration, the logger registry, the observers, and the attached store. Construct
/// one using the [`ConfiguratorBuilder`][crate::ConfiguratorBuilder].
///
/// The mutating methods are meant to be called from a single thread of control. They are
/// serialized internally, but observer callbacks run after the internal lock is released so
/// interleaved calls from multiple threads may notify out of order.
pub struct LogConfigurator {
    backend: Box<dyn Backend>,
    state: Mutex<State>,
    observers: ObserverBus,
}

/// Everything that needs to change together when a configuration is committed.
#[derive(Debug)]
struct State {
    store: ConfigStore,
    registry: LoggerRegistry,
    persistence: PersistencePort,
}

/// The result of applying a fragment.
struct Commit {
    config: Configuration,
    /// Whether the configuration actually changed. Unchanged commits are not persisted and don't
    /// notify observers.
    changed: bool,
    /// Whether registered handles were replaced as part of the commit.
    refreshed: bool,
}

impl std::fmt::Debug for LogConfigurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogConfigurator")
            .field("state", &self.state)
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}

impl LogConfigurator {
    /// Activate `config` on the backend. Fails if `config` has no `default` category or if the
    /// backend rejects it.
    pub(crate) fn new(
        backend: Box<dyn Backend>,
        config: Configuration,
    ) -> Result<Self, ConfigError> {
        let store = ConfigStore::new(config)?;
        backend.reconfigure(store.get())?;

        Ok(LogConfigurator {
            backend,
            state: Mutex::new(State {
                store,
                registry: LoggerRegistry::new(),
                persistence: PersistencePort::new(),
            }),
            observers: ObserverBus::new(),
        })
    }

    /// Merge a fragment into the configuration and return a copy of the result. Passing `None`,
    /// or a fragment that doesn't change anything, only returns the current configuration without
    /// reconfiguring the backend, persisting, or notifying observers.
    ///
    /// If the backend rejects the merged configuration the error is returned and the previous
    /// configuration stays in effect.
    pub fn configure(
        &self,
        fragment: Option<&PartialConfiguration>,
    ) -> Result<Configuration, ConfigError> {
        let (commit, registry) = {
            let mut state = self.lock();
            let commit = self.apply(&mut state, fragment, true)?;
            let registry = commit.refreshed.then(|| state.registry.snapshot());

            (commit, registry)
        };

        self.publish(&commit, registry.as_ref());
        Ok(commit.config)
    }

    /// A copy of the current configuration.
    pub fn configuration(&self) -> Configuration {
        self.lock().store.read()
    }

    /// Make sure a category exists and return a fresh handle for it. A new category starts out
    /// with the `default` category's settings. `level` and `appenders` override the category's
    /// settings when set. Pass [`DEFAULT_CATEGORY`] to get the default logger.
    pub fn register_category(
        &self,
        name: &str,
        level: Option<Level>,
        appenders: Option<Vec<String>>,
    ) -> Result<Logger, ConfigError> {
        let (logger, commit, registry) = {
            let mut guard = self.lock();
            let state = &mut *guard;

            let current = state.store.get();
            let mut category = current
                .categories
                .get(name)
                .or_else(|| current.default_category())
                .cloned()
                .ok_or(UsageError::MissingDefaultCategory)?;
            if let Some(level) = level {
                category.level = level;
            }
            if let Some(appenders) = appenders {
                category.appenders = appenders;
            }

            let fragment = PartialConfiguration::category(name, category);
            let commit = self.apply(state, Some(&fragment), false)?;
            let logger = state.registry.refresh(self.backend.as_ref(), name);

            (logger, commit, state.registry.snapshot())
        };

        self.publish(&commit, Some(&registry));
        logger.info(format_args!("Category logger registered! {name}"));

        Ok(logger)
    }

    /// Set the level of a single category, or of every category when `category` is `None`. The
    /// affected handles are replaced.
    pub fn set_level(
        &self,
        level: Level,
        category: Option<&str>,
    ) -> Result<Configuration, ConfigError> {
        let (commit, registry) = {
            let mut guard = self.lock();
            let state = &mut *guard;

            let fragment = match category {
                Some(name) => {
                    if !state.store.get().categories.contains_key(name) {
                        return Err(UsageError::UnknownCategory(name.to_owned()).into());
                    }

                    PartialConfiguration::category(name, PartialCategory::level(level))
                }
                None => state.store.get().categories.keys().fold(
                    PartialConfiguration::default(),
                    |fragment, name| {
                        fragment.with_category(name.clone(), PartialCategory::level(level))
                    },
                ),
            };

            let commit = self.apply(state, Some(&fragment), false)?;
            match category {
                Some(name) => {
                    state.registry.refresh(self.backend.as_ref(), name);
                }
                None => state
                    .registry
                    .refresh_all(self.backend.as_ref(), state.store.get()),
            }

            (commit, state.registry.snapshot())
        };

        self.publish(&commit, Some(&registry));
        Ok(commit.config)
    }

    /// The level the backend has active for every configured category. Categories that haven't
    /// been registered yet are asked through a temporary handle.
    pub fn list_categories(&self) -> BTreeMap<String, Level> {
        let state = self.lock();

        state
            .store
            .get()
            .categories
            .keys()
            .map(|name| {
                let level = state
                    .registry
                    .level(name)
                    .unwrap_or_else(|| self.backend.handle(name).level());

                (name.clone(), level)
            })
            .collect()
    }

    /// The registered handle for a category, if it has been registered.
    pub fn logger(&self, category: &str) -> Option<Logger> {
        self.lock().registry.get(category)
    }

    /// A copy of the logger registry.
    pub fn registry(&self) -> Registry {
        self.lock().registry.snapshot()
    }

    /// A fresh handle for the `default` category.
    pub fn root_logger(&self) -> Logger {
        self.backend.handle(DEFAULT_CATEGORY)
    }

    /// Attach an observer, or update the callbacks of an observer with the same name.
    pub fn attach_observer(&self, entry: ObserverEntry) {
        self.observers.attach(entry);
    }

    /// Attach a store. The configuration persisted in the store is merged over the current
    /// configuration, and the result is written back to the store before this resolves. From then
    /// on every committed configuration is written to the store in the background.
    ///
    /// Storage failures are only logged, this then resolves with the in-memory configuration.
    /// Attaching while another attach is still in flight is an error. Must be called from within a
    /// Tokio runtime.
    pub async fn attach_storage<S: Storage>(
        &self,
        storage: S,
    ) -> Result<Configuration, UsageError> {
        self.lock().persistence.begin_attach()?;
        let mut guard = AttachGuard {
            configurator: self,
            armed: true,
        };

        // Configurations committed while this is pending are kept, the persisted values are merged
        // into whatever is current once the read completes
        match storage::read(&storage).await {
            Ok(Some(fragment)) => {
                if let Err(err) = self.configure(Some(&fragment)) {
                    storage::report(&PersistenceError::Rejected(err));
                }
            }
            Ok(None) => (),
            Err(err) => storage::report(&err),
        }

        let written = {
            let mut state = self.lock();
            state.persistence.finish_attach(storage);
            let config = state.store.read();
            state.persistence.write_acked(config)
        };
        guard.armed = false;
        if let Some(written) = written {
            let _ = written.await;
        }

        Ok(self.configuration())
    }

    /// The current configuration. Unlike [`attach_storage()`][Self::attach_storage()] this never
    /// touches the store.
    pub async fn attached_configuration(&self) -> Configuration {
        self.configuration()
    }

    /// Whether a store is attached and receiving writes.
    pub fn has_storage(&self) -> bool {
        self.lock().persistence.is_attached()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge `fragment` into a scratch copy, have the backend accept it, and only then commit and
    /// queue the write. When `refresh_registered` is set, registered handles for the categories
    /// the fragment touched are replaced (all of them when appenders changed).
    fn apply(
        &self,
        state: &mut State,
        fragment: Option<&PartialConfiguration>,
        refresh_registered: bool,
    ) -> Result<Commit, BackendError> {
        let unchanged = |state: &State| Commit {
            config: state.store.read(),
            changed: false,
            refreshed: false,
        };

        let Some(fragment) = fragment.filter(|fragment| !fragment.is_empty()) else {
            return Ok(unchanged(&*state));
        };
        let mut scratch = state.store.preview(Some(fragment));
        // Clustering stays disabled no matter what a fragment says
        scratch.disable_clustering = true;
        if &scratch == state.store.get() {
            return Ok(unchanged(&*state));
        }

        self.backend.reconfigure(&scratch)?;
        state.store.commit(scratch);

        let stale: Vec<String> = if !refresh_registered {
            Vec::new()
        } else if fragment.touches_appenders() {
            state.registry.snapshot().into_keys().collect()
        } else {
            fragment
                .category_names()
                .filter(|name| state.registry.contains(name))
                .map(str::to_owned)
                .collect()
        };
        for name in &stale {
            state.registry.refresh(self.backend.as_ref(), name);
        }

        let config = state.store.read();
        state.persistence.write(config.clone());

        Ok(Commit {
            config,
            changed: true,
            refreshed: !stale.is_empty(),
        })
    }

    /// Notify observers about a commit. Failures are logged by the bus and otherwise ignored.
    fn publish(&self, commit: &Commit, registry: Option<&Registry>) {
        if commit.changed {
            self.observers.notify_config(&commit.config);
        }
        if let Some(registry) = registry {
            self.observers.notify_registry(registry);
        }
    }
}

/// Releases the loading state if an [`LogConfigurator::attach_storage()`] future is dropped
/// before it finished.
struct AttachGuard<'a> {
    configurator: &'a LogConfigurator,
    armed: bool,
}

impl Drop for AttachGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.configurator.lock().persistence.abort_attach();
        }
    }
}
