//! Named subscriptions that get told about every committed configuration and registry change.

use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::Configuration;
use crate::registry::Registry;

/// The error type observer callbacks may return.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

type ConfigCallback = Arc<dyn Fn(&Configuration) -> Result<(), ObserverError> + Send + Sync>;
type RegistryCallback = Arc<dyn Fn(&Registry) -> Result<(), ObserverError> + Send + Sync>;

/// A named observer. Attaching an entry with a name that is already attached only overwrites the
/// callbacks the new entry sets.
#[derive(Clone)]
pub struct ObserverEntry {
    name: String,
    on_config_changed: Option<ConfigCallback>,
    on_registry_changed: Option<RegistryCallback>,
}

impl Debug for ObserverEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverEntry")
            .field("name", &self.name)
            .field("on_config_changed", &self.on_config_changed.is_some())
            .field("on_registry_changed", &self.on_registry_changed.is_some())
            .finish()
    }
}

impl ObserverEntry {
    pub fn new(name: impl Into<String>) -> Self {
        ObserverEntry {
            name: name.into(),
            on_config_changed: None,
            on_registry_changed: None,
        }
    }

    /// Called with the complete configuration after every committed change.
    pub fn on_config_changed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Configuration) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.on_config_changed = Some(Arc::new(callback));
        self
    }

    /// Called with the complete registry whenever handles were created or replaced.
    pub fn on_registry_changed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Registry) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.on_registry_changed = Some(Arc::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Which kind of notification an observer failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    ConfigChanged,
    RegistryChanged,
}

/// An observer callback that returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverFailure {
    pub observer: String,
    pub notification: Notification,
    pub message: String,
}

/// The set of attached observers, in attachment order.
#[derive(Debug, Default)]
pub struct ObserverBus {
    entries: Mutex<Vec<ObserverEntry>>,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, entry: ObserverEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|existing| existing.name == entry.name) {
            Some(existing) => {
                if entry.on_config_changed.is_some() {
                    existing.on_config_changed = entry.on_config_changed;
                }
                if entry.on_registry_changed.is_some() {
                    existing.on_registry_changed = entry.on_registry_changed;
                }
            }
            None => entries.push(entry),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every `on_config_changed` callback. Failing callbacks are reported and returned, they
    /// never stop the remaining callbacks from running.
    pub fn notify_config(&self, config: &Configuration) -> Vec<ObserverFailure> {
        let callbacks: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter_map(|entry| entry.on_config_changed.map(|callback| (entry.name, callback)))
            .collect();

        callbacks
            .into_iter()
            .filter_map(|(name, callback)| {
                invoke(name, Notification::ConfigChanged, || callback(config))
            })
            .collect()
    }

    /// Call every `on_registry_changed` callback, with the same isolation as
    /// [`notify_config()`][Self::notify_config()].
    pub fn notify_registry(&self, registry: &Registry) -> Vec<ObserverFailure> {
        let callbacks: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter_map(|entry| {
                entry
                    .on_registry_changed
                    .map(|callback| (entry.name, callback))
            })
            .collect();

        callbacks
            .into_iter()
            .filter_map(|(name, callback)| {
                invoke(name, Notification::RegistryChanged, || callback(registry))
            })
            .collect()
    }

    /// Callbacks run without the lock held so they can attach observers themselves.
    fn snapshot(&self) -> Vec<ObserverEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn invoke(
    observer: String,
    notification: Notification,
    callback: impl FnOnce() -> Result<(), ObserverError>,
) -> Option<ObserverFailure> {
    let message = match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => return None,
        Ok(Err(err)) => err.to_string(),
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };

    log::warn!(
        target: "logconf",
        "Observer '{observer}' failed during {notification:?} notification: {message}"
    );

    Some(ObserverFailure {
        observer,
        notification,
        message,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
