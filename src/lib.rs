//! A runtime logging configuration layer. The configuration is a set of named categories, each
//! with a level and a list of appenders, that can be changed at any time by merging in partial
//! configurations. Logger handles are cached per category and replaced whenever their category
//! changes, and every committed change is forwarded to observers and, optionally, to an
//! asynchronous key/value store.

use once_cell::sync::OnceCell;

mod backend;
mod builder;
mod config;
mod configurator;
mod error;
mod logger;
mod observer;
mod registry;
mod storage;
mod target;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use backend::{Backend, ConsoleBackend, Logger, LoggerHandle};
pub use builder::{ConfiguratorBuilder, Host};
pub use config::{
    Category, ConfigStore, Configuration, Level, ParseLevelError, PartialCategory,
    PartialConfiguration, DEFAULT_CATEGORY,
};
pub use configurator::LogConfigurator;
pub use error::{BackendError, ConfigError, InstallError, PersistenceError, UsageError};
pub use observer::{ObserverBus, ObserverEntry, ObserverError, ObserverFailure, Notification};
pub use registry::{LoggerRegistry, Registry};
pub use storage::{MemoryStorage, PersistencePort, Storage, STORAGE_KEY};

/// The process-wide configurator. Initialized in [`ConfiguratorBuilder::install()`], after which
/// it lives for the rest of the process.
static INSTANCE: OnceCell<LogConfigurator> = OnceCell::new();

/// Install the process-wide configurator with the [`ConsoleBackend`], merging `options` over the
/// built-in defaults, and hand the root logger and the API to `host`.
pub fn install<H: Host + ?Sized>(
    host: &mut H,
    options: Option<&PartialConfiguration>,
) -> Result<&'static LogConfigurator, InstallError> {
    let builder = ConfiguratorBuilder::new();
    match options {
        Some(options) => builder.with_options(options).install(host),
        None => builder.install(host),
    }
}

/// The process-wide configurator, if it has been installed.
pub fn instance() -> Option<&'static LogConfigurator> {
    INSTANCE.get()
}
