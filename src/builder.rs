///! A builder interface for the configurator.
use std::path::Path;

use crate::backend::{Backend, ConsoleBackend, Logger};
use crate::config::{Configuration, Level, PartialConfiguration};
use crate::configurator::LogConfigurator;
use crate::error::{ConfigError, InstallError};

/// The environment variable pointing at a JSON configuration fragment to merge over the built-in
/// defaults.
const LOGCONF_ENV: &str = "LOGCONF";

/// The application the process-wide configurator is installed into. The host decides where to
/// expose the root logger and the category API.
pub trait Host {
    fn install_logging(&mut self, root: Logger, api: &'static LogConfigurator);
}

/// Constructs a [`LogConfigurator`].
#[derive(Default)]
pub struct ConfiguratorBuilder {
    /// Defaults to a [`ConsoleBackend`].
    backend: Option<Box<dyn Backend>>,
    /// Merged over the built-in defaults and the `LOGCONF` fragment.
    options: Option<PartialConfiguration>,
    ignore_environment: bool,
}

impl std::fmt::Debug for ConfiguratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguratorBuilder")
            .field("backend", &self.backend.as_ref().map(|_| "<backend>"))
            .field("options", &self.options)
            .field("ignore_environment", &self.ignore_environment)
            .finish()
    }
}

impl ConfiguratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different logging backend.
    pub fn with_backend(mut self, backend: impl Backend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    /// Options merged over the built-in defaults. The fragment is copied, later changes to it
    /// don't affect the configurator.
    pub fn with_options(mut self, options: &PartialConfiguration) -> Self {
        self.options = Some(options.clone());
        self
    }

    /// Don't read the `LOGCONF` environment variable.
    pub fn without_environment(mut self) -> Self {
        self.ignore_environment = true;
        self
    }

    /// Build a standalone configurator. The backend is configured immediately.
    pub fn build(self) -> Result<LogConfigurator, ConfigError> {
        // The configuration is assembled in three steps:
        // - The built-in defaults, a single `stdout` appender with logging turned off.
        // - The fragment from the file `LOGCONF` points to, if any.
        // - The options passed to `ConfiguratorBuilder::with_options()`.
        let mut config = Configuration::default();
        if !self.ignore_environment {
            if let Some(fragment) = options_from_environment() {
                config.merge(&fragment);
            }
        }
        if let Some(options) = &self.options {
            config.merge(options);
        }
        // Clustering is never supported, regardless of the options
        config.disable_clustering = true;

        let backend = self
            .backend
            .unwrap_or_else(|| Box::new(ConsoleBackend::new()));

        LogConfigurator::new(backend, config)
    }

    /// Build the configurator, install it as the process-wide instance, and hand it to the host.
    /// The process-wide instance can only be installed once.
    pub fn install<H: Host + ?Sized>(
        self,
        host: &mut H,
    ) -> Result<&'static LogConfigurator, InstallError> {
        if crate::INSTANCE.get().is_some() {
            return Err(InstallError::AlreadyInstalled);
        }

        let configurator = self.build()?;
        crate::INSTANCE
            .set(configurator)
            .map_err(|_| InstallError::AlreadyInstalled)?;
        let api = crate::INSTANCE.get().ok_or(InstallError::AlreadyInstalled)?;

        // Indicate in the logs which levels are enabled
        let root = api.root_logger();
        for level in Level::EMITTABLE {
            root.log(
                level,
                format_args!("logconf: install() {level} messages enabled"),
            );
        }

        host.install_logging(root, api);

        Ok(api)
    }
}

/// If the `LOGCONF` environment variable is set, read the JSON fragment from the file it points
/// to. If the file cannot be read or parsed then this writes the error to STDERR and the variable
/// is ignored.
fn options_from_environment() -> Option<PartialConfiguration> {
    let path = std::env::var_os(LOGCONF_ENV)?;
    if path.is_empty() {
        return None;
    }

    match read_fragment(Path::new(&path)) {
        Ok(fragment) => Some(fragment),
        // The logger isn't configured yet at this point
        Err(err) => {
            eprintln!(
                "Could not load '{}' from {LOGCONF_ENV}, falling back to the defaults: {err}",
                Path::new(&path).display()
            );
            None
        }
    }
}

fn read_fragment(path: &Path) -> Result<PartialConfiguration, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;

    Ok(serde_json::from_str(&contents)?)
}
