//! The interface to the logging backend that actually formats and writes log lines.

use std::fmt;
use std::sync::Arc;

use crate::config::{Configuration, Level};
use crate::error::BackendError;

mod console;

pub use console::ConsoleBackend;

/// A handle for emitting log lines for a single category. Handles reflect the configuration that
/// was active when they were created, so they should be fetched again after the configuration
/// changed.
pub type Logger = Arc<dyn LoggerHandle>;

/// A logging backend. The backend's behavior should only depend on the last configuration passed
/// to [`reconfigure()`][Self::reconfigure()].
pub trait Backend: Send + Sync {
    /// Validate and activate a new configuration. When this returns an error the previously active
    /// configuration must still be in effect.
    fn reconfigure(&self, config: &Configuration) -> Result<(), BackendError>;

    /// Create a fresh handle for a category. Unknown categories behave like `default`.
    fn handle(&self, category: &str) -> Logger;
}

/// A backend-issued logger for one category.
pub trait LoggerHandle: Send + Sync {
    fn category(&self) -> &str;

    /// The level the backend actually has active for this category.
    fn level(&self) -> Level;

    /// Emit a message. Messages below the handle's level are dropped.
    fn log(&self, level: Level, args: fmt::Arguments<'_>);

    fn is_enabled(&self, level: Level) -> bool {
        level.enabled_at(self.level())
    }

    fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Trace, args)
    }

    fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args)
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args)
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args)
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args)
    }

    fn fatal(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Fatal, args)
    }

    fn mark(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Mark, args)
    }
}

impl fmt::Debug for dyn LoggerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("category", &self.category())
            .field("level", &self.level())
            .finish()
    }
}
