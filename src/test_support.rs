//! Test support utilities
//!
//! A backend that records what it was asked to do and a store that always fails. Only available
//! when the `test-support` feature is enabled.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::{Backend, Logger, LoggerHandle};
use crate::config::{Configuration, Level, DEFAULT_CATEGORY};
use crate::error::BackendError;
use crate::storage::Storage;

/// A line emitted through a [`RecordingBackend`] handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedLine {
    pub category: String,
    pub level: Level,
    pub message: String,
}

#[derive(Debug, Default)]
struct Recording {
    active: Option<Configuration>,
    reconfigures: usize,
    reject: Option<String>,
    lines: Vec<RecordedLine>,
}

/// A backend that keeps the last accepted configuration and every line its handles emitted.
/// Clones share the same recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    recording: Arc<Mutex<Recording>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every following reconfigure with `message`.
    pub fn reject_with(&self, message: impl Into<String>) {
        self.lock().reject = Some(message.into());
    }

    /// Accept reconfigures again.
    pub fn accept(&self) {
        self.lock().reject = None;
    }

    /// Activate a configuration without going through the rejection check or the counter.
    pub fn reconfigure_unchecked(&self, config: &Configuration) {
        self.lock().active = Some(config.clone());
    }

    /// The number of accepted reconfigures.
    pub fn reconfigure_count(&self) -> usize {
        self.lock().reconfigures
    }

    /// The last accepted configuration.
    pub fn active(&self) -> Option<Configuration> {
        self.lock().active.clone()
    }

    pub fn lines(&self) -> Vec<RecordedLine> {
        self.lock().lines.clone()
    }

    /// Check if any emitted line contains `text`
    pub fn contains(&self, text: &str) -> bool {
        self.lock()
            .lines
            .iter()
            .any(|line| line.message.contains(text))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recording> {
        self.recording.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for RecordingBackend {
    fn reconfigure(&self, config: &Configuration) -> Result<(), BackendError> {
        let mut recording = self.lock();
        if let Some(message) = &recording.reject {
            return Err(BackendError::Rejected(message.clone()));
        }

        recording.active = Some(config.clone());
        recording.reconfigures += 1;
        Ok(())
    }

    fn handle(&self, category: &str) -> Logger {
        let level = self
            .lock()
            .active
            .as_ref()
            .and_then(|config| {
                config
                    .categories
                    .get(category)
                    .or_else(|| config.categories.get(DEFAULT_CATEGORY))
            })
            .map_or(Level::Off, |settings| settings.level);

        Arc::new(RecordingLogger {
            category: category.to_owned(),
            level,
            recording: self.recording.clone(),
        })
    }
}

struct RecordingLogger {
    category: String,
    level: Level,
    recording: Arc<Mutex<Recording>>,
}

impl LoggerHandle for RecordingLogger {
    fn category(&self) -> &str {
        &self.category
    }

    fn level(&self) -> Level {
        self.level
    }

    /// Lines are recorded regardless of the level so tests can check what was attempted.
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        self.recording
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lines
            .push(RecordedLine {
                category: self.category.clone(),
                level,
                message: args.to_string(),
            });
    }
}

/// The error returned by every [`FailingStorage`] operation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("storage is unavailable")]
pub struct StorageUnavailable;

/// A store where every read and write fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingStorage;

#[async_trait]
impl Storage for FailingStorage {
    type Error = StorageUnavailable;

    async fn get(&self, _key: &str) -> Result<Option<Bytes>, Self::Error> {
        Err(StorageUnavailable)
    }

    async fn put(&self, _key: &str, _bytes: Bytes) -> Result<(), Self::Error> {
        Err(StorageUnavailable)
    }
}
