//! Persistence of the configuration to an asynchronous key/value store.
//!
//! Writes are best-effort. Every committed configuration is queued for a single writer task, so
//! writes land in commit order, but nothing waits for them. A configuration committed right
//! before the process exits may never make it to the store.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::{Configuration, PartialConfiguration};
use crate::error::{PersistenceError, UsageError};

/// The key the configuration is stored under.
pub const STORAGE_KEY: &str = "logconf.config";

/// An asynchronous key/value store. Values are the JSON encoded configuration.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Self::Error>;
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), Self::Error>;
}

/// In-memory key/value store. Clones share the same underlying map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    map: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `bytes` under [`STORAGE_KEY`].
    pub fn with_configuration(bytes: impl Into<Bytes>) -> Self {
        let mut map = HashMap::new();
        map.insert(STORAGE_KEY.to_owned(), bytes.into());

        MemoryStorage {
            map: Arc::new(Mutex::new(map)),
        }
    }

    /// Decode whatever is currently stored under [`STORAGE_KEY`].
    pub async fn stored_configuration(&self) -> Option<Configuration> {
        let map = self.map.lock().await;
        map.get(STORAGE_KEY)
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    type Error = Infallible;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Self::Error> {
        let map = self.map.lock().await;
        Ok(map.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), Self::Error> {
        self.map.lock().await.insert(key.to_owned(), bytes);
        Ok(())
    }
}

/// A queued write. The acknowledgement is sent once the write finished, whether it succeeded or
/// not.
struct WriteRequest {
    config: Configuration,
    ack: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Default)]
enum Attachment {
    #[default]
    Detached,
    /// The persisted configuration is being read. Writes are not queued in this state, the
    /// attach finishes by writing whatever is current at that point.
    Loading,
    Attached(mpsc::UnboundedSender<WriteRequest>),
}

/// Tracks the attached store and feeds its writer task.
#[derive(Debug, Default)]
pub struct PersistencePort {
    attachment: Attachment,
}

impl PersistencePort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.attachment, Attachment::Attached(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.attachment, Attachment::Loading)
    }

    /// Start attaching a store. Any previously attached store stops receiving writes once its
    /// queue drains.
    pub(crate) fn begin_attach(&mut self) -> Result<(), UsageError> {
        if self.is_loading() {
            return Err(UsageError::StorageAttachInFlight);
        }

        self.attachment = Attachment::Loading;
        Ok(())
    }

    /// Undo [`begin_attach()`][Self::begin_attach()] if the attach never finished.
    pub(crate) fn abort_attach(&mut self) {
        if self.is_loading() {
            self.attachment = Attachment::Detached;
        }
    }

    /// Spawn the writer task for `storage`. Must be called from within a Tokio runtime.
    pub(crate) fn finish_attach<S: Storage>(&mut self, storage: S) {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(storage, receiver));

        self.attachment = Attachment::Attached(sender);
    }

    /// Queue a write of `config` without waiting for it. Does nothing while no store is attached.
    pub(crate) fn write(&mut self, config: Configuration) {
        self.enqueue(WriteRequest { config, ack: None });
    }

    /// Queue a write and return a receiver that resolves once it has been attempted.
    pub(crate) fn write_acked(&mut self, config: Configuration) -> Option<oneshot::Receiver<()>> {
        let (ack, receiver) = oneshot::channel();
        self.enqueue(WriteRequest {
            config,
            ack: Some(ack),
        })
        .then_some(receiver)
    }

    fn enqueue(&mut self, request: WriteRequest) -> bool {
        let Attachment::Attached(sender) = &self.attachment else {
            return false;
        };

        if sender.send(request).is_err() {
            report(&PersistenceError::WriterStopped);
            self.attachment = Attachment::Detached;
            return false;
        }

        true
    }
}

/// Read the persisted fragment. Missing and empty blobs both read as `None`.
pub(crate) async fn read<S: Storage>(
    storage: &S,
) -> Result<Option<PartialConfiguration>, PersistenceError> {
    let bytes = storage
        .get(STORAGE_KEY)
        .await
        .map_err(|err| PersistenceError::Read {
            key: STORAGE_KEY.to_owned(),
            message: err.to_string(),
        })?;

    let Some(bytes) = bytes else {
        return Ok(None);
    };
    let contents = bytes.trim_ascii();
    if contents.is_empty() || contents == b"null" || contents == b"\"\"" {
        return Ok(None);
    }

    let fragment: PartialConfiguration = serde_json::from_slice(contents)?;
    Ok((!fragment.is_empty()).then_some(fragment))
}

async fn write<S: Storage>(storage: &S, config: &Configuration) -> Result<(), PersistenceError> {
    let bytes = serde_json::to_vec(config)?;
    storage
        .put(STORAGE_KEY, Bytes::from(bytes))
        .await
        .map_err(|err| PersistenceError::Write {
            key: STORAGE_KEY.to_owned(),
            message: err.to_string(),
        })
}

async fn run_writer<S: Storage>(storage: S, mut receiver: mpsc::UnboundedReceiver<WriteRequest>) {
    while let Some(request) = receiver.recv().await {
        if let Err(err) = write(&storage, &request.config).await {
            report(&err);
        }

        if let Some(ack) = request.ack {
            let _ = ack.send(());
        }
    }

    log::debug!(target: "logconf", "Storage writer stopped");
}

/// Persistence failures never reach the caller, they are only logged.
pub(crate) fn report(err: &PersistenceError) {
    log::warn!(target: "logconf", "Persistence failed: {err}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Level, PartialCategory};
    use crate::test_support::FailingStorage;

    #[tokio::test]
    async fn reads_missing_and_empty_blobs_as_none() {
        assert!(read(&MemoryStorage::new()).await.unwrap().is_none());
        for blob in ["", "  ", "null", "\"\"", "{}"] {
            let storage = MemoryStorage::with_configuration(blob);
            assert!(read(&storage).await.unwrap().is_none(), "{blob:?}");
        }
    }

    #[tokio::test]
    async fn reads_sparse_fragments() {
        let storage =
            MemoryStorage::with_configuration(r#"{"categories":{"x":{"level":"debug"}}}"#);

        assert_eq!(
            read(&storage).await.unwrap(),
            Some(PartialConfiguration::category(
                "x",
                PartialCategory::level(Level::Debug)
            ))
        );
    }

    #[tokio::test]
    async fn undecodable_blobs_are_errors() {
        let storage = MemoryStorage::with_configuration("{not json");

        assert!(matches!(
            read(&storage).await,
            Err(PersistenceError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_is_an_error() {
        let storage = MemoryStorage::with_configuration(Bytes::from_static(
            b"{\"categories\":{\"\xff\":{\"level\":\"debug\"}}}",
        ));

        assert!(matches!(
            read(&storage).await,
            Err(PersistenceError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn read_failures_carry_the_key() {
        match read(&FailingStorage).await {
            Err(PersistenceError::Read { key, .. }) => assert_eq!(key, STORAGE_KEY),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn writes_are_applied_in_order() {
        let storage = MemoryStorage::new();
        let mut port = PersistencePort::new();
        port.begin_attach().unwrap();
        assert_eq!(port.begin_attach(), Err(UsageError::StorageAttachInFlight));
        port.finish_attach(storage.clone());

        let mut last = Configuration::default();
        for level in [Level::Trace, Level::Info, Level::Fatal] {
            last = last.merged(&PartialConfiguration::category(
                "default",
                PartialCategory::level(level),
            ));
            port.write(last.clone());
        }
        port.write_acked(last.clone()).unwrap().await.unwrap();

        assert_eq!(storage.stored_configuration().await, Some(last));
    }

    #[tokio::test]
    async fn writes_are_dropped_while_detached() {
        let mut port = PersistencePort::new();

        assert!(port.write_acked(Configuration::default()).is_none());
        assert!(!port.is_attached());
    }
}
