//! Attaching stores and the interaction between storage loads and in-process writes.

use async_trait::async_trait;
use bytes::Bytes;
use logconf::test_support::{FailingStorage, RecordingBackend};
use logconf::*;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

fn configurator(backend: &RecordingBackend) -> Arc<LogConfigurator> {
    Arc::new(
        ConfiguratorBuilder::new()
            .with_backend(backend.clone())
            .without_environment()
            .build()
            .unwrap(),
    )
}

/// A store whose reads block until released. Signals when a read has started.
#[derive(Clone)]
struct GatedStorage {
    inner: MemoryStorage,
    started: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    release: Arc<Notify>,
}

impl GatedStorage {
    fn new(inner: MemoryStorage) -> (Self, oneshot::Receiver<()>) {
        let (started, receiver) = oneshot::channel();
        let storage = GatedStorage {
            inner,
            started: Arc::new(Mutex::new(Some(started))),
            release: Arc::new(Notify::new()),
        };

        (storage, receiver)
    }
}

#[async_trait]
impl Storage for GatedStorage {
    type Error = Infallible;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Self::Error> {
        if let Some(started) = self.started.lock().unwrap().take() {
            let _ = started.send(());
        }
        self.release.notified().await;

        self.inner.get(key).await
    }

    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), Self::Error> {
        self.inner.put(key, bytes).await
    }
}

/// Background writes are not awaited anywhere, so poll until the store caught up.
async fn wait_for_stored(storage: &MemoryStorage, expected: &Configuration) {
    for _ in 0..200 {
        if storage.stored_configuration().await.as_ref() == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    panic!("the store never caught up with the committed configuration");
}

#[tokio::test]
async fn slow_loads_merge_into_the_then_current_state() {
    let backend = RecordingBackend::new();
    let configurator = configurator(&backend);
    let memory = MemoryStorage::with_configuration(
        r#"{"categories":{"x":{"level":"debug"},"a":{"level":"fatal"}}}"#,
    );
    let (storage, started) = GatedStorage::new(memory.clone());
    let release = storage.release.clone();

    let attaching = tokio::spawn({
        let configurator = configurator.clone();
        async move { configurator.attach_storage(storage).await }
    });
    started.await.unwrap();

    // These happen while the persisted configuration is still being read
    configurator
        .register_category("a", Some(Level::Info), None)
        .unwrap();
    configurator
        .register_category("b", Some(Level::Warn), None)
        .unwrap();
    assert!(matches!(
        configurator.attach_storage(MemoryStorage::new()).await,
        Err(UsageError::StorageAttachInFlight)
    ));

    release.notify_one();
    let attached = attaching.await.unwrap().unwrap();

    assert_eq!(attached.categories["x"].level, Level::Debug);
    assert_eq!(attached.categories["a"].level, Level::Fatal);
    assert_eq!(attached.categories["b"].level, Level::Warn);
    assert!(configurator.has_storage());
    assert_eq!(memory.stored_configuration().await, Some(attached));
}

#[tokio::test]
async fn commits_are_written_after_attaching() {
    let backend = RecordingBackend::new();
    let configurator = configurator(&backend);
    let storage = MemoryStorage::new();
    configurator.attach_storage(storage.clone()).await.unwrap();

    configurator
        .register_category("net", Some(Level::Trace), None)
        .unwrap();
    let expected = configurator
        .set_level(Level::Info, None)
        .unwrap();

    wait_for_stored(&storage, &expected).await;
}

#[tokio::test]
async fn storage_failures_never_reach_the_caller() {
    let backend = RecordingBackend::new();
    let configurator = configurator(&backend);
    let before = configurator.configuration();

    let attached = configurator.attach_storage(FailingStorage).await.unwrap();
    assert_eq!(attached, before);

    let config = configurator
        .configure(Some(&PartialConfiguration::category(
            "net",
            PartialCategory::level(Level::Warn),
        )))
        .unwrap();
    assert_eq!(config.categories["net"].level, Level::Warn);
}

#[tokio::test]
async fn rejected_persisted_configurations_are_ignored() {
    let backend = RecordingBackend::new();
    let configurator = configurator(&backend);
    let before = configurator.configuration();
    let storage = MemoryStorage::with_configuration(r#"{"categories":{"x":{"level":"debug"}}}"#);

    backend.reject_with("unknown appender");
    let attached = configurator.attach_storage(storage.clone()).await.unwrap();
    backend.accept();

    assert_eq!(attached, before);
    assert_eq!(storage.stored_configuration().await, Some(before));
}

#[tokio::test]
async fn undecodable_blobs_are_overwritten() {
    let backend = RecordingBackend::new();
    let configurator = configurator(&backend);
    let storage = MemoryStorage::with_configuration("{ definitely not json");

    let attached = configurator.attach_storage(storage.clone()).await.unwrap();

    assert_eq!(storage.stored_configuration().await, Some(attached));
}

#[tokio::test]
async fn cancelled_attaches_can_be_retried() {
    let backend = RecordingBackend::new();
    let configurator = configurator(&backend);
    let (storage, _started) = GatedStorage::new(MemoryStorage::new());

    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        configurator.attach_storage(storage),
    )
    .await;
    assert!(timed_out.is_err());
    assert!(!configurator.has_storage());

    configurator
        .attach_storage(MemoryStorage::new())
        .await
        .unwrap();
    assert!(configurator.has_storage());
}

#[tokio::test]
async fn getter_overload_does_not_touch_storage() {
    let backend = RecordingBackend::new();
    let configurator = configurator(&backend);
    let storage = MemoryStorage::new();
    configurator.attach_storage(storage.clone()).await.unwrap();

    storage
        .put(
            STORAGE_KEY,
            Bytes::from_static(br#"{"categories":{"late":{"level":"error"}}}"#),
        )
        .await
        .unwrap();

    let config = configurator.attached_configuration().await;
    assert!(!config.categories.contains_key("late"));
}

#[tokio::test]
async fn persisted_configurations_cannot_enable_clustering() {
    let backend = RecordingBackend::new();
    let configurator = configurator(&backend);
    let storage = MemoryStorage::with_configuration(
        r#"{"disableClustering":false,"categories":{"x":{"level":"warn"}}}"#,
    );

    let attached = configurator.attach_storage(storage.clone()).await.unwrap();

    assert!(attached.disable_clustering);
    assert_eq!(attached.categories["x"].level, Level::Warn);
    assert!(backend.active().unwrap().disable_clustering);
    assert!(storage.stored_configuration().await.unwrap().disable_clustering);
}

/// Counts the writes that reached the store.
#[derive(Clone, Default)]
struct CountingStorage {
    inner: MemoryStorage,
    puts: Arc<AtomicUsize>,
}

#[async_trait]
impl Storage for CountingStorage {
    type Error = Infallible;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Self::Error> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), Self::Error> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, bytes).await
    }
}

#[tokio::test]
async fn unchanged_configurations_are_not_written() {
    let backend = RecordingBackend::new();
    let configurator = configurator(&backend);
    let storage = CountingStorage::default();
    configurator.attach_storage(storage.clone()).await.unwrap();
    assert_eq!(storage.puts.load(Ordering::SeqCst), 1);

    let current = configurator.configuration();
    configurator.configure(None).unwrap();
    configurator
        .configure(Some(&PartialConfiguration::default()))
        .unwrap();
    configurator
        .configure(Some(&PartialConfiguration::category(
            DEFAULT_CATEGORY,
            current.categories[DEFAULT_CATEGORY].clone(),
        )))
        .unwrap();

    // Writes are applied in order, so once this one landed anything queued before it has too
    let expected = configurator
        .configure(Some(&PartialConfiguration::category(
            "db",
            PartialCategory::level(Level::Error),
        )))
        .unwrap();
    wait_for_stored(&storage.inner, &expected).await;

    assert_eq!(storage.puts.load(Ordering::SeqCst), 2);
}
