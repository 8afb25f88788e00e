use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt};

use super::*;

#[derive(Clone, Debug, PartialEq, Eq)]
struct TestUser {
    id: u32,
    first_name: String,
}

/// A producer that counts its invocations, and waits for a gate before it finishes.
#[derive(Clone, Default)]
struct TestProducer {
    computations: Arc<AtomicUsize>,
}

impl TestProducer {
    fn new() -> Self {
        Self::default()
    }

    fn computations(&self) -> usize {
        self.computations.load(Ordering::SeqCst)
    }

    /// Returns a producer resolving `key` to `contents` once `gate` is released.
    fn gated<T: Send + 'static>(
        &self,
        gate: oneshot::Receiver<()>,
        contents: CacheContents<T>,
    ) -> impl FnOnce(String) -> BoxFuture<'static, CacheContents<T>> {
        let computations = Arc::clone(&self.computations);
        move |_key| {
            computations.fetch_add(1, Ordering::SeqCst);
            async move {
                gate.await.ok();
                contents
            }
            .boxed()
        }
    }

    /// Returns a producer resolving `key` to `contents` after `delay`.
    fn delayed<T: Send + 'static>(
        &self,
        delay: Duration,
        contents: CacheContents<T>,
    ) -> impl FnOnce(String) -> BoxFuture<'static, CacheContents<T>> {
        let computations = Arc::clone(&self.computations);
        move |_key| {
            computations.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(delay).await;
                contents
            }
            .boxed()
        }
    }
}

fn alice() -> TestUser {
    TestUser {
        id: 1,
        first_name: "Alice".into(),
    }
}

fn cache<V: Send + Sync + 'static>() -> ResourceCache<String, V> {
    ResourceCache::new("test", tokio::runtime::Handle::current())
}

#[tokio::test]
async fn test_prefetch_produces_once() {
    suspense_test::setup();

    let cache = cache();
    let producer = TestProducer::new();

    let first = cache.prefetch(
        producer.delayed(Duration::from_millis(10), Ok(alice())),
        "1".to_owned(),
    );
    let second = cache.prefetch(
        producer.delayed(Duration::from_millis(10), Ok(alice())),
        "1".to_owned(),
    );

    assert_eq!(producer.computations(), 1);
    assert_eq!(cache.len(), 1);

    let first = first.get().await.unwrap();
    let second = second.get().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // a completed entry is still served without producing again
    let third = cache.prefetch(
        producer.delayed(Duration::from_millis(10), Ok(alice())),
        "1".to_owned(),
    );
    assert!(third.read().is_ready());
    assert_eq!(producer.computations(), 1);
}

#[tokio::test]
async fn test_read_pending_suspends() {
    suspense_test::setup();

    let cache = cache::<TestUser>();
    let producer = TestProducer::new();
    let (gate, receiver) = oneshot::channel();

    let handle = cache.prefetch(producer.gated(receiver, Ok(alice())), "1".to_owned());

    // reading any number of times while pending never produces a value
    for _ in 0..3 {
        assert!(handle.read().is_suspended());
        assert_eq!(handle.state(), EntryState::Pending);
    }

    let ReadResult::Suspended(suspension) = handle.read() else {
        panic!("expected a suspension");
    };
    gate.send(()).unwrap();
    suspension.await;

    assert_eq!(handle.state(), EntryState::Resolved);
    assert!(handle.read().is_ready());
}

/// A user that resolves after a delay first suspends, and is available afterwards.
#[tokio::test]
async fn test_delayed_user_resolves() {
    suspense_test::setup();

    let cache = cache();
    let producer = TestProducer::new();

    let handle = cache.prefetch(
        producer.delayed(Duration::from_millis(50), Ok(alice())),
        "1".to_owned(),
    );

    let suspension = match handle.read() {
        ReadResult::Suspended(suspension) => suspension,
        other => panic!("expected the first read to suspend, got {other:?}"),
    };
    suspension.await;

    match handle.read() {
        ReadResult::Ready(user) => assert_eq!(*user, alice()),
        other => panic!("expected a user, got {other:?}"),
    }
}

#[tokio::test]
async fn test_resolved_is_stable() {
    suspense_test::setup();

    let cache = cache();
    let producer = TestProducer::new();

    let handle = cache.prefetch(
        producer.delayed(Duration::ZERO, Ok(alice())),
        "1".to_owned(),
    );
    let value = handle.get().await.unwrap();

    for _ in 0..3 {
        let ReadResult::Ready(again) = handle.read() else {
            panic!("a resolved entry must stay resolved");
        };
        assert!(Arc::ptr_eq(&value, &again));
    }
    assert_eq!(producer.computations(), 1);
}

/// A failed production is captured once and the same error is handed out on every read.
#[tokio::test]
async fn test_rejected_is_stable() {
    suspense_test::setup();

    let cache = cache::<TestUser>();
    let producer = TestProducer::new();
    let network_error = CacheError::DownloadError("connection reset by peer".into());

    let handle = cache.prefetch(
        producer.delayed(Duration::from_millis(10), Err(network_error.clone())),
        "2".to_owned(),
    );
    let first = handle.get().await.unwrap_err();
    assert_eq!(*first, network_error);
    assert_eq!(handle.state(), EntryState::Rejected);

    let ReadResult::Failed(second) = handle.read() else {
        panic!("a rejected entry must stay rejected");
    };
    assert!(Arc::ptr_eq(&first, &second));

    // prefetching again does not retry the failed production
    let again = cache.prefetch(
        producer.delayed(Duration::ZERO, Ok(alice())),
        "2".to_owned(),
    );
    let ReadResult::Failed(third) = again.read() else {
        panic!("a rejected entry must not be retried");
    };
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(producer.computations(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_prefetch_single_production() {
    suspense_test::setup();

    let cache = cache::<TestUser>();
    let producer = TestProducer::new();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            let producer = producer.clone();
            tokio::spawn(async move {
                let handle = cache.prefetch(
                    producer.delayed(Duration::from_millis(20), Ok(alice())),
                    "3".to_owned(),
                );
                handle.get().await
            })
        })
        .collect();

    let mut values = Vec::new();
    for task in tasks {
        values.push(task.await.unwrap().unwrap());
    }

    assert_eq!(producer.computations(), 1);
    assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test]
async fn test_distinct_keys_produce_independently() {
    suspense_test::setup();

    let cache = cache();
    let producer = TestProducer::new();

    let one = cache.prefetch(
        producer.delayed(Duration::ZERO, Ok(alice())),
        "1".to_owned(),
    );
    let two = cache.prefetch(
        producer.delayed(Duration::ZERO, Err(CacheError::NotFound)),
        "2".to_owned(),
    );

    assert_eq!(producer.computations(), 2);
    assert_eq!(*one.get().await.unwrap(), alice());
    assert_eq!(*two.get().await.unwrap_err(), CacheError::NotFound);
    assert_eq!(one.key(), "1");
    assert_eq!(two.key(), "2");
}

#[tokio::test]
async fn test_get_never_produces() {
    suspense_test::setup();

    let cache = cache::<TestUser>();
    let producer = TestProducer::new();

    assert!(cache.is_empty());
    assert!(cache.get(&"1".to_owned()).is_none());

    let (gate, receiver) = oneshot::channel();
    let handle = cache.prefetch(producer.gated(receiver, Ok(alice())), "1".to_owned());

    let looked_up = cache.get(&"1".to_owned()).unwrap();
    assert_eq!(looked_up.state(), EntryState::Pending);

    gate.send(()).unwrap();
    let value = handle.get().await.unwrap();
    let ReadResult::Ready(looked_up) = looked_up.read() else {
        panic!("both handles share the same entry");
    };
    assert!(Arc::ptr_eq(&value, &looked_up));
    assert_eq!(producer.computations(), 1);
}

#[tokio::test]
async fn test_panicking_production_is_rejected() {
    suspense_test::setup();

    let cache = cache::<TestUser>();
    let handle = cache.prefetch(
        |key: String| async move {
            if key == "boom" {
                panic!("the producer blew up");
            }
            Ok(alice())
        },
        "boom".to_owned(),
    );

    let err = handle.get().await.unwrap_err();
    assert_eq!(*err, CacheError::InternalError);
    assert_eq!(handle.state(), EntryState::Rejected);
}

#[tokio::test]
async fn test_producer_panicking_on_call_is_rejected() {
    suspense_test::setup();

    let cache = cache::<TestUser>();
    let key = "boom".to_owned();
    let prefetched = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        cache.prefetch(
            |_key: String| -> futures::future::Ready<CacheContents<TestUser>> {
                panic!("the producer blew up before returning a future")
            },
            key.clone(),
        )
    }));
    assert!(prefetched.is_err());

    // the entry is settled synchronously, nothing is left pending
    let handle = cache.get(&key).unwrap();
    assert_eq!(handle.state(), EntryState::Rejected);
    assert!(matches!(handle.read(), ReadResult::Failed(err) if *err == CacheError::InternalError));
    assert_eq!(*handle.get().await.unwrap_err(), CacheError::InternalError);

    // the failure is stored, a later prefetch does not call its producer
    let producer = TestProducer::new();
    let again = cache.prefetch(producer.delayed(Duration::ZERO, Ok(alice())), key);
    assert_eq!(*again.get().await.unwrap_err(), CacheError::InternalError);
    assert_eq!(producer.computations(), 0);
}

#[test]
fn test_runtime_shutdown_rejects_pending() {
    suspense_test::setup();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let cache = ResourceCache::<String, TestUser>::new("test", runtime.handle().clone());
    let producer = TestProducer::new();
    let (_gate, receiver) = oneshot::channel();

    let handle = cache.prefetch(producer.gated(receiver, Ok(alice())), "1".to_owned());
    assert_eq!(handle.state(), EntryState::Pending);

    // dropping the runtime drops the spawned production before it ever ran
    drop(runtime);

    let ReadResult::Failed(err) = handle.read() else {
        panic!("an aborted production must not stay pending");
    };
    assert_eq!(*err, CacheError::InternalError);
}

#[test]
fn test_cache_error_metrics_tag() {
    assert_eq!(CacheError::NotFound.metrics_tag(), "notfound");
    assert_eq!(
        CacheError::Timeout(Duration::from_secs(3)).metrics_tag(),
        "timeout"
    );
    assert_eq!(
        CacheError::DownloadError("oops".into()).to_string(),
        "download failed: oops"
    );
}
