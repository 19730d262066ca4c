//! End-to-end controller runs over an in-process watch source.

use pager_controller::alert::AlertReconciler;
use pager_controller::controller::{Controller, ControllerConfig};
use pager_controller::error::{Error, Result};
use pager_controller::key::{ResourceKey, key_for};
use pager_controller::model::Alert;
use pager_controller::queue::RetryPolicy;
use pager_controller::reconciler::Reconciler;
use pager_controller::sink::{CollectingSink, ErrorSink};
use pager_controller::source::{ChannelSource, WatchEvent, WatchSource};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn key(s: &str) -> ResourceKey {
    ResourceKey::parse(s).unwrap()
}

fn test_config() -> ControllerConfig {
    ControllerConfig {
        name: "test".to_string(),
        resync_period: Duration::ZERO,
        sync_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Poll `cond` until it holds, failing the test after `limit`.
async fn eventually(limit: Duration, cond: impl Fn() -> bool) {
    tokio::time::timeout(limit, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Fails the first `failures` attempts per key, recording when each attempt ran.
#[derive(Default)]
struct FlakyReconciler {
    failures: u32,
    panic_first: bool,
    attempts: Mutex<HashMap<ResourceKey, Vec<Instant>>>,
    messages: Mutex<Vec<String>>,
    delay: Duration,
    running: Mutex<HashSet<ResourceKey>>,
    overlaps: AtomicUsize,
}

impl FlakyReconciler {
    fn attempts(&self, key: &ResourceKey) -> Vec<Instant> {
        self.attempts.lock().unwrap().get(key).cloned().unwrap_or_default()
    }

    fn successes(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

impl Reconciler<Alert> for FlakyReconciler {
    async fn reconcile(&self, alert: Arc<Alert>) -> Result<()> {
        let key = key_for(alert.as_ref())?;
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let seen = attempts.entry(key.clone()).or_default();
            seen.push(Instant::now());
            seen.len() as u32
        };
        if !self.running.lock().unwrap().insert(key.clone()) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.lock().unwrap().remove(&key);

        if self.panic_first && attempt == 1 {
            panic!("reconciler blew up on {key}");
        }
        if attempt <= self.failures {
            return Err(Error::Reconcile(format!("attempt {attempt} for {key} failed")));
        }
        self.messages.lock().unwrap().push(alert.spec.message.clone());
        Ok(())
    }
}

/// Shared buffer that a fmt subscriber writes log lines into.
#[derive(Clone, Default)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CaptureWriter {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

/// Route this thread's tracing output into `writer` until the guard drops.
/// Only sees everything on a current-thread runtime.
fn capture_logs(writer: &CaptureWriter) -> tracing::subscriber::DefaultGuard {
    let writer = writer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_target(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    tracing::subscriber::set_default(subscriber)
}

fn start<R: Reconciler<Alert>>(
    config: ControllerConfig,
    reconciler: Arc<R>,
    initial: Vec<Alert>,
) -> (
    Controller<Alert, R>,
    Arc<CollectingSink>,
    tokio::sync::mpsc::Sender<WatchEvent<Alert>>,
    tokio::task::JoinHandle<Result<()>>,
) {
    let sink = Arc::new(CollectingSink::new());
    let controller = Controller::new(config, reconciler, Arc::clone(&sink) as Arc<dyn ErrorSink>);
    let (source, events) = ChannelSource::new(initial);
    let ctrl = controller.clone();
    let handle = tokio::spawn(async move { ctrl.run(source).await });
    (controller, sink, events, handle)
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn added_alert_is_reconciled_and_forgotten() {
    let reconciler = Arc::new(AlertReconciler::new());
    let (controller, sink, _events, handle) = start(
        test_config(),
        Arc::clone(&reconciler),
        vec![Alert::new("default", "a1", "disk full")],
    );

    eventually(Duration::from_secs(5), || reconciler.history().len() == 1).await;
    let record = &reconciler.history()[0];
    assert_eq!(record.key, key("default/a1"));
    assert_eq!(record.message.as_deref(), Some("disk full"));
    assert!(!record.deleted);

    let queue = controller.queue();
    eventually(Duration::from_secs(5), || queue.in_flight() == 0).await;
    assert_eq!(queue.len(), 0);
    assert_eq!(queue.num_requeues(&key("default/a1")), 0);
    assert!(sink.errors().is_empty());

    controller.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn deleted_alert_runs_cleanup() {
    let reconciler = Arc::new(AlertReconciler::new());
    let alert = Alert::new("default", "a1", "disk full");
    let (controller, _sink, events, handle) =
        start(test_config(), Arc::clone(&reconciler), vec![alert.clone()]);

    eventually(Duration::from_secs(5), || reconciler.history().len() == 1).await;
    events.send(WatchEvent::Deleted(alert)).await.unwrap();
    eventually(Duration::from_secs(5), || reconciler.history().len() == 2).await;

    let last = reconciler.history().pop().unwrap();
    assert!(last.deleted);
    assert_eq!(last.key, key("default/a1"));
    assert!(controller.lister().get(Some("default"), "a1").is_err());

    controller.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn unchanged_update_does_not_reconcile_again() {
    let reconciler = Arc::new(AlertReconciler::new());
    let alert = Alert::new("default", "a1", "disk full");
    let (controller, _sink, events, handle) =
        start(test_config(), Arc::clone(&reconciler), vec![alert.clone()]);

    eventually(Duration::from_secs(5), || reconciler.history().len() == 1).await;
    events.send(WatchEvent::Modified(alert.clone())).await.unwrap();
    events
        .send(WatchEvent::Modified(Alert::new("default", "a1", "disk really full")))
        .await
        .unwrap();

    eventually(Duration::from_secs(5), || reconciler.history().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let history = reconciler.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].message.as_deref(), Some("disk really full"));

    controller.shutdown();
    handle.await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failures_back_off_up_to_the_cap() {
    let reconciler = Arc::new(FlakyReconciler {
        failures: 5,
        ..Default::default()
    });
    let config = ControllerConfig {
        backoff_base: Duration::from_secs(5),
        backoff_max: Duration::from_secs(15),
        ..test_config()
    };
    let (controller, sink, _events, handle) = start(
        config,
        Arc::clone(&reconciler),
        vec![Alert::new("default", "a1", "disk full")],
    );

    eventually(Duration::from_secs(300), || reconciler.successes() == 1).await;

    let attempts = reconciler.attempts(&key("default/a1"));
    assert_eq!(attempts.len(), 6);
    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    let expected = [5, 10, 15, 15, 15].map(Duration::from_secs);
    for (gap, want) in gaps.iter().zip(expected) {
        assert!(*gap >= want, "gap {gap:?} shorter than backoff {want:?}");
        assert!(*gap < want + Duration::from_secs(1), "gap {gap:?} exceeds backoff {want:?}");
    }
    for pair in gaps.windows(2) {
        assert!(pair[1] + Duration::from_millis(500) >= pair[0]);
    }

    assert_eq!(sink.count_kind("reconcile"), 5);
    eventually(Duration::from_secs(5), || controller.queue().in_flight() == 0).await;
    assert_eq!(controller.queue().num_requeues(&key("default/a1")), 0);

    controller.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn retry_limit_drops_the_key() {
    let logs = CaptureWriter::default();
    let _capture = capture_logs(&logs);
    let reconciler = Arc::new(FlakyReconciler {
        failures: u32::MAX,
        ..Default::default()
    });
    let config = ControllerConfig {
        backoff_base: Duration::from_millis(100),
        backoff_max: Duration::from_secs(1),
        retry: RetryPolicy::limited(2),
        ..test_config()
    };
    let (controller, sink, _events, handle) = start(
        config,
        Arc::clone(&reconciler),
        vec![Alert::new("default", "a1", "disk full")],
    );

    eventually(Duration::from_secs(30), || sink.count_kind("retries_exhausted") == 1).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(reconciler.attempts(&key("default/a1")).len(), 3);
    // One recorded result per attempt: two requeued errors, then the drop.
    let logs = logs.contents();
    assert_eq!(logs.matches("reconcile finished outcome=\"error\"").count(), 2);
    assert_eq!(logs.matches("reconcile finished outcome=\"dropped\"").count(), 1);
    assert_eq!(controller.queue().num_requeues(&key("default/a1")), 0);
    assert_eq!(controller.queue().len(), 0);

    controller.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn panicking_reconciler_is_retried_and_worker_survives() {
    let reconciler = Arc::new(FlakyReconciler {
        panic_first: true,
        ..Default::default()
    });
    let config = ControllerConfig {
        backoff_base: Duration::from_millis(50),
        backoff_max: Duration::from_secs(1),
        ..test_config()
    };
    let (controller, sink, _events, handle) = start(
        config,
        Arc::clone(&reconciler),
        vec![
            Alert::new("default", "a1", "disk full"),
            Alert::new("default", "a2", "cpu hot"),
        ],
    );

    eventually(Duration::from_secs(30), || reconciler.successes() == 2).await;
    assert_eq!(sink.count_kind("reconcile_panicked"), 2);
    eventually(Duration::from_secs(5), || controller.queue().in_flight() == 0).await;

    controller.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_key_is_reported_and_worker_continues() {
    let reconciler = Arc::new(AlertReconciler::new());
    let (controller, sink, events, handle) = start(
        test_config(),
        Arc::clone(&reconciler),
        vec![Alert::new("default", "a1", "disk full")],
    );
    eventually(Duration::from_secs(5), || reconciler.history().len() == 1).await;

    // `new` does not validate, so a bad key can reach the queue.
    controller.queue().add(ResourceKey::new(Some("a"), "b/c"));
    eventually(Duration::from_secs(5), || sink.count_kind("malformed_key") == 1).await;
    eventually(Duration::from_secs(5), || controller.queue().in_flight() == 0).await;
    assert_eq!(controller.queue().len(), 0);

    events
        .send(WatchEvent::Added(Alert::new("default", "a2", "cpu hot")))
        .await
        .unwrap();
    eventually(Duration::from_secs(5), || reconciler.history().len() == 2).await;
    assert_eq!(reconciler.history()[1].key, key("default/a2"));
    assert_eq!(sink.errors().len(), 1);

    controller.shutdown();
    handle.await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// Concurrency and lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn update_during_reconcile_is_not_lost_or_doubled() {
    let reconciler = Arc::new(FlakyReconciler {
        delay: Duration::from_millis(200),
        ..Default::default()
    });
    let config = ControllerConfig {
        workers: 4,
        ..test_config()
    };
    let (controller, _sink, events, handle) = start(
        config,
        Arc::clone(&reconciler),
        vec![Alert::new("default", "a1", "v1")],
    );

    // Wait until the first reconcile is in flight, then change the alert.
    eventually(Duration::from_secs(5), || {
        controller.queue().is_processing(&key("default/a1"))
    })
    .await;
    events
        .send(WatchEvent::Modified(Alert::new("default", "a1", "v2")))
        .await
        .unwrap();

    eventually(Duration::from_secs(5), || reconciler.successes() == 2).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(reconciler.successes(), 2);
    assert_eq!(reconciler.messages.lock().unwrap().last().map(String::as_str), Some("v2"));
    assert_eq!(reconciler.overlaps.load(Ordering::SeqCst), 0);

    controller.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_lets_in_flight_reconcile_finish() {
    let reconciler = Arc::new(FlakyReconciler {
        delay: Duration::from_millis(300),
        ..Default::default()
    });
    let (controller, _sink, _events, handle) = start(
        test_config(),
        Arc::clone(&reconciler),
        vec![Alert::new("default", "a1", "disk full")],
    );

    eventually(Duration::from_secs(5), || {
        controller.queue().is_processing(&key("default/a1"))
    })
    .await;
    controller.shutdown();
    handle.await.unwrap().unwrap();

    assert_eq!(reconciler.successes(), 1);
    assert_eq!(controller.queue().in_flight(), 0);
    assert!(controller.queue().is_shutting_down());
}

#[tokio::test]
async fn shutdown_before_run_returns_promptly() {
    let controller: Controller<Alert, _> = Controller::new(
        test_config(),
        Arc::new(AlertReconciler::new()),
        Arc::new(CollectingSink::new()) as Arc<dyn ErrorSink>,
    );
    controller.shutdown();

    let (source, _events) = ChannelSource::new(vec![Alert::new("default", "a1", "x")]);
    tokio::time::timeout(Duration::from_secs(2), controller.run(source))
        .await
        .expect("run did not return")
        .unwrap();
}

/// Source whose initial listing never arrives.
struct StuckSource;

impl WatchSource<Alert> for StuckSource {
    async fn list(&mut self) -> Result<Vec<Alert>> {
        std::future::pending().await
    }

    async fn next_event(&mut self) -> Option<Result<WatchEvent<Alert>>> {
        None
    }
}

#[tokio::test(start_paused = true)]
async fn startup_fails_when_cache_never_syncs() {
    let reconciler = Arc::new(AlertReconciler::new());
    let controller: Controller<Alert, _> = Controller::new(
        ControllerConfig {
            sync_timeout: Duration::from_secs(3),
            ..test_config()
        },
        Arc::clone(&reconciler),
        Arc::new(CollectingSink::new()) as Arc<dyn ErrorSink>,
    );

    let err = controller.run(StuckSource).await.unwrap_err();
    assert!(matches!(err, Error::SyncTimeout(_)));
    assert!(reconciler.history().is_empty());
    assert!(controller.queue().is_shutting_down());
}
