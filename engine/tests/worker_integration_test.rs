//! Queued worker: drop-oldest overflow, reports, graceful and forced shutdown,
//! and a forced shutdown racing an in-flight audit write.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use triage_engine::connector::{ConnectorError, ConnectorResponse, ConnectorSet, ProviderConnector};
use triage_engine::escalation::{
    spawn_worker, AttemptOutcome, ContextPayload, Enqueued, EscalationExecutor, EscalationRecord,
    EscalationStatus,
};
use triage_engine::events::ActivityEvent;
use triage_engine::registry::ProviderDescriptor;
use triage_engine::rules::EscalationRule;
use triage_engine::settings::{StaticSettings, TriageSettings};
use triage_engine::store::{AuditStore, InMemoryAuditStore, StoreResult};
use triage_engine::TriageError;

/// Signals when a dispatch starts and waits for a permit before answering
struct Gated {
    started: mpsc::UnboundedSender<()>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl ProviderConnector for Gated {
    fn provider_id(&self) -> &str {
        "gated"
    }

    async fn dispatch(&self, _payload: &ContextPayload) -> Result<ConnectorResponse, ConnectorError> {
        let _ = self.started.send(());
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ConnectorError::Unavailable(e.to_string()))?;
        Ok(ConnectorResponse {
            text: "done".into(),
            ..Default::default()
        })
    }
}

/// Blocks its thread inside `append`, like a file write that outlives an abort
struct SlowAppend {
    inner: InMemoryAuditStore,
    entered: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl AuditStore for SlowAppend {
    async fn append(&self, record: &EscalationRecord) -> StoreResult<()> {
        let _ = self.entered.send(());
        std::thread::sleep(Duration::from_millis(300));
        self.inner.append(record).await
    }

    async fn update(&self, record: &EscalationRecord) -> StoreResult<()> {
        self.inner.update(record).await
    }

    async fn pending(&self) -> StoreResult<Vec<EscalationRecord>> {
        self.inner.pending().await
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

fn settings(dispatch_timeout_ms: u64) -> TriageSettings {
    TriageSettings::default()
        .with_provider(ProviderDescriptor::new("gated"))
        .with_rule(EscalationRule::catch_all("all", "Everything"))
        .with_dispatch_timeout_ms(dispatch_timeout_ms)
}

fn setup(
    dispatch_timeout_ms: u64,
) -> (
    EscalationExecutor,
    Arc<InMemoryAuditStore>,
    mpsc::UnboundedReceiver<()>,
    Arc<Semaphore>,
) {
    let settings = settings(dispatch_timeout_ms);
    let audit = Arc::new(InMemoryAuditStore::new());
    let (tx, rx) = mpsc::unbounded_channel();
    let gate = Arc::new(Semaphore::new(0));
    let executor = EscalationExecutor::new(Arc::new(StaticSettings::new(settings)), audit.clone())
        .with_connectors(ConnectorSet::new().with(Arc::new(Gated {
            started: tx,
            gate: gate.clone(),
        })));
    (executor, audit, rx, gate)
}

/// Distinct users so suppression never kicks in
fn event(n: usize) -> ActivityEvent {
    ActivityEvent::new(
        "error",
        format!("user-{n}"),
        "ReferenceError: config is not defined at startup",
    )
}

#[tokio::test]
async fn overflow_drops_oldest_waiting_event() {
    init_logging();
    let (executor, audit, mut started, gate) = setup(30_000);
    let worker = spawn_worker(executor, 2);

    let first = event(0);
    worker.submit(first).unwrap();
    started.recv().await.unwrap();

    let waiting = event(1);
    let waiting_id = waiting.id.clone();
    assert_eq!(worker.submit(waiting).unwrap(), Enqueued::Queued { depth: 1 });
    assert_eq!(worker.submit(event(2)).unwrap(), Enqueued::Queued { depth: 2 });
    assert_eq!(
        worker.submit(event(3)).unwrap(),
        Enqueued::DroppedOldest {
            dropped_event_id: waiting_id
        }
    );
    assert_eq!(worker.queue_depth(), 2);
    assert_eq!(worker.dropped(), 1);

    gate.add_permits(16);
    let report = worker.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(report.processed, 3);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.abandoned, 0);
    assert!(report.executor.is_some());
    assert_eq!(audit.count_by_status(EscalationStatus::Resolved).await, 3);
}

#[tokio::test]
async fn reports_published_per_attempt() {
    let (executor, _audit, _started, gate) = setup(30_000);
    gate.add_permits(16);
    let worker = spawn_worker(executor, 8);
    let mut reports = worker.subscribe();

    let e = event(7);
    let id = e.id.clone();
    worker.submit(e).unwrap();

    let report = reports.recv().await.unwrap();
    assert_eq!(report.event_id, id);
    assert!(matches!(report.result, Ok(AttemptOutcome::Dispatched { .. })));

    worker.close();
    assert!(worker.is_closed());
    assert!(matches!(worker.submit(event(8)), Err(TriageError::WorkerStopped)));
    worker.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stuck_worker_is_aborted_and_pending_resolved() {
    init_logging();
    let (executor, audit, mut started, _gate) = setup(600_000);
    let worker = spawn_worker(executor, 4);

    worker.submit(event(0)).unwrap();
    started.recv().await.unwrap();
    worker.submit(event(1)).unwrap();

    let report = worker.shutdown(Duration::from_millis(50)).await.unwrap();
    assert!(report.executor.is_none());
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.force_resolved, 1);

    let records = audit.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, EscalationStatus::EscalatedToHuman);
    assert_eq!(records[0].confidence, 0.0);
    assert!(audit.pending().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abort_waits_for_in_flight_append() {
    init_logging();
    let (entered_tx, mut entered) = mpsc::unbounded_channel();
    let audit = Arc::new(SlowAppend {
        inner: InMemoryAuditStore::new(),
        entered: entered_tx,
    });
    let (started_tx, _started) = mpsc::unbounded_channel();
    let executor = EscalationExecutor::new(Arc::new(StaticSettings::new(settings(600_000))), audit.clone())
        .with_connectors(ConnectorSet::new().with(Arc::new(Gated {
            started: started_tx,
            gate: Arc::new(Semaphore::new(0)),
        })));
    let worker = spawn_worker(executor, 4);

    worker.submit(event(0)).unwrap();
    entered.recv().await.unwrap();

    // Grace runs out while the append is still blocking the worker thread
    let report = worker.shutdown(Duration::from_millis(10)).await.unwrap();
    assert!(report.executor.is_none());
    assert_eq!(report.force_resolved, 1);

    let records = audit.inner.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, EscalationStatus::EscalatedToHuman);
    assert!(audit.pending().await.unwrap().is_empty());
}
