//! Single-worker queue in front of the executor
//!
//! Events wait in a bounded queue while an attempt is in flight. When the
//! queue is full the oldest waiting event is dropped and a warning is logged.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::executor::{force_resolve_pending, AttemptOutcome, EscalationExecutor, SHUTDOWN_REASON};
use crate::error::{TriageError, TriageResult};
use crate::events::ActivityEvent;
use crate::notify::SharedNotifier;
use crate::store::SharedAuditStore;

/// Default number of events allowed to wait
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Where a submitted event ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// Waiting; `depth` counts it
    Queued { depth: usize },
    /// Queue was full; the oldest waiting event was discarded to make room
    DroppedOldest { dropped_event_id: String },
}

/// Published after every attempt
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    pub event_id: String,
    /// Outcome, or the rendered error for a failed attempt
    pub result: Result<AttemptOutcome, String>,
}

/// Totals returned by [`WorkerHandle::shutdown`]
#[derive(Debug)]
pub struct ShutdownReport {
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
    /// Events still queued when the grace period ran out
    pub abandoned: usize,
    pub force_resolved: usize,
    /// The executor, unless the worker had to be aborted
    pub executor: Option<EscalationExecutor>,
}

struct Queue {
    items: Mutex<VecDeque<ActivityEvent>>,
    capacity: usize,
    ready: Notify,
    closed: AtomicBool,
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Queue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<ActivityEvent>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle for feeding and stopping a spawned worker
pub struct WorkerHandle {
    queue: Arc<Queue>,
    reports: broadcast::Sender<AttemptReport>,
    task: JoinHandle<EscalationExecutor>,
    audit: SharedAuditStore,
    notifier: SharedNotifier,
}

/// Move `executor` onto a task that drains a queue of `capacity` events
pub fn spawn_worker(executor: EscalationExecutor, capacity: usize) -> WorkerHandle {
    let queue = Arc::new(Queue {
        items: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        capacity: capacity.max(1),
        ready: Notify::new(),
        closed: AtomicBool::new(false),
        processed: AtomicU64::new(0),
        failed: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    });
    let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
    let audit = executor.audit_store();
    let notifier = executor.notifier();

    let task = tokio::spawn(run(executor, Arc::clone(&queue), reports.clone()));

    WorkerHandle {
        queue,
        reports,
        task,
        audit,
        notifier,
    }
}

async fn run(
    mut executor: EscalationExecutor,
    queue: Arc<Queue>,
    reports: broadcast::Sender<AttemptReport>,
) -> EscalationExecutor {
    loop {
        let next = queue.lock().pop_front();
        let event = match next {
            Some(event) => event,
            None => {
                if queue.closed.load(Ordering::Acquire) {
                    break;
                }
                queue.ready.notified().await;
                continue;
            }
        };

        let event_id = event.id.clone();
        let result = executor.process_event(event).await;
        queue.processed.fetch_add(1, Ordering::Relaxed);
        let result = match result {
            Ok(outcome) => {
                debug!(event_id = %event_id, outcome = outcome.label(), "Attempt finished");
                Ok(outcome)
            }
            Err(e) => {
                queue.failed.fetch_add(1, Ordering::Relaxed);
                error!(event_id = %event_id, error = %e, "Attempt failed");
                Err(e.to_string())
            }
        };
        // No subscribers is OK
        let _ = reports.send(AttemptReport { event_id, result });
    }

    if let Err(e) = executor.shutdown().await {
        error!(error = %e, "Executor shutdown failed");
    }
    executor
}

impl WorkerHandle {
    /// Queue an event for processing
    pub fn submit(&self, event: ActivityEvent) -> TriageResult<Enqueued> {
        if self.queue.closed.load(Ordering::Acquire) {
            return Err(TriageError::WorkerStopped);
        }

        let enqueued = {
            let mut items = self.queue.lock();
            let dropped = if items.len() >= self.queue.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(event);
            match dropped {
                Some(old) => Enqueued::DroppedOldest {
                    dropped_event_id: old.id,
                },
                None => Enqueued::Queued { depth: items.len() },
            }
        };

        if let Enqueued::DroppedOldest { dropped_event_id } = &enqueued {
            self.queue.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                dropped_event_id = %dropped_event_id,
                capacity = self.queue.capacity,
                "Escalation queue full, dropped oldest event"
            );
        }
        self.queue.ready.notify_one();
        Ok(enqueued)
    }

    /// Reports for attempts finishing after this call
    pub fn subscribe(&self) -> broadcast::Receiver<AttemptReport> {
        self.reports.subscribe()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity
    }

    pub fn processed(&self) -> u64 {
        self.queue.processed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting events; already queued events are still processed
    pub fn close(&self) {
        self.queue.closed.store(true, Ordering::Release);
        self.queue.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.closed.load(Ordering::Acquire)
    }

    /// Stop accepting events, drain the queue and shut the executor down
    ///
    /// If draining takes longer than `grace` the worker is aborted, queued
    /// events are abandoned and any record it left pending is force-resolved.
    pub async fn shutdown(self, grace: Duration) -> TriageResult<ShutdownReport> {
        self.close();

        let mut task = self.task;
        let (executor, abandoned) = match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(executor)) => (Some(executor), 0),
            Ok(Err(join_error)) => {
                error!(error = %join_error, "Escalation worker terminated abnormally");
                (None, self.queue.lock().len())
            }
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "Worker did not drain in time, aborting");
                task.abort();
                // Let an in-flight poll finish so its writes land before the pending scan
                let executor = match (&mut task).await {
                    Ok(executor) => Some(executor),
                    Err(join_error) => {
                        debug!(cancelled = join_error.is_cancelled(), "Escalation worker stopped after abort");
                        None
                    }
                };
                let abandoned = {
                    let mut items = self.queue.lock();
                    let n = items.len();
                    items.clear();
                    n
                };
                (executor, abandoned)
            }
        };

        // The executor resolves its own pending records when it drains cleanly
        let force_resolved = if executor.is_none() {
            force_resolve_pending(self.audit.as_ref(), Some(&self.notifier), SHUTDOWN_REASON, Utc::now())
                .await?
        } else {
            0
        };

        let report = ShutdownReport {
            processed: self.queue.processed.load(Ordering::Relaxed),
            failed: self.queue.failed.load(Ordering::Relaxed),
            dropped: self.queue.dropped.load(Ordering::Relaxed),
            abandoned,
            force_resolved,
            executor,
        };
        info!(
            processed = report.processed,
            failed = report.failed,
            dropped = report.dropped,
            abandoned = report.abandoned,
            force_resolved = report.force_resolved,
            "Escalation worker stopped"
        );
        Ok(report)
    }
}
