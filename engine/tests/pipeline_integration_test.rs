//! End-to-end executor behaviour: suppression, routing, notification,
//! configuration reloads and audit persistence.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use triage_engine::capability;
use triage_engine::connector::{ConnectorError, ConnectorResponse, ConnectorSet, ProviderConnector};
use triage_engine::escalation::{
    AttemptOutcome, ContextPayload, EscalationExecutor, EscalationRecord, EscalationStatus,
};
use triage_engine::events::{ActivityEvent, EventDetails};
use triage_engine::notify::{
    BroadcastNotifier, HumanNotification, NotificationChannel, NotificationReason, NotifyError,
};
use triage_engine::registry::ProviderDescriptor;
use triage_engine::rules::{EscalationRule, ProviderTarget};
use triage_engine::settings::{SettingsError, SettingsStore, StaticSettings, TriageSettings};
use triage_engine::store::{AuditStore, InMemoryAuditStore, JsonlAuditStore, StoreError, StoreResult};
use triage_engine::TriageError;

/// Answers every payload and counts calls
struct Answering {
    id: &'static str,
    calls: AtomicUsize,
    last_full: std::sync::Mutex<Option<bool>>,
}

impl Answering {
    fn new(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id,
            calls: AtomicUsize::new(0),
            last_full: std::sync::Mutex::new(None),
        })
    }
}

#[async_trait]
impl ProviderConnector for Answering {
    fn provider_id(&self) -> &str {
        self.id
    }

    async fn dispatch(&self, payload: &ContextPayload) -> Result<ConnectorResponse, ConnectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_full.lock().unwrap() = Some(payload.is_full());
        Ok(ConnectorResponse {
            text: format!("{} looked at {}", self.id, payload.problem_type),
            suggestions: vec!["Check the stack trace".into()],
            confidence: Some(0.85),
        })
    }
}

struct Failing(&'static str);

#[async_trait]
impl ProviderConnector for Failing {
    fn provider_id(&self) -> &str {
        self.0
    }

    async fn dispatch(&self, _payload: &ContextPayload) -> Result<ConnectorResponse, ConnectorError> {
        Err(ConnectorError::Status {
            status: 503,
            body: "model loading".into(),
        })
    }
}

struct BrokenStore;

#[async_trait]
impl AuditStore for BrokenStore {
    async fn append(&self, _record: &EscalationRecord) -> StoreResult<()> {
        Err(StoreError::Unavailable("disk full".into()))
    }

    async fn update(&self, _record: &EscalationRecord) -> StoreResult<()> {
        Err(StoreError::Unavailable("disk full".into()))
    }

    async fn pending(&self) -> StoreResult<Vec<EscalationRecord>> {
        Ok(Vec::new())
    }
}

/// Appends fine; updates fail while `fail_updates` is set
struct FailingUpdates {
    inner: InMemoryAuditStore,
    fail_updates: AtomicBool,
}

#[async_trait]
impl AuditStore for FailingUpdates {
    async fn append(&self, record: &EscalationRecord) -> StoreResult<()> {
        self.inner.append(record).await
    }

    async fn update(&self, record: &EscalationRecord) -> StoreResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write timed out".into()));
        }
        self.inner.update(record).await
    }

    async fn pending(&self) -> StoreResult<Vec<EscalationRecord>> {
        self.inner.pending().await
    }
}

/// Pager that is always down
struct DownPager {
    attempts: AtomicUsize,
}

#[async_trait]
impl NotificationChannel for DownPager {
    async fn notify(&self, _notification: HumanNotification) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError::DeliveryFailed("pager gateway returned 502".into()))
    }
}

struct UnreachableSettings;

#[async_trait]
impl SettingsStore for UnreachableSettings {
    async fn load(&self) -> Result<TriageSettings, SettingsError> {
        Err(SettingsError::Unavailable("document store offline".into()))
    }
}

fn timeout_event(user: &str) -> ActivityEvent {
    ActivityEvent::new("error", user, "Request to /api/users timed out after 30000ms")
}

fn catch_all_to(provider: &str) -> EscalationRule {
    let mut rule = EscalationRule::catch_all(format!("to-{provider}"), format!("Send to {provider}"));
    rule.action.preferred_provider_id = ProviderTarget::Provider(provider.to_string());
    rule
}

#[tokio::test]
async fn muted_subject_writes_one_ignored_record() {
    let settings = TriageSettings::default()
        .with_provider(ProviderDescriptor::new("local"))
        .with_rule(EscalationRule::catch_all("all", "Everything"));
    let audit = Arc::new(InMemoryAuditStore::new());
    let local = Answering::new("local");
    let mut executor = EscalationExecutor::new(Arc::new(StaticSettings::new(settings)), audit.clone())
        .with_connectors(ConnectorSet::new().with(local.clone()));

    // api_timeout_error mutes on the third occurrence; that one still escalates
    for _ in 0..3 {
        let outcome = executor.process_event(timeout_event("alice")).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::Dispatched { .. }));
    }
    let outcome = executor.process_event(timeout_event("alice")).await.unwrap();
    match &outcome {
        AttemptOutcome::Suppressed { subject, record, .. } => {
            assert_eq!(subject, "alice::api_timeout_error");
            assert_eq!(record.as_ref().unwrap().status, EscalationStatus::Ignored);
        }
        other => panic!("expected suppression, got {:?}", other),
    }
    assert_eq!(local.calls.load(Ordering::SeqCst), 3);

    // another user is unaffected
    let outcome = executor.process_event(timeout_event("bob")).await.unwrap();
    assert!(matches!(outcome, AttemptOutcome::Dispatched { .. }));

    assert_eq!(audit.count_by_status(EscalationStatus::Resolved).await, 4);
    assert_eq!(audit.count_by_status(EscalationStatus::Ignored).await, 1);
    assert!(audit.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn suppressed_attempt_can_skip_audit() {
    let mut settings = TriageSettings::default()
        .with_provider(ProviderDescriptor::new("local"))
        .with_rule(EscalationRule::catch_all("all", "Everything"));
    settings.audit_suppressed = false;
    let audit = Arc::new(InMemoryAuditStore::new());
    let mut executor = EscalationExecutor::new(Arc::new(StaticSettings::new(settings)), audit.clone())
        .with_connectors(ConnectorSet::new().with(Answering::new("local")));

    // security issues mute on the first occurrence
    let message = "Hardcoded password found in config/database.yml";
    executor
        .process_event(ActivityEvent::new("error", "alice", message))
        .await
        .unwrap();
    let outcome = executor
        .process_event(ActivityEvent::new("error", "alice", message))
        .await
        .unwrap();
    assert!(matches!(outcome, AttemptOutcome::Suppressed { record: None, .. }));
    assert_eq!(audit.records().await.len(), 1);
}

#[tokio::test]
async fn one_notification_per_attempt() {
    let mut notify_rule = catch_all_to("good");
    notify_rule.action.notify_human = true;
    let settings = TriageSettings::default()
        .with_provider(ProviderDescriptor::new("good"))
        .with_provider(ProviderDescriptor::new("bad"))
        .with_rule(notify_rule)
        .with_rule(catch_all_to("bad"));
    let audit = Arc::new(InMemoryAuditStore::new());
    let notifier = Arc::new(BroadcastNotifier::new());
    let mut rx = notifier.subscribe();
    let mut executor = EscalationExecutor::new(Arc::new(StaticSettings::new(settings)), audit.clone())
        .with_connectors(
            ConnectorSet::new()
                .with(Answering::new("good"))
                .with(Arc::new(Failing("bad"))),
        )
        .with_notifier(notifier.clone());

    let outcome = executor.process_event(timeout_event("alice")).await.unwrap();
    let statuses: Vec<EscalationStatus> = outcome.records().iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![EscalationStatus::Resolved, EscalationStatus::EscalatedToHuman]
    );

    let notification = rx.try_recv().unwrap();
    assert_eq!(notification.reason, NotificationReason::DispatchFailed);
    assert_eq!(notification.attempt_id, outcome.attempt_id());
    assert_eq!(notification.records.len(), 2);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn notification_failure_does_not_fail_the_attempt() {
    let settings = TriageSettings::default()
        .with_provider(ProviderDescriptor::new("bad"))
        .with_rule(catch_all_to("bad"));
    let audit = Arc::new(InMemoryAuditStore::new());
    let pager = Arc::new(DownPager {
        attempts: AtomicUsize::new(0),
    });
    let mut executor = EscalationExecutor::new(Arc::new(StaticSettings::new(settings)), audit.clone())
        .with_connectors(ConnectorSet::new().with(Arc::new(Failing("bad"))))
        .with_notifier(pager.clone());

    let outcome = executor.process_event(timeout_event("alice")).await.unwrap();
    assert!(matches!(
        outcome,
        AttemptOutcome::Dispatched {
            notified: Some(NotificationReason::DispatchFailed),
            ..
        }
    ));
    assert_eq!(pager.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(audit.count_by_status(EscalationStatus::EscalatedToHuman).await, 1);
}

#[tokio::test]
async fn no_notification_without_request_or_failure() {
    let settings = TriageSettings::default()
        .with_provider(ProviderDescriptor::new("good"))
        .with_rule(catch_all_to("good"));
    let notifier = Arc::new(BroadcastNotifier::new());
    let mut rx = notifier.subscribe();
    let mut executor = EscalationExecutor::new(
        Arc::new(StaticSettings::new(settings)),
        Arc::new(InMemoryAuditStore::new()),
    )
    .with_connectors(ConnectorSet::new().with(Answering::new("good")))
    .with_notifier(notifier.clone());

    let outcome = executor.process_event(timeout_event("alice")).await.unwrap();
    match outcome {
        AttemptOutcome::Dispatched { notified, records, .. } => {
            assert!(notified.is_none());
            assert_eq!(records[0].confidence, 0.85);
            assert_eq!(records[0].suggestions, vec!["Check the stack trace".to_string()]);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn rule_changes_visible_on_next_event() {
    let settings = Arc::new(StaticSettings::new(
        TriageSettings::default().with_provider(ProviderDescriptor::new("local")),
    ));
    let mut executor = EscalationExecutor::new(settings.clone(), Arc::new(InMemoryAuditStore::new()))
        .with_connectors(ConnectorSet::new().with(Answering::new("local")));

    let outcome = executor.process_event(timeout_event("alice")).await.unwrap();
    assert!(matches!(outcome, AttemptOutcome::NoRuleMatched { .. }));
    assert!(outcome.is_no_op());

    settings
        .update(|s| s.rules.push(EscalationRule::catch_all("all", "Everything")))
        .await;
    let outcome = executor.process_event(timeout_event("alice")).await.unwrap();
    assert!(matches!(outcome, AttemptOutcome::Dispatched { .. }));
}

#[tokio::test]
async fn full_context_follows_rule_action() {
    let mut rule = catch_all_to("local");
    rule.action.include_full_context = true;
    let settings = TriageSettings::default()
        .with_provider(ProviderDescriptor::new("local").with_capability(capability::DEBUGGING))
        .with_rule(rule);
    let local = Answering::new("local");
    let mut executor = EscalationExecutor::new(
        Arc::new(StaticSettings::new(settings)),
        Arc::new(InMemoryAuditStore::new()),
    )
    .with_connectors(ConnectorSet::new().with(local.clone()));

    let event = timeout_event("alice").with_details(EventDetails {
        file_path: Some("src/api/users.ts".into()),
        environment: Some("staging".into()),
        ..Default::default()
    });
    let outcome = executor.process_event(event).await.unwrap();
    assert_eq!(*local.last_full.lock().unwrap(), Some(true));

    let context = outcome.records()[0].request_context.as_ref().unwrap();
    let full = context.full.as_ref().unwrap();
    assert_eq!(full.environment, "staging");
    assert_eq!(full.file_path.as_deref(), Some("src/api/users.ts"));
}

#[tokio::test]
async fn settings_failure_is_a_no_op() {
    let audit = Arc::new(InMemoryAuditStore::new());
    let mut executor = EscalationExecutor::new(Arc::new(UnreachableSettings), audit.clone());
    let outcome = executor.process_event(timeout_event("alice")).await.unwrap();
    assert!(matches!(outcome, AttemptOutcome::ConfigUnavailable { .. }));
    assert!(audit.records().await.is_empty());
}

#[tokio::test]
async fn persistence_failure_propagates() {
    let settings = TriageSettings::default()
        .with_provider(ProviderDescriptor::new("local"))
        .with_rule(EscalationRule::catch_all("all", "Everything"));
    let local = Answering::new("local");
    let mut executor =
        EscalationExecutor::new(Arc::new(StaticSettings::new(settings)), Arc::new(BrokenStore))
            .with_connectors(ConnectorSet::new().with(local.clone()));

    let err = executor.process_event(timeout_event("alice")).await.unwrap_err();
    assert!(matches!(err, TriageError::Store(StoreError::Unavailable(_))));
    // nothing was sent without an audit trail
    assert_eq!(local.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_terminal_update_propagates_and_is_closed_at_shutdown() {
    let settings = TriageSettings::default()
        .with_provider(ProviderDescriptor::new("local"))
        .with_rule(EscalationRule::catch_all("all", "Everything"));
    let audit = Arc::new(FailingUpdates {
        inner: InMemoryAuditStore::new(),
        fail_updates: AtomicBool::new(true),
    });
    let local = Answering::new("local");
    let notifier = Arc::new(BroadcastNotifier::new());
    let mut notifications = notifier.subscribe();
    let mut executor = EscalationExecutor::new(Arc::new(StaticSettings::new(settings)), audit.clone())
        .with_connectors(ConnectorSet::new().with(local.clone()))
        .with_notifier(notifier.clone());

    let err = executor.process_event(timeout_event("alice")).await.unwrap_err();
    assert!(matches!(err, TriageError::Store(StoreError::Unavailable(_))));
    // the backend answered, but the record never left pending
    assert_eq!(local.calls.load(Ordering::SeqCst), 1);
    assert_eq!(audit.inner.pending().await.unwrap().len(), 1);

    audit.fail_updates.store(false, Ordering::SeqCst);
    assert_eq!(executor.shutdown().await.unwrap(), 1);

    let records = audit.inner.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, EscalationStatus::EscalatedToHuman);
    assert!(audit.inner.pending().await.unwrap().is_empty());

    let raised = notifications.recv().await.unwrap();
    assert_eq!(raised.reason, NotificationReason::DispatchFailed);
    assert_eq!(raised.records[0].id, records[0].id);
}

#[tokio::test]
async fn init_recovers_pending_records_from_jsonl() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("escalations.jsonl");

    // a previous run appended a record and died mid-dispatch
    let problem = triage_engine::ProblemClassifier::new()
        .classify_event(&timeout_event("alice"), &[]);
    let payload = ContextPayload::build(&problem, false, "development");
    let stale = EscalationRecord::pending("old-attempt", &problem, "local", Vec::new(), payload, chrono::Utc::now());
    JsonlAuditStore::new(&path).append(&stale).await.unwrap();

    let audit = Arc::new(JsonlAuditStore::new(&path));
    let mut executor = EscalationExecutor::new(
        Arc::new(StaticSettings::new(TriageSettings::default())),
        audit.clone(),
    );
    assert_eq!(executor.init().await.unwrap(), 1);

    let records = audit.load().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, EscalationStatus::EscalatedToHuman);
    assert_eq!(records[0].confidence, 0.0);
    assert!(audit.pending().await.unwrap().is_empty());

    assert_eq!(executor.shutdown().await.unwrap(), 0);
}
