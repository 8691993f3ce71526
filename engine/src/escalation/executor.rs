//! Escalation Executor — one pipeline run per incoming event
//!
//! ```text
//! event ─▶ classify ─▶ load settings ─▶ suppression ──ignore──▶ suppressed
//!                                            │
//!                                            ▼
//!                                       match rules ──none──▶ no_rule_matched
//!                                            │
//!                                            ▼
//!                             resolve providers (merge per provider)
//!                                            │
//!                                            ▼
//!                  append pending ─▶ dispatch (timeout) ─▶ resolved | escalated_to_human
//!                                            │
//!                                            ▼
//!                                notify human (at most once)
//! ```
//!
//! The executor is driven through `&mut self`, so one attempt finishes before
//! the next begins and the suppression and rate-limit counters need no locks.
//! The only suspension points are the outbound ports; the dispatch call is
//! always wrapped in a timeout and never retried.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::classifier::{Problem, ProblemClassifier, ProblemType};
use crate::connector::{ConnectorError, ConnectorSet};
use crate::error::TriageResult;
use crate::escalation::payload::ContextPayload;
use crate::escalation::record::{EscalationRecord, EscalationStatus};
use crate::events::{ActivityEvent, EventHistory, RecentEvent};
use crate::notify::{BroadcastNotifier, HumanNotification, NotificationReason, SharedNotifier};
use crate::registry::ProviderRegistry;
use crate::router::ProviderSelectionPolicy;
use crate::rules::{EscalationRule, ProviderTarget, RuleEngine};
use crate::settings::SettingsStore;
use crate::store::{AuditStore, SharedAuditStore, StoreResult};
use crate::suppression::{lookup_threshold, SubjectKey, SuppressAction, SuppressionManager};

/// Plugin id stamped on suppression exports when none is configured
pub const DEFAULT_PLUGIN_ID: &str = "triage-engine";

/// Reason written on records left pending by a shutdown
pub const SHUTDOWN_REASON: &str = "Attempt interrupted by shutdown before the backend answered";

/// Reason written on pending records found at startup
pub const RECOVERY_REASON: &str = "Attempt interrupted by a restart before the backend answered";

/// How one attempt ended
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The subject is muted; `record` is the `ignored` audit entry, if written
    Suppressed {
        attempt_id: String,
        subject: String,
        record: Option<EscalationRecord>,
    },
    /// No enabled rule matched the problem
    NoRuleMatched {
        attempt_id: String,
        problem_type: ProblemType,
    },
    /// Settings could not be loaded; nothing was done
    ConfigUnavailable { attempt_id: String, reason: String },
    /// Rules matched but none resolved to a usable provider
    NoProviderAvailable {
        attempt_id: String,
        rule_ids: Vec<String>,
    },
    /// One terminal record per distinct provider
    Dispatched {
        attempt_id: String,
        records: Vec<EscalationRecord>,
        notified: Option<NotificationReason>,
    },
}

impl AttemptOutcome {
    pub fn attempt_id(&self) -> &str {
        match self {
            Self::Suppressed { attempt_id, .. }
            | Self::NoRuleMatched { attempt_id, .. }
            | Self::ConfigUnavailable { attempt_id, .. }
            | Self::NoProviderAvailable { attempt_id, .. }
            | Self::Dispatched { attempt_id, .. } => attempt_id,
        }
    }

    /// Records written by this attempt, in their terminal state
    pub fn records(&self) -> &[EscalationRecord] {
        match self {
            Self::Suppressed {
                record: Some(record),
                ..
            } => std::slice::from_ref(record),
            Self::Dispatched { records, .. } => records,
            _ => &[],
        }
    }

    /// True when the attempt ended without writing or dispatching anything
    pub fn is_no_op(&self) -> bool {
        matches!(
            self,
            Self::NoRuleMatched { .. } | Self::ConfigUnavailable { .. } | Self::NoProviderAvailable { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Suppressed { .. } => "suppressed",
            Self::NoRuleMatched { .. } => "no_rule_matched",
            Self::ConfigUnavailable { .. } => "config_unavailable",
            Self::NoProviderAvailable { .. } => "no_provider_available",
            Self::Dispatched { .. } => "dispatched",
        }
    }
}

/// Why a dispatch ended without an answer
#[derive(Debug, thiserror::Error)]
enum DispatchFailure {
    #[error("timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{0}")]
    Connector(#[from] ConnectorError),

    #[error("no connector is configured")]
    MissingConnector,
}

/// Rules that resolved to the same provider, dispatched together
#[derive(Debug, Clone)]
struct DispatchPlan {
    provider_id: String,
    rule_ids: Vec<String>,
    include_full_context: bool,
    notify_human: bool,
}

pub struct EscalationExecutor {
    classifier: ProblemClassifier,
    rules: RuleEngine,
    policy: ProviderSelectionPolicy,
    registry: ProviderRegistry,
    suppression: SuppressionManager,
    history: EventHistory,
    settings: Arc<dyn SettingsStore>,
    connectors: ConnectorSet,
    audit: SharedAuditStore,
    notifier: SharedNotifier,
}

impl std::fmt::Debug for EscalationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationExecutor")
            .field("providers", &self.registry.len())
            .field("connectors", &self.connectors)
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl EscalationExecutor {
    /// Executor with default classifier, policy and an in-process notifier
    pub fn new(settings: Arc<dyn SettingsStore>, audit: SharedAuditStore) -> Self {
        Self {
            classifier: ProblemClassifier::new(),
            rules: RuleEngine::new(),
            policy: ProviderSelectionPolicy::new(),
            registry: ProviderRegistry::new(),
            suppression: SuppressionManager::new(DEFAULT_PLUGIN_ID, "default"),
            history: EventHistory::new(),
            settings,
            connectors: ConnectorSet::new(),
            audit,
            notifier: Arc::new(BroadcastNotifier::new()),
        }
    }

    pub fn with_connectors(mut self, connectors: ConnectorSet) -> Self {
        self.connectors = connectors;
        self
    }

    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_suppression(mut self, suppression: SuppressionManager) -> Self {
        self.suppression = suppression;
        self
    }

    pub fn with_classifier(mut self, classifier: ProblemClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_policy(mut self, policy: ProviderSelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_history(mut self, history: EventHistory) -> Self {
        self.history = history;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProviderRegistry {
        &mut self.registry
    }

    pub fn suppression(&self) -> &SuppressionManager {
        &self.suppression
    }

    pub fn suppression_mut(&mut self) -> &mut SuppressionManager {
        &mut self.suppression
    }

    pub fn history(&self) -> &EventHistory {
        &self.history
    }

    pub fn connectors(&self) -> &ConnectorSet {
        &self.connectors
    }

    pub fn audit_store(&self) -> SharedAuditStore {
        Arc::clone(&self.audit)
    }

    pub fn notifier(&self) -> SharedNotifier {
        Arc::clone(&self.notifier)
    }

    /// Prepare for processing: adopt the current provider list and close out
    /// any records a previous run left pending.
    pub async fn init(&mut self) -> TriageResult<usize> {
        match self.settings.load().await {
            Ok(settings) => {
                self.registry.sync(&settings.providers);
                info!(
                    rules = settings.rules.len(),
                    providers = settings.providers.len(),
                    connectors = self.connectors.len(),
                    "Escalation executor initialized"
                );
            }
            Err(e) => warn!(error = %e, "Settings unavailable at startup; will retry per event"),
        }

        let recovered =
            force_resolve_pending(self.audit.as_ref(), Some(&self.notifier), RECOVERY_REASON, Utc::now())
                .await?;
        if recovered > 0 {
            warn!(recovered, "Force-resolved records left pending by a previous run");
        }
        Ok(recovered)
    }

    /// Leave no record non-terminal
    pub async fn shutdown(&mut self) -> TriageResult<usize> {
        let resolved =
            force_resolve_pending(self.audit.as_ref(), Some(&self.notifier), SHUTDOWN_REASON, Utc::now())
                .await?;
        info!(
            force_resolved = resolved,
            events_seen = self.history.len(),
            "Escalation executor shut down"
        );
        Ok(resolved)
    }

    /// Run one event through the pipeline
    ///
    /// Only audit-store failures are returned as errors; every other problem
    /// ends as an outcome.
    pub async fn process_event(&mut self, event: ActivityEvent) -> TriageResult<AttemptOutcome> {
        let attempt_id = uuid::Uuid::new_v4().to_string();

        let recent = self.history.snapshot();
        let problem = self.classifier.classify_event(&event, &recent);
        self.history.push(RecentEvent {
            event_id: event.id.clone(),
            problem_type: problem.classified_type,
            timestamp: event.timestamp,
        });
        debug!(
            event_id = %event.id,
            attempt_id = %attempt_id,
            problem_type = %problem.classified_type,
            issue_type = %problem.issue_type,
            severity = %problem.severity,
            confidence = problem.confidence,
            "Event classified"
        );

        let settings = match self.settings.load().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Settings unavailable, skipping event");
                return Ok(AttemptOutcome::ConfigUnavailable {
                    attempt_id,
                    reason: e.to_string(),
                });
            }
        };
        self.registry.sync(&settings.providers);

        let now = Utc::now();
        let subject = SubjectKey::new(event.source.clone(), problem.issue_type.clone());
        let threshold =
            lookup_threshold(&problem.issue_type).unwrap_or(settings.default_mute_threshold);
        let recorded = self.suppression.record_at(&subject, threshold, now);
        match recorded.action {
            SuppressAction::Ignore => {
                let record = if settings.audit_suppressed {
                    let reason = format!(
                        "Suppressed: {} is muted after {} occurrences",
                        subject, recorded.count
                    );
                    let record = EscalationRecord::suppressed(&attempt_id, &problem, &reason, now);
                    self.append(&record).await?;
                    Some(record)
                } else {
                    None
                };
                debug!(event_id = %event.id, subject = %subject, "Attempt suppressed");
                return Ok(AttemptOutcome::Suppressed {
                    attempt_id,
                    subject: subject.to_string(),
                    record,
                });
            }
            SuppressAction::AutoDisabled => {
                info!(subject = %subject, count = recorded.count, "Last escalation before mute");
            }
            SuppressAction::Continue => {}
        }

        let matched = self.rules.match_rules(&problem, &settings.rules);
        if matched.is_empty() {
            debug!(event_id = %event.id, "No rule matched");
            return Ok(AttemptOutcome::NoRuleMatched {
                attempt_id,
                problem_type: problem.classified_type,
            });
        }

        let plans = self.plan_dispatches(&problem, &matched, now);
        if plans.is_empty() {
            return Ok(AttemptOutcome::NoProviderAvailable {
                attempt_id,
                rule_ids: matched.iter().map(|r| r.id.clone()).collect(),
            });
        }

        let notify_requested = plans.iter().any(|p| p.notify_human);
        let timeout = settings.dispatch_timeout();
        let mut records = Vec::with_capacity(plans.len());
        for plan in plans {
            let record = self
                .dispatch(&attempt_id, &problem, plan, &settings.environment, timeout)
                .await?;
            records.push(record);
        }

        let any_failed = records
            .iter()
            .any(|r| r.status == EscalationStatus::EscalatedToHuman);
        let notified = if any_failed {
            Some(NotificationReason::DispatchFailed)
        } else if notify_requested {
            Some(NotificationReason::RuleRequested)
        } else {
            None
        };
        if let Some(reason) = notified {
            raise_notification(&self.notifier, &attempt_id, &event.id, reason, records.clone()).await;
        }

        info!(
            event_id = %event.id,
            attempt_id = %attempt_id,
            records = records.len(),
            failed = any_failed,
            "Attempt complete"
        );
        Ok(AttemptOutcome::Dispatched {
            attempt_id,
            records,
            notified,
        })
    }

    /// Resolve each matched rule to a provider and merge rules sharing one
    fn plan_dispatches(
        &self,
        problem: &Problem,
        matched: &[&EscalationRule],
        now: DateTime<Utc>,
    ) -> Vec<DispatchPlan> {
        let mut plans: Vec<DispatchPlan> = Vec::new();

        for rule in matched {
            let provider_id = match &rule.action.preferred_provider_id {
                ProviderTarget::Auto => match self.policy.select(problem, &self.registry, now) {
                    Some(selection) => {
                        debug!(
                            rule = %rule.id,
                            provider = %selection.descriptor.id,
                            reason = %selection.reason,
                            "Provider selected"
                        );
                        selection.descriptor.id
                    }
                    None => {
                        warn!(rule = %rule.id, "No enabled provider for automatic routing, skipping rule");
                        continue;
                    }
                },
                ProviderTarget::Provider(id) => match self.registry.get(id) {
                    Some(entry) if entry.descriptor.enabled => {
                        if entry.is_rate_limited(now) {
                            debug!(rule = %rule.id, provider = %id, "Explicit provider is rate limited, dispatching anyway");
                        }
                        id.clone()
                    }
                    Some(_) => {
                        warn!(rule = %rule.id, provider = %id, "Rule targets a disabled provider, skipping rule");
                        continue;
                    }
                    None => {
                        warn!(rule = %rule.id, provider = %id, "Rule targets an unknown provider, skipping rule");
                        continue;
                    }
                },
            };

            match plans.iter_mut().find(|p| p.provider_id == provider_id) {
                Some(plan) => {
                    plan.rule_ids.push(rule.id.clone());
                    plan.include_full_context |= rule.action.include_full_context;
                    plan.notify_human |= rule.action.notify_human;
                }
                None => plans.push(DispatchPlan {
                    provider_id,
                    rule_ids: vec![rule.id.clone()],
                    include_full_context: rule.action.include_full_context,
                    notify_human: rule.action.notify_human,
                }),
            }
        }

        plans
    }

    /// Create, dispatch and settle one record
    async fn dispatch(
        &mut self,
        attempt_id: &str,
        problem: &Problem,
        plan: DispatchPlan,
        environment: &str,
        timeout: Duration,
    ) -> TriageResult<EscalationRecord> {
        let payload = ContextPayload::build(problem, plan.include_full_context, environment);
        let mut record = EscalationRecord::pending(
            attempt_id,
            problem,
            &plan.provider_id,
            plan.rule_ids,
            payload.clone(),
            Utc::now(),
        );
        self.append(&record).await?;
        self.registry.record_usage(&plan.provider_id, Utc::now());

        let result = match self.connectors.get(&plan.provider_id) {
            None => Err(DispatchFailure::MissingConnector),
            Some(connector) => match tokio::time::timeout(timeout, connector.dispatch(&payload)).await {
                Err(_) => Err(DispatchFailure::Timeout(timeout)),
                Ok(Err(e)) => Err(DispatchFailure::Connector(e)),
                Ok(Ok(response)) => Ok(response),
            },
        };

        match result {
            Ok(response) => {
                record.resolve(response.text, response.suggestions, response.confidence, Utc::now())?;
                debug!(record_id = %record.id, provider = %plan.provider_id, "Dispatch resolved");
            }
            Err(failure) => {
                warn!(
                    record_id = %record.id,
                    provider = %plan.provider_id,
                    error = %failure,
                    "Dispatch failed, escalating to a human"
                );
                let reason = format!("Dispatch to '{}' failed: {}", plan.provider_id, failure);
                record.escalate_to_human(&reason, Utc::now())?;
            }
        }

        if let Err(e) = self.audit.update(&record).await {
            error!(record_id = %record.id, error = %e, "Failed to persist terminal record");
            return Err(e.into());
        }
        Ok(record)
    }

    async fn append(&self, record: &EscalationRecord) -> TriageResult<()> {
        if let Err(e) = self.audit.append(record).await {
            error!(record_id = %record.id, error = %e, "Failed to append escalation record");
            return Err(e.into());
        }
        Ok(())
    }
}

async fn raise_notification(
    notifier: &SharedNotifier,
    attempt_id: &str,
    source_event_id: &str,
    reason: NotificationReason,
    records: Vec<EscalationRecord>,
) {
    let notification = HumanNotification {
        attempt_id: attempt_id.to_string(),
        source_event_id: source_event_id.to_string(),
        reason,
        records,
        raised_at: Utc::now(),
    };
    match notifier.notify(notification).await {
        Ok(()) => info!(attempt_id = %attempt_id, reason = %reason, "Human notified"),
        Err(e) => warn!(attempt_id = %attempt_id, error = %e, "Failed to raise human notification"),
    }
}

/// Move every pending record in `audit` to `escalated_to_human`
///
/// One notification is raised per affected attempt when a notifier is given.
pub async fn force_resolve_pending(
    audit: &dyn AuditStore,
    notifier: Option<&SharedNotifier>,
    reason: &str,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let pending = audit.pending().await?;
    let mut resolved: Vec<EscalationRecord> = Vec::with_capacity(pending.len());

    for mut record in pending {
        if record.escalate_to_human(reason, now).is_err() {
            continue;
        }
        audit.update(&record).await?;
        warn!(record_id = %record.id, attempt_id = %record.attempt_id, "Pending record force-resolved");
        resolved.push(record);
    }

    if let Some(notifier) = notifier {
        let attempts: BTreeSet<&str> = resolved.iter().map(|r| r.attempt_id.as_str()).collect();
        for attempt_id in attempts {
            let records: Vec<EscalationRecord> = resolved
                .iter()
                .filter(|r| r.attempt_id == attempt_id)
                .cloned()
                .collect();
            let source_event_id = records[0].source_event_id.clone();
            raise_notification(
                notifier,
                attempt_id,
                &source_event_id,
                NotificationReason::DispatchFailed,
                records,
            )
            .await;
        }
    }

    Ok(resolved.len())
}
