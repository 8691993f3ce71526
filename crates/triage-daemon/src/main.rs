//! Triage daemon
//!
//! Reads ActivityEvent JSON lines from stdin (or `--input`), runs each through
//! the escalation engine behind a bounded queue and appends the audit trail to
//! a JSON-lines file.
//!
//! # Usage
//!
//! ```bash
//! # Follow a producer
//! tail -F events.jsonl | triage-daemon --settings triage.toml
//!
//! # Replay a file, carrying suppression state between runs
//! triage-daemon --input events.jsonl --import state/alice.json --export-dir state/
//!
//! # Probe the configured backends
//! TRIAGE_ENV=production triage-daemon --check
//! ```

mod config;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, info, warn};

use config::{DaemonConfig, Profile};
use telemetry::{init_tracing, LogFormat, RunStats};
use triage_engine::connector::{check_endpoint, ConnectorSet};
use triage_engine::escalation::{spawn_worker, EscalationExecutor};
use triage_engine::events::ActivityEvent;
use triage_engine::notify::BroadcastNotifier;
use triage_engine::settings::{SettingsStore, TomlSettingsStore};
use triage_engine::store::JsonlAuditStore;
use triage_engine::suppression::SuppressionManager;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (overrides TRIAGE_SETTINGS_PATH)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Read events from this file instead of stdin
    #[arg(long, env = "TRIAGE_INPUT")]
    input: Option<PathBuf>,

    /// Audit log path (overrides TRIAGE_AUDIT_LOG)
    #[arg(long)]
    audit_log: Option<PathBuf>,

    /// Events allowed to wait behind the running attempt (overrides TRIAGE_QUEUE_CAPACITY)
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Log output format (overrides TRIAGE_LOG_FORMAT)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Deployment profile: development, production or test (overrides TRIAGE_ENV)
    #[arg(long)]
    env: Option<String>,

    /// Suppression snapshot to import before processing (repeatable)
    #[arg(long)]
    import: Vec<PathBuf>,

    /// Directory receiving one suppression snapshot per user after the run
    #[arg(long, env = "TRIAGE_EXPORT_DIR")]
    export_dir: Option<PathBuf>,

    /// Time allowed to drain queued events on shutdown
    #[arg(long, env = "TRIAGE_SHUTDOWN_GRACE_MS", default_value_t = 10_000)]
    shutdown_grace_ms: u64,

    /// Probe configured connector endpoints and exit
    #[arg(long, default_value_t = false)]
    check: bool,
}

impl Args {
    fn apply(&self, mut config: DaemonConfig) -> DaemonConfig {
        if let Some(path) = &self.settings {
            config.settings_path = path.clone();
        }
        if let Some(path) = &self.audit_log {
            config.audit_log = path.clone();
        }
        if let Some(capacity) = self.queue_capacity.filter(|n| *n > 0) {
            config.queue_capacity = capacity;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(env) = &self.env {
            config.profile = Profile::parse(env);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.apply(DaemonConfig::from_env());
    init_tracing(config.log_format, config.profile.default_log_level());

    info!(
        profile = config.profile.as_str(),
        settings = %config.settings_path.display(),
        audit_log = %config.audit_log.display(),
        queue_capacity = config.queue_capacity,
        "Triage daemon starting"
    );

    let settings_store = Arc::new(TomlSettingsStore::new(&config.settings_path));
    let settings = settings_store
        .load()
        .await
        .with_context(|| format!("Failed to load settings from {}", config.settings_path.display()))?;

    if args.check {
        return check_connectors(&settings.connectors).await;
    }

    let connectors =
        ConnectorSet::from_configs(&settings.connectors).context("Failed to build connectors")?;

    let mut suppression = SuppressionManager::new(&config.plugin_id, &config.model);
    for path in &args.import {
        import_snapshot(&mut suppression, path).await?;
    }

    let notifier = Arc::new(BroadcastNotifier::new());
    let notifications = tokio::spawn(log_notifications(notifier.subscribe()));

    let mut executor = EscalationExecutor::new(
        settings_store.clone(),
        Arc::new(JsonlAuditStore::new(&config.audit_log)),
    )
    .with_connectors(connectors)
    .with_suppression(suppression)
    .with_notifier(notifier.clone());
    executor.init().await.context("Failed to recover the audit log")?;

    let worker = spawn_worker(executor, config.queue_capacity);
    let stats_task = tokio::spawn(collect_stats(worker.subscribe()));

    let fed = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            feed(file, &worker).await
        }
        None => feed(tokio::io::stdin(), &worker).await,
    };
    if let Err(e) = &fed {
        error!(error = %e, "Stopped reading events");
    }

    let mut report = worker
        .shutdown(Duration::from_millis(args.shutdown_grace_ms))
        .await
        .context("Failed to shut down the escalation worker")?;
    let stats = stats_task.await.unwrap_or_default();

    if let Some(dir) = &args.export_dir {
        match &report.executor {
            Some(executor) => export_snapshots(executor.suppression(), dir).await?,
            None => warn!(
                dir = %dir.display(),
                "Worker was aborted, suppression state lost; skipping snapshot export"
            ),
        }
    }

    // Last notifier handles go with the executor; the logger then sees the channel close
    report.executor = None;
    drop(notifier);
    let _ = notifications.await;

    info!(
        submitted = fed.as_ref().copied().unwrap_or_default(),
        attempts = stats.attempts,
        errors = stats.errors,
        resolved = stats.resolved,
        escalated_to_human = stats.escalated_to_human,
        dropped = report.dropped,
        abandoned = report.abandoned,
        force_resolved = report.force_resolved,
        outcomes = ?stats.outcomes,
        "Triage daemon finished"
    );
    Ok(())
}

/// Submit every event line until EOF or ctrl-c; returns the number submitted
async fn feed<R: AsyncRead + Unpin>(reader: R, worker: &triage_engine::WorkerHandle) -> Result<u64> {
    let mut lines = BufReader::new(reader).lines();
    let mut submitted = 0u64;
    let mut lineno = 0u64;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read event stream")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, draining queued events");
                break;
            }
        };
        let Some(line) = line else { break };
        lineno += 1;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ActivityEvent>(&line) {
            Ok(event) => {
                debug!(event_id = %event.id, "Event received");
                worker.submit(event)?;
                submitted += 1;
            }
            Err(e) => warn!(line = lineno, error = %e, "Skipping malformed event"),
        }
    }
    Ok(submitted)
}

async fn collect_stats(
    mut reports: tokio::sync::broadcast::Receiver<triage_engine::AttemptReport>,
) -> RunStats {
    let mut stats = RunStats::default();
    loop {
        match reports.recv().await {
            Ok(report) => stats.record(&report),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Statistics fell behind");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    stats
}

async fn log_notifications(
    mut rx: tokio::sync::broadcast::Receiver<triage_engine::HumanNotification>,
) {
    while let Ok(notification) = rx.recv().await {
        let providers: Vec<&str> = notification
            .records
            .iter()
            .filter_map(|r| r.provider_id.as_deref())
            .collect();
        warn!(
            attempt_id = %notification.attempt_id,
            event_id = %notification.source_event_id,
            reason = %notification.reason,
            providers = ?providers,
            "Human attention required"
        );
    }
}

async fn check_connectors(connectors: &[triage_engine::connector::OpenAiCompatConfig]) -> Result<()> {
    if connectors.is_empty() {
        warn!("No connectors configured");
        return Ok(());
    }
    let mut unhealthy = 0;
    for connector in connectors {
        if check_endpoint(&connector.base_url).await {
            info!(provider = %connector.provider_id, url = %connector.base_url, "Endpoint healthy");
        } else {
            warn!(provider = %connector.provider_id, url = %connector.base_url, "Endpoint unreachable");
            unhealthy += 1;
        }
    }
    anyhow::ensure!(unhealthy == 0, "{} of {} endpoints unreachable", unhealthy, connectors.len());
    Ok(())
}

async fn import_snapshot(suppression: &mut SuppressionManager, path: &Path) -> Result<()> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    let summary = suppression
        .import_json(&json)
        .with_context(|| format!("Rejected snapshot {}", path.display()))?;
    info!(
        user = %summary.user,
        subjects = summary.subjects,
        muted = summary.muted,
        "Suppression snapshot imported"
    );
    Ok(())
}

async fn export_snapshots(suppression: &SuppressionManager, dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    for user in suppression.users() {
        let snapshot = suppression.export_user(&user);
        let path = dir.join(format!("{}.json", snapshot_file_stem(&user)));
        let json = snapshot.to_json().context("Failed to serialize snapshot")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(user = %user, path = %path.display(), "Suppression snapshot exported");
    }
    Ok(())
}

/// File-name-safe form of a user id, suffixed with a short digest of the raw id
fn snapshot_file_stem(user: &str) -> String {
    let readable: String = user
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let readable = if readable.is_empty() { "anonymous" } else { readable.as_str() };
    let digest = blake3::hash(user.as_bytes()).to_hex();
    format!("{}-{}", readable, &digest.as_str()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_is_safe() {
        assert!(snapshot_file_stem("alice@example.com").starts_with("alice_example_com-"));
        assert!(snapshot_file_stem("../etc").starts_with("___etc-"));
        assert!(snapshot_file_stem("").starts_with("anonymous-"));
        assert!(!snapshot_file_stem("../etc").contains('/'));
    }

    #[test]
    fn test_file_stem_keeps_users_apart() {
        assert_ne!(snapshot_file_stem("a@b"), snapshot_file_stem("a_b"));
        assert_eq!(snapshot_file_stem("a@b"), snapshot_file_stem("a@b"));
    }

    #[test]
    fn test_grace_period_from_env() {
        std::env::set_var("TRIAGE_SHUTDOWN_GRACE_MS", "2500");
        let args = Args::parse_from(["triage-daemon"]);
        std::env::remove_var("TRIAGE_SHUTDOWN_GRACE_MS");
        assert_eq!(args.shutdown_grace_ms, 2500);

        let args = Args::parse_from(["triage-daemon", "--shutdown-grace-ms", "40"]);
        assert_eq!(args.shutdown_grace_ms, 40);
    }

    #[test]
    fn test_cli_overrides_env() {
        let args = Args::parse_from([
            "triage-daemon",
            "--queue-capacity",
            "8",
            "--log-format",
            "json",
            "--env",
            "production",
        ]);
        let config = args.apply(DaemonConfig::from_lookup(|_| None));
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.profile, Profile::Production);
    }

    #[tokio::test]
    async fn test_snapshot_export_then_import() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = SuppressionManager::new("triage-engine", "test");
        let key = triage_engine::SubjectKey::new("alice", "network_error");
        manager.record(&key, 2);
        manager.record(&key, 2);

        export_snapshots(&manager, dir.path()).await.unwrap();

        let mut restored = SuppressionManager::new("triage-engine", "test");
        let path = dir.path().join(format!("{}.json", snapshot_file_stem("alice")));
        import_snapshot(&mut restored, &path)
            .await
            .unwrap();
        let state = restored.state(&key).unwrap();
        assert_eq!(state.occurrence_count, 2);
        assert!(state.auto_muted);
        assert_eq!(state.mute_threshold, 2);
    }

    #[tokio::test]
    async fn test_feed_skips_malformed_lines() {
        let settings = triage_engine::settings::StaticSettings::new(Default::default());
        let executor = EscalationExecutor::new(
            Arc::new(settings),
            Arc::new(triage_engine::store::InMemoryAuditStore::new()),
        );
        let worker = spawn_worker(executor, 16);
        let event = ActivityEvent::new("error", "alice", "deploy failed");
        let input = format!("{}\nnot json\n\n", serde_json::to_string(&event).unwrap());

        let submitted = feed(input.as_bytes(), &worker).await.unwrap();
        assert_eq!(submitted, 1);
        let report = worker.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(report.processed, 1);
    }
}
