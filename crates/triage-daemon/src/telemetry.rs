//! Logging setup and run statistics

use std::collections::BTreeMap;

use clap::ValueEnum;
use triage_engine::escalation::{AttemptReport, EscalationStatus};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(format: LogFormat, default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_level.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Tallies of attempt outcomes seen during a run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub attempts: u64,
    pub errors: u64,
    pub outcomes: BTreeMap<&'static str, u64>,
    pub resolved: u64,
    pub escalated_to_human: u64,
}

impl RunStats {
    pub fn record(&mut self, report: &AttemptReport) {
        self.attempts += 1;
        match &report.result {
            Ok(outcome) => {
                *self.outcomes.entry(outcome.label()).or_default() += 1;
                for record in outcome.records() {
                    match record.status {
                        EscalationStatus::Resolved => self.resolved += 1,
                        EscalationStatus::EscalatedToHuman => self.escalated_to_human += 1,
                        _ => {}
                    }
                }
            }
            Err(_) => self.errors += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_engine::escalation::AttemptOutcome;
    use triage_engine::ProblemType;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Text);
    }

    #[test]
    fn test_stats_count_outcomes_and_errors() {
        let mut stats = RunStats::default();
        stats.record(&AttemptReport {
            event_id: "e1".into(),
            result: Ok(AttemptOutcome::NoRuleMatched {
                attempt_id: "a1".into(),
                problem_type: ProblemType::UnknownError,
            }),
        });
        stats.record(&AttemptReport {
            event_id: "e2".into(),
            result: Err("Audit store failure".into()),
        });
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.outcomes.get("no_rule_matched"), Some(&1));
    }
}
