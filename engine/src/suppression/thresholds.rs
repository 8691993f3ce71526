//! Default mute thresholds per issue type
//!
//! Noisy-but-harmless issues mute early; issues a developer usually works
//! through on their own get more room before escalation stops.

/// Used for issue types missing from the table
pub const FALLBACK_THRESHOLD: u32 = 3;

const DEFAULT_THRESHOLDS: &[(&str, u32)] = &[
    ("security_vulnerability", 1),
    ("rate_limit_error", 2),
    ("network_error", 2),
    ("api_timeout_error", 3),
    ("module_not_found", 3),
    ("build_failure", 3),
    ("unhandled_exception", 3),
    ("null_reference", 4),
    ("reference_error", 4),
    ("performance_issue", 4),
    ("generic_error", 4),
    ("syntax_error", 5),
    ("unknown_error", 5),
];

/// Table entry for `issue_type`, if it has one
pub fn lookup_threshold(issue_type: &str) -> Option<u32> {
    DEFAULT_THRESHOLDS
        .iter()
        .find(|(name, _)| *name == issue_type)
        .map(|(_, threshold)| *threshold)
}

/// Default mute threshold (1–5) for `issue_type`
pub fn default_threshold(issue_type: &str) -> u32 {
    lookup_threshold(issue_type).unwrap_or(FALLBACK_THRESHOLD)
}
