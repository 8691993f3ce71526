//! Ordered pattern table for error classification
//!
//! The first pattern whose regex matches wins, so more specific families sit
//! above broader ones. The final entry is a catch-all for anything that
//! merely looks like an error.

use regex::Regex;
use std::sync::LazyLock;

use super::{ProblemType, Severity};

/// One row of the classification table
#[derive(Debug)]
pub struct ErrorPattern {
    /// Fine-grained issue slug, used for suppression subjects
    pub issue_type: &'static str,
    pub problem_type: ProblemType,
    pub regex: Regex,
    pub base_severity: Severity,
    pub base_confidence: f64,
    /// Lowercase sub-strings that make a match unambiguous
    pub specific_markers: &'static [&'static str],
}

fn pattern(
    issue_type: &'static str,
    problem_type: ProblemType,
    regex: &str,
    base_severity: Severity,
    base_confidence: f64,
    specific_markers: &'static [&'static str],
) -> ErrorPattern {
    ErrorPattern {
        issue_type,
        problem_type,
        regex: Regex::new(regex).unwrap(),
        base_severity,
        base_confidence,
        specific_markers,
    }
}

/// The classification table, in match order
pub static PATTERN_TABLE: LazyLock<Vec<ErrorPattern>> = LazyLock::new(|| {
    vec![
        pattern(
            "security_vulnerability",
            ProblemType::SecurityVulnerability,
            r"(?i)(xss|cross-site|sql injection|csrf|injection attack|vulnerab|cve-\d{4}|insecure|unauthori[sz]ed access|exposed (secret|token|api key)|hardcoded (password|secret|credential))",
            Severity::Critical,
            0.8,
            &["sql injection", "cve-", "exposed secret", "hardcoded password"],
        ),
        pattern(
            "syntax_error",
            ProblemType::SyntaxError,
            r"(?i)(syntaxerror|syntax error|unexpected token|unexpected end of input|parse error|unterminated string|invalid syntax|expected expression)",
            Severity::Medium,
            0.85,
            &["syntaxerror:", "unexpected token", "unexpected end of input"],
        ),
        pattern(
            "module_not_found",
            ProblemType::DependencyError,
            r"(?i)(cannot find module|module not found|modulenotfounderror|no module named|unresolved import|could not resolve dependency|eresolve|peer dep|version conflict)",
            Severity::Medium,
            0.8,
            &["cannot find module", "no module named", "eresolve"],
        ),
        pattern(
            "build_failure",
            ProblemType::BuildFailure,
            r"(?i)(build failed|compilation failed|failed to compile|could not compile|linker error|error ts\d+|exited with code [1-9])",
            Severity::High,
            0.75,
            &["failed to compile", "could not compile", "linker error"],
        ),
        pattern(
            "api_timeout_error",
            ProblemType::RuntimeError,
            r"(?i)(timed out|timeout|etimedout|deadline exceeded|gateway time-?out)",
            Severity::Medium,
            0.7,
            &["etimedout", "deadline exceeded", "gateway timeout"],
        ),
        pattern(
            "performance_issue",
            ProblemType::PerformanceIssue,
            r"(?i)(memory leak|out of memory|heap out of memory|slow query|high latency|cpu usage|performance|long task|event loop (blocked|lag)|took \d+\s?ms)",
            Severity::Medium,
            0.7,
            &["heap out of memory", "memory leak", "slow query"],
        ),
        pattern(
            "null_reference",
            ProblemType::RuntimeError,
            r"(?i)(typeerror|cannot read propert(y|ies) of (undefined|null)|undefined is not a function|is not a function|null pointer|nullpointerexception|attributeerror|'nonetype' object)",
            Severity::High,
            0.7,
            &[
                "cannot read properties of undefined",
                "cannot read properties of null",
                "cannot read property",
                "undefined is not a function",
                "nullpointerexception",
                "'nonetype' object",
            ],
        ),
        pattern(
            "reference_error",
            ProblemType::RuntimeError,
            r"(?i)(referenceerror|is not defined|nameerror|undefined variable)",
            Severity::Medium,
            0.75,
            &["referenceerror:", "nameerror:"],
        ),
        pattern(
            "network_error",
            ProblemType::RuntimeError,
            r"(?i)(econnrefused|econnreset|network error|failed to fetch|connection refused|connection reset)",
            Severity::Medium,
            0.65,
            &["econnrefused", "econnreset"],
        ),
        pattern(
            "unhandled_exception",
            ProblemType::RuntimeError,
            r"(?i)(uncaught|unhandled (promise )?rejection|panicked at|fatal error|segmentation fault|stack overflow|maximum call stack)",
            Severity::High,
            0.6,
            &["unhandledpromiserejection", "segmentation fault", "maximum call stack size exceeded"],
        ),
        pattern(
            "generic_error",
            ProblemType::RuntimeError,
            r"(?i)(error|exception|fail(ed|ure)?|crash(ed)?)",
            Severity::Medium,
            0.5,
            &[],
        ),
    ]
});

/// First pattern matching `message`, if any
pub fn match_pattern(message: &str) -> Option<&'static ErrorPattern> {
    PATTERN_TABLE.iter().find(|p| p.regex.is_match(message))
}
