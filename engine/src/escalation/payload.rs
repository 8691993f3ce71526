//! Context payloads sent to reasoning backends

use serde::{Deserialize, Serialize};

use crate::classifier::{Problem, ProblemType, Severity};

/// Extra context attached when a rule asks for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Same-type events seen in the classifier's window
    pub related_event_count: u32,
    pub environment: String,
    pub classifier_rationale: String,
}

/// What a backend receives for one problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPayload {
    pub text: String,
    pub problem_type: ProblemType,
    pub severity: Severity,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full: Option<FullContext>,
}

impl ContextPayload {
    /// Build a minimal or full payload for `problem`
    ///
    /// `default_environment` is used when the event does not say where it
    /// came from.
    pub fn build(problem: &Problem, include_full_context: bool, default_environment: &str) -> Self {
        let event = &problem.source_event;
        let full = include_full_context.then(|| FullContext {
            file_path: event.file_path().map(str::to_string),
            stack_trace: event.stack_trace().map(str::to_string),
            related_event_count: problem.context_window.len() as u32,
            environment: event
                .environment()
                .unwrap_or(default_environment)
                .to_string(),
            classifier_rationale: problem.rationale.clone(),
        });
        Self {
            text: event.message.clone(),
            problem_type: problem.classified_type,
            severity: problem.severity,
            confidence: problem.confidence,
            full,
        }
    }

    pub fn is_full(&self) -> bool {
        self.full.is_some()
    }

    /// Render the payload as a prompt for a chat-style backend
    pub fn render_prompt(&self) -> String {
        let mut prompt = format!(
            "A developer hit the following {} problem (severity: {}, classifier confidence: {:.2}).\n\nError:\n{}\n",
            self.problem_type, self.severity, self.confidence, self.text
        );
        if let Some(full) = &self.full {
            prompt.push_str("\nContext:\n");
            if let Some(path) = &full.file_path {
                prompt.push_str(&format!("- File: {}\n", path));
            }
            prompt.push_str(&format!("- Environment: {}\n", full.environment));
            prompt.push_str(&format!(
                "- Related errors in the last few minutes: {}\n",
                full.related_event_count
            ));
            prompt.push_str(&format!("- Classifier notes: {}\n", full.classifier_rationale));
            if let Some(trace) = &full.stack_trace {
                prompt.push_str(&format!("\nStack trace:\n{}\n", trace));
            }
        }
        prompt.push_str(
            "\nRespond with JSON in this format:\n{\"analysis\": \"what went wrong and why\", \"suggestions\": [\"concrete fix\", \"...\"], \"confidence\": 0.0-1.0}\n",
        );
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifyContext, ProblemClassifier};
    use crate::events::{ActivityEvent, EventDetails};

    fn problem() -> Problem {
        let event = ActivityEvent::new(
            "error",
            "alice",
            "TypeError: Cannot read properties of undefined (reading 'name')",
        )
        .with_details(EventDetails {
            file_path: Some("src/user.ts".into()),
            stack_trace: Some("at render (src/user.ts:10:5)".into()),
            ..Default::default()
        });
        ProblemClassifier::new().classify(&event.message, &ClassifyContext::for_event(&event, &[]))
    }

    #[test]
    fn test_minimal_payload_omits_context() {
        let payload = ContextPayload::build(&problem(), false, "development");
        assert!(!payload.is_full());
        assert!(!payload.render_prompt().contains("Stack trace"));
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("full").is_none());
    }

    #[test]
    fn test_full_payload_carries_context() {
        let payload = ContextPayload::build(&problem(), true, "staging");
        let full = payload.full.as_ref().unwrap();
        assert_eq!(full.file_path.as_deref(), Some("src/user.ts"));
        assert_eq!(full.environment, "staging");
        assert_eq!(full.related_event_count, 0);
        assert!(full.classifier_rationale.contains("null_reference"));

        let prompt = payload.render_prompt();
        assert!(prompt.contains("src/user.ts"));
        assert!(prompt.contains("Stack trace"));
    }
}
