//! Repair hints for rejected arguments
//!
//! Diagnostics are best-effort. A failing or panicking diagnostics
//! implementation is logged and otherwise ignored.

use super::result::ValidationIssue;
use super::schema::Schema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Structured report produced for a failing value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    /// Things that look wrong
    #[serde(default)]
    pub warnings: Vec<String>,

    /// Suggested fixes
    #[serde(default)]
    pub hints: Vec<String>,
}

/// Produces repair hints for a value that failed validation
pub trait Diagnostics: Send + Sync {
    /// Inspect a failing value
    fn diagnose(
        &self,
        schema: &dyn Schema,
        value: &Value,
        issues: &[ValidationIssue],
    ) -> anyhow::Result<DiagnosticReport>;
}

/// Compares the value's keys against the schema's keys
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaDiagnostics;

impl Diagnostics for SchemaDiagnostics {
    fn diagnose(
        &self,
        schema: &dyn Schema,
        value: &Value,
        issues: &[ValidationIssue],
    ) -> anyhow::Result<DiagnosticReport> {
        let mut report = DiagnosticReport::default();

        let Some(object) = value.as_object() else {
            report
                .warnings
                .push(format!("expected an object, got {}", json_kind(value)));
            report
                .hints
                .push("Pass the arguments as a JSON object".to_string());
            return Ok(report);
        };

        let known = schema.keys();
        for key in schema.required_keys() {
            if !object.contains_key(&key) {
                report.warnings.push(format!("missing required key '{}'", key));
                report.hints.push(format!("Add the '{}' argument", key));
            }
        }

        for key in object.keys() {
            if known.is_empty() || known.contains(key) {
                continue;
            }
            report.warnings.push(format!("unexpected key '{}'", key));
            match closest(key, &known) {
                Some(candidate) => report
                    .hints
                    .push(format!("Did you mean '{}' instead of '{}'?", candidate, key)),
                None => report.hints.push(format!("Remove the '{}' argument", key)),
            }
        }

        for issue in issues {
            if issue.code.as_deref() == Some("type") && !issue.path.is_empty() {
                report.hints.push(format!(
                    "Check the type of '{}': {}",
                    issue.path.trim_start_matches('/'),
                    issue.message
                ));
            }
        }

        Ok(report)
    }
}

/// Run diagnostics, swallowing errors and panics
pub(crate) fn collect_hints(
    diagnostics: &dyn Diagnostics,
    schema: &dyn Schema,
    value: &Value,
    issues: &[ValidationIssue],
) -> Vec<String> {
    let outcome = catch_unwind(AssertUnwindSafe(|| diagnostics.diagnose(schema, value, issues)));
    match outcome {
        Ok(Ok(report)) => report.hints,
        Ok(Err(error)) => {
            tracing::warn!(error = %error, "Diagnostics failed");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!("Diagnostics panicked");
            Vec::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn closest<'a>(key: &str, candidates: &'a [String]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|candidate| (edit_distance(key, candidate), candidate))
        .filter(|(distance, candidate)| *distance <= 2.max(candidate.len() / 3))
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate.as_str())
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == *cb { 0 } else { 1 };
            current[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(current[j] + 1);
        }
        prev = current;
    }
    prev[b.len()]
}

#[cfg(test)]
mod diagnostics_tests {
    use super::*;
    use crate::tools::schema::JsonSchema;
    use serde_json::json;

    struct Exploding;

    impl Diagnostics for Exploding {
        fn diagnose(
            &self,
            _schema: &dyn Schema,
            _value: &Value,
            _issues: &[ValidationIssue],
        ) -> anyhow::Result<DiagnosticReport> {
            panic!("diagnostics bug")
        }
    }

    fn schema() -> JsonSchema {
        JsonSchema::new(json!({
            "type": "object",
            "properties": {"query": {"type": "string"}, "limit": {"type": "integer"}},
            "required": ["query"]
        }))
        .unwrap()
    }

    #[test]
    fn test_suggests_near_miss_keys() {
        let schema = schema();
        let value = json!({"qurey": "rust"});
        let issues = schema.check(&value).unwrap_err();
        let report = SchemaDiagnostics.diagnose(&schema, &value, &issues).unwrap();

        assert!(report.warnings.iter().any(|w| w.contains("missing required key 'query'")));
        assert!(report.hints.iter().any(|h| h.contains("Did you mean 'query'")));
    }

    #[test]
    fn test_non_object_value() {
        let schema = schema();
        let report = SchemaDiagnostics.diagnose(&schema, &json!([1]), &[]).unwrap();
        assert_eq!(report.warnings, vec!["expected an object, got an array"]);
    }

    #[test]
    fn test_panicking_diagnostics_are_swallowed() {
        let schema = schema();
        let hints = collect_hints(&Exploding, &schema, &json!({}), &[]);
        assert!(hints.is_empty());
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("same", "same"), 0);
    }
}
