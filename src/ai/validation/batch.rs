//! Batch response validation.
//!
//! A batch response is a JSON array with one object per file. Each object
//! carries exactly two string fields: `path` and the stage's result field.
//! Every path must belong to the batch, appear once, and every batch path
//! must be covered.

use serde_json::Value;
use std::collections::HashSet;

use super::json_repair::extract_json;
use crate::types::{Stage, ValidationError, ValidationErrorKind};

/// Validated `(path, text)` pairs in response order
pub type BatchResults = Vec<(String, String)>;

/// Expected shape of one stage's batch response
#[derive(Debug, Clone, Copy)]
pub struct BatchSchema {
    pub result_field: &'static str,
}

impl BatchSchema {
    pub fn for_stage(stage: Stage) -> Option<Self> {
        let result_field = match stage {
            Stage::Summary => "summary",
            Stage::Analysis => "analysis",
            Stage::Crawl => return None,
        };
        Some(Self { result_field })
    }

    /// Parse and validate a raw model response against `expected_paths`.
    pub fn validate(
        &self,
        raw: &str,
        expected_paths: &[String],
    ) -> Result<BatchResults, ValidationError> {
        let (value, _) = extract_json(raw)?;
        self.validate_value(&value, expected_paths)
    }

    pub fn validate_value(
        &self,
        value: &Value,
        expected_paths: &[String],
    ) -> Result<BatchResults, ValidationError> {
        let items = value.as_array().ok_or_else(|| {
            ValidationError::new(ValidationErrorKind::Schema, "expected a JSON array")
        })?;

        let expected: HashSet<&str> = expected_paths.iter().map(String::as_str).collect();
        let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
        let mut results = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            let object = item.as_object().ok_or_else(|| {
                ValidationError::new(ValidationErrorKind::Schema, "array item is not an object")
                    .with_field(format!("[{}]", index))
            })?;

            if let Some(extra) = object
                .keys()
                .find(|k| k.as_str() != "path" && k.as_str() != self.result_field)
            {
                return Err(ValidationError::new(
                    ValidationErrorKind::UnexpectedField,
                    format!("unexpected key '{}'", extra),
                )
                .with_field(format!("[{}]", index)));
            }

            let path = required_string(object, "path", index)?;
            let text = required_string(object, self.result_field, index)?;

            if !expected.contains(path) {
                return Err(ValidationError::new(
                    ValidationErrorKind::UnknownPath,
                    "path is not part of this batch",
                )
                .with_field(path));
            }
            if !seen.insert(path.to_string()) {
                return Err(ValidationError::new(
                    ValidationErrorKind::UnknownPath,
                    "path appears more than once",
                )
                .with_field(path));
            }
            if text.trim().is_empty() {
                return Err(ValidationError::new(
                    ValidationErrorKind::MissingField,
                    format!("'{}' is empty", self.result_field),
                )
                .with_field(path));
            }

            results.push((path.to_string(), text.to_string()));
        }

        if let Some(missing) = expected_paths.iter().find(|p| !seen.contains(p.as_str())) {
            return Err(ValidationError::new(
                ValidationErrorKind::MissingField,
                "no result for batch file",
            )
            .with_field(missing.clone()));
        }

        Ok(results)
    }
}

fn required_string<'a>(
    object: &'a serde_json::Map<String, Value>,
    field: &str,
    index: usize,
) -> Result<&'a str, ValidationError> {
    object.get(field).and_then(Value::as_str).ok_or_else(|| {
        ValidationError::new(
            ValidationErrorKind::MissingField,
            format!("'{}' missing or not a string", field),
        )
        .with_field(format!("[{}]", index))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorCategory, IngestError};

    fn paths() -> Vec<String> {
        vec!["src/a.rs".to_string(), "src/b.rs".to_string()]
    }

    fn summary() -> BatchSchema {
        BatchSchema::for_stage(Stage::Summary).unwrap()
    }

    #[test]
    fn test_valid_batch() {
        let raw = r#"[
            {"path": "src/b.rs", "summary": "B"},
            {"path": "src/a.rs", "summary": "A"}
        ]"#;
        let results = summary().validate(raw, &paths()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], ("src/b.rs".to_string(), "B".to_string()));
    }

    #[test]
    fn test_fenced_batch() {
        let raw = "```json\n[{\"path\": \"src/a.rs\", \"analysis\": \"x\"}, {\"path\": \"src/b.rs\", \"analysis\": \"y\"}]\n```";
        let schema = BatchSchema::for_stage(Stage::Analysis).unwrap();
        assert_eq!(schema.validate(raw, &paths()).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_field() {
        let raw = r#"[{"path": "src/a.rs"}, {"path": "src/b.rs", "summary": "B"}]"#;
        let err = summary().validate(raw, &paths()).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::MissingField);
    }

    #[test]
    fn test_unknown_path() {
        let raw = r#"[{"path": "src/a.rs", "summary": "A"}, {"path": "src/c.rs", "summary": "C"}]"#;
        let err = summary().validate(raw, &paths()).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::UnknownPath);
        assert_eq!(err.field.as_deref(), Some("src/c.rs"));
    }

    #[test]
    fn test_extra_key() {
        let raw = r#"[{"path": "src/a.rs", "summary": "A", "score": 3}, {"path": "src/b.rs", "summary": "B"}]"#;
        let err = summary().validate(raw, &paths()).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::UnexpectedField);
    }

    #[test]
    fn test_duplicate_path() {
        let raw = r#"[{"path": "src/a.rs", "summary": "A"}, {"path": "src/a.rs", "summary": "A2"}]"#;
        let err = summary().validate(raw, &paths()).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::UnknownPath);
    }

    #[test]
    fn test_uncovered_path() {
        let raw = r#"[{"path": "src/a.rs", "summary": "A"}]"#;
        let err = summary().validate(raw, &paths()).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("src/b.rs"));
    }

    #[test]
    fn test_object_instead_of_array() {
        let raw = r#"{"path": "src/a.rs", "summary": "A"}"#;
        let err = summary().validate(raw, &paths()).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Schema);
    }

    #[test]
    fn test_violations_are_format_errors() {
        let err: IngestError = summary().validate("[]", &paths()).unwrap_err().into();
        assert_eq!(err.category(), ErrorCategory::Format);
    }

    #[test]
    fn test_crawl_has_no_schema() {
        assert!(BatchSchema::for_stage(Stage::Crawl).is_none());
    }
}
