//! Tolerant JSON extraction for LLM output.
//!
//! Models wrap JSON in code fences, add prose around it, or leave trailing
//! commas. Extraction tries, in order: the cleaned text as-is, the text with
//! trailing commas removed, and the first balanced `[...]`/`{...}` segment.
//! Truncated output is not completed: a cut-off batch must fail validation.

use serde_json::Value;
use tracing::debug;

use crate::types::{ValidationError, ValidationErrorKind};

/// Parse JSON from a model response.
///
/// Returns the value and whether any cleanup beyond fence stripping was needed.
pub fn extract_json(raw: &str) -> Result<(Value, bool), ValidationError> {
    let cleaned = strip_code_fences(raw.trim().trim_start_matches('\u{feff}'));

    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok((value, false));
    }

    let without_commas = remove_trailing_commas(cleaned);
    if let Ok(value) = serde_json::from_str::<Value>(&without_commas) {
        debug!("JSON parsed after removing trailing commas");
        return Ok((value, true));
    }

    if let Some(segment) = balanced_segment(&without_commas)
        && let Ok(value) = serde_json::from_str::<Value>(segment)
    {
        debug!("JSON extracted from surrounding text");
        return Ok((value, true));
    }

    Err(ValidationError::new(
        ValidationErrorKind::Format,
        format!(
            "response is not valid JSON: {}...",
            cleaned.chars().take(120).collect::<String>()
        ),
    ))
}

/// Convenience wrapper discarding the cleanup flag
pub fn extract_json_from_response(raw: &str) -> Result<Value, ValidationError> {
    extract_json(raw).map(|(value, _)| value)
}

fn strip_code_fences(s: &str) -> &str {
    let mut body = s;
    if body.starts_with("```") {
        body = match body.find('\n') {
            Some(newline) => &body[newline + 1..],
            None => body.trim_start_matches('`'),
        };
    }
    body.trim_end().trim_end_matches("```").trim()
}

/// Drop commas directly followed by `]` or `}` outside of strings
fn remove_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            match ch {
                _ if escape => escape = false,
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(ch);
            continue;
        }

        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some(']') | Some('}')) {
                continue;
            }
        }
        if ch == '"' {
            in_string = true;
        }
        out.push(ch);
    }
    out
}

/// First complete top-level array or object in `s`
fn balanced_segment(s: &str) -> Option<&str> {
    let start = s.find(['[', '{'])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (offset, ch) in s[start..].char_indices() {
        if in_string {
            match ch {
                _ if escape => escape = false,
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&s[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let (value, cleaned) = extract_json(r#"[{"path": "a.rs"}]"#).unwrap();
        assert!(!cleaned);
        assert_eq!(value[0]["path"], "a.rs");
    }

    #[test]
    fn test_code_fences() {
        let input = "```json\n[{\"path\": \"a.rs\"}]\n```";
        let (value, cleaned) = extract_json(input).unwrap();
        assert!(!cleaned);
        assert!(value.is_array());
    }

    #[test]
    fn test_trailing_commas() {
        let (value, cleaned) = extract_json(r#"[{"path": "a.rs", "summary": "x, y",},]"#).unwrap();
        assert!(cleaned);
        assert_eq!(value[0]["summary"], "x, y");
    }

    #[test]
    fn test_prose_around_json() {
        let input = "Here are the summaries:\n[{\"path\": \"a.rs\", \"summary\": \"uses [brackets]\"}]\nLet me know!";
        let (value, cleaned) = extract_json(input).unwrap();
        assert!(cleaned);
        assert_eq!(value[0]["summary"], "uses [brackets]");
    }

    #[test]
    fn test_truncated_output_is_rejected() {
        let err = extract_json(r#"[{"path": "a.rs", "summary": "cut"#).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Format);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(extract_json_from_response("I cannot help with that.").is_err());
    }
}
