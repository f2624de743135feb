//! Token estimation and truncation for prompt budgets.

// =============================================================================
// Token Estimation
// =============================================================================

/// Token estimation configuration for different content types
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    /// Characters per token for ASCII text (default: 4.0)
    pub ascii_chars_per_token: f32,
    /// Characters per token for non-ASCII (CJK, etc.) (default: 1.5)
    pub non_ascii_chars_per_token: f32,
    /// Extra tokens per line for code structure (default: 0.5)
    pub code_overhead_per_line: f32,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            ascii_chars_per_token: 4.0,
            non_ascii_chars_per_token: 1.5,
            code_overhead_per_line: 0.5,
        }
    }
}

impl TokenEstimator {
    /// Create estimator optimized for code
    pub fn for_code() -> Self {
        Self {
            ascii_chars_per_token: 3.5,
            non_ascii_chars_per_token: 1.5,
            code_overhead_per_line: 0.8,
        }
    }

    /// Estimate token count for content
    pub fn estimate(&self, content: &str) -> usize {
        if content.is_empty() {
            return 0;
        }

        let mut ascii_chars = 0usize;
        let mut non_ascii_chars = 0usize;

        for c in content.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let line_count = content.lines().count();
        let code_overhead = (line_count as f32 * self.code_overhead_per_line) as usize;

        let ascii_tokens = (ascii_chars as f32 / self.ascii_chars_per_token) as usize;
        let non_ascii_tokens = (non_ascii_chars as f32 / self.non_ascii_chars_per_token) as usize;

        ascii_tokens + non_ascii_tokens + code_overhead
    }
}

/// Estimate token count from prose content
#[inline]
pub fn estimate_tokens(content: &str) -> usize {
    TokenEstimator::default().estimate(content)
}

/// Estimate tokens for code content (prompts that embed source files)
#[inline]
pub fn estimate_code_tokens(content: &str) -> usize {
    TokenEstimator::for_code().estimate(content)
}

/// Truncate content to fit within a token limit
///
/// Prefers paragraph boundaries, then line boundaries.
pub fn truncate_to_token_limit(content: &str, max_tokens: usize) -> String {
    let estimated = estimate_tokens(content);
    if estimated <= max_tokens {
        return content.to_string();
    }

    let ratio = max_tokens as f64 / estimated as f64;
    let mut max_chars = ((content.len() as f64 * ratio * 0.95) as usize).min(content.len());
    while !content.is_char_boundary(max_chars) {
        max_chars -= 1;
    }

    let truncated = &content[..max_chars];

    if let Some(pos) = truncated.rfind("\n\n") {
        return format!("{}\n\n[truncated]", &content[..pos]);
    }

    if let Some(pos) = truncated.rfind('\n') {
        return format!("{}\n\n[truncated]", &content[..pos]);
    }

    format!("{}\n\n[truncated]", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_ascii() {
        let result = estimate_tokens("hello world!");
        assert!(result > 0);
        assert!(result < 10);
    }

    #[test]
    fn test_estimate_code_tokens() {
        let code = "fn main() {\n    println!(\"hello\");\n}";
        assert!(estimate_code_tokens(code) >= estimate_tokens(code));
    }

    #[test]
    fn test_truncate_to_token_limit_no_truncation() {
        let content = "Short content.";
        assert_eq!(truncate_to_token_limit(content, 1000), content);
    }

    #[test]
    fn test_truncate_to_token_limit_with_truncation() {
        let content = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let result = truncate_to_token_limit(content, 5);
        assert!(result.contains("truncated"));
        assert!(result.len() < content.len() + 20);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let content = "가나다라마바사아자차카타파하".repeat(20);
        let result = truncate_to_token_limit(&content, 3);
        assert!(result.ends_with("[truncated]"));
    }
}
