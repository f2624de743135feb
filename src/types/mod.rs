pub mod error;
pub mod node;
pub mod run;
pub mod utils;

pub use error::{
    ErrorCategory, ErrorClassifier, IngestError, LlmError, Result, ResultExt, ValidationError,
    ValidationErrorKind,
};
pub use node::{DirectoryNode, FileNode, NewFile, content_hash};
pub use run::{PipelineRun, RunStatus, Stage};
pub use utils::{
    TokenEstimator, estimate_code_tokens, estimate_tokens, truncate_to_token_limit,
};

// =============================================================================
// Domain Newtypes
// =============================================================================

use std::fmt;

/// Type-safe wrapper for pipeline run IDs
///
/// Prevents accidental mixing of run IDs with paths and job IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random run id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_generate_is_unique() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_run_id_conversions() {
        let id = RunId::from("run-1");
        assert_eq!(id.to_string(), "run-1");
        assert_eq!(id.as_ref(), "run-1");
        assert_eq!(id.into_inner(), "run-1");
    }
}
