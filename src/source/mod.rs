//! Repository Source
//!
//! Lists one directory level of a hosted repository at a time. The crawl
//! stage calls [`SourceLister::list`] once per directory job, so recursion
//! is driven by the task queue rather than by the lister.

mod github;

pub use github::GithubLister;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{PipelineConfig, SourceConfig};
use crate::constants;
use crate::types::{IngestError, Result};

// =============================================================================
// Entries
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub name: String,
    /// Path from the repository root, `/`-separated
    pub path: String,
    pub kind: EntryKind,
    /// Decoded text for files; `None` for directories and for files whose
    /// body was not fetched (too large, binary, or not UTF-8)
    pub content: Option<String>,
    pub size: u64,
}

impl SourceEntry {
    pub fn file(path: &str, content: &str) -> Self {
        Self {
            name: file_name(path).to_string(),
            path: path.to_string(),
            kind: EntryKind::File,
            content: Some(content.to_string()),
            size: content.len() as u64,
        }
    }

    pub fn dir(path: &str) -> Self {
        Self {
            name: file_name(path).to_string(),
            path: path.to_string(),
            kind: EntryKind::Dir,
            content: None,
            size: 0,
        }
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// NUL bytes in the leading window mark content as binary
pub fn looks_binary(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(constants::crawl::BINARY_SNIFF_BYTES)];
    window.contains(&0)
}

// =============================================================================
// Locator
// =============================================================================

/// Parsed `owner/repo` reference to a hosted repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoLocator {
    pub owner: String,
    pub repo: String,
}

impl RepoLocator {
    /// Parse `owner/repo` or a GitHub URL (`https://github.com/owner/repo[.git][/...]`).
    ///
    /// Anything else is a structural error.
    pub fn parse(locator: &str) -> Result<Self> {
        let trimmed = locator.trim();
        if trimmed.is_empty() {
            return Err(IngestError::Structural("empty repository locator".into()));
        }

        let path = if trimmed.contains("://") {
            let url = url::Url::parse(trimmed).map_err(|e| {
                IngestError::Structural(format!("invalid repository URL '{}': {}", trimmed, e))
            })?;
            match url.host_str() {
                Some("github.com") | Some("www.github.com") => {}
                other => {
                    return Err(IngestError::Structural(format!(
                        "unsupported repository host: {}",
                        other.unwrap_or("<none>")
                    )));
                }
            }
            url.path().to_string()
        } else if let Some(rest) = trimmed.strip_prefix("github.com/") {
            rest.to_string()
        } else {
            trimmed.to_string()
        };

        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let owner = segments.next().unwrap_or_default();
        let repo = segments.next().unwrap_or_default();
        let repo = repo.strip_suffix(".git").unwrap_or(repo);

        // Bare form must be exactly two segments; URLs may carry /tree/... etc.
        if !trimmed.contains("://") && !trimmed.starts_with("github.com/") && segments.next().is_some()
        {
            return Err(IngestError::Structural(format!(
                "expected owner/repo, got '{}'",
                trimmed
            )));
        }

        if !valid_segment(owner) || !valid_segment(repo) {
            return Err(IngestError::Structural(format!(
                "expected owner/repo, got '{}'",
                trimmed
            )));
        }

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl std::fmt::Display for RepoLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

// =============================================================================
// Lister
// =============================================================================

#[async_trait]
pub trait SourceLister: Send + Sync {
    /// Immediate children of `path` (`""` is the repository root).
    ///
    /// A missing repository or path is a `Structural` error; throttling and
    /// server errors are retryable.
    async fn list(&self, owner: &str, repo: &str, path: &str) -> Result<Vec<SourceEntry>>;
}

pub type SharedSource = Arc<dyn SourceLister>;

/// Build the hosting client from configuration
pub fn create_source(source: &SourceConfig, pipeline: &PipelineConfig) -> Result<SharedSource> {
    Ok(Arc::new(GithubLister::new(source, pipeline.max_file_bytes)?))
}

// =============================================================================
// Test double
// =============================================================================

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use dashmap::DashMap;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Static in-memory tree
    #[derive(Default)]
    pub(crate) struct MockSource {
        tree: BTreeMap<String, Vec<SourceEntry>>,
        calls: DashMap<String, usize>,
        failures: Mutex<BTreeMap<String, IngestError>>,
        delay: Option<std::time::Duration>,
    }

    impl MockSource {
        /// Build a tree from file paths; directories are implied.
        pub fn with_files(files: &[(&str, &str)]) -> Self {
            let mut tree: BTreeMap<String, Vec<SourceEntry>> = BTreeMap::new();
            tree.entry(String::new()).or_default();

            for (path, content) in files {
                let mut parent = String::new();
                let parts: Vec<&str> = path.split('/').collect();
                for (i, part) in parts.iter().enumerate() {
                    let current = if parent.is_empty() {
                        part.to_string()
                    } else {
                        format!("{}/{}", parent, part)
                    };
                    let entry = if i + 1 == parts.len() {
                        SourceEntry::file(&current, content)
                    } else {
                        SourceEntry::dir(&current)
                    };
                    let siblings = tree.entry(parent.clone()).or_default();
                    if !siblings.iter().any(|e| e.path == entry.path) {
                        siblings.push(entry.clone());
                    }
                    if entry.kind == EntryKind::Dir {
                        tree.entry(current.clone()).or_default();
                    }
                    parent = current;
                }
            }

            Self {
                tree,
                ..Default::default()
            }
        }

        pub fn with_entry(mut self, parent: &str, entry: SourceEntry) -> Self {
            self.tree.entry(parent.to_string()).or_default().push(entry);
            self
        }

        pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Fail every listing of `path` with `err`
        pub fn fail_on(self, path: &str, err: IngestError) -> Self {
            self.failures
                .lock()
                .unwrap()
                .insert(path.to_string(), err);
            self
        }

        pub fn calls(&self, path: &str) -> usize {
            self.calls.get(path).map(|c| *c).unwrap_or(0)
        }
    }

    #[async_trait]
    impl SourceLister for MockSource {
        async fn list(&self, _owner: &str, _repo: &str, path: &str) -> Result<Vec<SourceEntry>> {
            *self.calls.entry(path.to_string()).or_insert(0) += 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.failures.lock().unwrap().get(path) {
                return Err(IngestError::source_failure(path, err.category(), err.to_string()));
            }
            self.tree.get(path).cloned().ok_or_else(|| {
                IngestError::source_failure(
                    path,
                    crate::types::ErrorCategory::Structural,
                    "path not found",
                )
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_form() {
        let locator = RepoLocator::parse("rust-lang/cargo").unwrap();
        assert_eq!(locator.owner, "rust-lang");
        assert_eq!(locator.repo, "cargo");
        assert_eq!(locator.to_string(), "rust-lang/cargo");
    }

    #[test]
    fn test_parse_urls() {
        for input in [
            "https://github.com/octo/demo",
            "https://github.com/octo/demo.git",
            "https://github.com/octo/demo/tree/main/src",
            "github.com/octo/demo",
        ] {
            let locator = RepoLocator::parse(input).unwrap();
            assert_eq!(locator, RepoLocator { owner: "octo".into(), repo: "demo".into() }, "{}", input);
        }
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for input in ["", "octo", "octo/demo/extra", "https://gitlab.com/octo/demo", "octo/de mo", "../x"] {
            let err = RepoLocator::parse(input).unwrap_err();
            assert!(matches!(err, IngestError::Structural(_)), "{}", input);
        }
    }

    #[test]
    fn test_looks_binary() {
        assert!(looks_binary(b"PNG\0\0\x01"));
        assert!(!looks_binary(b"fn main() {}"));
    }

    #[tokio::test]
    async fn test_mock_tree() {
        let source = mock::MockSource::with_files(&[("README.md", "# hi"), ("src/lib.rs", "")]);
        let root = source.list("o", "r", "").await.unwrap();
        assert_eq!(root.len(), 2);
        let src = source.list("o", "r", "src").await.unwrap();
        assert_eq!(src[0].path, "src/lib.rs");
        assert_eq!(source.calls(""), 1);
    }
}
