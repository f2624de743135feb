//! Repository tree records discovered by the crawl stage.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A directory discovered during the crawl. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub id: String,
    pub path: String,
    pub parent_id: Option<String>,
    pub run_id: String,
}

/// A file discovered during the crawl.
///
/// `short_summary` is filled by the summary stage, `analysis` by the
/// analysis stage; each stage selects rows where its field is still null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    pub id: String,
    pub path: String,
    pub name: String,
    pub content: String,
    pub content_hash: String,
    pub directory_id: Option<String>,
    pub run_id: String,
    pub short_summary: Option<String>,
    pub analysis: Option<String>,
}

/// Insert payload for a crawled file
#[derive(Debug, Clone)]
pub struct NewFile {
    pub path: String,
    pub name: String,
    pub content: String,
    pub directory_id: Option<String>,
}

impl NewFile {
    pub fn new(
        path: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        directory_id: Option<String>,
    ) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            content: content.into(),
            directory_id,
        }
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.content)
    }
}

/// SHA-256 of file content, lowercase hex
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable_hex() {
        let hash = content_hash("fn main() {}");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, content_hash("fn main() {}"));
        assert_ne!(hash, content_hash("fn main() { }"));
    }
}
