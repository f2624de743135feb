//! GitHub contents API lister.
//!
//! `GET {api_base}/repos/{owner}/{repo}/contents/{path}` returns one level of
//! entries. File bodies are fetched from each entry's `download_url` when the
//! file is within the size limit. Throttling and server errors are retried
//! with exponential backoff; a 404 is structural.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use futures::{StreamExt, TryStreamExt, stream};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{EntryKind, SourceEntry, SourceLister, looks_binary};
use crate::config::SourceConfig;
use crate::constants;
use crate::types::{ErrorCategory, ErrorClassifier, IngestError, Result};

const PROVIDER: &str = "github";
const BODY_FETCH_CONCURRENCY: usize = 4;

pub struct GithubLister {
    client: reqwest::Client,
    api_base: Url,
    token: Option<SecretString>,
    max_file_bytes: u64,
}

impl std::fmt::Debug for GithubLister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubLister")
            .field("api_base", &self.api_base.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("max_file_bytes", &self.max_file_bytes)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: u64,
    download_url: Option<String>,
}

/// Directory listings are arrays; a file path yields a single object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Listing(Vec<ContentItem>),
    Single(Box<ContentItem>),
}

impl GithubLister {
    pub fn new(config: &SourceConfig, max_file_bytes: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(constants::network::USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(
                constants::network::CONNECTION_TIMEOUT_SECS,
            ))
            .build()
            .map_err(|e| IngestError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let token = config
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::from);

        let api_base = Url::parse(config.api_base.trim_end_matches('/')).map_err(|e| {
            IngestError::Config(format!("Invalid source api_base '{}': {}", config.api_base, e))
        })?;
        if api_base.cannot_be_a_base() {
            return Err(IngestError::Config(format!(
                "Invalid source api_base '{}': not a base URL",
                config.api_base
            )));
        }

        Ok(Self {
            client,
            api_base,
            token,
            max_file_bytes,
        })
    }

    /// Each path segment is percent-encoded, so names containing `#` or `?`
    /// stay part of the path.
    fn contents_url(&self, owner: &str, repo: &str, path: &str) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["repos", owner, repo, "contents"])
                .extend(path.split('/').filter(|segment| !segment.is_empty()));
        }
        url
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        match &self.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    /// One GET with status classification, no retry
    async fn get_once(&self, url: &str, path: &str) -> Result<reqwest::Response> {
        let response = self.request(url).send().await.map_err(|e| {
            let category = if e.is_timeout() || e.is_connect() {
                ErrorCategory::Network
            } else {
                ErrorClassifier::classify(&e.to_string(), PROVIDER).category
            };
            IngestError::source_failure(path, category, e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        // GitHub reports an exhausted API quota as 403 with a zero remaining header
        let exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == "0");
        let category = if status.as_u16() == 403 && exhausted {
            ErrorCategory::RateLimit
        } else {
            ErrorClassifier::classify_http_status(status.as_u16(), "", PROVIDER).category
        };

        let body = response.text().await.unwrap_or_default();
        Err(IngestError::source_failure(
            path,
            category,
            format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
        ))
    }

    async fn get_with_retry(&self, url: &str, path: &str) -> Result<reqwest::Response> {
        (|| async { self.get_once(url, path).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(500))
                    .with_max_delay(Duration::from_secs(10))
                    .with_max_times(constants::network::MAX_NETWORK_RETRIES)
                    .with_jitter(),
            )
            .when(|e: &IngestError| e.category().is_retryable())
            .notify(|e: &IngestError, delay: Duration| {
                warn!(path, delay_ms = delay.as_millis() as u64, error = %e, "Retrying source request");
            })
            .await
    }

    async fn fetch_body(&self, item: &ContentItem) -> Result<Option<String>> {
        if item.size > self.max_file_bytes {
            debug!(path = %item.path, size = item.size, "Skipping body of oversized file");
            return Ok(None);
        }
        let Some(url) = item.download_url.as_deref() else {
            return Ok(None);
        };

        let bytes = self
            .get_with_retry(url, &item.path)
            .await?
            .bytes()
            .await
            .map_err(|e| IngestError::source_failure(&item.path, ErrorCategory::Network, e.to_string()))?;

        if looks_binary(&bytes) {
            return Ok(None);
        }
        Ok(String::from_utf8(bytes.to_vec()).ok())
    }

    async fn to_entry(&self, item: ContentItem) -> Result<Option<SourceEntry>> {
        let kind = match item.kind.as_str() {
            "file" => EntryKind::File,
            "dir" => EntryKind::Dir,
            other => {
                debug!(path = %item.path, kind = other, "Skipping unsupported entry");
                return Ok(None);
            }
        };

        let content = match kind {
            EntryKind::File => self.fetch_body(&item).await?,
            EntryKind::Dir => None,
        };

        Ok(Some(SourceEntry {
            name: item.name,
            path: item.path,
            kind,
            content,
            size: item.size,
        }))
    }
}

#[async_trait]
impl SourceLister for GithubLister {
    async fn list(&self, owner: &str, repo: &str, path: &str) -> Result<Vec<SourceEntry>> {
        let url = self.contents_url(owner, repo, path);
        debug!(%url, "Listing directory");

        let response = self.get_with_retry(url.as_str(), path).await?;
        let items = match response.json::<ContentsResponse>().await.map_err(|e| {
            IngestError::source_failure(path, ErrorCategory::Format, e.to_string())
        })? {
            ContentsResponse::Listing(items) => items,
            ContentsResponse::Single(item) => vec![*item],
        };

        let entries: Vec<Option<SourceEntry>> = stream::iter(items)
            .map(|item| self.to_entry(item))
            .buffered(BODY_FETCH_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(entries.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lister() -> GithubLister {
        let config = SourceConfig {
            api_base: "https://api.example.test/".to_string(),
            token: Some("ghp_secret".to_string()),
            timeout_secs: 5,
        };
        GithubLister::new(&config, 1024).unwrap()
    }

    #[test]
    fn test_contents_url() {
        let lister = lister();
        assert_eq!(
            lister.contents_url("octo", "demo", "").as_str(),
            "https://api.example.test/repos/octo/demo/contents"
        );
        assert_eq!(
            lister.contents_url("octo", "demo", "src/bin/").as_str(),
            "https://api.example.test/repos/octo/demo/contents/src/bin"
        );
    }

    #[test]
    fn test_contents_url_encodes_reserved_characters() {
        let url = lister().contents_url("octo", "demo", "docs/c# notes/why?.md");
        assert_eq!(
            url.as_str(),
            "https://api.example.test/repos/octo/demo/contents/docs/c%23%20notes/why%3F.md"
        );
        assert_eq!(url.fragment(), None);
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_api_base_with_path_prefix() {
        let config = SourceConfig {
            api_base: "https://ghe.example.test/api/v3/".to_string(),
            token: None,
            timeout_secs: 5,
        };
        let lister = GithubLister::new(&config, 1024).unwrap();
        assert_eq!(
            lister.contents_url("octo", "demo", "src").as_str(),
            "https://ghe.example.test/api/v3/repos/octo/demo/contents/src"
        );
        assert!(
            GithubLister::new(
                &SourceConfig {
                    api_base: "not a url".to_string(),
                    ..config
                },
                1024
            )
            .is_err()
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", lister());
        assert!(!debug.contains("ghp_secret"));
    }

    #[test]
    fn test_contents_response_shapes() {
        let listing: ContentsResponse = serde_json::from_str(
            r#"[{"name": "src", "path": "src", "type": "dir", "size": 0, "download_url": null},
                {"name": "a.rs", "path": "a.rs", "type": "file", "size": 12, "download_url": "https://raw/a.rs"}]"#,
        )
        .unwrap();
        assert!(matches!(listing, ContentsResponse::Listing(ref items) if items.len() == 2));

        let single: ContentsResponse = serde_json::from_str(
            r#"{"name": "a.rs", "path": "a.rs", "type": "file", "size": 12, "download_url": null}"#,
        )
        .unwrap();
        assert!(matches!(single, ContentsResponse::Single(_)));
    }

    #[tokio::test]
    async fn test_oversized_file_body_is_skipped() {
        let item = ContentItem {
            name: "big.bin".to_string(),
            path: "big.bin".to_string(),
            kind: "file".to_string(),
            size: 4096,
            download_url: Some("https://raw.example.test/big.bin".to_string()),
        };
        assert_eq!(lister().fetch_body(&item).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_symlinks_are_skipped() {
        let item = ContentItem {
            name: "link".to_string(),
            path: "link".to_string(),
            kind: "symlink".to_string(),
            size: 0,
            download_url: None,
        };
        assert!(lister().to_entry(item).await.unwrap().is_none());
    }
}
