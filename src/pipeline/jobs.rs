//! Queue payloads.
//!
//! Every payload is a JSON object with a top-level `run_id`, which is what
//! cancellation matches on.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::types::{Result, Stage};

/// List one directory of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlJob {
    pub run_id: String,
    pub owner: String,
    pub repo: String,
    /// Directory path from the repository root; `""` is the root
    pub path: String,
    /// Row id of this directory; `None` for the root
    pub directory_id: Option<String>,
}

impl CrawlJob {
    /// Counter unit for this directory
    pub fn unit(&self) -> &str {
        if self.path.is_empty() { "/" } else { &self.path }
    }
}

/// Summarize or analyze one batch of files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    pub run_id: String,
    pub stage: Stage,
    /// Stable within a stage; also the counter unit
    pub batch_id: String,
    pub paths: Vec<String>,
}

pub fn to_payload<T: Serialize>(job: &T) -> Result<Value> {
    Ok(serde_json::to_value(job)?)
}

pub fn from_payload<T: DeserializeOwned>(payload: Value) -> Result<T> {
    Ok(serde_json::from_value(payload)?)
}

/// `run_id` of any pipeline payload
pub fn payload_run_id(payload: &Value) -> Option<&str> {
    payload.get("run_id").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_carries_run_id() {
        let job = BatchJob {
            run_id: "r1".to_string(),
            stage: Stage::Summary,
            batch_id: "summary-0".to_string(),
            paths: vec!["a.rs".to_string()],
        };
        let payload = to_payload(&job).unwrap();
        assert_eq!(payload_run_id(&payload), Some("r1"));
        assert_eq!(payload["stage"], "summary");
        assert_eq!(from_payload::<BatchJob>(payload).unwrap(), job);
    }

    #[test]
    fn test_root_unit() {
        let mut job = CrawlJob {
            run_id: "r".into(),
            owner: "o".into(),
            repo: "r".into(),
            path: String::new(),
            directory_id: None,
        };
        assert_eq!(job.unit(), "/");
        job.path = "src".into();
        assert_eq!(job.unit(), "src");
    }
}
