//! Provider double replaying queued responses.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{LlmProvider, LlmResponse};
use crate::types::{ErrorClassifier, IngestError, Result};

pub(crate) enum Scripted {
    Text(String),
    RateLimited,
    Fail(IngestError),
}

/// Replays scripted replies in order, then falls back to `fallback`.
///
/// The fallback receives the prompt, so tests can answer any batch.
pub(crate) struct ScriptedProvider {
    script: Mutex<VecDeque<Scripted>>,
    prompts: Mutex<Vec<String>>,
    fallback: Box<dyn Fn(&str) -> String + Send + Sync>,
}

impl ScriptedProvider {
    pub fn new(fallback: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            fallback: Box::new(fallback),
        }
    }

    pub fn push(&self, reply: Scripted) -> &Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Text(text)) => Ok(LlmResponse::text_only(text)),
            Some(Scripted::RateLimited) => Err(ErrorClassifier::classify_http_status(
                429,
                "Too Many Requests",
                "scripted",
            )
            .into()),
            Some(Scripted::Fail(err)) => Err(err),
            None => Ok(LlmResponse::text_only((self.fallback)(prompt))),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }
}
