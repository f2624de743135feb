//! Test fixtures: an in-memory pipeline context with scripted collaborators.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Pipeline, PipelineContext, Services, SharedContext};
use crate::ai::ManualClock;
use crate::ai::provider::scripted::ScriptedProvider;
use crate::config::Config;
use crate::notify::Notifier;
use crate::progress::{CounterStore, InMemoryCounterStore, Reservation, SharedCounterStore, StageProgress};
use crate::source::mock::MockSource;
use crate::storage::Database;
use crate::types::{IngestError, Result, RunId, RunStatus, Stage};

pub(crate) struct Harness {
    pub ctx: SharedContext,
    pub source: Arc<MockSource>,
    pub provider: Arc<ScriptedProvider>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Context without workers over a mock tree built from `files`
    pub fn new(files: &[(&str, &str)], answer: fn(&str) -> String) -> Self {
        Self::with_source(MockSource::with_files(files), answer, |_| {})
    }

    pub fn with_source(
        source: MockSource,
        answer: fn(&str) -> String,
        configure: impl FnOnce(&mut Config),
    ) -> Self {
        Self::build(source, answer, Arc::new(InMemoryCounterStore::new()), configure)
    }

    /// Context without workers over a custom counter store
    pub fn with_counters(
        source: MockSource,
        answer: fn(&str) -> String,
        counters: SharedCounterStore,
    ) -> Self {
        Self::build(source, answer, counters, |_| {})
    }

    fn build(
        source: MockSource,
        answer: fn(&str) -> String,
        counters: SharedCounterStore,
        configure: impl FnOnce(&mut Config),
    ) -> Self {
        let (config, services, parts) = Self::parts(source, answer, counters, configure);
        let ctx = PipelineContext::new(&config, services).unwrap();
        parts.into_harness(Arc::new(ctx))
    }

    /// Full pipeline with registered workers
    pub fn running(
        source: MockSource,
        answer: fn(&str) -> String,
        configure: impl FnOnce(&mut Config),
    ) -> (Self, Pipeline) {
        Self::start(source, answer, Arc::new(InMemoryCounterStore::new()), configure)
    }

    pub fn running_with_counters(
        source: MockSource,
        answer: fn(&str) -> String,
        counters: SharedCounterStore,
    ) -> (Self, Pipeline) {
        Self::start(source, answer, counters, |_| {})
    }

    fn start(
        source: MockSource,
        answer: fn(&str) -> String,
        counters: SharedCounterStore,
        configure: impl FnOnce(&mut Config),
    ) -> (Self, Pipeline) {
        let (config, services, parts) = Self::parts(source, answer, counters, configure);
        let pipeline = Pipeline::start(&config, services).unwrap();
        let harness = parts.into_harness(pipeline.context().clone());
        (harness, pipeline)
    }

    fn parts(
        source: MockSource,
        answer: fn(&str) -> String,
        counters: SharedCounterStore,
        configure: impl FnOnce(&mut Config),
    ) -> (Config, Services, Parts) {
        let mut config = fast_config();
        configure(&mut config);

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let parts = Parts {
            source: Arc::new(source),
            provider: Arc::new(ScriptedProvider::new(answer)),
            clock: Arc::new(ManualClock::new(0)),
        };
        let services = Services {
            db: Arc::new(db),
            counters,
            source: parts.source.clone(),
            provider: parts.provider.clone(),
            notifier: Notifier::spawn(),
            clock: Some(parts.clock.clone()),
        };
        (config, services, parts)
    }

    /// A run in the state `start_run` leaves it, minus the root job
    pub async fn processing_run(&self) -> String {
        let run_id = RunId::generate().into_inner();
        self.ctx.db.create_run(&run_id, "octo/demo").unwrap();
        self.ctx
            .db
            .update_run_status(&run_id, RunStatus::Processing, None)
            .unwrap();
        self.ctx
            .counters
            .incr_total(&run_id, Stage::Crawl, 1)
            .await
            .unwrap();
        run_id
    }
}

struct Parts {
    source: Arc<MockSource>,
    provider: Arc<ScriptedProvider>,
    clock: Arc<ManualClock>,
}

impl Parts {
    fn into_harness(self, ctx: SharedContext) -> Harness {
        Harness {
            ctx,
            source: self.source,
            provider: self.provider,
            clock: self.clock,
        }
    }
}

/// In-memory counters whose first `failures` fan-out registrations fail
/// the way a locked database does.
pub(crate) struct FlakyCounters {
    inner: InMemoryCounterStore,
    failures: AtomicUsize,
}

impl FlakyCounters {
    pub fn failing_fan_outs(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryCounterStore::new(),
            failures: AtomicUsize::new(failures),
        })
    }
}

#[async_trait]
impl CounterStore for FlakyCounters {
    async fn incr_total(&self, run_id: &str, stage: Stage, delta: u64) -> Result<u64> {
        self.inner.incr_total(run_id, stage, delta).await
    }

    async fn register_units(&self, run_id: &str, stage: Stage, units: &[String]) -> Result<u64> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(IngestError::Storage("database is locked".to_string()));
        }
        self.inner.register_units(run_id, stage, units).await
    }

    async fn incr_completed(&self, run_id: &str, stage: Stage, unit: &str) -> Result<u64> {
        self.inner.incr_completed(run_id, stage, unit).await
    }

    async fn try_complete(&self, run_id: &str, stage: Stage) -> Result<bool> {
        self.inner.try_complete(run_id, stage).await
    }

    async fn reset(&self, run_id: &str, stage: Stage, total: u64) -> Result<()> {
        self.inner.reset(run_id, stage, total).await
    }

    async fn snapshot(&self, run_id: &str, stage: Stage) -> Result<Option<StageProgress>> {
        self.inner.snapshot(run_id, stage).await
    }

    async fn clear_run(&self, run_id: &str) -> Result<()> {
        self.inner.clear_run(run_id).await
    }

    async fn check_and_reserve(
        &self,
        key: &str,
        amount: u64,
        limit: u64,
        ttl: Duration,
    ) -> Result<Reservation> {
        self.inner.check_and_reserve(key, amount, limit, ttl).await
    }

    async fn force(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        self.inner.force(key, value, ttl).await
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.pipeline.attempts = 3;
    config.pipeline.backoff_ms = 5;
    config.pipeline.max_ai_attempts = 3;
    config.pipeline.crawl_concurrency = 2;
    config.pipeline.batch_concurrency = 2;
    config.quota.wait_ms = 5;
    config.quota.backoff_ms = 5;
    config
}

/// Answers every prompt the pipeline sends with a well-formed reply.
///
/// Batch prompts get one object per `File:` line; the overview prompt gets
/// plain text.
pub(crate) fn summary_answer(prompt: &str) -> String {
    if prompt.contains("# File Summaries") {
        return "A small demo project with a single entry point.".to_string();
    }

    let field = if prompt.contains(r#""analysis": "<text>""#) {
        "analysis"
    } else {
        "summary"
    };
    let results: Vec<Value> = prompt
        .lines()
        .filter_map(|line| line.strip_prefix("File: "))
        .map(|path| {
            let mut object = Map::new();
            object.insert("path".to_string(), Value::from(path));
            object.insert(field.to_string(), Value::from(format!("{} of {}", field, path)));
            Value::Object(object)
        })
        .collect();
    Value::Array(results).to_string()
}

#[test]
fn test_summary_answer_follows_prompt() {
    let reply = summary_answer("rules: [{\"path\": \"<file path>\", \"analysis\": \"<text>\"}]\nFile: a.rs\nFile: b.rs");
    let parsed: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(parsed[0]["path"], "a.rs");
    assert_eq!(parsed[1]["analysis"], "analysis of b.rs");
}
