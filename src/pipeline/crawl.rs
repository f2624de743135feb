//! Crawl stage: one directory level per job.
//!
//! Order per job: list, persist files, persist child directories, register
//! every child not yet enqueued with the crawl total, enqueue them and mark
//! them enqueued, then count this directory as completed and run the drain
//! check. Raising the total before enqueuing keeps `completed <= total` for
//! any interleaving.
//!
//! Fan-out is keyed by child path, not by which call inserted the row, so a
//! job redelivered after a partial fan-out picks up the children it missed.
//! A child enqueued twice is counted once.

use async_trait::async_trait;
use glob::Pattern;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use super::jobs::{self, CrawlJob};
use super::{PipelineContext, SharedContext};
use crate::queue::{JobContext, JobHandler};
use crate::source::{EntryKind, SourceEntry, looks_binary};
use crate::types::{IngestError, NewFile, Result, Stage};

// =============================================================================
// Exclusion
// =============================================================================

/// Compiled exclude globs, matched against repository paths
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<Pattern>,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    IngestError::Config(format!("Invalid exclude pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_excluded(&self, path: &str, kind: EntryKind) -> bool {
        // `dir/**` should also drop `dir` itself, so test a child path too
        let child = format!("{}/\0", path);
        self.patterns
            .iter()
            .any(|p| p.matches(path) || (kind == EntryKind::Dir && p.matches(&child)))
    }
}

// =============================================================================
// Handler
// =============================================================================

pub struct CrawlHandler {
    ctx: SharedContext,
}

impl CrawlHandler {
    pub fn new(ctx: SharedContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for CrawlHandler {
    async fn handle(&self, attempt: JobContext, payload: Value) -> Result<()> {
        let job: CrawlJob = jobs::from_payload(payload)?;
        process_directory(&self.ctx, &job, &attempt).await
    }
}

/// Run one crawl job, including failure accounting.
#[instrument(skip_all, fields(run_id = %job.run_id, path = %job.unit(), attempt = attempt.attempt))]
pub(crate) async fn process_directory(
    ctx: &PipelineContext,
    job: &CrawlJob,
    attempt: &JobContext,
) -> Result<()> {
    match ctx.db.run_status(&job.run_id)? {
        None => {
            warn!("Crawl job for unknown run, dropping");
            return Ok(());
        }
        Some(status) if status.is_terminal() => {
            debug!(status = %status, "Run is terminal, skipping directory");
            return finish_unit(ctx, job).await;
        }
        Some(_) => {}
    }

    match crawl_directory(ctx, job).await {
        Ok(children) => {
            debug!(children, "Directory crawled");
            finish_unit(ctx, job).await
        }
        Err(e) if e.is_recoverable() && !attempt.is_final_attempt() => {
            warn!(error = %e, "Directory listing failed, queue will retry");
            Err(e)
        }
        Err(e) => {
            error!(error = %e, category = %e.category(), "Crawl failed permanently");
            ctx.mark_failed(
                &job.run_id,
                &format!("crawl failed at '{}': {}", job.unit(), e),
            );
            finish_unit(ctx, job).await?;
            Err(e)
        }
    }
}

/// List, persist and fan out. Returns the number of child directories enqueued.
async fn crawl_directory(ctx: &PipelineContext, job: &CrawlJob) -> Result<usize> {
    let entries = ctx.source.list(&job.owner, &job.repo, &job.path).await?;

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    let mut skipped = 0usize;
    for entry in entries {
        if ctx.exclude.is_excluded(&entry.path, entry.kind) {
            skipped += 1;
            continue;
        }
        match entry.kind {
            EntryKind::Dir => dirs.push(entry.path),
            EntryKind::File => match ingestible(&entry, ctx.config.max_file_bytes) {
                Some(content) => files.push(NewFile::new(
                    &entry.path,
                    &entry.name,
                    content,
                    job.directory_id.clone(),
                )),
                None => skipped += 1,
            },
        }
    }

    let mut inserted = 0;
    for chunk in files.chunks(ctx.config.file_batch_size.max(1)) {
        inserted += ctx.db.insert_files(&job.run_id, chunk)?;
    }

    let parent_id = job.directory_id.as_deref();
    let created = ctx.db.insert_directories(&job.run_id, parent_id, &dirs)?;
    let pending = ctx.db.pending_child_directories(&job.run_id, parent_id)?;
    if pending.len() > created.len() {
        debug!(
            resumed = pending.len() - created.len(),
            "Re-enqueuing children of an earlier partial fan-out"
        );
    }

    if !pending.is_empty() {
        let units: Vec<String> = pending.iter().map(|dir| dir.path.clone()).collect();
        ctx.counters
            .register_units(&job.run_id, Stage::Crawl, &units)
            .await?;
    }

    for dir in &pending {
        let child = CrawlJob {
            run_id: job.run_id.clone(),
            owner: job.owner.clone(),
            repo: job.repo.clone(),
            path: dir.path.clone(),
            directory_id: Some(dir.id.clone()),
        };
        ctx.queue
            .enqueue(
                Stage::Crawl.queue_name(),
                jobs::to_payload(&child)?,
                ctx.job_options(),
            )
            .await?;
    }

    let ids: Vec<String> = pending.iter().map(|dir| dir.id.clone()).collect();
    ctx.db.mark_directories_enqueued(&ids)?;

    info!(
        files = inserted,
        directories = created.len(),
        enqueued = pending.len(),
        skipped,
        "Persisted directory level"
    );
    Ok(pending.len())
}

/// Content of a file worth ingesting
fn ingestible(entry: &SourceEntry, max_bytes: u64) -> Option<&str> {
    let content = entry.content.as_deref()?;
    if entry.size > max_bytes || content.len() as u64 > max_bytes {
        return None;
    }
    if looks_binary(content.as_bytes()) {
        return None;
    }
    Some(content)
}

/// Count this directory and run the drain check.
async fn finish_unit(ctx: &PipelineContext, job: &CrawlJob) -> Result<()> {
    ctx.counters
        .incr_completed(&job.run_id, Stage::Crawl, job.unit())
        .await?;

    if ctx.counters.try_complete(&job.run_id, Stage::Crawl).await? {
        ctx.advance_or_error(&job.run_id, Stage::Crawl).await;
    }
    Ok(())
}
