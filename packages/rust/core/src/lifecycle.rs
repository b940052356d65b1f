//! Ingestion job lifecycle.
//!
//! A job moves `pending/queued → processing/parsing → processing/uploading →
//! completed/done`, or ends early in `failed` or `cancelled`. Status and step
//! are always written together through a guarded store transition that
//! refuses to touch terminal jobs, so a cancel racing the worker is seen by
//! the worker as a refused transition.
//!
//! Cancellation is cooperative: the worker only looks for it before parsing
//! starts and between parsing and uploading.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use conceptgraph_extraction::SourceFormat;
use conceptgraph_graph::{GraphStore, RelationPolicy, upload};
use conceptgraph_shared::{
    ConceptGraphError, IngestionJob, JobId, JobStatus, JobStep, Result,
};
use conceptgraph_storage::Storage;

use crate::pipeline::DocumentParser;

// ---------------------------------------------------------------------------
// Job store seam
// ---------------------------------------------------------------------------

/// Persistence the controller and the progress feed need.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &IngestionJob) -> Result<()>;

    async fn get_job(&self, id: &JobId) -> Result<Option<IngestionJob>>;

    /// Write status and step together unless the job is terminal.
    /// Returns `false` when nothing changed.
    async fn transition_job(
        &self,
        id: &JobId,
        status: JobStatus,
        step: JobStep,
        error: Option<&str>,
    ) -> Result<bool>;
}

#[async_trait]
impl JobStore for Storage {
    async fn insert_job(&self, job: &IngestionJob) -> Result<()> {
        Storage::insert_job(self, job).await
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<IngestionJob>> {
        Storage::get_job(self, id).await
    }

    async fn transition_job(
        &self,
        id: &JobId,
        status: JobStatus,
        step: JobStep,
        error: Option<&str>,
    ) -> Result<bool> {
        Storage::transition_job(self, id, status, step, error).await
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// How a worker run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The job had already ended; nothing changed.
    AlreadyTerminal(JobStatus),
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Creates, runs and cancels ingestion jobs.
#[derive(Clone)]
pub struct TaskController {
    jobs: Arc<dyn JobStore>,
    graph: Arc<dyn GraphStore>,
    parser: Arc<DocumentParser>,
    policy: Arc<RelationPolicy>,
}

impl TaskController {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        graph: Arc<dyn GraphStore>,
        parser: DocumentParser,
        policy: RelationPolicy,
    ) -> Self {
        Self {
            jobs,
            graph,
            parser: Arc::new(parser),
            policy: Arc::new(policy),
        }
    }

    /// Record a new `pending/queued` job for `path` without running it.
    pub async fn create(&self, path: &Path) -> Result<IngestionJob> {
        SourceFormat::from_path(path)?;
        if !path.is_file() {
            return Err(ConceptGraphError::validation(format!(
                "source file not found: {}",
                path.display()
            )));
        }

        let now = Utc::now();
        let job = IngestionJob {
            id: JobId::new(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source_path: path.to_string_lossy().into_owned(),
            status: JobStatus::Pending,
            step: JobStep::Queued,
            worker_token: Uuid::now_v7().simple().to_string(),
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.insert_job(&job).await?;
        info!(job_id = %job.id, file = %job.file_name, "job created");
        Ok(job)
    }

    /// Create a job and run it on its own tokio task.
    pub async fn submit(&self, path: &Path) -> Result<JobId> {
        let job = self.create(path).await?;
        let id = job.id;
        let controller = self.clone();
        tokio::spawn(async move {
            match controller.run(&id).await {
                Ok(outcome) => info!(job_id = %id, ?outcome, "worker finished"),
                Err(e) if e.is_lifecycle_report() => warn!(job_id = %id, error = %e, "worker skipped"),
                Err(e) => error!(job_id = %id, error = %e, "job failed"),
            }
        });
        Ok(id)
    }

    /// Drive one job through parsing and uploading.
    ///
    /// Processing failures mark the job `failed` before the error is returned.
    #[instrument(skip_all, fields(job_id = %id))]
    pub async fn run(&self, id: &JobId) -> Result<RunOutcome> {
        let start = Instant::now();

        // --- Checkpoint: before parsing ---
        let job = self.load(id).await?;
        match job.status {
            JobStatus::Cancelled => {
                info!("job cancelled before start");
                return Ok(RunOutcome::Cancelled);
            }
            status if status.is_terminal() => {
                return Err(ConceptGraphError::JobAlreadyTerminal {
                    id: id.to_string(),
                    status,
                });
            }
            _ => {}
        }

        if !self.advance(id, JobStatus::Processing, JobStep::Parsing).await? {
            return Ok(RunOutcome::Cancelled);
        }

        // --- Stage: parsing ---
        let parsed = match self.parser.parse(Path::new(&job.source_path)).await {
            Ok(parsed) => parsed,
            Err(e) => return Err(self.fail(id, JobStep::Parsing, e).await),
        };

        // --- Checkpoint: before uploading ---
        let current = match self.load(id).await {
            Ok(current) => current,
            Err(e) => return Err(self.fail(id, JobStep::Parsing, e).await),
        };
        if current.status == JobStatus::Cancelled {
            info!("job cancelled after parsing");
            return Ok(RunOutcome::Cancelled);
        }

        match self.advance(id, JobStatus::Processing, JobStep::Uploading).await {
            Ok(true) => {}
            Ok(false) => return Ok(RunOutcome::Cancelled),
            Err(e) => return Err(self.fail(id, JobStep::Parsing, e).await),
        }

        // --- Stage: uploading ---
        let stats = match upload(self.graph.as_ref(), &parsed.tree, &self.policy).await {
            Ok(stats) => stats,
            Err(e) => return Err(self.fail(id, JobStep::Uploading, e).await),
        };

        match self.advance(id, JobStatus::Completed, JobStep::Done).await {
            Ok(true) => {}
            Ok(false) => return Ok(RunOutcome::Cancelled),
            Err(e) => return Err(self.fail(id, JobStep::Uploading, e).await),
        }

        info!(
            nodes = stats.nodes,
            relationships = stats.relationships,
            elapsed_ms = start.elapsed().as_millis(),
            "job completed"
        );
        Ok(RunOutcome::Completed)
    }

    /// Move a pending or processing job to `cancelled`, keeping its step.
    pub async fn cancel(&self, id: &JobId) -> Result<CancelOutcome> {
        cancel_job(self.jobs.as_ref(), id).await
    }

    pub async fn status(&self, id: &JobId) -> Result<IngestionJob> {
        self.load(id).await
    }

    async fn load(&self, id: &JobId) -> Result<IngestionJob> {
        load_job(self.jobs.as_ref(), id).await
    }

    /// Guarded transition; `false` means a concurrent cancel won.
    async fn advance(&self, id: &JobId, status: JobStatus, step: JobStep) -> Result<bool> {
        let changed = self.jobs.transition_job(id, status, step, None).await?;
        if !changed {
            info!(%status, %step, "transition refused, job already ended");
        }
        Ok(changed)
    }

    /// Record `err` on the job and hand it back.
    async fn fail(&self, id: &JobId, step: JobStep, err: ConceptGraphError) -> ConceptGraphError {
        let message = err.to_string();
        match self
            .jobs
            .transition_job(id, JobStatus::Failed, step, Some(&message))
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(job_id = %id, "job ended before failure could be recorded"),
            Err(persist) => {
                warn!(job_id = %id, error = %persist, "could not record job failure")
            }
        }
        err
    }
}

/// Cancel without a controller; only the job store is needed.
pub async fn cancel_job(jobs: &dyn JobStore, id: &JobId) -> Result<CancelOutcome> {
    let job = load_job(jobs, id).await?;
    if job.status.is_terminal() {
        return Ok(CancelOutcome::AlreadyTerminal(job.status));
    }

    if jobs
        .transition_job(id, JobStatus::Cancelled, job.step, None)
        .await?
    {
        info!(job_id = %id, step = %job.step, "job cancelled");
        return Ok(CancelOutcome::Cancelled);
    }

    // The worker reached a terminal state between the read and the write.
    let current = load_job(jobs, id).await?;
    Ok(CancelOutcome::AlreadyTerminal(current.status))
}

async fn load_job(jobs: &dyn JobStore, id: &JobId) -> Result<IngestionJob> {
    jobs.get_job(id)
        .await?
        .ok_or_else(|| ConceptGraphError::JobNotFound { id: id.to_string() })
}
