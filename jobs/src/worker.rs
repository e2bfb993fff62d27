//! The background worker loop (component C4 step 1 + jobs orchestration):
//! dequeues an `IngestJob`, CAS-claims the document into `PROCESSING`, and
//! hands it to the ingestion pipeline. A lost CAS race (another worker
//! already claimed it, or the document was deleted) is silently skipped —
//! it is not this worker's job anymore.

use ingestion::processor::{job_deadline, IngestionPipeline};
use ragcore_core::model::DocumentStatus;
use ragcore_core::ports::{IngestJob, QueuePort};
use std::sync::Arc;
use std::time::Duration;
use storage::Repository;
use tracing::{debug, info, warn};

pub struct Worker {
    queue: Arc<dyn QueuePort>,
    repo: Arc<Repository>,
    pipeline: Arc<IngestionPipeline>,
    job_timeout: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn QueuePort>,
        repo: Arc<Repository>,
        pipeline: Arc<IngestionPipeline>,
    ) -> Self {
        Self {
            queue,
            repo,
            pipeline,
            job_timeout: ingestion::DEFAULT_JOB_TIMEOUT,
        }
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Runs until the queue is closed (`dequeue` returns `Ok(None)`).
    pub async fn run(self) {
        info!("ingestion worker started");
        loop {
            match self.queue.dequeue().await {
                Ok(Some(job)) => self.handle_job(job).await,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "queue dequeue failed, retrying");
                }
            }
        }
        info!("ingestion worker stopped");
    }

    async fn handle_job(&self, job: IngestJob) {
        let claim = self
            .repo
            .transition_document_status(
                job.document_id,
                DocumentStatus::Pending,
                DocumentStatus::Processing,
                None,
            )
            .await;

        match claim {
            Ok(_) => {
                debug!(document_id = %job.document_id, attempt = job.attempt, "claimed ingest job");
                let deadline = job_deadline(self.job_timeout);
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                match tokio::time::timeout(remaining, self.pipeline.process(job.document_id, deadline)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(document_id = %job.document_id, error = %err, "ingestion pipeline returned an error");
                    }
                    Err(_) => {
                        warn!(document_id = %job.document_id, timeout = ?self.job_timeout, "ingestion job exceeded its timeout");
                        self.pipeline.fail_timeout(job.document_id).await;
                    }
                }
            }
            Err(_) => {
                debug!(document_id = %job.document_id, "skipping job: document is not PENDING");
            }
        }
    }
}
