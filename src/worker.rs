use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::error::{PipelineError, Result};
use crate::resize::{self, size_label};
use crate::store::{ImageRecordStore, JobQueue, JobStatusStore, ObjectStore};
use crate::{Job, JobStatus, ResolutionResult};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to sleep when the queue comes up empty.
    pub poll_interval: Duration,
    /// Upper bound on each storage call and on the transform step.
    pub op_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            poll_interval: Duration::from_secs(2),
            op_timeout: Duration::from_secs(30),
        }
    }
}

/// One resize worker. Processes a single job at a time to completion;
/// several workers may run against the same queue and stores.
#[derive(Clone)]
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    statuses: Arc<dyn JobStatusStore>,
    records: Arc<dyn ImageRecordStore>,
    objects: Arc<dyn ObjectStore>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        statuses: Arc<dyn JobStatusStore>,
        records: Arc<dyn ImageRecordStore>,
        objects: Arc<dyn ObjectStore>,
        config: WorkerConfig,
    ) -> Self {
        Worker {
            queue,
            statuses,
            records,
            objects,
            config,
        }
    }

    /// Polls the queue until cancelled, idling for `poll_interval`
    /// whenever it comes up empty or unreachable.
    pub async fn run(&self, cancel_token: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Worker cancelled");
                    break;
                },
                polled = self.poll_once() => {
                    match polled {
                        Ok(true) => {},
                        Ok(false) => self.idle(&cancel_token).await,
                        Err(err) => {
                            warn!(error = %err, "Queue poll failed, retrying after idle interval");
                            self.idle(&cancel_token).await;
                        }
                    }
                }
            }
        }
        info!("Worker stopped.");
    }

    /// Claims and processes at most one job; returns whether one was
    /// available.
    pub async fn poll_once(&self) -> Result<bool> {
        match self.queue.dequeue().await? {
            Some(job) => {
                self.handle(job).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn idle(&self, cancel_token: &CancellationToken) {
        tokio::select! {
            _ = cancel_token.cancelled() => {},
            _ = sleep(self.config.poll_interval) => {},
        }
    }

    // The dequeued job stays in scope for the whole attempt, so the
    // failure path always marks the job actually being processed.
    async fn handle(&self, job: Job) {
        info!(job_id = %job.id, image_id = %job.image_id, "Processing job");

        match self.process(&job).await {
            Ok(()) => {
                info!(job_id = %job.id, "Job completed");
            }
            Err(err) => {
                error!(job_id = %job.id, error = %err, "Job failed");
                self.record_failure(&job, &err).await;
            }
        }
    }

    async fn process(&self, job: &Job) -> Result<()> {
        self.statuses
            .set_status(job.id, JobStatus::Processing)
            .await?;
        self.records.mark_processing(job.image_id).await?;

        let original = timeout(self.config.op_timeout, self.objects.get(&job.original_path))
            .await
            .map_err(|_| {
                PipelineError::Storage(format!("download of {} timed out", job.original_path))
            })??;

        let variants = timeout(self.config.op_timeout, resize::transform_async(original))
            .await
            .map_err(|_| PipelineError::Transform("resize timed out".into()))??;

        let ext = extension(&job.original_name);
        let mut sizes = HashMap::with_capacity(variants.len());
        for (name, variant) in variants {
            let key = format!("{}/{}/{}{}", name, job.user_id, job.image_id, ext);
            let len = variant.data.len();
            let url = timeout(
                self.config.op_timeout,
                self.objects.put(&key, variant.data, "image/jpeg"),
            )
            .await
            .map_err(|_| PipelineError::Storage(format!("upload of {key} timed out")))??;

            sizes.insert(
                name.clone(),
                ResolutionResult {
                    url,
                    width: variant.width,
                    height: variant.height,
                    size: size_label(&name, len),
                },
            );
        }

        self.records.mark_complete(job.image_id, &sizes).await?;
        self.statuses
            .set_status(job.id, JobStatus::Complete)
            .await?;
        // Acknowledge last: a crash before this point leaves the job
        // claimable again after requeue
        self.queue.complete(job.id).await?;

        Ok(())
    }

    /// Best-effort terminal writes for `job`. Secondary failures here are
    /// logged, never propagated; the loop must survive them.
    async fn record_failure(&self, job: &Job, cause: &PipelineError) {
        let message = cause.to_string();

        if let Err(err) = self.queue.fail(job.id, &message).await {
            warn!(job_id = %job.id, error = %err, "Failed to record failure in queue");
        }
        if let Err(err) = self.statuses.set_status(job.id, JobStatus::Failed).await {
            warn!(job_id = %job.id, error = %err, "Failed to record failure in status store");
        }
        if let Err(err) = self.records.mark_failed(job.image_id, &message).await {
            warn!(
                job_id = %job.id,
                image_id = %job.image_id,
                error = %err,
                "Failed to record failure in image record"
            );
        }
    }
}

fn extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        assert_eq!(extension("photo.jpg"), ".jpg");
        assert_eq!(extension("archive.tar.png"), ".png");
        assert_eq!(extension("noext"), "");
    }
}
