use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Executor;
use tracing::debug;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::store::{ImageRecordStore, JobQueue};
use crate::{ImageRecord, Job, JobRequest, JobStatus, ResolutionResult};

/// PostgreSQL handle backing both the job queue and the image record
/// store. The schema is applied on connect.
#[derive(Clone)]
pub struct DbHandle {
    pool: Arc<PgPool>,
}

impl DbHandle {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(queue_err)?;

        (&pool)
            .execute(include_str!("setup.sql"))
            .await
            .map_err(queue_err)?;

        Ok(DbHandle {
            pool: Arc::new(pool),
        })
    }

    /// Flips `processing` rows left behind by a crashed worker back to
    /// `pending`. Called once at startup, before any worker runs.
    pub async fn requeue_stale(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE resize_queue \
                SET status = 'pending', \
                started_at = NULL \
            WHERE status = 'processing'",
        )
        .execute(&*self.pool)
        .await
        .map_err(queue_err)?;

        Ok(result.rows_affected())
    }
}

fn queue_err(err: sqlx::Error) -> PipelineError {
    PipelineError::QueueUnavailable(err.to_string())
}

fn record_err(err: sqlx::Error) -> PipelineError {
    PipelineError::RecordStore(err.to_string())
}

fn ensure_found(rows_affected: u64, image_id: Uuid) -> Result<()> {
    if rows_affected == 0 {
        Err(PipelineError::RecordNotFound(image_id.to_string()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl JobQueue for DbHandle {
    async fn enqueue(&self, request: &JobRequest) -> Result<Uuid> {
        let id = Uuid::new_v4();
        debug!(job_id = %id, image_id = %request.image_id, "Submitting resize job");

        sqlx::query(
            "INSERT INTO resize_queue \
            (id, image_id, user_id, original_path, original_name, status) \
            VALUES ($1, $2, $3, $4, $5, 'pending')",
        )
        .bind(id)
        .bind(request.image_id)
        .bind(&request.user_id)
        .bind(&request.original_path)
        .bind(&request.original_name)
        .execute(&*self.pool)
        .await
        .map_err(queue_err)?;

        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<Job>> {
        // SKIP LOCKED makes the claim atomic: concurrent workers never
        // select the same row
        let job = sqlx::query_as::<_, Job>(
            "UPDATE resize_queue \
                SET status = 'processing', \
                started_at = now() \
            WHERE id = ( \
                SELECT id FROM resize_queue \
                WHERE status = 'pending' \
                ORDER BY enqueued_at \
                LIMIT 1 \
                FOR UPDATE SKIP LOCKED) \
            RETURNING id, image_id, user_id, original_path, original_name, enqueued_at",
        )
        .fetch_optional(&*self.pool)
        .await
        .map_err(queue_err)?;

        Ok(job)
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE resize_queue \
                SET status = 'complete', \
                duration = extract(epoch from now() - started_at) \
            WHERE id = $1",
        )
        .bind(job_id)
        .execute(&*self.pool)
        .await
        .map_err(queue_err)?;

        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE resize_queue \
                SET status = 'failed', \
                duration = extract(epoch from now() - started_at), \
                error = $1 \
            WHERE id = $2",
        )
        .bind(error)
        .bind(job_id)
        .execute(&*self.pool)
        .await
        .map_err(queue_err)?;

        Ok(())
    }
}

/// Row shape of `image_records`; `sizes` is a JSONB map keyed by
/// resolution name.
#[derive(sqlx::FromRow)]
struct ImageRecordRow {
    id: Uuid,
    user_id: String,
    original_name: String,
    status: JobStatus,
    sizes: Json<HashMap<String, ResolutionResult>>,
    uploaded_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl From<ImageRecordRow> for ImageRecord {
    fn from(row: ImageRecordRow) -> Self {
        ImageRecord {
            image_id: row.id,
            user_id: row.user_id,
            original_name: row.original_name,
            status: row.status,
            sizes: row.sizes.0,
            uploaded_at: row.uploaded_at,
            processed_at: row.processed_at,
            error_message: row.error_message,
        }
    }
}

#[async_trait]
impl ImageRecordStore for DbHandle {
    async fn create(&self, record: &ImageRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO image_records \
            (id, user_id, original_name, status, sizes, uploaded_at) \
            VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.image_id)
        .bind(&record.user_id)
        .bind(&record.original_name)
        .bind(record.status)
        .bind(Json(&record.sizes))
        .bind(record.uploaded_at)
        .execute(&*self.pool)
        .await
        .map_err(record_err)?;

        Ok(())
    }

    async fn get(&self, image_id: Uuid) -> Result<Option<ImageRecord>> {
        let row = sqlx::query_as::<_, ImageRecordRow>(
            "SELECT id, user_id, original_name, status, sizes, uploaded_at, processed_at, error_message \
            FROM image_records \
            WHERE id = $1",
        )
        .bind(image_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(record_err)?;

        Ok(row.map(ImageRecord::from))
    }

    async fn mark_processing(&self, image_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE image_records \
                SET status = 'processing' \
            WHERE id = $1",
        )
        .bind(image_id)
        .execute(&*self.pool)
        .await
        .map_err(record_err)?;

        ensure_found(result.rows_affected(), image_id)
    }

    async fn mark_complete(
        &self,
        image_id: Uuid,
        sizes: &HashMap<String, ResolutionResult>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE image_records \
                SET status = 'complete', \
                sizes = $1, \
                processed_at = now(), \
                error_message = NULL \
            WHERE id = $2",
        )
        .bind(Json(sizes))
        .bind(image_id)
        .execute(&*self.pool)
        .await
        .map_err(record_err)?;

        ensure_found(result.rows_affected(), image_id)
    }

    async fn mark_failed(&self, image_id: Uuid, error_message: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE image_records \
                SET status = 'failed', \
                error_message = $1, \
                processed_at = now() \
            WHERE id = $2",
        )
        .bind(error_message)
        .bind(image_id)
        .execute(&*self.pool)
        .await
        .map_err(record_err)?;

        ensure_found(result.rows_affected(), image_id)
    }
}
