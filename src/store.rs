//! Seams between the worker loop and its collaborators.
//!
//! The queue and the three stores are injected into the worker as trait
//! objects so tests can substitute in-memory fakes for PostgreSQL, Redis
//! and S3.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::Result;
use crate::{ImageRecord, Job, JobRequest, JobStatus, ResolutionResult};

/// Durable handoff of resize jobs from producers to workers.
///
/// Delivery is at-least-once: a claimed job that never reaches a terminal
/// state is handed out again after worker restart, so downstream writes
/// must stay idempotent (they are last-write-wins on the job's own ids).
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, request: &JobRequest) -> Result<Uuid>;

    /// Atomically claims one pending job. No two consumers ever observe
    /// the same job; `None` when the pending set is empty.
    async fn dequeue(&self) -> Result<Option<Job>>;

    /// Acknowledges a claimed job as done.
    async fn complete(&self, job_id: Uuid) -> Result<()>;

    /// Acknowledges a claimed job as failed, keeping the cause.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()>;
}

/// Ephemeral, TTL'd job lifecycle records for polling clients.
#[async_trait]
pub trait JobStatusStore: Send + Sync {
    /// Overwrites the record with a fresh TTL.
    async fn set_status(&self, job_id: Uuid, status: JobStatus) -> Result<()>;

    /// `None` means unknown or expired, never an error.
    async fn get_status(&self, job_id: Uuid) -> Result<Option<JobStatus>>;
}

/// Durable per-image records with per-resolution results.
#[async_trait]
pub trait ImageRecordStore: Send + Sync {
    /// Producer-side insert of the initial `pending` record.
    async fn create(&self, record: &ImageRecord) -> Result<()>;

    /// Read-only polling surface.
    async fn get(&self, image_id: Uuid) -> Result<Option<ImageRecord>>;

    async fn mark_processing(&self, image_id: Uuid) -> Result<()>;

    /// Replaces `sizes` wholesale and stamps `processed_at`.
    async fn mark_complete(
        &self,
        image_id: Uuid,
        sizes: &HashMap<String, ResolutionResult>,
    ) -> Result<()>;

    /// Records the failure cause and stamps `processed_at`; `sizes` is
    /// left untouched.
    async fn mark_failed(&self, image_id: Uuid, error_message: &str) -> Result<()>;
}

/// Opaque blob storage. All underlying failures (auth, network, missing
/// key) surface as the single `Storage` error kind.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Stores the blob and returns its public URL.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<String>;
}
