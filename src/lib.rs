use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod db;
pub mod error;
pub mod resize;
pub mod s3;
pub mod status;
pub mod store;
pub mod telemetry;
pub mod worker;

/// A resize request as submitted by a producer. The queue assigns the job
/// id and enqueue timestamp on insert.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub image_id: Uuid,
    pub user_id: String,
    pub original_path: String,
    pub original_name: String,
}

/// One unit of resize work. Immutable once enqueued; delivered to exactly
/// one worker per attempt.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub image_id: Uuid,
    pub user_id: String,
    pub original_path: String,
    pub original_name: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Lifecycle state shared by queue rows, job status records and image
/// records. `Complete` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

/// One stored output variant of an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Human-readable byte size, e.g. "12.34KB".
    pub size: String,
}

/// Durable per-image record, keyed by image id. Written only by the
/// pipeline; polling clients read it as-is.
///
/// `sizes` holds one entry per resolution name. The producer seeds it with
/// an `original` placeholder (zero dimensions); on completion the worker
/// replaces the whole map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_id: Uuid,
    pub user_id: String,
    pub original_name: String,
    pub status: JobStatus,
    pub sizes: HashMap<String, ResolutionResult>,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}
