//! Redis-backed job status records.
//!
//! One key per job (`job:{id}`), overwritten with a fresh TTL on every
//! transition and garbage-collected by expiry, never deleted explicitly.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::store::JobStatusStore;
use crate::JobStatus;

/// Records expire after 24 hours; a missing key reads as unknown/expired.
const STATUS_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Serialize, Deserialize)]
struct StatusPayload {
    status: JobStatus,
}

#[derive(Clone)]
pub struct StatusStore {
    manager: ConnectionManager,
}

impl StatusStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;

        Ok(StatusStore { manager })
    }

    fn key(job_id: Uuid) -> String {
        format!("job:{job_id}")
    }
}

#[async_trait]
impl JobStatusStore for StatusStore {
    async fn set_status(&self, job_id: Uuid, status: JobStatus) -> Result<()> {
        let payload = serde_json::to_string(&StatusPayload { status })
            .map_err(|e| PipelineError::StatusStore(e.to_string()))?;

        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(Self::key(job_id), payload, STATUS_TTL_SECS)
            .await?;

        Ok(())
    }

    async fn get_status(&self, job_id: Uuid) -> Result<Option<JobStatus>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(Self::key(job_id)).await?;

        // An unparseable payload reads the same as an expired key
        Ok(raw
            .and_then(|raw| serde_json::from_str::<StatusPayload>(&raw).ok())
            .map(|payload| payload.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_payload_wire_shape() {
        let payload = serde_json::to_string(&StatusPayload {
            status: JobStatus::Processing,
        })
        .unwrap();
        assert_eq!(payload, r#"{"status":"processing"}"#);

        let parsed: StatusPayload = serde_json::from_str(r#"{"status":"complete"}"#).unwrap();
        assert_eq!(parsed.status, JobStatus::Complete);
    }
}
