//! Redis-stream job queue with consumer groups.
//!
//! Producers append; consumers read through a consumer group and ack after
//! processing, giving at-least-once semantics. Duplicate consumption is
//! tolerated because generation output is content-addressed on the request
//! id.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::debug;

use reverie_core::types::{Job, JobKind};

use crate::error::{JobError, Result};

/// Preprocessing and generation scale independently, so they ride separate
/// streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLane {
    Preprocessing,
    Generation,
}

impl QueueLane {
    pub fn stream(self) -> &'static str {
        match self {
            QueueLane::Preprocessing => "jobs:preprocessing",
            QueueLane::Generation => "jobs:generation",
        }
    }

    pub fn for_kind(kind: JobKind) -> Self {
        match kind {
            JobKind::LlmGeneration => QueueLane::Generation,
            _ => QueueLane::Preprocessing,
        }
    }
}

const CONSUMER_GROUP: &str = "reverie-workers";

/// A job pulled from a stream, with the entry id needed for the ack.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub stream_id: String,
    pub job: Job,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job to its lane.
    async fn enqueue(&self, job: &Job) -> Result<()>;

    /// Block up to `block_ms` for the next job on a lane.
    async fn next(&self, lane: QueueLane, consumer: &str, block_ms: u64)
        -> Result<Option<QueuedJob>>;

    /// Acknowledge a processed entry.
    async fn ack(&self, lane: QueueLane, stream_id: &str) -> Result<()>;
}

pub struct RedisJobQueue {
    manager: ConnectionManager,
}

impl RedisJobQueue {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Create the consumer groups. BUSYGROUP replies (group exists) are
    /// fine.
    pub async fn ensure_groups(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        for lane in [QueueLane::Preprocessing, QueueLane::Generation] {
            let created: std::result::Result<(), redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(lane.stream())
                .arg(CONSUMER_GROUP)
                .arg("$")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;
            if let Err(e) = created {
                if !e.to_string().contains("BUSYGROUP") {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        let mut conn = self.manager.clone();
        let lane = QueueLane::for_kind(job.kind);
        let payload = serde_json::to_string(job)?;
        let _: String = conn
            .xadd(lane.stream(), "*", &[("job", payload.as_str())])
            .await?;
        debug!(job_id = %job.id, kind = %job.kind, stream = lane.stream(), "job enqueued");
        Ok(())
    }

    async fn next(
        &self,
        lane: QueueLane,
        consumer: &str,
        block_ms: u64,
    ) -> Result<Option<QueuedJob>> {
        let mut conn = self.manager.clone();
        let opts = StreamReadOptions::default()
            .group(CONSUMER_GROUP, consumer)
            .count(1)
            .block(block_ms as usize);
        let reply: StreamReadReply = conn
            .xread_options(&[lane.stream()], &[">"], &opts)
            .await?;

        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let raw: Option<String> = entry.get("job");
                let Some(raw) = raw else { continue };
                let job: Job = serde_json::from_str(&raw)
                    .map_err(|e| JobError::Validation(format!("bad job payload: {e}")))?;
                return Ok(Some(QueuedJob {
                    stream_id: entry.id.clone(),
                    job,
                }));
            }
        }
        Ok(None)
    }

    async fn ack(&self, lane: QueueLane, stream_id: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .xack(lane.stream(), CONSUMER_GROUP, &[stream_id])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_routing_by_kind() {
        assert_eq!(
            QueueLane::for_kind(JobKind::LlmGeneration),
            QueueLane::Generation
        );
        for kind in [
            JobKind::AudioTranscription,
            JobKind::ImageDescription,
            JobKind::ShapesImport,
        ] {
            assert_eq!(QueueLane::for_kind(kind), QueueLane::Preprocessing);
        }
    }

    #[test]
    fn lanes_map_to_distinct_streams() {
        assert_ne!(
            QueueLane::Preprocessing.stream(),
            QueueLane::Generation.stream()
        );
    }
}
