//! Bounded worker pools over the job queue.
//!
//! One pool per lane. Each pulled job is handled on its own task, with a
//! semaphore capping in-flight work; entries are acked after handling so
//! consumption stays at-least-once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use reverie_core::types::{Job, JobKind, JobState};
use reverie_jobs::planner::result_key;
use reverie_jobs::queue::{JobQueue, QueueLane};
use reverie_jobs::types::{AudioJobData, ImageJobData};
use reverie_jobs::{JobRepo, ResultStore};

use crate::audio::{process_audio_job, Transcriber};
use crate::generation::GenerationWorker;
use crate::image::{process_image_job, VisionDescriber};
use crate::import::{ImportJobData, ImportProcessor};

const POLL_BLOCK_MS: u64 = 5000;

/// Something that can run one job to completion. Never errors past the job
/// boundary — failures become failure results.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job);
}

/// Pull-handle-ack loop with bounded concurrency.
pub async fn run_pool(
    queue: Arc<dyn JobQueue>,
    lane: QueueLane,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    consumer: String,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(stream = lane.stream(), concurrency, "worker pool started");
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    loop {
        tokio::select! {
            next = queue.next(lane, &consumer, POLL_BLOCK_MS) => {
                match next {
                    Ok(Some(queued)) => {
                        let permit = match Arc::clone(&semaphore).acquire_owned().await {
                            Ok(p) => p,
                            Err(_) => break,
                        };
                        let queue = Arc::clone(&queue);
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            handler.handle(queued.job).await;
                            if let Err(e) = queue.ack(lane, &queued.stream_id).await {
                                warn!(stream_id = %queued.stream_id, err = %e, "ack failed");
                            }
                            drop(permit);
                        });
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(err = %e, "queue read failed; backing off");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(stream = lane.stream(), "worker pool shutting down");
                    break;
                }
            }
        }
    }
}

/// Handler for the preprocessing lane: transcription, image description,
/// and shapes imports.
pub struct PreprocessingHandler {
    pub transcriber: Arc<dyn Transcriber>,
    pub describer: Arc<dyn VisionDescriber>,
    pub importer: ImportProcessor,
    pub results: Arc<dyn ResultStore>,
    pub repo: Arc<JobRepo>,
    pub image_fanout: usize,
    pub fallback_vision_model: String,
}

impl PreprocessingHandler {
    async fn mark(&self, job_id: &str, state: JobState, error: Option<&str>) {
        if let Err(e) = self.repo.mark_state(job_id, state, error).await {
            warn!(job_id, err = %e, "job state update failed");
        }
    }

    async fn store(&self, key: &str, value: serde_json::Value) {
        if let Err(e) = self.results.put(key, &value).await {
            error!(key, err = %e, "preprocessing result write failed");
        }
    }
}

#[async_trait]
impl JobHandler for PreprocessingHandler {
    async fn handle(&self, job: Job) {
        self.mark(&job.id, JobState::Active, None).await;

        let (succeeded, error): (bool, Option<String>) = match job.kind {
            JobKind::AudioTranscription => {
                match serde_json::from_value::<AudioJobData>(job.data.clone()) {
                    Ok(data) => {
                        let result = process_audio_job(self.transcriber.as_ref(), &data).await;
                        let key = result_key(
                            &data.request_id,
                            JobKind::AudioTranscription,
                            Some(data.attachment_index),
                        );
                        let error = result.error.clone();
                        let ok = result.success;
                        self.store(&key, serde_json::json!(result)).await;
                        (ok, error)
                    }
                    Err(e) => (false, Some(format!("bad job payload: {e}"))),
                }
            }
            JobKind::ImageDescription => {
                match serde_json::from_value::<ImageJobData>(job.data.clone()) {
                    Ok(data) => {
                        let result = process_image_job(
                            self.describer.as_ref(),
                            &data,
                            self.image_fanout,
                            &self.fallback_vision_model,
                        )
                        .await;
                        let key = result_key(&data.request_id, JobKind::ImageDescription, None);
                        let error = result.error.clone();
                        let ok = result.success;
                        self.store(&key, serde_json::json!(result)).await;
                        (ok, error)
                    }
                    Err(e) => (false, Some(format!("bad job payload: {e}"))),
                }
            }
            JobKind::ShapesImport => {
                match serde_json::from_value::<ImportJobData>(job.data.clone()) {
                    Ok(data) => {
                        let summary = self.importer.process(&data).await;
                        let key = result_key(&data.request_id, JobKind::ShapesImport, None);
                        let error = summary.error.clone();
                        let ok = summary.success;
                        self.store(&key, serde_json::json!(summary)).await;
                        (ok, error)
                    }
                    Err(e) => (false, Some(format!("bad job payload: {e}"))),
                }
            }
            JobKind::LlmGeneration => {
                error!(job_id = %job.id, "generation job on preprocessing lane");
                (false, Some("misrouted job".to_string()))
            }
        };

        let final_state = if succeeded {
            JobState::Completed
        } else {
            JobState::Failed
        };
        self.mark(&job.id, final_state, error.as_deref()).await;
    }
}

/// Handler for the generation lane.
pub struct GenerationHandler {
    pub worker: Arc<GenerationWorker>,
    pub repo: Arc<JobRepo>,
}

#[async_trait]
impl JobHandler for GenerationHandler {
    async fn handle(&self, job: Job) {
        if let Err(e) = self.repo.mark_state(&job.id, JobState::Active, None).await {
            warn!(job_id = %job.id, err = %e, "job state update failed");
        }

        let result = self.worker.run(&job).await;

        let (state, error) = if result.success {
            (JobState::Completed, None)
        } else {
            (JobState::Failed, result.error.clone())
        };
        if let Err(e) = self.repo.mark_state(&job.id, state, error.as_deref()).await {
            warn!(job_id = %job.id, err = %e, "job state update failed");
        }
    }
}
