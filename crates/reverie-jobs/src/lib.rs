pub mod dedup;
pub mod error;
pub mod planner;
pub mod queue;
pub mod repo;
pub mod results;
pub mod types;

pub use dedup::{fingerprint, DedupEntry, DeduplicationCache};
pub use error::JobError;
pub use planner::{enqueue_plan, generation_job_id, plan_request, result_key};
pub use queue::{JobQueue, QueueLane, QueuedJob, RedisJobQueue};
pub use repo::{run_stuck_job_sweeper, DeliveryOutcome, JobRepo, STUCK_JOB_ERROR};
pub use results::{RedisResultStore, ResultStore};
pub use types::{
    AudioJobData, GenerationJobData, ImageDescriptionResult, ImageJobData, JobPlan,
    LlmGenerationResult, ResultStatus, TranscriptionResult,
};
