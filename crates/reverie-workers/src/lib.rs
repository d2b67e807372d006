pub mod audio;
pub mod duplicate;
pub mod generation;
pub mod image;
pub mod import;
pub mod pool;
pub mod provider;
pub mod reasoning;
pub mod vision;

pub use generation::GenerationWorker;
pub use pool::{run_pool, GenerationHandler, JobHandler, PreprocessingHandler};
pub use provider::{ChatRequest, ChatResponse, LlmProvider, OpenAiCompatProvider, ProviderError};
pub use reasoning::{ReasoningFamily, ReasoningRules};
