pub mod error;
pub mod invalidation;
pub mod merge;
pub mod persona;
pub mod resolver;
pub mod types;

pub use error::SettingsError;
pub use invalidation::{run_invalidation_listener, CacheInvalidate};
pub use persona::{run_persona_cache_sweeper, PersonaChoice, PersonaResolver};
pub use merge::{merge_config_overrides, MergeOutcome};
pub use resolver::{run_cache_sweeper, LlmConfigResolver, SettingsStore};
pub use types::{ConfigTier, ResolutionSource, ResolvedLlmConfig};
