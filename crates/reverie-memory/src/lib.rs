pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub mod directory;

pub use directory::{UserDirectory, UserRef};
pub use error::MemoryError;
pub use store::{run_outbox_sweeper, MemoryStore};
pub use types::{CanonScope, MemoryQuery, NewMemory, PendingMemory, RetrievedMemory};
