pub mod config;
pub mod error;
pub mod retry;
pub mod types;
pub mod validate;

pub use config::ReverieConfig;
pub use error::{Result, ReverieError};
