pub mod assembler;
pub mod crosschannel;
pub mod format;
pub mod memories;
pub mod mentions;
pub mod tokens;
pub mod types;

pub use assembler::{assemble, AssembleInput, AssembledPrompt, AssemblyStats};
pub use tokens::count_text_tokens;
pub use types::{CrossChannelGroup, CrossChannelMessage, HistoryMessage, PromptMessage, PromptRole};
