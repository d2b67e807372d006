use serde::{Deserialize, Serialize};

/// Role of a prompt message as submitted to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// One entry of the final ordered message list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

/// One turn of the conversation history feeding the assembler.
pub type HistoryMessage = reverie_core::types::ConversationTurn;

/// Message inside a cross-channel group. Chronological within its group.
pub type CrossChannelMessage = reverie_core::types::PriorChannelMessage;

/// Prior conversation from another channel, most recent channel first.
pub type CrossChannelGroup = reverie_core::types::PriorChannelGroup;
