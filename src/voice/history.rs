use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A transcript line as delivered to the transcript callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub role: String,
    pub text: String,
}

/// One entry of the conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Who spoke
    pub role: String,

    /// Transcribed text
    pub content: String,

    /// When this turn was received
    pub timestamp: DateTime<Utc>,
}

impl From<&Transcript> for ConversationTurn {
    fn from(transcript: &Transcript) -> Self {
        Self {
            role: transcript.role.clone(),
            content: transcript.text.clone(),
            timestamp: Utc::now(),
        }
    }
}
