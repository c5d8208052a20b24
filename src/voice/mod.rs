//! Real-time voice conversation session
//!
//! `VoiceSession` relays local audio, text and context updates to a
//! conversational speech service over a WebSocket, and dispatches the
//! service's transcripts, audio and errors to registered callbacks.

mod history;
pub mod messages;
mod session;

pub use history::{ConversationTurn, Transcript};
pub use messages::{ClientMessage, ServerMessage};
pub use session::{
    AgentResponseCallback, AudioCallback, ErrorCallback, TranscriptCallback, VoiceSession,
};
