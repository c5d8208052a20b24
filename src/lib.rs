pub mod config;
pub mod error;
pub mod upload;
pub mod voice;

pub use config::{Config, UploadConfig, VoiceConfig};
pub use error::{RelayError, RelayResult};
pub use upload::{Location, SocketChannel, StreamIdentity, StreamUploadClient};
pub use voice::{ConversationTurn, Transcript, VoiceSession};
