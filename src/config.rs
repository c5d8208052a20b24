use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{RelayError, RelayResult};

/// Environment variable consulted when no credential is configured
pub const CREDENTIAL_ENV_VAR: &str = "ELEVENLABS_API_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Conversational speech service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Credential passed to the speech service
    pub api_key: Option<String>,
    /// WebSocket endpoint of the conversation API
    pub url: String,
    /// Agent to converse with (sent as the `agent_id` query parameter when set)
    pub agent_id: Option<String>,
    pub system_prompt: String,
    /// Opening utterance spoken by the agent
    pub first_message: String,
    /// BCP-47 style language tag, e.g. "en"
    pub language: String,
    pub voice_id: String,
    pub connect_timeout_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: "wss://api.elevenlabs.io/v1/convai/conversation".to_string(),
            agent_id: None,
            system_prompt: "You are a friendly voice assistant. Keep answers short and conversational."
                .to_string(),
            first_message: "Hi! How can I help you today?".to_string(),
            language: "en".to_string(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl VoiceConfig {
    /// Whether a non-empty credential is available
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }

    /// The credential, or a configuration error if none is set
    pub fn credential(&self) -> RelayResult<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                RelayError::Configuration(format!(
                    "voice service credential is not set (configure voice.api_key or {})",
                    CREDENTIAL_ENV_VAR
                ))
            })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Stream ingestion backend settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Network origin of the backend, e.g. "https://app.example.com"
    pub origin: String,
    /// Route to a local development backend instead of `origin`
    pub dev_mode: bool,
    pub dev_port: u16,
    /// Reconnect attempts after the channel drops (0 disables reconnection)
    pub reconnection_attempts: u32,
    pub reconnection_delay_ms: u64,
    /// Deadline for each acknowledgement; unset waits indefinitely
    pub ack_timeout_secs: Option<u64>,
    /// Bytes per chunk when uploading a file from the CLI
    pub chunk_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
            dev_mode: false,
            dev_port: 3001,
            reconnection_attempts: 5,
            reconnection_delay_ms: 1000,
            ack_timeout_secs: None,
            chunk_size: 64 * 1024,
        }
    }
}

impl UploadConfig {
    /// Backend origin the channel connects to
    pub fn endpoint(&self) -> String {
        if self.dev_mode {
            format!("http://localhost:{}", self.dev_port)
        } else {
            self.origin.trim_end_matches('/').to_string()
        }
    }

    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Load configuration from an optional file at `path`, overlaid with
    /// `VOICELINK_*` environment variables (`__` separates nested keys)
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("VOICELINK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: Config = settings.try_deserialize()?;
        cfg.apply_credential_env();

        Ok(cfg)
    }

    fn apply_credential_env(&mut self) {
        if !self.voice.is_configured() {
            if let Ok(key) = std::env::var(CREDENTIAL_ENV_VAR) {
                self.voice.api_key = Some(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_not_configured_by_default() {
        let cfg = VoiceConfig::default();
        assert!(!cfg.is_configured());
        assert!(matches!(cfg.credential(), Err(RelayError::Configuration(_))));
    }

    #[test]
    fn test_blank_credential_is_not_configured() {
        let cfg = VoiceConfig {
            api_key: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!cfg.is_configured());
    }

    #[test]
    fn test_credential_present() {
        let cfg = VoiceConfig {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        assert!(cfg.is_configured());
        assert_eq!(cfg.credential().unwrap(), "sk-test");
    }

    #[test]
    fn test_upload_endpoint_uses_origin() {
        let cfg = UploadConfig {
            origin: "https://ingest.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.endpoint(), "https://ingest.example.com");
    }

    #[test]
    fn test_upload_endpoint_dev_override() {
        let cfg = UploadConfig {
            origin: "https://ingest.example.com".to_string(),
            dev_mode: true,
            dev_port: 4100,
            ..Default::default()
        };
        assert_eq!(cfg.endpoint(), "http://localhost:4100");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let cfg = Config::load("/nonexistent/voicelink-config").unwrap();
        assert_eq!(cfg.voice.language, "en");
        assert_eq!(cfg.upload.reconnection_attempts, 5);
    }
}
