use rust_socketio::Payload;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::channel::SocketChannel;
use super::messages::{
    check_ack, Location, StreamEnd, StreamIdentity, EVENT_CHUNK, EVENT_END,
    EVENT_START,
};
use crate::config::UploadConfig;
use crate::error::{RelayError, RelayResult};

/// Uploads live stream chunks to the ingestion backend
///
/// Owns at most one `SocketChannel`, opened lazily and reused while live.
pub struct StreamUploadClient {
    config: UploadConfig,
    channel: Option<SocketChannel>,
    session: Option<StreamIdentity>,
}

impl StreamUploadClient {
    pub fn new(config: UploadConfig) -> Self {
        Self {
            config,
            channel: None,
            session: None,
        }
    }

    /// Origin the channel connects to
    pub fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(SocketChannel::is_live)
    }

    /// Identity of the session started by the last successful `start_session`
    pub fn current_session(&self) -> Option<&StreamIdentity> {
        self.session.as_ref()
    }

    /// Return the live channel, opening a new one if there is none
    ///
    /// A channel that is not live (dropped by the server, or still waiting on
    /// the transport to reconnect) is closed and replaced.
    pub async fn connect(&mut self) -> RelayResult<&SocketChannel> {
        if self.channel.as_ref().is_some_and(|c| !c.is_live()) {
            debug!("Replacing stream channel that is not live");
            if let Some(stale) = self.channel.take() {
                stale.close().await;
            }
        }

        if self.channel.is_none() {
            let channel = SocketChannel::connect(&self.config).await?;
            self.channel = Some(channel);
        }

        self.channel.as_ref().ok_or(RelayError::NotConnected)
    }

    /// Open an upload session on the backend
    ///
    /// Resolves with the backend's acknowledgement body.
    pub async fn start_session(
        &mut self,
        user_id: u64,
        session_id: impl Into<String>,
        location: Location,
    ) -> RelayResult<Value> {
        let identity = StreamIdentity {
            user_id,
            session_id: session_id.into(),
            location,
        };
        let payload = serde_json::to_value(&identity)
            .map_err(|e| RelayError::Protocol(format!("failed to encode stream start: {}", e)))?;

        info!(
            "Starting stream session {} for user {}",
            identity.session_id, identity.user_id
        );

        let channel = self.connect().await?;
        let ack = check_ack(
            channel
                .emit_with_ack(EVENT_START, Payload::Text(vec![payload]))
                .await?,
        )?;

        self.session = Some(identity);
        Ok(ack)
    }

    /// Upload one chunk of stream data
    ///
    /// Fails with `RelayError::NotConnected` without touching the network if
    /// no channel is live.
    pub async fn upload_chunk(&self, chunk: &[u8]) -> RelayResult<Value> {
        let channel = self.live_channel()?;

        debug!("Uploading chunk ({} bytes)", chunk.len());
        let ack = channel
            .emit_with_ack(EVENT_CHUNK, Payload::Binary(chunk.to_vec().into()))
            .await?;
        check_ack(ack)
    }

    /// Finish (or cancel) the current upload session
    pub async fn end_session(&mut self, cancelled: bool) -> RelayResult<Value> {
        let payload = serde_json::to_value(StreamEnd { cancelled })
            .map_err(|e| RelayError::Protocol(format!("failed to encode stream end: {}", e)))?;

        let ack = check_ack(
            self.live_channel()?
                .emit_with_ack(EVENT_END, Payload::Text(vec![payload]))
                .await?,
        )?;

        match self.session.take() {
            Some(identity) => info!(
                "Stream session {} {}",
                identity.session_id,
                if cancelled { "cancelled" } else { "ended" }
            ),
            None => warn!("Ended a stream session that was not started by this client"),
        }

        Ok(ack)
    }

    /// Tear down the channel. Safe to call when already disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(channel) = self.channel.take() {
            info!("Disconnecting stream upload client");
            channel.close().await;
        }
    }

    fn live_channel(&self) -> RelayResult<&SocketChannel> {
        self.channel
            .as_ref()
            .filter(|c| c.is_live())
            .ok_or(RelayError::NotConnected)
    }
}
