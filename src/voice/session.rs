use base64::Engine;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::history::{ConversationTurn, Transcript};
use super::messages::{decode_inbound, ClientMessage, InboundFrame, ServerMessage};
use crate::config::VoiceConfig;
use crate::error::{RelayError, RelayResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `disconnect` waits for the socket task to flush its close frame
const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub type AudioCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
pub type TranscriptCallback = Arc<dyn Fn(Transcript) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(RelayError) + Send + Sync>;
pub type AgentResponseCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Clone, Default)]
struct Handlers {
    audio: Option<AudioCallback>,
    transcript: Option<TranscriptCallback>,
    error: Option<ErrorCallback>,
    agent_response: Option<AgentResponseCallback>,
}

impl Handlers {
    fn emit_audio(&self, audio: Vec<u8>) {
        if let Some(cb) = &self.audio {
            cb(audio);
        }
    }

    fn emit_transcript(&self, transcript: Transcript) {
        if let Some(cb) = &self.transcript {
            cb(transcript);
        }
    }

    fn emit_error(&self, err: RelayError) {
        if let Some(cb) = &self.error {
            cb(err);
        }
    }

    fn emit_agent_response(&self, text: String) {
        if let Some(cb) = &self.agent_response {
            cb(text);
        }
    }
}

/// A real-time conversation with the speech service over one WebSocket
///
/// Outbound calls are fire-and-forget and silently dropped while
/// disconnected. Inbound frames are dispatched on their `type` tag to the
/// registered callbacks; callbacks are captured when `connect` is called.
pub struct VoiceSession {
    /// Service settings, including the credential
    config: VoiceConfig,

    /// Whether the socket is currently open
    connected: Arc<AtomicBool>,

    /// Transcript lines received so far, in arrival order
    history: Arc<Mutex<Vec<ConversationTurn>>>,

    handlers: Handlers,

    /// Queue feeding the socket task
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,

    /// Handle for the socket task
    task_handle: Option<JoinHandle<()>>,
}

impl VoiceSession {
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            config,
            connected: Arc::new(AtomicBool::new(false)),
            history: Arc::new(Mutex::new(Vec::new())),
            handlers: Handlers::default(),
            outbound: None,
            task_handle: None,
        }
    }

    /// Register the callback receiving decoded agent audio
    pub fn on_audio<F>(&mut self, callback: F)
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.handlers.audio = Some(Arc::new(callback));
    }

    pub fn on_transcript<F>(&mut self, callback: F)
    where
        F: Fn(Transcript) + Send + Sync + 'static,
    {
        self.handlers.transcript = Some(Arc::new(callback));
    }

    pub fn on_error<F>(&mut self, callback: F)
    where
        F: Fn(RelayError) + Send + Sync + 'static,
    {
        self.handlers.error = Some(Arc::new(callback));
    }

    pub fn on_agent_response<F>(&mut self, callback: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.handlers.agent_response = Some(Arc::new(callback));
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.is_some() && self.connected.load(Ordering::SeqCst)
    }

    /// Open the socket and send the conversation initiation payload
    ///
    /// Fails with `RelayError::Configuration` before touching the network if
    /// no credential is configured.
    pub async fn connect(&mut self) -> RelayResult<()> {
        let api_key = self.config.credential()?.to_string();

        if self.is_connected() {
            warn!("Voice session already connected");
            return Ok(());
        }

        // Reap a socket task left over from a dropped connection
        self.outbound = None;
        self.task_handle = None;

        let request = self.build_request(&api_key)?;
        info!("Connecting to voice service at {}", self.config.url);

        let ws_stream = match timeout(self.config.connect_timeout(), connect_async(request)).await
        {
            Ok(Ok((stream, response))) => {
                info!("Voice service connected (status: {})", response.status());
                stream
            }
            Ok(Err(e)) => {
                error!("Voice service connection failed: {}", e);
                let err = RelayError::from(e);
                self.handlers.emit_error(err.clone());
                return Err(err);
            }
            Err(_) => {
                error!("Voice service connection timed out");
                let err = RelayError::Timeout("voice service connection".to_string());
                self.handlers.emit_error(err.clone());
                return Err(err);
            }
        };

        let (mut ws_write, ws_read) = ws_stream.split();

        let init = encode(&ClientMessage::initiation(&self.config))?;
        if let Err(e) = ws_write.send(Message::Text(init.into())).await {
            error!("Failed to send conversation initiation: {}", e);
            let err = RelayError::from(e);
            self.handlers.emit_error(err.clone());
            return Err(err);
        }
        debug!(
            "Sent conversation initiation (language={}, voice={})",
            self.config.language, self.config.voice_id
        );

        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        self.connected.store(true, Ordering::SeqCst);

        let connected = Arc::clone(&self.connected);
        let history = Arc::clone(&self.history);
        let handlers = self.handlers.clone();

        self.task_handle = Some(tokio::spawn(async move {
            Self::message_loop(ws_write, ws_read, rx, connected, history, handlers).await;
        }));

        Ok(())
    }

    /// Send a chunk of microphone audio (base64-encoded on the wire)
    pub fn send_audio(&self, audio: &[u8]) {
        self.send(ClientMessage::Audio {
            audio: base64::engine::general_purpose::STANDARD.encode(audio),
        });
    }

    /// Send a typed user message
    pub fn send_text(&self, text: impl Into<String>) {
        self.send(ClientMessage::UserMessage { text: text.into() });
    }

    /// Push contextual information to the agent
    pub fn update_context(&self, context: serde_json::Value) {
        self.send(ClientMessage::ContextUpdate { context });
    }

    /// Close the socket. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        self.connected.store(false, Ordering::SeqCst);

        // Dropping the sender makes the socket task send a close frame and exit
        if self.outbound.take().is_some() {
            info!("Disconnecting voice session");
        }

        if let Some(handle) = self.task_handle.take() {
            let abort = handle.abort_handle();
            match timeout(CLOSE_GRACE, handle).await {
                Ok(Err(e)) => error!("Voice socket task panicked: {}", e),
                Err(_) => {
                    warn!("Voice socket task did not finish in time, aborting");
                    abort.abort();
                }
                Ok(Ok(())) => {}
            }
        }
    }

    /// Snapshot of the conversation so far
    pub async fn history(&self) -> Vec<ConversationTurn> {
        let history = self.history.lock().await;
        history.clone()
    }

    fn send(&self, msg: ClientMessage) {
        if !self.connected.load(Ordering::SeqCst) {
            trace!("Voice session not connected, dropping outbound message");
            return;
        }

        if let Some(tx) = &self.outbound {
            if tx.send(msg).is_err() {
                debug!("Voice socket task has exited, dropping outbound message");
            }
        }
    }

    fn build_request(&self, api_key: &str) -> RelayResult<Request> {
        let mut url = Url::parse(&self.config.url).map_err(|e| {
            RelayError::Configuration(format!("invalid voice service URL {}: {}", self.config.url, e))
        })?;

        if let Some(agent_id) = self.config.agent_id.as_deref().filter(|id| !id.is_empty()) {
            url.query_pairs_mut().append_pair("agent_id", agent_id);
        }

        let mut request = url.as_str().into_client_request().map_err(|e| {
            RelayError::Configuration(format!("invalid voice service URL {}: {}", url, e))
        })?;

        let key = HeaderValue::from_str(api_key).map_err(|_| {
            RelayError::Configuration("credential contains characters not allowed in a header".to_string())
        })?;
        request.headers_mut().insert("xi-api-key", key);

        Ok(request)
    }

    async fn message_loop(
        mut ws_write: SplitSink<WsStream, Message>,
        mut ws_read: SplitStream<WsStream>,
        mut rx: mpsc::UnboundedReceiver<ClientMessage>,
        connected: Arc<AtomicBool>,
        history: Arc<Mutex<Vec<ConversationTurn>>>,
        handlers: Handlers,
    ) {
        info!("Voice socket task started");

        loop {
            tokio::select! {
                outbound = rx.recv() => match outbound {
                    Some(msg) => {
                        if let Err(e) = send_message(&mut ws_write, &msg).await {
                            error!("Failed to send voice message: {}", e);
                            handlers.emit_error(e);
                            break;
                        }
                    }
                    None => {
                        let _ = ws_write.send(Message::Close(None)).await;
                        break;
                    }
                },

                inbound = ws_read.next() => {
                    let reply = match inbound {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_payload(text.as_bytes(), &history, &handlers).await
                        }
                        Some(Ok(Message::Binary(data))) => {
                            Self::handle_payload(&data, &history, &handlers).await
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws_write.send(Message::Pong(data)).await;
                            None
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Voice socket closed by server: {:?}", frame);
                            break;
                        }
                        Some(Ok(_)) => None,
                        Some(Err(e)) => {
                            error!("Voice socket error: {}", e);
                            handlers.emit_error(RelayError::from(e));
                            break;
                        }
                        None => {
                            info!("Voice socket stream ended");
                            break;
                        }
                    };

                    if let Some(reply) = reply {
                        if let Err(e) = send_message(&mut ws_write, &reply).await {
                            error!("Failed to answer voice service ping: {}", e);
                            handlers.emit_error(e);
                            break;
                        }
                    }
                }
            }
        }

        connected.store(false, Ordering::SeqCst);
        info!("Voice socket task stopped");
    }

    /// Dispatch one inbound payload; returns a reply to send, if any
    async fn handle_payload(
        payload: &[u8],
        history: &Mutex<Vec<ConversationTurn>>,
        handlers: &Handlers,
    ) -> Option<ClientMessage> {
        match decode_inbound(payload) {
            InboundFrame::RawAudio(audio) => {
                trace!("Received {} bytes of raw audio", audio.len());
                handlers.emit_audio(audio);
            }
            InboundFrame::Message(ServerMessage::Audio { audio }) => {
                match base64::engine::general_purpose::STANDARD.decode(audio.as_bytes()) {
                    Ok(bytes) => {
                        trace!("Received {} bytes of agent audio", bytes.len());
                        handlers.emit_audio(bytes);
                    }
                    Err(e) => {
                        warn!("Discarding audio message with invalid base64: {}", e);
                        handlers.emit_error(RelayError::Protocol(format!(
                            "invalid base64 audio payload: {}",
                            e
                        )));
                    }
                }
            }
            InboundFrame::Message(ServerMessage::Transcript { role, text }) => {
                debug!("Transcript [{}]: {}", role, text);
                let transcript = Transcript { role, text };
                {
                    let mut history = history.lock().await;
                    history.push(ConversationTurn::from(&transcript));
                }
                handlers.emit_transcript(transcript);
            }
            InboundFrame::Message(ServerMessage::AgentResponse { text }) => {
                debug!("Agent response: {:?}", text);
                if let Some(text) = text {
                    handlers.emit_agent_response(text);
                }
            }
            InboundFrame::Message(ServerMessage::Error { message }) => {
                warn!("Voice service error: {}", message);
                handlers.emit_error(RelayError::Protocol(message));
            }
            InboundFrame::Message(ping @ ServerMessage::Ping { .. }) => {
                let pong = ping.pong();
                if pong.is_none() {
                    debug!("Ignoring ping without an event id");
                }
                return pong;
            }
            InboundFrame::Message(ServerMessage::Unknown) => {
                debug!("Ignoring voice message with unknown type");
            }
            InboundFrame::Malformed(reason) => {
                warn!("Ignoring malformed voice message: {}", reason);
            }
        }

        None
    }
}

fn encode(msg: &ClientMessage) -> RelayResult<String> {
    serde_json::to_string(msg)
        .map_err(|e| RelayError::Protocol(format!("failed to encode voice message: {}", e)))
}

async fn send_message(
    ws_write: &mut SplitSink<WsStream, Message>,
    msg: &ClientMessage,
) -> RelayResult<()> {
    let json = encode(msg)?;
    trace!("Sending voice message: {}", json.chars().take(100).collect::<String>());
    ws_write.send(Message::Text(json.into())).await?;
    Ok(())
}
