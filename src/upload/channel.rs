use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use rust_socketio::asynchronous::{Client as SocketClient, ClientBuilder};
use rust_socketio::{Event, Payload, TransportType};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::UploadConfig;
use crate::error::{RelayError, RelayResult};

/// Upper bound on the transport handshake plus namespace connect
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Ack window handed to the transport when no timeout is configured
const UNBOUNDED_ACK_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

type PendingAcks = HashMap<u64, oneshot::Sender<RelayResult<Value>>>;

struct Shared {
    connected: AtomicBool,
    next_id: AtomicU64,
    pending: Mutex<PendingAcks>,
    last_error: Mutex<Option<String>>,
    ready: Notify,
}

impl Shared {
    fn resolve(&self, id: u64, result: RelayResult<Value>) {
        let waiter = self.pending.lock().remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!("No caller waiting for ack {}", id),
        }
    }

    fn fail_all(&self, err: RelayError) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            warn!("Failing {} pending acknowledgements: {}", drained.len(), err);
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

/// Removes an ack slot when the waiting future completes or is dropped
struct PendingSlot<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.id);
    }
}

/// A Socket.IO connection on the default namespace
///
/// Heartbeats and reconnection (bounded attempts, fixed delay) belong to the
/// `rust_socketio` client underneath. The channel tracks whether the
/// namespace is currently joined and routes acknowledgements back to
/// `emit_with_ack` callers.
pub struct SocketChannel {
    shared: Arc<Shared>,
    client: Option<SocketClient>,
    ack_timeout: Option<Duration>,
    endpoint: String,
}

impl fmt::Debug for SocketChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketChannel")
            .field("endpoint", &self.endpoint)
            .field("live", &self.is_live())
            .field("ack_timeout", &self.ack_timeout)
            .finish()
    }
}

impl SocketChannel {
    /// Connect to the backend described by `config` and join the namespace
    pub async fn connect(config: &UploadConfig) -> RelayResult<Self> {
        let endpoint = config.endpoint();
        let delay_ms = config.reconnection_delay_ms;
        let attempts = u8::try_from(config.reconnection_attempts).unwrap_or(u8::MAX);

        info!("Connecting stream channel to {}", endpoint);

        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            last_error: Mutex::new(None),
            ready: Notify::new(),
        });

        let on_connect = Arc::clone(&shared);
        let on_close = Arc::clone(&shared);
        let on_error = Arc::clone(&shared);

        let client = ClientBuilder::new(endpoint.as_str())
            .transport_type(TransportType::Websocket)
            .reconnect(true)
            .reconnect_on_disconnect(false)
            .max_reconnect_attempts(attempts)
            .reconnect_delay(delay_ms, delay_ms)
            .on(Event::Connect, move |_: Payload, _: SocketClient| -> BoxFuture<'static, ()> {
                debug!("Stream channel joined namespace");
                on_connect.connected.store(true, Ordering::SeqCst);
                on_connect.ready.notify_one();
                async {}.boxed()
            })
            .on(Event::Close, move |reason: Payload, _: SocketClient| -> BoxFuture<'static, ()> {
                let reason = payload_text(&reason);
                warn!("Stream channel closed: {}", reason);
                on_close.connected.store(false, Ordering::SeqCst);
                on_close.fail_all(RelayError::Transport(format!("connection closed: {}", reason)));
                async {}.boxed()
            })
            .on(Event::Error, move |err: Payload, _: SocketClient| -> BoxFuture<'static, ()> {
                let message = payload_text(&err);
                error!("Stream channel error: {}", message);
                *on_error.last_error.lock() = Some(message);
                on_error.ready.notify_one();
                async {}.boxed()
            })
            .connect()
            .await
            .map_err(|e| {
                error!("Stream channel connect failed: {}", e);
                RelayError::Transport(format!("failed to connect to {}: {}", endpoint, e))
            })?;

        let channel = Self {
            shared,
            client: Some(client),
            ack_timeout: config.ack_timeout(),
            endpoint,
        };

        let joined = timeout(HANDSHAKE_TIMEOUT, channel.wait_for_join()).await;
        if joined.is_err() || !channel.is_live() {
            let reason = channel
                .shared
                .last_error
                .lock()
                .take()
                .unwrap_or_else(|| "namespace handshake timed out".to_string());
            channel.close().await;
            return Err(RelayError::Transport(reason));
        }

        info!("Stream channel connected");
        Ok(channel)
    }

    /// Whether the channel can currently carry requests
    pub fn is_live(&self) -> bool {
        self.client.is_some() && self.shared.connected.load(Ordering::SeqCst)
    }

    /// Emit `event` with `payload` and wait for the server's acknowledgement
    ///
    /// Resolves with the first acknowledgement argument.
    pub async fn emit_with_ack(&self, event: &str, payload: Payload) -> RelayResult<Value> {
        let client = match &self.client {
            Some(client) if self.is_live() => client,
            _ => return Err(RelayError::NotConnected),
        };

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);
        let _slot = PendingSlot {
            shared: self.shared.as_ref(),
            id,
        };

        let on_ack = Arc::clone(&self.shared);
        client
            .emit_with_ack(
                event,
                payload,
                self.ack_timeout.unwrap_or(UNBOUNDED_ACK_WINDOW),
                move |ack: Payload, _: SocketClient| -> BoxFuture<'static, ()> {
                    on_ack.resolve(id, first_argument(ack));
                    async {}.boxed()
                },
            )
            .await
            .map_err(|e| RelayError::Transport(format!("failed to emit {}: {}", event, e)))?;

        debug!("Emitted {} (request {})", event, id);

        let received = match self.ack_timeout {
            Some(limit) => timeout(limit, rx)
                .await
                .map_err(|_| RelayError::Timeout(format!("acknowledgement of {}", event)))?,
            None => rx.await,
        };

        received.map_err(|_| {
            RelayError::Transport("channel closed before acknowledgement".to_string())
        })?
    }

    /// Leave the namespace and close the transport
    pub async fn close(mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                warn!("Stream channel disconnect failed: {}", e);
            }
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared
            .fail_all(RelayError::Transport("channel closed".to_string()));
        info!("Stream channel closed");
    }

    async fn wait_for_join(&self) {
        while !self.shared.connected.load(Ordering::SeqCst) {
            if self.shared.last_error.lock().is_some() {
                return;
            }
            self.shared.ready.notified().await;
        }
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        self.shared.connected.store(false, Ordering::SeqCst);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = client.disconnect().await;
            });
        }
    }
}

/// First argument of an acknowledgement
#[allow(deprecated)]
fn first_argument(payload: Payload) -> RelayResult<Value> {
    let args = match payload {
        Payload::Text(args) => args,
        Payload::String(text) => match serde_json::from_str(&text) {
            Ok(Value::Array(args)) => args,
            Ok(value) => vec![value],
            Err(e) => {
                return Err(RelayError::Protocol(format!(
                    "malformed acknowledgement: {}",
                    e
                )))
            }
        },
        _ => {
            return Err(RelayError::Protocol(
                "unexpected binary acknowledgement".to_string(),
            ))
        }
    };

    match args.into_iter().next() {
        Some(Value::Array(inner)) => Ok(inner.into_iter().next().unwrap_or(Value::Null)),
        Some(first) => Ok(first),
        None => Ok(Value::Null),
    }
}

#[allow(deprecated)]
fn payload_text(payload: &Payload) -> String {
    match payload {
        Payload::Text(values) => values
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        Payload::String(text) => text.clone(),
        Payload::Binary(data) => format!("<{} bytes>", data.len()),
        _ => "<unknown payload>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_argument_of_text_ack() {
        let ack = Payload::Text(vec![json!({ "success": true }), json!("extra")]);
        assert_eq!(first_argument(ack).unwrap(), json!({ "success": true }));
    }

    #[test]
    fn test_first_argument_unwraps_nested_array() {
        let ack = Payload::Text(vec![json!([{ "success": false, "error": "nope" }])]);
        assert_eq!(
            first_argument(ack).unwrap(),
            json!({ "success": false, "error": "nope" })
        );
    }

    #[test]
    fn test_empty_ack_is_null() {
        assert_eq!(first_argument(Payload::Text(Vec::new())).unwrap(), Value::Null);
    }

    #[test]
    fn test_binary_ack_is_rejected() {
        let err = first_argument(Payload::Binary(vec![1u8, 2].into())).unwrap_err();
        assert!(matches!(err, RelayError::Protocol(_)));
    }

    #[test]
    fn test_error_payload_text() {
        let payload = Payload::Text(vec![json!("Received an ConnectError frame: {\"message\":\"nope\"}")]);
        assert!(payload_text(&payload).contains("nope"));
    }
}
