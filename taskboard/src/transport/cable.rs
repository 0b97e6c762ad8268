//! Action Cable consumer over a WebSocket.
//!
//! Connects to `<endpoint>?token=<credential>` with the
//! `actioncable-v1-json` sub-protocol, subscribes one channel once the
//! server's `welcome` arrives on every (re)connect and forwards that
//! channel's broadcasts. The connection is considered stale when no frame
//! (pings included) arrives within `stale_after`, and is then dropped and
//! retried like any other loss.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use taskboard_proto::cable::{self, ClientCommand, Identifier, ServerFrame};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{ReconnectConfig, TransportError, TransportEvent};
use crate::session::Credential;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

type WsSink = futures_util::stream::SplitSink<WsStream, Message>;

/// Tuning for a [`CableConsumer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CableOptions {
    /// Limit on each connection attempt, handshake included.
    pub connect_timeout: Duration,
    /// Silence after which a connection is treated as dead.
    pub stale_after: Duration,
    /// Capacity of the event channel.
    pub capacity: usize,
    /// Retry policy.
    pub reconnect: ReconnectConfig,
}

impl Default for CableOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(6),
            capacity: 256,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// One auto-reconnecting subscription to an Action Cable channel.
///
/// Created via [`CableConsumer::start`], which spawns the connection task
/// and returns the receiving end of its [`TransportEvent`] stream. The
/// stream ends when the consumer stops for good: after
/// [`shutdown`](Self::shutdown), a rejected subscription, a server
/// `disconnect` without reconnect, or when retries are exhausted.
pub struct CableConsumer {
    /// Endpoint without the credential, safe to log.
    endpoint: String,
    connected: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CableConsumer {
    /// Starts connecting to `endpoint` and subscribing `identifier`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] if `endpoint` is not a `ws://`
    /// or `wss://` URL. Connection failures are not errors here; they are
    /// retried in the background.
    pub fn start(
        endpoint: &Url,
        credential: &Credential,
        identifier: Identifier,
        options: CableOptions,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), TransportError> {
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!(
                "{endpoint}: expected ws:// or wss://"
            )));
        }
        let mut url = endpoint.clone();
        url.query_pairs_mut()
            .append_pair("token", credential.as_str());

        let (tx, rx) = mpsc::channel(options.capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(false));
        let log_endpoint = endpoint.to_string();

        let task = tokio::spawn(run(
            url,
            log_endpoint.clone(),
            identifier,
            options,
            tx,
            Arc::clone(&connected),
            shutdown_rx,
        ));
        tracing::debug!(url = %log_endpoint, "push transport started");

        Ok((
            Self {
                endpoint: log_endpoint,
                connected,
                shutdown: Some(shutdown_tx),
                task: Some(task),
            },
            rx,
        ))
    }

    /// The endpoint this consumer connects to (without the credential).
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the subscription is currently confirmed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Signals the connection task to unsubscribe and stop. Idempotent and
    /// non-blocking.
    pub fn shutdown(&mut self) {
        if let Some(signal) = self.shutdown.take() {
            let _ = signal.send(());
            tracing::debug!(url = %self.endpoint, "push transport shutdown requested");
        }
    }

    /// Waits for the connection task to finish.
    pub async fn closed(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for CableConsumer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CableConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CableConsumer")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// How one connection ended.
enum SessionEnd {
    /// Shutdown was requested or nobody is listening any more.
    Shutdown,
    /// Lost; retry.
    Lost(Option<String>),
    /// The server said not to come back.
    Stop(Option<String>),
}

/// Connection supervisor: connect, drive, back off, repeat.
async fn run(
    url: Url,
    endpoint: String,
    identifier: Identifier,
    options: CableOptions,
    tx: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut failures = 0u32;
    loop {
        let attempt = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            result = connect(&url, options.connect_timeout) => result,
        };

        let stop = match attempt {
            Ok(ws) => {
                tracing::debug!(url = %endpoint, "push socket open");
                let end = drive(
                    ws,
                    &identifier,
                    options.stale_after,
                    &tx,
                    &connected,
                    &mut shutdown,
                )
                .await;
                let (reason, stop) = match end {
                    SessionEnd::Shutdown => (None, true),
                    SessionEnd::Lost(reason) => (reason, false),
                    SessionEnd::Stop(reason) => (reason, true),
                };
                if connected.swap(false, Ordering::Relaxed) {
                    failures = 0;
                    if tx
                        .send(TransportEvent::Disconnected {
                            reason: reason.clone(),
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                tracing::debug!(url = %endpoint, reason = ?reason, "push socket closed");
                stop
            }
            Err(e) => {
                tracing::warn!(url = %endpoint, err = %e, "push connect failed");
                false
            }
        };
        if stop || tx.is_closed() {
            break;
        }

        failures += 1;
        if !options.reconnect.allows(failures) {
            tracing::warn!(url = %endpoint, attempts = failures - 1, "giving up on push connection");
            break;
        }
        let delay = options.reconnect.delay_for(failures);
        tracing::debug!(
            url = %endpoint,
            attempt = failures,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "push reconnect scheduled"
        );
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            () = tokio::time::sleep(delay) => {}
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::debug!(url = %endpoint, "push transport task exiting");
}

/// Reads frames from one open connection until it ends.
async fn drive(
    ws: WsStream,
    identifier: &Identifier,
    stale_after: Duration,
    tx: &mpsc::Sender<TransportEvent>,
    connected: &AtomicBool,
    shutdown: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();

    loop {
        let next = tokio::select! {
            biased;
            _ = &mut *shutdown => {
                leave(&mut sink, identifier).await;
                return SessionEnd::Shutdown;
            }
            next = tokio::time::timeout(stale_after, stream.next()) => next,
        };
        let text = match next {
            Err(_) => {
                tracing::warn!(
                    stale_after_ms = u64::try_from(stale_after.as_millis()).unwrap_or(u64::MAX),
                    "push connection stale"
                );
                return SessionEnd::Lost(Some("stale".to_string()));
            }
            Ok(None) => return SessionEnd::Lost(None),
            Ok(Some(Err(e))) => {
                tracing::warn!(err = %e, "push socket read error");
                return SessionEnd::Lost(Some(e.to_string()));
            }
            Ok(Some(Ok(Message::Close(frame)))) => {
                return SessionEnd::Lost(frame.map(|f| f.reason.as_str().to_string()));
            }
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(_))) => continue,
        };

        match cable::decode_frame(text.as_str()) {
            Ok(ServerFrame::Welcome) => {
                tracing::debug!("push welcome");
                let subscribe = ClientCommand::subscribe(identifier.clone());
                if let Err(e) = send_command(&mut sink, &subscribe).await {
                    return SessionEnd::Lost(Some(e.to_string()));
                }
            }
            Ok(ServerFrame::Ping { timestamp }) => tracing::trace!(timestamp, "push ping"),
            Ok(ServerFrame::ConfirmSubscription { identifier: id }) if &id == identifier => {
                connected.store(true, Ordering::Relaxed);
                if tx.send(TransportEvent::Connected).await.is_err() {
                    leave(&mut sink, identifier).await;
                    return SessionEnd::Shutdown;
                }
            }
            Ok(ServerFrame::RejectSubscription { identifier: id }) if &id == identifier => {
                tracing::warn!(identifier = %id, "push subscription rejected");
                let _ = tx.send(TransportEvent::Rejected).await;
                let _ = sink.close().await;
                return SessionEnd::Stop(Some("rejected".to_string()));
            }
            Ok(ServerFrame::Disconnect { reason, reconnect }) => {
                tracing::info!(reason = ?reason, reconnect, "push server disconnect");
                let _ = sink.close().await;
                return if reconnect {
                    SessionEnd::Lost(reason)
                } else {
                    SessionEnd::Stop(reason)
                };
            }
            Ok(ServerFrame::Message {
                identifier: id,
                message,
            }) if &id == identifier => {
                if tx.send(TransportEvent::Message(message)).await.is_err() {
                    leave(&mut sink, identifier).await;
                    return SessionEnd::Shutdown;
                }
            }
            Ok(other) => tracing::debug!(?other, "ignoring frame for another channel"),
            Err(e) => tracing::warn!(err = %e, "malformed push frame, skipping"),
        }
    }
}

/// Unsubscribes and closes, ignoring failures on a dying socket.
async fn leave(sink: &mut WsSink, identifier: &Identifier) {
    if let Err(e) = send_command(sink, &ClientCommand::unsubscribe(identifier.clone())).await {
        tracing::debug!(err = %e, "unsubscribe not sent");
    }
    let _ = sink.close().await;
}

async fn send_command(sink: &mut WsSink, command: &ClientCommand) -> Result<(), TransportError> {
    let text =
        cable::encode_command(command).map_err(|e| TransportError::Protocol(e.to_string()))?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| TransportError::Protocol(e.to_string()))
}

async fn connect(url: &Url, timeout: Duration) -> Result<WsStream, TransportError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(cable::SUBPROTOCOL),
    );
    let (ws, _response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| map_ws_connect_error(e, url))?;
    Ok(ws)
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error, url: &Url) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(format!(
                    "{}:{}",
                    url.host_str().unwrap_or_default(),
                    url.port_or_known_default().unwrap_or_default()
                ))
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) => TransportError::Http(response.status().as_u16()),
        other => TransportError::Protocol(other.to_string()),
    }
}
