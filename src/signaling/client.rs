//! WebSocket signal client
//!
//! Speaks binary protobuf frames ([`proto::SignalRequest`] /
//! [`proto::SignalResponse`]) over a WebSocket. A sender task drains an
//! outbound queue into the socket and a receiver task decodes inbound frames;
//! the client itself only routes.
//!
//! Two queues implement the engine's ordering contracts:
//! - inbound frames other than the join response are buffered until
//!   `resume_response_queue`, so the engine configures its transports before
//!   any offer or trickle arrives;
//! - outbound requests issued while a reconnect is resuming are buffered
//!   until `send_queued_requests`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use prost::Message as _;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::ConnectOptions;
use crate::engine::{DisconnectReason, ReconnectMode};
use crate::proto::{self, SignalTarget};
use crate::signaling::{SignalClient, SignalConnectMode, SignalEmitter, SignalEvent, SignalEvents};
use crate::sync::Completer;
use crate::transport::IceCandidate;
use crate::{EngineError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Connection {
    tx: mpsc::UnboundedSender<Message>,
    tasks: Vec<JoinHandle<()>>,
}

struct ClientInner {
    emitter: SignalEmitter,
    join_completer: Completer<proto::JoinResponse>,

    conn: Mutex<Option<Connection>>,
    /// Bumped on every connect/teardown; stale socket tasks check it before
    /// reporting a close
    generation: AtomicU64,

    /// Outbound requests go to the socket; otherwise they queue
    can_send: AtomicBool,
    /// Inbound non-join frames buffer until the engine resumes the queue
    queue_responses: AtomicBool,

    request_queue: Mutex<Vec<proto::SignalRequest>>,
    response_queue: Mutex<Vec<proto::signal_response::Message>>,
    pending_tracks: Mutex<HashMap<String, Completer<proto::TrackInfo>>>,
}

/// Production [`SignalClient`] over `tokio-tungstenite`
#[derive(Clone)]
pub struct WsSignalClient {
    inner: Arc<ClientInner>,
}

impl WsSignalClient {
    /// Create the client and the event stream consumed by the engine
    pub fn new() -> (Self, SignalEvents) {
        let (emitter, events) = mpsc::unbounded_channel();

        let inner = Arc::new(ClientInner {
            emitter,
            join_completer: Completer::new(),
            conn: Mutex::new(None),
            generation: AtomicU64::new(0),
            can_send: AtomicBool::new(false),
            queue_responses: AtomicBool::new(true),
            request_queue: Mutex::new(Vec::new()),
            response_queue: Mutex::new(Vec::new()),
            pending_tracks: Mutex::new(HashMap::new()),
        });

        (Self { inner }, events)
    }

    fn build_request_url(
        url: &str,
        token: &str,
        options: &ConnectOptions,
        mode: SignalConnectMode,
    ) -> String {
        let base = url.trim_end_matches('/');
        let mut params = vec![
            format!("access_token={}", token),
            format!("protocol={}", options.protocol_version),
            format!("auto_subscribe={}", options.auto_subscribe as u8),
        ];

        if let SignalConnectMode::Reconnect(reconnect) = mode {
            params.push("reconnect=1".to_string());
            if reconnect == ReconnectMode::Quick {
                params.push("quick=1".to_string());
            }
        }

        format!("{}/rtc?{}", base, params.join("&"))
    }
}

impl ClientInner {
    /// Tear down the socket without emitting a close event
    fn disconnect_socket(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(conn) = self.conn.lock().unwrap().take() {
            // Dropping the tx ends the sender task; abort for promptness
            let _ = conn.tx.send(Message::Close(None));
            for task in conn.tasks {
                task.abort();
            }
        }
    }

    fn queue_request(&self, request: proto::SignalRequest) {
        debug!("queueing signal request until the session resumes");
        self.request_queue.lock().unwrap().push(request);
    }

    fn send_request(&self, message: proto::signal_request::Message) -> Result<()> {
        let request = proto::SignalRequest { message: Some(message) };

        if !self.can_send.load(Ordering::SeqCst) {
            self.queue_request(request);
            return Ok(());
        }

        self.send_now(request)
    }

    fn send_now(&self, request: proto::SignalRequest) -> Result<()> {
        let tx = self.conn.lock().unwrap().as_ref().map(|c| c.tx.clone());
        match tx {
            Some(tx) => tx
                .send(Message::Binary(request.encode_to_vec()))
                .map_err(|_| EngineError::Network("signaling socket is closed".to_string())),
            None => {
                self.queue_request(request);
                Ok(())
            }
        }
    }

    fn handle_response(&self, message: proto::signal_response::Message) {
        if let proto::signal_response::Message::Join(join) = message {
            debug!("received join response");
            self.join_completer.set(Some(join));
            return;
        }

        if self.queue_responses.load(Ordering::SeqCst) {
            self.response_queue.lock().unwrap().push(message);
        } else {
            self.dispatch(message);
        }
    }

    fn dispatch(&self, message: proto::signal_response::Message) {
        use proto::signal_response::Message as Response;

        match message {
            Response::Join(_) => warn!("duplicate join response, ignoring"),

            Response::Answer(sdp) => {
                let _ = self.emitter.send(SignalEvent::Answer(sdp));
            }

            Response::Offer(sdp) => {
                let _ = self.emitter.send(SignalEvent::Offer(sdp));
            }

            Response::Trickle(trickle) => {
                let target = SignalTarget::try_from(trickle.target)
                    .unwrap_or(SignalTarget::Subscriber);
                match IceCandidate::from_json(&trickle.candidate_init) {
                    Ok(candidate) => {
                        let _ = self.emitter.send(SignalEvent::Trickle { candidate, target });
                    }
                    Err(err) => warn!("dropping malformed ICE candidate: {}", err),
                }
            }

            Response::TrackPublished(published) => {
                let completer = self.pending_tracks.lock().unwrap().remove(&published.cid);
                match (completer, published.track) {
                    (Some(completer), Some(track)) => completer.set(Some(track)),
                    (None, _) => warn!("track published for unknown cid {}", published.cid),
                    (_, None) => warn!("track published without track info"),
                }
            }

            Response::Leave(leave) => {
                let _ = self.emitter.send(SignalEvent::Leave {
                    can_reconnect: leave.can_reconnect,
                });
            }

            Response::RefreshToken(token) => {
                let _ = self.emitter.send(SignalEvent::RefreshToken(token));
            }
        }
    }
}

async fn sender_task(
    mut write: futures::stream::SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(err) = write.send(message).await {
            error!("failed to send signal frame: {}", err);
            break;
        }
        if closing {
            break;
        }
    }

    debug!("signal sender task terminated");
}

async fn receiver_task(
    mut read: futures::stream::SplitStream<WsStream>,
    inner: Arc<ClientInner>,
    generation: u64,
) {
    let mut close_reason = "socket closed".to_string();

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Binary(data)) => match proto::SignalResponse::decode(&data[..]) {
                Ok(response) => {
                    if let Some(message) = response.message {
                        inner.handle_response(message);
                    }
                }
                Err(err) => warn!("failed to decode signal frame: {}", err),
            },
            Ok(Message::Close(_)) => {
                info!("signaling socket closed by server");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                close_reason = err.to_string();
                error!("signaling socket error: {}", err);
                break;
            }
        }
    }

    // Only the live socket reports a close; replaced or torn-down sockets
    // stay silent
    if inner.generation.load(Ordering::SeqCst) == generation {
        let _ = inner.emitter.send(SignalEvent::Close { reason: close_reason });
    }

    debug!("signal receiver task terminated");
}

#[async_trait]
impl SignalClient for WsSignalClient {
    async fn connect(
        &self,
        url: &str,
        token: &str,
        options: &ConnectOptions,
        mode: SignalConnectMode,
    ) -> Result<()> {
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(EngineError::Config(format!(
                "signaling url must start with ws:// or wss://, got: {}",
                url
            )));
        }

        let inner = &self.inner;
        inner.disconnect_socket();

        match mode {
            SignalConnectMode::Fresh => {
                // New session: drop anything left over from the previous one
                inner.join_completer.reset();
                inner.request_queue.lock().unwrap().clear();
                inner.response_queue.lock().unwrap().clear();
                inner.queue_responses.store(true, Ordering::SeqCst);
                inner.can_send.store(true, Ordering::SeqCst);
            }
            SignalConnectMode::Reconnect(ReconnectMode::Full) => {
                // New handshake over the same session identity
                inner.join_completer.reset();
                inner.response_queue.lock().unwrap().clear();
                inner.queue_responses.store(true, Ordering::SeqCst);
                inner.can_send.store(true, Ordering::SeqCst);
            }
            SignalConnectMode::Reconnect(ReconnectMode::Quick) => {
                // Resuming: no join handshake, outbound requests queue until
                // the engine flushes them
                inner.queue_responses.store(false, Ordering::SeqCst);
                inner.can_send.store(false, Ordering::SeqCst);
            }
        }

        let request_url = Self::build_request_url(url, token, options, mode);
        info!("connecting to signaling server ({:?})", mode);

        let (stream, _) = connect_async(&request_url)
            .await
            .map_err(|e| EngineError::Network(format!("failed to connect signaling: {}", e)))?;
        let (write, read) = stream.split();

        let (tx, rx) = mpsc::unbounded_channel();
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let tasks = vec![
            tokio::spawn(sender_task(write, rx)),
            tokio::spawn(receiver_task(read, inner.clone(), generation)),
        ];

        *inner.conn.lock().unwrap() = Some(Connection { tx, tasks });

        Ok(())
    }

    async fn clean_up(&self, reason: &DisconnectReason) {
        debug!("signal client clean up ({:?})", reason);

        let inner = &self.inner;
        inner.disconnect_socket();
        inner.can_send.store(false, Ordering::SeqCst);
        inner.queue_responses.store(true, Ordering::SeqCst);
        inner.request_queue.lock().unwrap().clear();
        inner.response_queue.lock().unwrap().clear();
        inner.join_completer.reset();

        let pending: Vec<Completer<proto::TrackInfo>> =
            inner.pending_tracks.lock().unwrap().drain().map(|(_, c)| c).collect();
        for completer in pending {
            completer.reset();
        }
    }

    fn join_response_completer(&self) -> Completer<proto::JoinResponse> {
        self.inner.join_completer.clone()
    }

    async fn send_offer(&self, sdp: proto::SessionDescription) -> Result<()> {
        self.inner.send_request(proto::signal_request::Message::Offer(sdp))
    }

    async fn send_answer(&self, sdp: proto::SessionDescription) -> Result<()> {
        self.inner.send_request(proto::signal_request::Message::Answer(sdp))
    }

    async fn send_candidate(&self, candidate: IceCandidate, target: SignalTarget) -> Result<()> {
        self.inner
            .send_request(proto::signal_request::Message::Trickle(proto::TrickleRequest {
                candidate_init: candidate.to_json()?,
                target: target as i32,
            }))
    }

    async fn send_add_track(&self, request: proto::AddTrackRequest) -> Result<()> {
        self.inner.send_request(proto::signal_request::Message::AddTrack(request))
    }

    async fn send_queued_requests(&self) -> Result<()> {
        self.inner.can_send.store(true, Ordering::SeqCst);

        let queued: Vec<proto::SignalRequest> =
            self.inner.request_queue.lock().unwrap().drain(..).collect();
        if queued.is_empty() {
            return Ok(());
        }

        debug!("flushing {} queued signal requests", queued.len());
        for request in queued {
            self.inner.send_now(request)?;
        }
        Ok(())
    }

    fn prepare_track_completer(&self, cid: &str) -> Completer<proto::TrackInfo> {
        self.inner
            .pending_tracks
            .lock()
            .unwrap()
            .entry(cid.to_string())
            .or_insert_with(Completer::new)
            .clone()
    }

    async fn resume_response_queue(&self) {
        self.inner.queue_responses.store(false, Ordering::SeqCst);

        let buffered: Vec<proto::signal_response::Message> =
            self.inner.response_queue.lock().unwrap().drain(..).collect();
        if !buffered.is_empty() {
            debug!("releasing {} buffered signal responses", buffered.len());
        }
        for message in buffered {
            self.inner.dispatch(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_build_request_url_fresh() {
        let url = WsSignalClient::build_request_url(
            "wss://host.example.com/",
            "tok",
            &ConnectOptions::default(),
            SignalConnectMode::Fresh,
        );

        assert!(url.starts_with("wss://host.example.com/rtc?"));
        assert!(url.contains("access_token=tok"));
        assert!(url.contains("auto_subscribe=1"));
        assert!(!url.contains("reconnect"));
    }

    #[test]
    fn test_build_request_url_quick_reconnect() {
        let url = WsSignalClient::build_request_url(
            "wss://host.example.com",
            "tok",
            &ConnectOptions::default(),
            SignalConnectMode::Reconnect(ReconnectMode::Quick),
        );

        assert!(url.contains("reconnect=1"));
        assert!(url.contains("quick=1"));
    }

    #[tokio::test]
    async fn test_join_resolves_completer_not_queue() {
        let (client, _events) = WsSignalClient::new();

        client.inner.handle_response(proto::signal_response::Message::Join(
            proto::JoinResponse { subscriber_primary: true, ..Default::default() },
        ));

        let join = client
            .join_response_completer()
            .wait(Duration::from_millis(50), || {
                EngineError::SignalTimedOut("join".to_string())
            })
            .await
            .unwrap();
        assert!(join.subscriber_primary);
        assert!(client.inner.response_queue.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_responses_buffer_until_resumed() {
        let (client, mut events) = WsSignalClient::new();

        client.inner.handle_response(proto::signal_response::Message::Leave(
            proto::LeaveRequest { can_reconnect: false },
        ));

        // Buffered, not delivered
        assert!(events.try_recv().is_err());
        assert_eq!(client.inner.response_queue.lock().unwrap().len(), 1);

        client.resume_response_queue().await;

        match events.try_recv().unwrap() {
            SignalEvent::Leave { can_reconnect } => assert!(!can_reconnect),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_track_published_resolves_prepared_completer() {
        let (client, _events) = WsSignalClient::new();
        let completer = client.prepare_track_completer("cid-1");

        client.inner.queue_responses.store(false, Ordering::SeqCst);
        client.inner.handle_response(proto::signal_response::Message::TrackPublished(
            proto::TrackPublishedResponse {
                cid: "cid-1".to_string(),
                track: Some(proto::TrackInfo { sid: "TR_1".to_string(), ..Default::default() }),
            },
        ));

        let info = completer
            .wait(Duration::from_millis(50), || {
                EngineError::EngineTimedOut("track".to_string())
            })
            .await
            .unwrap();
        assert_eq!(info.sid, "TR_1");
    }

    #[tokio::test]
    async fn test_requests_queue_while_resuming() {
        let (client, _events) = WsSignalClient::new();
        client.inner.can_send.store(false, Ordering::SeqCst);

        client
            .send_offer(proto::SessionDescription::offer("v=0"))
            .await
            .unwrap();

        assert_eq!(client.inner.request_queue.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clean_up_is_idempotent() {
        let (client, _events) = WsSignalClient::new();
        client.clean_up(&DisconnectReason::Sdk).await;
        client.clean_up(&DisconnectReason::User).await;
        assert!(client.inner.conn.lock().unwrap().is_none());
    }

    #[test]
    fn test_connect_rejects_non_ws_url() {
        let (client, _events) = WsSignalClient::new();
        let result = futures::executor::block_on(client.connect(
            "https://host.example.com",
            "tok",
            &ConnectOptions::default(),
            SignalConnectMode::Fresh,
        ));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
