//! Engine test harness
//!
//! Provides scripted mock implementations of the engine's collaborators
//! (signal client, transport factory, data channels) so the session
//! lifecycle can be exercised end to end without a signaling server or a
//! native WebRTC stack. Tests drive the mocks (resolve the join response,
//! transition transport states, open data channels) and observe what the
//! engine did in response.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use rtc_engine::proto::{self, SignalTarget};
use rtc_engine::{
    Completer, ConnectOptions, DataChannel, DataChannelInit, DataChannelState, DisconnectReason,
    Engine, EngineConfig, EngineTimeouts, IceCandidate, SignalClient, SignalConnectMode,
    SignalEmitter, SignalEvent, SignalEvents, Transport, TransportConnectionState,
    TransportEmitter, TransportEvent, TransportFactory,
};

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,rtc_engine=debug")
        .try_init();
}

/// Poll `cond` every 10ms until it holds or `deadline` elapses
pub async fn wait_until<F>(deadline: Duration, cond: F) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

// ============================================================================
// Mock signal client
// ============================================================================

pub struct MockSignalClient {
    emitter: SignalEmitter,
    join_completer: Completer<proto::JoinResponse>,
    join_response: Mutex<proto::JoinResponse>,
    join_delay: Mutex<Duration>,

    pub connect_calls: Mutex<Vec<SignalConnectMode>>,
    pub sent_offers: Mutex<Vec<proto::SessionDescription>>,
    pub sent_answers: Mutex<Vec<proto::SessionDescription>>,
    pub sent_candidates: Mutex<Vec<(IceCandidate, SignalTarget)>>,
    pub sent_add_tracks: Mutex<Vec<proto::AddTrackRequest>>,
    pub resume_calls: AtomicUsize,
    pub flush_calls: AtomicUsize,
    pub clean_up_calls: AtomicUsize,

    pending_tracks: Mutex<HashMap<String, Completer<proto::TrackInfo>>>,
}

impl MockSignalClient {
    pub fn new(join_response: proto::JoinResponse) -> (Arc<Self>, SignalEvents) {
        let (emitter, events) = mpsc::unbounded_channel();

        let client = Arc::new(Self {
            emitter,
            join_completer: Completer::new(),
            join_response: Mutex::new(join_response),
            join_delay: Mutex::new(Duration::from_millis(50)),
            connect_calls: Mutex::new(Vec::new()),
            sent_offers: Mutex::new(Vec::new()),
            sent_answers: Mutex::new(Vec::new()),
            sent_candidates: Mutex::new(Vec::new()),
            sent_add_tracks: Mutex::new(Vec::new()),
            resume_calls: AtomicUsize::new(0),
            flush_calls: AtomicUsize::new(0),
            clean_up_calls: AtomicUsize::new(0),
            pending_tracks: Mutex::new(HashMap::new()),
        });

        (client, events)
    }

    /// Inject an inbound signaling event into the engine
    pub fn emit(&self, event: SignalEvent) {
        let _ = self.emitter.send(event);
    }

    pub fn set_join_delay(&self, delay: Duration) {
        *self.join_delay.lock().unwrap() = delay;
    }

    /// Resolve a previously prepared track completer, as the server would
    pub fn resolve_track(&self, cid: &str, info: proto::TrackInfo) {
        if let Some(completer) = self.pending_tracks.lock().unwrap().get(cid) {
            completer.set(Some(info));
        }
    }

    pub fn connect_count(&self, mode: SignalConnectMode) -> usize {
        self.connect_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|m| **m == mode)
            .count()
    }
}

#[async_trait]
impl SignalClient for MockSignalClient {
    async fn connect(
        &self,
        _url: &str,
        _token: &str,
        _options: &ConnectOptions,
        mode: SignalConnectMode,
    ) -> rtc_engine::Result<()> {
        self.connect_calls.lock().unwrap().push(mode);

        // Quick resumes reuse the session; only join-bearing connects answer
        // with a join response
        if mode != SignalConnectMode::Reconnect(rtc_engine::ReconnectMode::Quick) {
            let completer = self.join_completer.clone();
            let join = self.join_response.lock().unwrap().clone();
            let delay = *self.join_delay.lock().unwrap();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                completer.set(Some(join));
            });
        }

        Ok(())
    }

    async fn clean_up(&self, _reason: &DisconnectReason) {
        self.clean_up_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn join_response_completer(&self) -> Completer<proto::JoinResponse> {
        self.join_completer.clone()
    }

    async fn send_offer(&self, sdp: proto::SessionDescription) -> rtc_engine::Result<()> {
        self.sent_offers.lock().unwrap().push(sdp);
        Ok(())
    }

    async fn send_answer(&self, sdp: proto::SessionDescription) -> rtc_engine::Result<()> {
        self.sent_answers.lock().unwrap().push(sdp);
        Ok(())
    }

    async fn send_candidate(
        &self,
        candidate: IceCandidate,
        target: SignalTarget,
    ) -> rtc_engine::Result<()> {
        self.sent_candidates.lock().unwrap().push((candidate, target));
        Ok(())
    }

    async fn send_add_track(&self, request: proto::AddTrackRequest) -> rtc_engine::Result<()> {
        self.sent_add_tracks.lock().unwrap().push(request);
        Ok(())
    }

    async fn send_queued_requests(&self) -> rtc_engine::Result<()> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn prepare_track_completer(&self, cid: &str) -> Completer<proto::TrackInfo> {
        self.pending_tracks
            .lock()
            .unwrap()
            .entry(cid.to_string())
            .or_insert_with(Completer::new)
            .clone()
    }

    async fn resume_response_queue(&self) {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Mock transport
// ============================================================================

#[derive(Debug)]
pub struct MockDataChannel {
    label: String,
    target: SignalTarget,
    emitter: TransportEmitter,
    state: Mutex<DataChannelState>,

    pub init: DataChannelInit,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub close_calls: AtomicUsize,
}

impl MockDataChannel {
    pub fn new(
        label: &str,
        target: SignalTarget,
        emitter: TransportEmitter,
        init: DataChannelInit,
    ) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            target,
            emitter,
            state: Mutex::new(DataChannelState::Connecting),
            init,
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        })
    }

    fn set_state(&self, state: DataChannelState) {
        *self.state.lock().unwrap() = state;
        let _ = self.emitter.send(TransportEvent::DataChannelState {
            target: self.target,
            label: self.label.clone(),
            state,
        });
    }

    /// Simulate the channel opening
    pub fn open(&self) {
        self.set_state(DataChannelState::Open);
    }

    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn state(&self) -> DataChannelState {
        *self.state.lock().unwrap()
    }

    async fn send(&self, data: &[u8]) -> bool {
        self.sent.lock().unwrap().push(data.to_vec());
        true
    }

    async fn close(&self) -> rtc_engine::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = DataChannelState::Closed;
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockTransport {
    target: SignalTarget,
    primary: bool,
    emitter: TransportEmitter,
    state: Mutex<TransportConnectionState>,
    restarting: AtomicBool,

    pub negotiate_calls: AtomicUsize,
    pub offers: Mutex<Vec<bool>>,
    pub remote_descriptions: Mutex<Vec<proto::SessionDescription>>,
    pub local_descriptions: Mutex<Vec<proto::SessionDescription>>,
    pub candidates: Mutex<Vec<IceCandidate>>,
    pub channels: Mutex<Vec<Arc<MockDataChannel>>>,
    pub close_calls: AtomicUsize,
}

impl MockTransport {
    fn new(target: SignalTarget, primary: bool, emitter: TransportEmitter) -> Arc<Self> {
        Arc::new(Self {
            target,
            primary,
            emitter,
            state: Mutex::new(TransportConnectionState::New),
            restarting: AtomicBool::new(false),
            negotiate_calls: AtomicUsize::new(0),
            offers: Mutex::new(Vec::new()),
            remote_descriptions: Mutex::new(Vec::new()),
            local_descriptions: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        })
    }

    /// Simulate a peer-connection state change
    pub fn transition(&self, state: TransportConnectionState) {
        *self.state.lock().unwrap() = state;
        let _ = self.emitter.send(TransportEvent::ConnectionChange {
            target: self.target,
            primary: self.primary,
            state,
        });
    }

    /// Inject a data-channel frame as if the remote had sent it
    pub fn emit_message(&self, label: &str, data: Vec<u8>, binary: bool) {
        let _ = self.emitter.send(TransportEvent::DataMessage {
            target: self.target,
            label: label.to_string(),
            data,
            binary,
        });
    }

    /// Inject a remote-opened data channel
    pub fn emit_remote_channel(&self, channel: Arc<MockDataChannel>) {
        let _ = self.emitter.send(TransportEvent::DataChannelOpened {
            target: self.target,
            channel,
        });
    }

    pub fn channel(&self, label: &str) -> Option<Arc<MockDataChannel>> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.label == label)
            .cloned()
    }

    pub fn offer_count(&self) -> usize {
        self.offers.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn target(&self) -> SignalTarget {
        self.target
    }

    fn is_primary(&self) -> bool {
        self.primary
    }

    fn connection_state(&self) -> TransportConnectionState {
        *self.state.lock().unwrap()
    }

    fn restarting_ice(&self) -> bool {
        self.restarting.load(Ordering::SeqCst)
    }

    fn set_restarting_ice(&self, restarting: bool) {
        self.restarting.store(restarting, Ordering::SeqCst);
    }

    async fn negotiate(&self) -> rtc_engine::Result<()> {
        self.negotiate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_and_send_offer(&self, ice_restart: bool) -> rtc_engine::Result<()> {
        self.offers.lock().unwrap().push(ice_restart);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        sdp: proto::SessionDescription,
    ) -> rtc_engine::Result<()> {
        self.remote_descriptions.lock().unwrap().push(sdp);
        Ok(())
    }

    async fn create_answer(&self) -> rtc_engine::Result<proto::SessionDescription> {
        Ok(proto::SessionDescription::answer("mock-answer-sdp"))
    }

    async fn set_local_description(
        &self,
        sdp: proto::SessionDescription,
    ) -> rtc_engine::Result<proto::SessionDescription> {
        self.local_descriptions.lock().unwrap().push(sdp.clone());
        Ok(sdp)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> rtc_engine::Result<()> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> rtc_engine::Result<Arc<dyn DataChannel>> {
        let channel = MockDataChannel::new(label, self.target, self.emitter.clone(), init);
        self.channels.lock().unwrap().push(channel.clone());
        Ok(channel)
    }

    async fn close(&self) -> rtc_engine::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = TransportConnectionState::Closed;
        Ok(())
    }
}

// ============================================================================
// Mock transport factory
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct FactoryBehavior {
    /// Transition primary transports to Connected after `connect_delay`
    pub auto_connect_primary: bool,
    /// Transition every transport to Connected after `connect_delay`
    pub auto_connect_all: bool,
    pub connect_delay: Duration,
}

impl Default for FactoryBehavior {
    fn default() -> Self {
        Self {
            auto_connect_primary: true,
            auto_connect_all: false,
            connect_delay: Duration::from_millis(100),
        }
    }
}

pub struct MockTransportFactory {
    pub created: Mutex<Vec<Arc<MockTransport>>>,
    behavior: Mutex<FactoryBehavior>,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: Mutex::new(Vec::new()),
            behavior: Mutex::new(FactoryBehavior::default()),
        })
    }

    pub fn set_behavior(&self, behavior: FactoryBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Most recently created transport for `target`
    pub fn transport(&self, target: SignalTarget) -> Option<Arc<MockTransport>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|t| t.target == target)
            .cloned()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(
        &self,
        _rtc_config: &rtc_engine::RtcConfiguration,
        target: SignalTarget,
        primary: bool,
        _report_stats: bool,
        emitter: TransportEmitter,
    ) -> rtc_engine::Result<Arc<dyn Transport>> {
        let transport = MockTransport::new(target, primary, emitter);
        self.created.lock().unwrap().push(transport.clone());

        let behavior = *self.behavior.lock().unwrap();
        if behavior.auto_connect_all || (primary && behavior.auto_connect_primary) {
            let transport = transport.clone();
            tokio::spawn(async move {
                tokio::time::sleep(behavior.connect_delay).await;
                transport.transition(TransportConnectionState::Connected);
            });
        }

        Ok(transport)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub const TEST_URL: &str = "wss://sfu.test.example.com";
pub const TEST_TOKEN: &str = "test-token";

pub struct TestHarness {
    pub engine: Engine,
    pub signal: Arc<MockSignalClient>,
    pub factory: Arc<MockTransportFactory>,
}

impl TestHarness {
    pub fn new(subscriber_primary: bool) -> Self {
        init_logging();

        let join = proto::JoinResponse {
            ice_servers: vec![proto::IceServer {
                urls: vec!["stun:stun.test.example.com:3478".to_string()],
                username: String::new(),
                credential: String::new(),
            }],
            subscriber_primary,
            participant_sid: "PA_test".to_string(),
            server_version: "1.0.0".to_string(),
        };

        let (signal, signal_events) = MockSignalClient::new(join);
        let factory = MockTransportFactory::new();

        let config = EngineConfig {
            timeouts: EngineTimeouts {
                join_response: Duration::from_millis(500),
                transport_state: Duration::from_millis(500),
                publisher_data_channel_open: Duration::from_millis(500),
                publish: Duration::from_millis(500),
                quick_reconnect_retry: Duration::from_millis(50),
            },
            ..Default::default()
        };

        let engine = Engine::new(
            config,
            signal.clone(),
            signal_events,
            factory.clone(),
            None,
        )
        .expect("engine construction");

        Self { engine, signal, factory }
    }

    pub async fn connect(&self) -> rtc_engine::Result<()> {
        self.engine.connect(TEST_URL, TEST_TOKEN, None, None).await
    }

    pub fn publisher(&self) -> Arc<MockTransport> {
        self.factory
            .transport(SignalTarget::Publisher)
            .expect("publisher transport")
    }

    pub fn subscriber(&self) -> Arc<MockTransport> {
        self.factory
            .transport(SignalTarget::Subscriber)
            .expect("subscriber transport")
    }
}
