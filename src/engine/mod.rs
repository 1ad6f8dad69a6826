//! Session engine
//!
//! Coordinates one signaling channel and two peer connections (publisher and
//! subscriber) against an SFU: the initial connect handshake, steady-state
//! message exchange over the publisher data channels, reactive reconnection
//! (quick, then full) and teardown.
//!
//! All engine state mutation is serialized: inbound signaling, transport and
//! connectivity events are drained by a single event-loop task, and the
//! public operations only touch shared fields through short lock sections.
//! Long-running pipelines (connect, reconnect, send) suspend on
//! [`Completer`]s that the event loop resolves.

mod state;

pub use state::{
    ConnectionMode, ConnectionState, DisconnectReason, Reliability, ReconnectMode,
    LOSSY_DC_LABEL, RELIABLE_DC_LABEL,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use prost::Message;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use crate::config::{
    ConnectOptions, EngineConfig, EngineTimeouts, RoomOptions, QUICK_RECONNECT_ATTEMPTS,
};
use crate::net::{ConnectivityListener, PathChange};
use crate::observer::ObserverList;
use crate::proto::{self, SignalTarget};
use crate::retry::retry;
use crate::signaling::{SignalClient, SignalConnectMode, SignalEvent, SignalEvents};
use crate::stopwatch::Stopwatch;
use crate::sync::Completer;
use crate::transport::{
    DataChannel, DataChannelInit, DataChannelState, RemoteTrackInfo, Transport,
    TransportConnectionState, TransportEvent, TransportFactory,
};
use crate::{EngineError, Result};

/// Current session endpoint; url and token are set and cleared together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub url: String,
    pub token: String,
}

/// Generate a client-side track cid for add-track requests
pub fn new_track_cid() -> String {
    format!("TR_{}", uuid::Uuid::new_v4().simple())
}

/// Lifecycle notifications produced by the engine.
///
/// All methods have empty defaults; observers implement what they need.
pub trait EngineObserver: Send + Sync {
    fn on_connection_state_changed(&self, _old: &ConnectionState, _new: &ConnectionState) {}
    fn on_data_channel_state_changed(&self, _label: &str, _state: DataChannelState) {}
    fn on_track_added(&self, _track: &RemoteTrackInfo) {}
    fn on_track_removed(&self, _track_id: &str) {}
    fn on_user_packet(&self, _packet: &proto::UserPacket) {}
    fn on_speakers_update(&self, _speakers: &[proto::SpeakerInfo]) {}
    fn on_stats(&self, _stats: &str, _target: SignalTarget) {}
}

struct EngineInner {
    config: RwLock<EngineConfig>,
    state: Mutex<ConnectionState>,
    identity: Mutex<Option<SessionIdentity>>,

    signal: Arc<dyn SignalClient>,
    transport_factory: Arc<dyn TransportFactory>,
    rtc_emitter: mpsc::UnboundedSender<TransportEvent>,

    publisher: RwLock<Option<Arc<dyn Transport>>>,
    subscriber: RwLock<Option<Arc<dyn Transport>>>,

    /// From the join response; selects which transport defines liveness
    subscriber_primary: AtomicBool,
    /// Set on the first publisher negotiation, reset only by clean_up_rtc
    has_published: AtomicBool,

    // Publisher-created outbound channels
    dc_reliable_pub: Mutex<Option<Arc<dyn DataChannel>>>,
    dc_lossy_pub: Mutex<Option<Arc<dyn DataChannel>>>,
    // Subscriber-received inbound channels (subscriber-primary sessions)
    dc_reliable_sub: Mutex<Option<Arc<dyn DataChannel>>>,
    dc_lossy_sub: Mutex<Option<Arc<dyn DataChannel>>>,

    primary_transport_connected: Completer<()>,
    publisher_transport_connected: Completer<()>,
    publisher_reliable_dc_open: Completer<()>,
    publisher_lossy_dc_open: Completer<()>,

    connect_stopwatch: Mutex<Stopwatch>,
    observers: ObserverList<dyn EngineObserver>,

    /// Serializes concurrent connect calls
    connect_lock: AsyncMutex<()>,
}

/// The session engine. Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
    close_tx: Arc<watch::Sender<bool>>,
}

impl Engine {
    /// Create an engine from its collaborators.
    ///
    /// `signal_events` is the inbound half of the signal client's event
    /// channel; transports created by `transport_factory` report into an
    /// engine-owned channel. An optional connectivity listener feeds OS
    /// network-path changes into the reconnect logic.
    pub fn new(
        config: EngineConfig,
        signal: Arc<dyn SignalClient>,
        signal_events: SignalEvents,
        transport_factory: Arc<dyn TransportFactory>,
        connectivity: Option<&dyn ConnectivityListener>,
    ) -> Result<Self> {
        config.validate()?;

        let (rtc_emitter, rtc_events) = mpsc::unbounded_channel();

        let inner = Arc::new(EngineInner {
            config: RwLock::new(config),
            state: Mutex::new(ConnectionState::default()),
            identity: Mutex::new(None),
            signal,
            transport_factory,
            rtc_emitter,
            publisher: RwLock::new(None),
            subscriber: RwLock::new(None),
            subscriber_primary: AtomicBool::new(false),
            has_published: AtomicBool::new(false),
            dc_reliable_pub: Mutex::new(None),
            dc_lossy_pub: Mutex::new(None),
            dc_reliable_sub: Mutex::new(None),
            dc_lossy_sub: Mutex::new(None),
            primary_transport_connected: Completer::new(),
            publisher_transport_connected: Completer::new(),
            publisher_reliable_dc_open: Completer::new(),
            publisher_lossy_dc_open: Completer::new(),
            connect_stopwatch: Mutex::new(Stopwatch::new("connect")),
            observers: ObserverList::new(),
            connect_lock: AsyncMutex::new(()),
        });

        let (close_tx, close_rx) = watch::channel(false);
        let connectivity_events = connectivity.map(|listener| listener.subscribe());
        tokio::spawn(inner.clone().event_loop(signal_events, rtc_events, connectivity_events, close_rx));

        Ok(Self { inner, close_tx: Arc::new(close_tx) })
    }

    /// Register a lifecycle observer
    pub fn register_observer(&self, observer: Arc<dyn EngineObserver>) {
        self.inner.observers.register(observer);
    }

    /// Unregister a previously registered observer
    pub fn unregister_observer(&self, observer: &Arc<dyn EngineObserver>) {
        self.inner.observers.unregister(observer);
    }

    /// Current session state
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().unwrap().clone()
    }

    /// URL of the live session, if any
    pub fn url(&self) -> Option<String> {
        self.inner.identity.lock().unwrap().as_ref().map(|i| i.url.clone())
    }

    /// Token of the live session, if any
    pub fn token(&self) -> Option<String> {
        self.inner.identity.lock().unwrap().as_ref().map(|i| i.token.clone())
    }

    /// Whether the publisher has negotiated at least once this session
    pub fn has_published(&self) -> bool {
        self.inner.has_published.load(Ordering::SeqCst)
    }

    /// Whether the server designated the subscriber as the primary transport
    pub fn subscriber_primary(&self) -> bool {
        self.inner.subscriber_primary.load(Ordering::SeqCst)
    }

    /// Whether both transports currently exist (between a successful
    /// transport configuration and the next RTC teardown)
    pub fn transports_configured(&self) -> bool {
        self.inner.publisher().is_some() && self.inner.subscriber().is_some()
    }

    /// Establish a session.
    ///
    /// Safe to call on a live engine: the previous session is torn down
    /// first. On success the engine is `Connected(Normal)` and the identity
    /// is recorded for later reconnects; on failure the engine is cleaned up
    /// with a network reason and the error is surfaced.
    pub async fn connect(
        &self,
        url: &str,
        token: &str,
        connect_options: Option<ConnectOptions>,
        room_options: Option<RoomOptions>,
    ) -> Result<()> {
        let _guard = self.inner.connect_lock.lock().await;

        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(EngineError::Config(format!(
                "url must start with ws:// or wss://, got: {}",
                url
            )));
        }

        {
            let mut config = self.inner.config.write().unwrap();
            if let Some(connect) = connect_options {
                config.connect = connect;
            }
            if let Some(room) = room_options {
                config.room = room;
            }
            config.validate()?;
        }

        // Reach a known idle state; the engine may be invoked on a live
        // session
        self.inner.clean_up(DisconnectReason::Sdk).await;

        self.inner.set_state(ConnectionState::Connecting(ConnectionMode::Normal));
        self.inner.connect_stopwatch.lock().unwrap().clear();

        match self
            .inner
            .full_connect_sequence(url, token, SignalConnectMode::Fresh)
            .await
        {
            Ok(()) => {
                *self.inner.identity.lock().unwrap() = Some(SessionIdentity {
                    url: url.to_string(),
                    token: token.to_string(),
                });
                self.inner.set_state(ConnectionState::Connected(ConnectionMode::Normal));
                info!("{}", self.inner.connect_stopwatch.lock().unwrap());
                Ok(())
            }
            Err(err) => {
                warn!("connect failed: {}", err);
                self.inner
                    .clean_up(DisconnectReason::Network(Some(err.to_string())))
                    .await;
                Err(err)
            }
        }
    }

    /// Disconnect at the application's request
    pub async fn disconnect(&self) {
        self.inner.clean_up(DisconnectReason::User).await;
    }

    /// Serialize and submit an application packet on the matching publisher
    /// data channel, bringing the publisher up first when needed.
    pub async fn send(&self, packet: proto::UserPacket, reliability: Reliability) -> Result<()> {
        self.inner.send(packet, reliability).await
    }

    /// Publish a track request and await the server's response for its `cid`.
    ///
    /// `populate` finishes the request (dimensions, mute state, ...) and its
    /// result is paired with the received track info.
    pub async fn send_and_wait_add_track<F, R>(
        &self,
        cid: &str,
        name: &str,
        kind: proto::TrackType,
        source: proto::TrackSource,
        populate: F,
    ) -> Result<(R, proto::TrackInfo)>
    where
        F: FnOnce(&mut proto::AddTrackRequest) -> R,
    {
        self.inner
            .send_and_wait_add_track(cid, name, kind, source, populate)
            .await
    }

    /// Start the publisher's first negotiation (called when a track is added
    /// on a lazily negotiated session)
    pub async fn publisher_should_negotiate(&self) -> Result<()> {
        self.inner.publisher_should_negotiate().await
    }

    /// Tear down the session and stop the event loop. The engine cannot be
    /// reused afterwards.
    pub async fn close(&self) {
        self.inner.clean_up(DisconnectReason::User).await;
        let _ = self.close_tx.send(true);
    }
}

impl EngineInner {
    // ========================================================================
    // Event loop (the serialization point for all state mutation)
    // ========================================================================

    async fn event_loop(
        self: Arc<Self>,
        mut signal_events: SignalEvents,
        mut rtc_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut connectivity: Option<mpsc::UnboundedReceiver<PathChange>>,
        mut close_rx: watch::Receiver<bool>,
    ) {
        async fn next_path_change(
            rx: &mut Option<mpsc::UnboundedReceiver<PathChange>>,
        ) -> Option<PathChange> {
            match rx {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        }

        loop {
            tokio::select! {
                Some(event) = signal_events.recv() => self.on_signal_event(event).await,
                Some(event) = rtc_events.recv() => self.on_transport_event(event).await,
                Some(event) = next_path_change(&mut connectivity) => self.on_path_change(event),
                _ = close_rx.changed() => {
                    debug!("closing engine event loop");
                    break;
                }
                else => break,
            }
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    fn state(&self) -> ConnectionState {
        self.state.lock().unwrap().clone()
    }

    fn timeouts(&self) -> EngineTimeouts {
        self.config.read().unwrap().timeouts
    }

    /// Transition and notify observers exactly once. Deep-equal transitions
    /// are no-ops; tag-equal but value-different transitions (e.g. quick to
    /// full reconnect) still notify.
    fn set_state(&self, new: ConnectionState) {
        let old = {
            let mut guard = self.state.lock().unwrap();
            if *guard == new {
                return;
            }
            std::mem::replace(&mut *guard, new.clone())
        };

        debug!("connection state {:?} -> {:?}", old, new);
        self.observers
            .notify(|o| o.on_connection_state_changed(&old, &new));
    }

    fn identity(&self) -> Option<SessionIdentity> {
        self.identity.lock().unwrap().clone()
    }

    fn publisher(&self) -> Option<Arc<dyn Transport>> {
        self.publisher.read().unwrap().clone()
    }

    fn subscriber(&self) -> Option<Arc<dyn Transport>> {
        self.subscriber.read().unwrap().clone()
    }

    fn transport_for(&self, target: SignalTarget) -> Option<Arc<dyn Transport>> {
        match target {
            SignalTarget::Publisher => self.publisher(),
            SignalTarget::Subscriber => self.subscriber(),
        }
    }

    fn publisher_data_channel(&self, reliability: Reliability) -> Option<Arc<dyn DataChannel>> {
        match reliability {
            Reliability::Reliable => self.dc_reliable_pub.lock().unwrap().clone(),
            Reliability::Lossy => self.dc_lossy_pub.lock().unwrap().clone(),
        }
    }

    fn publisher_dc_completer(&self, reliability: Reliability) -> &Completer<()> {
        match reliability {
            Reliability::Reliable => &self.publisher_reliable_dc_open,
            Reliability::Lossy => &self.publisher_lossy_dc_open,
        }
    }

    // ========================================================================
    // Connect
    // ========================================================================

    async fn full_connect_sequence(
        &self,
        url: &str,
        token: &str,
        mode: SignalConnectMode,
    ) -> Result<()> {
        let options = self.config.read().unwrap().connect.clone();
        self.signal.connect(url, token, &options, mode).await?;

        let join = self
            .signal
            .join_response_completer()
            .wait(self.timeouts().join_response, || {
                EngineError::SignalTimedOut("failed to receive join response".to_string())
            })
            .await?;
        self.connect_stopwatch.lock().unwrap().split("signal");
        debug!(
            "received join response (subscriber_primary: {}, {} ice servers)",
            join.subscriber_primary,
            join.ice_servers.len()
        );

        self.configure_transports(&join).await?;
        self.signal.resume_response_queue().await;

        self.primary_transport_connected
            .wait(self.timeouts().transport_state, || {
                EngineError::TransportTimedOut("primary transport didn't connect".to_string())
            })
            .await?;
        self.connect_stopwatch.lock().unwrap().split("engine");

        Ok(())
    }

    async fn configure_transports(&self, join: &proto::JoinResponse) -> Result<()> {
        if self.publisher().is_some() && self.subscriber().is_some() {
            debug!("transports already configured");
            return Ok(());
        }

        let subscriber_primary = join.subscriber_primary;
        self.subscriber_primary
            .store(subscriber_primary, Ordering::SeqCst);

        let (rtc_config, report_stats) = {
            let config = self.config.read().unwrap();
            (
                config.connect.rtc_config.merge_join_ice_servers(join),
                config.room.report_stats,
            )
        };

        let subscriber = self
            .transport_factory
            .create(
                &rtc_config,
                SignalTarget::Subscriber,
                subscriber_primary,
                report_stats,
                self.rtc_emitter.clone(),
            )
            .await?;

        let publisher = self
            .transport_factory
            .create(
                &rtc_config,
                SignalTarget::Publisher,
                !subscriber_primary,
                report_stats,
                self.rtc_emitter.clone(),
            )
            .await?;

        // Publisher offers surface as transport events and are forwarded to
        // signaling by the event loop.
        let reliable = publisher
            .create_data_channel(RELIABLE_DC_LABEL, DataChannelInit::reliable())
            .await?;
        let lossy = publisher
            .create_data_channel(LOSSY_DC_LABEL, DataChannelInit::lossy())
            .await?;

        *self.dc_reliable_pub.lock().unwrap() = Some(reliable);
        *self.dc_lossy_pub.lock().unwrap() = Some(lossy);
        *self.subscriber.write().unwrap() = Some(subscriber);
        *self.publisher.write().unwrap() = Some(publisher);

        // When the publisher is primary there is nothing to wait for: kick
        // off its negotiation now. Subscriber-primary sessions negotiate the
        // publisher lazily, on first use.
        if !subscriber_primary {
            self.publisher_should_negotiate().await?;
        }

        Ok(())
    }

    async fn publisher_should_negotiate(&self) -> Result<()> {
        let Some(publisher) = self.publisher() else {
            debug!("publisher_should_negotiate: publisher is nil");
            return Ok(());
        };

        self.has_published.store(true, Ordering::SeqCst);
        publisher.negotiate().await
    }

    // ========================================================================
    // Data plane
    // ========================================================================

    async fn send(&self, packet: proto::UserPacket, reliability: Reliability) -> Result<()> {
        self.ensure_publisher_connected(reliability).await?;

        let data_packet = proto::DataPacket {
            kind: reliability.wire_kind() as i32,
            value: Some(proto::data_packet::Value::User(packet)),
        };
        let buf = data_packet.encode_to_vec();

        let channel = self
            .publisher_data_channel(reliability)
            .ok_or_else(|| EngineError::State("Data channel is nil".to_string()))?;

        if !channel.send(&buf).await {
            return Err(EngineError::WebRtc(
                "DataChannel.sendData returned false".to_string(),
            ));
        }

        Ok(())
    }

    /// Suspend until the publisher transport and the matching data channel
    /// are both ready. On publisher-primary sessions the publisher connects
    /// with the session and no wait is needed.
    async fn ensure_publisher_connected(&self, reliability: Reliability) -> Result<()> {
        if !self.subscriber_primary.load(Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(publisher) = self.publisher() {
            let state = publisher.connection_state();
            if state != TransportConnectionState::Connected
                && state != TransportConnectionState::Connecting
            {
                self.publisher_should_negotiate().await?;
            }
        }

        let timeouts = self.timeouts();
        let transport_ready = self.publisher_transport_connected.wait(
            timeouts.transport_state,
            || EngineError::TransportTimedOut("publisher transport didn't connect".to_string()),
        );
        let channel_ready = self.publisher_dc_completer(reliability).wait(
            timeouts.publisher_data_channel_open,
            || EngineError::TransportTimedOut("publisher data channel didn't open".to_string()),
        );

        tokio::try_join!(transport_ready, channel_ready)?;
        Ok(())
    }

    async fn send_and_wait_add_track<F, R>(
        &self,
        cid: &str,
        name: &str,
        kind: proto::TrackType,
        source: proto::TrackSource,
        populate: F,
    ) -> Result<(R, proto::TrackInfo)>
    where
        F: FnOnce(&mut proto::AddTrackRequest) -> R,
    {
        let completer = self.signal.prepare_track_completer(cid);

        let mut request = proto::AddTrackRequest {
            cid: cid.to_string(),
            name: name.to_string(),
            r#type: kind as i32,
            source: source as i32,
            ..Default::default()
        };
        let out = populate(&mut request);

        self.signal.send_add_track(request).await?;

        let info = completer
            .wait(self.timeouts().publish, || {
                EngineError::EngineTimedOut(
                    "server didn't respond to addTrack request".to_string(),
                )
            })
            .await?;

        Ok((out, info))
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    async fn clean_up(&self, reason: DisconnectReason) {
        debug!("clean up ({:?})", reason);

        *self.identity.lock().unwrap() = None;
        self.set_state(ConnectionState::Disconnected(reason.clone()));

        self.signal.clean_up(&reason).await;

        self.primary_transport_connected.reset();
        self.publisher_transport_connected.reset();
        self.publisher_reliable_dc_open.reset();
        self.publisher_lossy_dc_open.reset();

        self.connect_stopwatch.lock().unwrap().clear();

        self.clean_up_rtc().await;
    }

    async fn clean_up_rtc(&self) {
        let channels: Vec<Arc<dyn DataChannel>> = [
            self.dc_reliable_pub.lock().unwrap().take(),
            self.dc_lossy_pub.lock().unwrap().take(),
            self.dc_reliable_sub.lock().unwrap().take(),
            self.dc_lossy_sub.lock().unwrap().take(),
        ]
        .into_iter()
        .flatten()
        .collect();

        for channel in channels {
            if let Err(err) = channel.close().await {
                warn!("failed to close data channel {}: {}", channel.label(), err);
            }
        }

        let publisher = self.publisher.write().unwrap().take();
        let subscriber = self.subscriber.write().unwrap().take();

        if let Some(publisher) = publisher {
            if let Err(err) = publisher.close().await {
                warn!("failed to close publisher transport: {}", err);
            }
        }
        if let Some(subscriber) = subscriber {
            if let Err(err) = subscriber.close().await {
                warn!("failed to close subscriber transport: {}", err);
            }
        }

        // The transports are gone; readiness is "not yet" until a new
        // session resolves it again. Pending waiters stay suspended.
        self.primary_transport_connected.set(None);
        self.publisher_transport_connected.set(None);
        self.publisher_reliable_dc_open.set(None);
        self.publisher_lossy_dc_open.set(None);

        self.has_published.store(false, Ordering::SeqCst);
    }

    // ========================================================================
    // Reconnection
    // ========================================================================

    /// Claim the reconnecting state, or explain why not
    fn try_begin_reconnect(&self) -> Result<()> {
        let old = {
            let mut guard = self.state.lock().unwrap();
            if guard.is_reconnecting() {
                return Err(EngineError::State("Already reconnecting".to_string()));
            }
            if !guard.is_connected() {
                return Err(EngineError::State(
                    "Must be called with connected state".to_string(),
                ));
            }
            std::mem::replace(
                &mut *guard,
                ConnectionState::Connecting(ConnectionMode::Reconnect(ReconnectMode::Quick)),
            )
        };

        let new = ConnectionState::Connecting(ConnectionMode::Reconnect(ReconnectMode::Quick));
        self.observers
            .notify(|o| o.on_connection_state_changed(&old, &new));
        Ok(())
    }

    async fn start_reconnect(self: &Arc<Self>) -> Result<()> {
        {
            let state = self.state();
            if state.is_reconnecting() {
                return Err(EngineError::State("Already reconnecting".to_string()));
            }
            if !state.is_connected() {
                return Err(EngineError::State(
                    "Must be called with connected state".to_string(),
                ));
            }
        }
        if self.identity().is_none() {
            return Err(EngineError::State(
                "Reconnect requires url and token".to_string(),
            ));
        }
        if self.publisher().is_none() || self.subscriber().is_none() {
            return Err(EngineError::State(
                "Reconnect requires existing transports".to_string(),
            ));
        }

        // Claim the reconnecting state; re-verified under the lock so two
        // concurrent triggers cannot both proceed
        self.try_begin_reconnect()?;
        info!("starting quick reconnect");

        let quick = retry(
            QUICK_RECONNECT_ATTEMPTS,
            self.timeouts().quick_reconnect_retry,
            |_tries_left, _err| self.state().is_reconnecting(),
            || self.quick_reconnect_sequence(),
        )
        .await;

        let result = match quick {
            Ok(()) => Ok(()),
            Err(err) if self.state().is_reconnecting() => {
                info!("quick reconnect failed ({}), trying full reconnect", err);
                self.set_state(ConnectionState::Connecting(ConnectionMode::Reconnect(
                    ReconnectMode::Full,
                )));
                self.full_reconnect_sequence().await
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                let mode = self.state().reconnect_mode().unwrap_or(ReconnectMode::Quick);
                self.set_state(ConnectionState::Connected(ConnectionMode::Reconnect(mode)));
                info!("reconnect succeeded ({:?})", mode);
                Ok(())
            }
            Err(err) => {
                if self.state().is_reconnecting() {
                    warn!("reconnect failed: {}", err);
                    self.clean_up(DisconnectReason::Network(Some(err.to_string())))
                        .await;
                } else {
                    // Aborted by a user-initiated disconnect; that path
                    // already tore the session down with its own reason.
                    debug!("reconnect aborted: {}", err);
                }
                Err(err)
            }
        }
    }

    /// Barrier between reconnect stages: a user-initiated disconnect flips
    /// the state and the next barrier terminates the sequence.
    fn check_should_continue(&self) -> Result<()> {
        if self.state().is_reconnecting() {
            Ok(())
        } else {
            Err(EngineError::State(
                "Reconnection has been aborted".to_string(),
            ))
        }
    }

    /// Resume the same session: signaling reconnect, ICE restart on the
    /// subscriber, offer with ICE restart on the publisher if it published.
    async fn quick_reconnect_sequence(&self) -> Result<()> {
        let identity = self
            .identity()
            .ok_or_else(|| EngineError::State("Reconnect requires url and token".to_string()))?;
        let options = self.config.read().unwrap().connect.clone();

        self.check_should_continue()?;
        self.signal
            .connect(
                &identity.url,
                &identity.token,
                &options,
                SignalConnectMode::Reconnect(ReconnectMode::Quick),
            )
            .await?;

        self.check_should_continue()?;
        self.primary_transport_connected
            .wait(self.timeouts().transport_state, || {
                EngineError::TransportTimedOut("primary transport didn't connect".to_string())
            })
            .await?;

        self.check_should_continue()?;
        if let Some(subscriber) = self.subscriber() {
            subscriber.set_restarting_ice(true);
        }

        if self.has_published.load(Ordering::SeqCst) {
            let publisher = self
                .publisher()
                .ok_or_else(|| EngineError::State("Publisher is nil".to_string()))?;
            publisher.create_and_send_offer(true).await?;

            self.check_should_continue()?;
            self.publisher_transport_connected
                .wait(self.timeouts().transport_state, || {
                    EngineError::TransportTimedOut(
                        "publisher transport didn't connect".to_string(),
                    )
                })
                .await?;
        }

        self.check_should_continue()?;
        self.signal.send_queued_requests().await?;

        Ok(())
    }

    /// Tear down all RTC state and redo the initial connect sequence against
    /// the same URL and token.
    async fn full_reconnect_sequence(&self) -> Result<()> {
        let identity = self
            .identity()
            .ok_or_else(|| EngineError::State("Reconnect requires url and token".to_string()))?;

        self.check_should_continue()?;
        self.clean_up_rtc().await;

        self.check_should_continue()?;
        self.full_connect_sequence(
            &identity.url,
            &identity.token,
            SignalConnectMode::Reconnect(ReconnectMode::Full),
        )
        .await
    }

    fn spawn_reconnect(self: &Arc<Self>, source: &'static str) {
        let inner = self.clone();
        tokio::spawn(async move {
            if let Err(err) = inner.start_reconnect().await {
                debug!("reconnect not started ({}): {}", source, err);
            }
        });
    }

    // ========================================================================
    // Signaling events
    // ========================================================================

    async fn on_signal_event(self: &Arc<Self>, event: SignalEvent) {
        match event {
            SignalEvent::Answer(sdp) => match self.publisher() {
                Some(publisher) => {
                    if let Err(err) = publisher.set_remote_description(sdp).await {
                        error!("failed to apply publisher answer: {}", err);
                    }
                }
                None => warn!("received answer but publisher is nil"),
            },

            SignalEvent::Offer(sdp) => {
                let Some(subscriber) = self.subscriber() else {
                    error!("received offer but subscriber is nil");
                    return;
                };
                if let Err(err) = self.answer_subscriber_offer(&subscriber, sdp).await {
                    error!("failed to answer subscriber offer: {}", err);
                }
            }

            SignalEvent::Trickle { candidate, target } => match self.transport_for(target) {
                Some(transport) => {
                    if let Err(err) = transport.add_ice_candidate(candidate).await {
                        warn!("failed to add remote ICE candidate ({:?}): {}", target, err);
                    }
                }
                None => warn!("received ICE candidate for missing transport {:?}", target),
            },

            SignalEvent::Leave { can_reconnect } => {
                if can_reconnect {
                    // The server will drop the socket; the close event drives
                    // the reconnect.
                    info!("server asked to leave (reconnect allowed)");
                } else {
                    info!("server asked to leave");
                    self.clean_up(DisconnectReason::Network(None)).await;
                }
            }

            SignalEvent::RefreshToken(token) => {
                let mut identity = self.identity.lock().unwrap();
                if let Some(identity) = identity.as_mut() {
                    identity.token = token;
                    debug!("access token rotated");
                }
            }

            SignalEvent::Close { reason } => {
                debug!("signal client closed: {}", reason);
                if self.state().is_connected() {
                    self.spawn_reconnect("signal close");
                }
            }
        }
    }

    async fn answer_subscriber_offer(
        &self,
        subscriber: &Arc<dyn Transport>,
        offer: proto::SessionDescription,
    ) -> Result<()> {
        subscriber.set_remote_description(offer).await?;
        let answer = subscriber.create_answer().await?;
        let answer = subscriber.set_local_description(answer).await?;
        self.signal.send_answer(answer).await
    }

    // ========================================================================
    // Transport and data-channel events
    // ========================================================================

    async fn on_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionChange { target, primary, state } => {
                debug!("transport {:?} (primary: {}) -> {:?}", target, primary, state);

                let connected = state == TransportConnectionState::Connected;
                if primary {
                    self.primary_transport_connected
                        .set(connected.then_some(()));
                }
                if target == SignalTarget::Publisher {
                    self.publisher_transport_connected
                        .set(connected.then_some(()));
                }

                let failed = matches!(
                    state,
                    TransportConnectionState::Disconnected | TransportConnectionState::Failed
                );
                if failed && self.state().is_connected() {
                    let relevant = primary
                        || (target == SignalTarget::Publisher
                            && self.has_published.load(Ordering::SeqCst));
                    if relevant {
                        self.spawn_reconnect("transport failure");
                    }
                }
            }

            TransportEvent::IceCandidate { target, candidate } => {
                if let Err(err) = self.signal.send_candidate(candidate, target).await {
                    warn!("failed to send ICE candidate ({:?}): {}", target, err);
                }
            }

            TransportEvent::Offer { target, sdp } => {
                if target != SignalTarget::Publisher {
                    warn!("unexpected offer from {:?} transport", target);
                    return;
                }
                if let Err(err) = self.signal.send_offer(sdp).await {
                    warn!("failed to send publisher offer: {}", err);
                }
            }

            TransportEvent::TrackAdded { target, track } => {
                if target == SignalTarget::Subscriber {
                    self.observers.notify(|o| o.on_track_added(&track));
                }
            }

            TransportEvent::TrackRemoved { target, track_id } => {
                if target == SignalTarget::Subscriber {
                    self.observers.notify(|o| o.on_track_removed(&track_id));
                }
            }

            TransportEvent::DataChannelOpened { target, channel } => {
                self.on_remote_data_channel(target, channel);
            }

            TransportEvent::DataChannelState { target, label, state } => {
                self.observers
                    .notify(|o| o.on_data_channel_state_changed(&label, state));

                if target == SignalTarget::Publisher {
                    let completer = match label.as_str() {
                        RELIABLE_DC_LABEL => Some(&self.publisher_reliable_dc_open),
                        LOSSY_DC_LABEL => Some(&self.publisher_lossy_dc_open),
                        _ => None,
                    };
                    if let Some(completer) = completer {
                        completer.set((state == DataChannelState::Open).then_some(()));
                    }
                }
            }

            TransportEvent::DataMessage { label, data, binary, .. } => {
                if !binary {
                    warn!("dropping non-binary frame on {}", label);
                    return;
                }
                self.on_data_message(&data);
            }

            TransportEvent::Stats { target, stats } => {
                self.observers.notify(|o| o.on_stats(&stats, target));
            }
        }
    }

    fn on_remote_data_channel(&self, target: SignalTarget, channel: Arc<dyn DataChannel>) {
        if target != SignalTarget::Subscriber {
            warn!("remote data channel from {:?} transport, ignoring", target);
            return;
        }
        if !self.subscriber_primary.load(Ordering::SeqCst) {
            debug!("ignoring remote data channel on publisher-primary session");
            return;
        }

        let label = channel.label();
        match label.as_str() {
            RELIABLE_DC_LABEL => *self.dc_reliable_sub.lock().unwrap() = Some(channel),
            LOSSY_DC_LABEL => *self.dc_lossy_sub.lock().unwrap() = Some(channel),
            other => warn!("remote data channel with unknown label {:?}, dropping", other),
        }
    }

    fn on_data_message(&self, data: &[u8]) {
        let packet = match proto::DataPacket::decode(data) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("failed to parse data packet: {}", err);
                return;
            }
        };

        match packet.value {
            Some(proto::data_packet::Value::User(user)) => {
                self.observers.notify(|o| o.on_user_packet(&user));
            }
            Some(proto::data_packet::Value::Speaker(update)) => {
                self.observers.notify(|o| o.on_speakers_update(&update.speakers));
            }
            // Unknown variants are ignored for forward compatibility
            None => {}
        }
    }

    fn on_path_change(self: &Arc<Self>, change: PathChange) {
        info!("network path changed: {:?}", change.interface);
        if self.state().is_connected() {
            self.spawn_reconnect("network path change");
        }
    }
}
