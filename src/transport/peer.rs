//! `webrtc`-backed transport implementation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, warn};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage as RtcDataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel as NativeDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use crate::config::{IceTransportPolicy, RtcConfiguration};
use crate::proto::{self, SignalTarget};
use crate::rtc::RtcRuntime;
use crate::transport::{
    DataChannel, DataChannelInit, DataChannelState, IceCandidate, MediaKind, RemoteTrackInfo,
    Transport, TransportConnectionState, TransportEmitter, TransportEvent, TransportFactory,
};
use crate::{EngineError, Result};

/// Collapse bursts of negotiation requests into a single offer
const NEGOTIATION_DEBOUNCE: Duration = Duration::from_millis(100);

/// Interval between stats reports when enabled
const STATS_INTERVAL: Duration = Duration::from_secs(10);

fn map_rtc_config(config: &RtcConfiguration) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect(),
        ice_transport_policy: match config.ice_transport_policy {
            IceTransportPolicy::All => RTCIceTransportPolicy::All,
            IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
        },
        ..Default::default()
    }
}

fn map_pc_state(state: RTCPeerConnectionState) -> TransportConnectionState {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => {
            TransportConnectionState::New
        }
        RTCPeerConnectionState::Connecting => TransportConnectionState::Connecting,
        RTCPeerConnectionState::Connected => TransportConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => TransportConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => TransportConnectionState::Failed,
        RTCPeerConnectionState::Closed => TransportConnectionState::Closed,
    }
}

fn map_dc_state(state: RTCDataChannelState) -> DataChannelState {
    match state {
        RTCDataChannelState::Connecting | RTCDataChannelState::Unspecified => {
            DataChannelState::Connecting
        }
        RTCDataChannelState::Open => DataChannelState::Open,
        RTCDataChannelState::Closing => DataChannelState::Closing,
        RTCDataChannelState::Closed => DataChannelState::Closed,
    }
}

fn parse_description(sdp: &proto::SessionDescription) -> Result<RTCSessionDescription> {
    match sdp.r#type.as_str() {
        "offer" => RTCSessionDescription::offer(sdp.sdp.clone()),
        "answer" => RTCSessionDescription::answer(sdp.sdp.clone()),
        other => {
            return Err(EngineError::WebRtc(format!(
                "unsupported session description type: {}",
                other
            )))
        }
    }
    .map_err(|e| EngineError::WebRtc(format!("failed to parse session description: {}", e)))
}

/// Builds [`RtcTransport`]s from the shared [`RtcRuntime`]
pub struct RtcTransportFactory {
    runtime: Arc<RtcRuntime>,
}

impl RtcTransportFactory {
    pub fn new() -> Result<Self> {
        Ok(Self { runtime: RtcRuntime::instance()? })
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        rtc_config: &RtcConfiguration,
        target: SignalTarget,
        primary: bool,
        report_stats: bool,
        emitter: TransportEmitter,
    ) -> Result<Arc<dyn Transport>> {
        let transport =
            RtcTransport::new(&self.runtime, rtc_config, target, primary, report_stats, emitter)
                .await?;
        Ok(transport)
    }
}

struct TransportInner {
    target: SignalTarget,
    primary: bool,
    pc: Arc<RTCPeerConnection>,
    emitter: TransportEmitter,

    restarting_ice: AtomicBool,
    /// An offer was requested while another was in flight
    renegotiate: AtomicBool,
    /// A debounced negotiation is already scheduled
    negotiation_pending: AtomicBool,
    /// Candidates received before the remote description was applied
    pending_candidates: Mutex<Vec<IceCandidate>>,
    /// Serializes offer creation
    offer_lock: AsyncMutex<()>,
}

/// One peer connection backed by the `webrtc` crate
pub struct RtcTransport {
    inner: Arc<TransportInner>,
}

impl RtcTransport {
    pub async fn new(
        runtime: &Arc<RtcRuntime>,
        rtc_config: &RtcConfiguration,
        target: SignalTarget,
        primary: bool,
        report_stats: bool,
        emitter: TransportEmitter,
    ) -> Result<Arc<Self>> {
        let pc = runtime.create_peer_connection(map_rtc_config(rtc_config)).await?;
        debug!("created {:?} transport (primary: {})", target, primary);

        let inner = Arc::new(TransportInner {
            target,
            primary,
            pc,
            emitter,
            restarting_ice: AtomicBool::new(false),
            renegotiate: AtomicBool::new(false),
            negotiation_pending: AtomicBool::new(false),
            pending_candidates: Mutex::new(Vec::new()),
            offer_lock: AsyncMutex::new(()),
        });

        inner.register_handlers();

        if report_stats {
            tokio::spawn(stats_task(inner.clone()));
        }

        Ok(Arc::new(Self { inner }))
    }
}

impl TransportInner {
    fn register_handlers(self: &Arc<Self>) {
        let (target, primary) = (self.target, self.primary);

        let emitter = self.emitter.clone();
        self.pc.on_peer_connection_state_change(Box::new(move |state| {
            let _ = emitter.send(TransportEvent::ConnectionChange {
                target,
                primary,
                state: map_pc_state(state),
            });
            Box::pin(async {})
        }));

        let emitter = self.emitter.clone();
        self.pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let emitter = emitter.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = emitter.send(TransportEvent::IceCandidate {
                            target,
                            candidate: IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_m_line_index: init.sdp_mline_index,
                            },
                        });
                    }
                    Err(err) => warn!("failed to serialize local ICE candidate: {}", err),
                }
            })
        }));

        let emitter = self.emitter.clone();
        self.pc.on_data_channel(Box::new(move |dc: Arc<NativeDataChannel>| {
            let emitter = emitter.clone();
            Box::pin(async move {
                let channel = RtcDataChannel::attach(dc, target, emitter.clone());
                let _ = emitter.send(TransportEvent::DataChannelOpened { target, channel });
            })
        }));

        let emitter = self.emitter.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let emitter = emitter.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => MediaKind::Audio,
                        RTPCodecType::Video => MediaKind::Video,
                        _ => return,
                    };
                    let _ = emitter.send(TransportEvent::TrackAdded {
                        target,
                        track: RemoteTrackInfo {
                            track_id: track.id().to_string(),
                            kind,
                            stream_ids: vec![track.stream_id().to_string()],
                        },
                    });
                })
            },
        ));
    }

    async fn create_and_send_offer(&self, ice_restart: bool) -> Result<()> {
        let _guard = self.offer_lock.lock().await;

        if ice_restart {
            self.restarting_ice.store(true, Ordering::SeqCst);
        }

        if self.pc.signaling_state() == RTCSignalingState::HaveLocalOffer {
            if ice_restart {
                // Re-apply the current remote description so a restart offer
                // can replace the one in flight
                let Some(remote) = self.pc.remote_description().await else {
                    self.renegotiate.store(true, Ordering::SeqCst);
                    return Ok(());
                };
                self.pc
                    .set_remote_description(remote)
                    .await
                    .map_err(|e| EngineError::WebRtc(format!("failed to re-apply remote description: {}", e)))?;
            } else {
                debug!("{:?}: offer already in flight, deferring negotiation", self.target);
                self.renegotiate.store(true, Ordering::SeqCst);
                return Ok(());
            }
        }

        let options = RTCOfferOptions { ice_restart, ..Default::default() };
        let offer = self
            .pc
            .create_offer(Some(options))
            .await
            .map_err(|e| EngineError::WebRtc(format!("failed to create offer: {}", e)))?;

        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| EngineError::WebRtc(format!("failed to set local description: {}", e)))?;

        debug!("{:?}: sending offer (ice_restart: {})", self.target, ice_restart);
        let _ = self.emitter.send(TransportEvent::Offer {
            target: self.target,
            sdp: proto::SessionDescription::offer(sdp),
        });

        Ok(())
    }
}

async fn stats_task(inner: Arc<TransportInner>) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        if inner.pc.connection_state() == RTCPeerConnectionState::Closed {
            break;
        }

        let report = inner.pc.get_stats().await;
        match serde_json::to_string(&report.reports) {
            Ok(stats) => {
                let _ = inner.emitter.send(TransportEvent::Stats { target: inner.target, stats });
            }
            Err(err) => warn!("failed to serialize stats report: {}", err),
        }
    }
}

#[async_trait]
impl Transport for RtcTransport {
    fn target(&self) -> SignalTarget {
        self.inner.target
    }

    fn is_primary(&self) -> bool {
        self.inner.primary
    }

    fn connection_state(&self) -> TransportConnectionState {
        map_pc_state(self.inner.pc.connection_state())
    }

    fn restarting_ice(&self) -> bool {
        self.inner.restarting_ice.load(Ordering::SeqCst)
    }

    fn set_restarting_ice(&self, restarting: bool) {
        self.inner.restarting_ice.store(restarting, Ordering::SeqCst);
    }

    async fn negotiate(&self) -> Result<()> {
        if self.inner.negotiation_pending.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(NEGOTIATION_DEBOUNCE).await;
            inner.negotiation_pending.store(false, Ordering::SeqCst);
            if let Err(err) = inner.create_and_send_offer(false).await {
                error!("{:?}: negotiation failed: {}", inner.target, err);
            }
        });

        Ok(())
    }

    async fn create_and_send_offer(&self, ice_restart: bool) -> Result<()> {
        self.inner.create_and_send_offer(ice_restart).await
    }

    async fn set_remote_description(&self, sdp: proto::SessionDescription) -> Result<()> {
        let is_answer = sdp.r#type == "answer";
        let description = parse_description(&sdp)?;

        self.inner
            .pc
            .set_remote_description(description)
            .await
            .map_err(|e| EngineError::WebRtc(format!("failed to set remote description: {}", e)))?;

        // Candidates that arrived before the remote description existed
        let pending: Vec<IceCandidate> = {
            let mut queue = self.inner.pending_candidates.lock().unwrap();
            queue.drain(..).collect()
        };
        for candidate in pending {
            self.add_ice_candidate(candidate).await?;
        }

        if is_answer {
            self.inner.restarting_ice.store(false, Ordering::SeqCst);
            // A negotiation request arrived while this offer was in flight
            if self.inner.renegotiate.swap(false, Ordering::SeqCst) {
                self.inner.create_and_send_offer(false).await?;
            }
        }

        Ok(())
    }

    async fn create_answer(&self) -> Result<proto::SessionDescription> {
        let answer = self
            .inner
            .pc
            .create_answer(None)
            .await
            .map_err(|e| EngineError::WebRtc(format!("failed to create answer: {}", e)))?;
        Ok(proto::SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        sdp: proto::SessionDescription,
    ) -> Result<proto::SessionDescription> {
        let description = parse_description(&sdp)?;
        self.inner
            .pc
            .set_local_description(description)
            .await
            .map_err(|e| EngineError::WebRtc(format!("failed to set local description: {}", e)))?;
        Ok(sdp)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.inner.pc.remote_description().await.is_none() {
            debug!("{:?}: queueing ICE candidate until remote description", self.inner.target);
            self.inner.pending_candidates.lock().unwrap().push(candidate);
            return Ok(());
        }

        self.inner
            .pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                ..Default::default()
            })
            .await
            .map_err(|e| EngineError::WebRtc(format!("failed to add ICE candidate: {}", e)))
    }

    async fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> Result<Arc<dyn DataChannel>> {
        let dc = self
            .inner
            .pc
            .create_data_channel(
                label,
                Some(RTCDataChannelInit {
                    ordered: Some(init.ordered),
                    max_retransmits: init.max_retransmits,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| EngineError::WebRtc(format!("failed to create data channel: {}", e)))?;

        let channel: Arc<dyn DataChannel> =
            RtcDataChannel::attach(dc, self.inner.target, self.inner.emitter.clone());
        Ok(channel)
    }

    async fn close(&self) -> Result<()> {
        debug!("closing {:?} transport", self.inner.target);
        self.inner
            .pc
            .close()
            .await
            .map_err(|e| EngineError::WebRtc(format!("failed to close peer connection: {}", e)))
    }
}

/// One native data channel wired into the transport event stream
pub struct RtcDataChannel {
    dc: Arc<NativeDataChannel>,
    target: SignalTarget,
}

impl RtcDataChannel {
    /// Wrap a native channel and forward its state changes and messages
    fn attach(
        dc: Arc<NativeDataChannel>,
        target: SignalTarget,
        emitter: TransportEmitter,
    ) -> Arc<Self> {
        let label = dc.label().to_string();

        let state_emitter = emitter.clone();
        let open_label = label.clone();
        dc.on_open(Box::new(move || {
            let _ = state_emitter.send(TransportEvent::DataChannelState {
                target,
                label: open_label.clone(),
                state: DataChannelState::Open,
            });
            Box::pin(async {})
        }));

        let state_emitter = emitter.clone();
        let close_label = label.clone();
        dc.on_close(Box::new(move || {
            let _ = state_emitter.send(TransportEvent::DataChannelState {
                target,
                label: close_label.clone(),
                state: DataChannelState::Closed,
            });
            Box::pin(async {})
        }));

        let message_label = label;
        dc.on_message(Box::new(move |message: RtcDataChannelMessage| {
            let _ = emitter.send(TransportEvent::DataMessage {
                target,
                label: message_label.clone(),
                data: message.data.to_vec(),
                binary: !message.is_string,
            });
            Box::pin(async {})
        }));

        Arc::new(Self { dc, target })
    }
}

impl std::fmt::Debug for RtcDataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcDataChannel")
            .field("label", &self.dc.label())
            .field("target", &self.target)
            .field("state", &self.dc.ready_state())
            .finish()
    }
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn state(&self) -> DataChannelState {
        map_dc_state(self.dc.ready_state())
    }

    async fn send(&self, data: &[u8]) -> bool {
        match self.dc.send(&Bytes::copy_from_slice(data)).await {
            Ok(_) => true,
            Err(err) => {
                error!("data channel {} send failed: {}", self.dc.label(), err);
                false
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.dc
            .close()
            .await
            .map_err(|e| EngineError::WebRtc(format!("failed to close data channel: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IceServer;

    #[test]
    fn test_map_rtc_config_carries_ice_servers() {
        let config = RtcConfiguration {
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.example.com:3478".to_string()],
                username: "user".to_string(),
                credential: "pass".to_string(),
            }],
            ice_transport_policy: IceTransportPolicy::Relay,
            continual_gathering: true,
        };

        let mapped = map_rtc_config(&config);
        assert_eq!(mapped.ice_servers.len(), 1);
        assert_eq!(mapped.ice_servers[0].urls[0], "stun:stun.example.com:3478");
        assert_eq!(mapped.ice_servers[0].username, "user");
        assert_eq!(mapped.ice_transport_policy, RTCIceTransportPolicy::Relay);
    }

    #[test]
    fn test_parse_description_rejects_unknown_type() {
        let sdp = proto::SessionDescription { r#type: "pranswer".to_string(), sdp: "v=0".to_string() };
        assert!(parse_description(&sdp).is_err());
    }

    #[test]
    fn test_pc_state_mapping() {
        assert_eq!(
            map_pc_state(RTCPeerConnectionState::Connected),
            TransportConnectionState::Connected
        );
        assert_eq!(
            map_pc_state(RTCPeerConnectionState::Failed),
            TransportConnectionState::Failed
        );
    }
}
