//! Peer-connection transport abstraction
//!
//! A [`Transport`] wraps one peer connection. The engine owns two of them
//! (publisher and subscriber) and drives offer/answer negotiation, ICE
//! candidate exchange and data channels through this trait, so tests can
//! substitute mocks for the native WebRTC stack.

mod peer;

pub use peer::{RtcTransport, RtcTransportFactory};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::proto::{self, SignalTarget};
use crate::{EngineError, Result};

/// Connection state of one peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// State of one data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Creation parameters for an outbound data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataChannelInit {
    pub ordered: bool,
    /// `None` means unlimited retransmits
    pub max_retransmits: Option<u16>,
}

impl DataChannelInit {
    /// Ordered delivery, unlimited retransmits
    pub fn reliable() -> Self {
        Self { ordered: true, max_retransmits: None }
    }

    /// Ordered delivery, no retransmits
    pub fn lossy() -> Self {
        Self { ordered: true, max_retransmits: Some(0) }
    }
}

/// ICE candidate as exchanged over signaling (trickle)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| EngineError::Network(format!("failed to serialize ICE candidate: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::Network(format!("failed to parse ICE candidate: {}", e)))
    }
}

/// Kind of a remote media track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Remote media track surfaced by the subscriber transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub track_id: String,
    pub kind: MediaKind,
    pub stream_ids: Vec<String>,
}

/// Events emitted by transports and their data channels.
///
/// All transports of a session share one emitter; the engine's event loop
/// routes by `target`.
#[derive(Debug)]
pub enum TransportEvent {
    ConnectionChange {
        target: SignalTarget,
        primary: bool,
        state: TransportConnectionState,
    },
    /// Locally gathered ICE candidate to forward over signaling
    IceCandidate {
        target: SignalTarget,
        candidate: IceCandidate,
    },
    /// Locally created offer to forward over signaling (publisher)
    Offer {
        target: SignalTarget,
        sdp: proto::SessionDescription,
    },
    TrackAdded {
        target: SignalTarget,
        track: RemoteTrackInfo,
    },
    TrackRemoved {
        target: SignalTarget,
        track_id: String,
    },
    /// Channel opened by the remote side (subscriber)
    DataChannelOpened {
        target: SignalTarget,
        channel: Arc<dyn DataChannel>,
    },
    DataChannelState {
        target: SignalTarget,
        label: String,
        state: DataChannelState,
    },
    DataMessage {
        target: SignalTarget,
        label: String,
        data: Vec<u8>,
        binary: bool,
    },
    Stats {
        target: SignalTarget,
        stats: String,
    },
}

/// Sending half of the transport event channel
pub type TransportEmitter = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of the transport event channel
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// One data channel, publisher-created or remote-opened
#[async_trait]
pub trait DataChannel: Send + Sync + std::fmt::Debug {
    fn label(&self) -> String;

    fn state(&self) -> DataChannelState;

    /// Submit a binary frame; `false` when the underlying stack rejected it
    async fn send(&self, data: &[u8]) -> bool;

    async fn close(&self) -> Result<()>;
}

/// One peer connection
#[async_trait]
pub trait Transport: Send + Sync {
    fn target(&self) -> SignalTarget;

    fn is_primary(&self) -> bool;

    fn connection_state(&self) -> TransportConnectionState;

    fn is_connected(&self) -> bool {
        self.connection_state() == TransportConnectionState::Connected
    }

    fn restarting_ice(&self) -> bool;

    fn set_restarting_ice(&self, restarting: bool);

    /// Request (debounced) renegotiation; resolves once an offer is queued
    async fn negotiate(&self) -> Result<()>;

    async fn create_and_send_offer(&self, ice_restart: bool) -> Result<()>;

    async fn set_remote_description(&self, sdp: proto::SessionDescription) -> Result<()>;

    async fn create_answer(&self) -> Result<proto::SessionDescription>;

    async fn set_local_description(
        &self,
        sdp: proto::SessionDescription,
    ) -> Result<proto::SessionDescription>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Create an outbound data channel (publisher side only)
    async fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> Result<Arc<dyn DataChannel>>;

    async fn close(&self) -> Result<()>;
}

/// Builds transports for a session.
///
/// The engine constructs transports inside `configure_transports`; the
/// factory seam keeps the native stack out of engine tests.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        rtc_config: &crate::config::RtcConfiguration,
        target: SignalTarget,
        primary: bool,
        report_stats: bool,
        emitter: TransportEmitter,
    ) -> Result<Arc<dyn Transport>>;
}
