//! Signaling channel abstraction
//!
//! The engine drives a bidirectional signaling channel through the
//! [`SignalClient`] trait. The production implementation
//! ([`WsSignalClient`]) speaks binary protobuf frames over WebSocket; tests
//! substitute a scripted mock.

mod client;

pub use client::WsSignalClient;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::ConnectOptions;
use crate::engine::{DisconnectReason, ReconnectMode};
use crate::proto::{self, SignalTarget};
use crate::sync::Completer;
use crate::transport::IceCandidate;
use crate::Result;

/// How a signaling connection is established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalConnectMode {
    /// New session; the server replies with a join response
    Fresh,
    /// Resume an existing session
    Reconnect(ReconnectMode),
}

impl SignalConnectMode {
    pub fn is_reconnect(&self) -> bool {
        matches!(self, SignalConnectMode::Reconnect(_))
    }
}

/// Inbound signaling events delivered to the engine.
///
/// The join response is not an event: it resolves the client's join
/// completer, and no other frame is delivered until the engine calls
/// [`SignalClient::resume_response_queue`].
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    /// Answer to a publisher offer
    Answer(proto::SessionDescription),
    /// Server-initiated subscriber offer
    Offer(proto::SessionDescription),
    /// Remote ICE candidate for the targeted transport
    Trickle {
        candidate: IceCandidate,
        target: SignalTarget,
    },
    /// Server asked us to leave
    Leave { can_reconnect: bool },
    /// Rotated access token
    RefreshToken(String),
    /// The signaling socket was lost
    Close { reason: String },
}

/// Sending half of the signal event channel
pub type SignalEmitter = mpsc::UnboundedSender<SignalEvent>;

/// Receiving half of the signal event channel
pub type SignalEvents = mpsc::UnboundedReceiver<SignalEvent>;

/// Bidirectional signaling channel consumed by the engine.
///
/// Order contract: after `connect`, no inbound frame other than the join
/// response is delivered until `resume_response_queue` is invoked.
#[async_trait]
pub trait SignalClient: Send + Sync {
    /// Establish (or re-establish) the signaling socket
    async fn connect(
        &self,
        url: &str,
        token: &str,
        options: &ConnectOptions,
        mode: SignalConnectMode,
    ) -> Result<()>;

    /// Idempotent teardown of the signaling socket
    async fn clean_up(&self, reason: &DisconnectReason);

    /// Resolved once per session with the server's initial join frame
    fn join_response_completer(&self) -> Completer<proto::JoinResponse>;

    async fn send_offer(&self, sdp: proto::SessionDescription) -> Result<()>;

    async fn send_answer(&self, sdp: proto::SessionDescription) -> Result<()>;

    async fn send_candidate(&self, candidate: IceCandidate, target: SignalTarget) -> Result<()>;

    async fn send_add_track(&self, request: proto::AddTrackRequest) -> Result<()>;

    /// Flush requests queued while the session was resuming
    async fn send_queued_requests(&self) -> Result<()>;

    /// Reserve the completer resolved by the track-published response for
    /// `cid`
    fn prepare_track_completer(&self, cid: &str) -> Completer<proto::TrackInfo>;

    /// Release inbound frames buffered since connect (post-join)
    async fn resume_response_queue(&self);
}
