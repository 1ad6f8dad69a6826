//! Session engine for SFU-based real-time communication clients
//!
//! This crate implements the connection core of a WebRTC client that talks
//! to a selective-forwarding media server: one signaling channel, two peer
//! connections (publisher and subscriber), two publisher data channels for
//! application data, and the full session lifecycle under a mobile-network
//! failure model (path switches, ICE failures, transient signaling loss).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Engine (session state machine)                          │
//! │  ├─ SignalClient (protobuf frames over WebSocket)        │
//! │  ├─ Transport: publisher   ── dc "_reliable", "_lossy"   │
//! │  ├─ Transport: subscriber  ── remote tracks + channels   │
//! │  ├─ Completer rendezvous (join, transports, channels)    │
//! │  └─ EngineObserver fan-out (state, packets, tracks)      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The server designates one transport as *primary* (`subscriber_primary` in
//! the join response); the session counts as up once that transport is
//! connected. Reconnection is reactive: transport failures, signaling loss
//! and OS network-path changes first try a *quick* resume (signaling
//! reconnect plus ICE restart), then degrade to a *full* reconnect that
//! rebuilds all RTC state.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtc_engine::{Engine, EngineConfig, WsSignalClient, RtcTransportFactory};
//!
//! # async fn example() -> rtc_engine::Result<()> {
//! let (signal, signal_events) = WsSignalClient::new();
//! let factory = Arc::new(RtcTransportFactory::new()?);
//!
//! let engine = Engine::new(
//!     EngineConfig::default(),
//!     Arc::new(signal),
//!     signal_events,
//!     factory,
//!     None,
//! )?;
//!
//! engine.connect("wss://sfu.example.com", "token", None, None).await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod net;
pub mod proto;
pub mod signaling;
pub mod transport;

mod observer;
mod retry;
mod rtc;
mod stopwatch;
mod sync;

// Re-exports for the public API
pub use config::{
    ConnectOptions, EngineConfig, EngineTimeouts, IceServer, IceTransportPolicy, RoomOptions,
    RtcConfiguration,
};
pub use engine::{
    new_track_cid, ConnectionMode, ConnectionState, DisconnectReason, Engine, EngineObserver,
    Reliability, ReconnectMode, SessionIdentity, LOSSY_DC_LABEL, RELIABLE_DC_LABEL,
};
pub use error::{EngineError, Result};
pub use net::{ConnectivityListener, PathChange};
pub use observer::ObserverList;
pub use retry::retry;
pub use rtc::RtcRuntime;
pub use signaling::{
    SignalClient, SignalConnectMode, SignalEmitter, SignalEvent, SignalEvents, WsSignalClient,
};
pub use stopwatch::Stopwatch;
pub use sync::Completer;
pub use transport::{
    DataChannel, DataChannelInit, DataChannelState, IceCandidate, MediaKind, RemoteTrackInfo,
    RtcTransport, RtcTransportFactory, Transport, TransportConnectionState, TransportEmitter,
    TransportEvent, TransportEvents, TransportFactory,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
