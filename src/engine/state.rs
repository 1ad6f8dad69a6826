//! Session state model

use crate::proto;

/// Exact label bytes of the reliable publisher data channel (wire-compatible)
pub const RELIABLE_DC_LABEL: &str = "_reliable";

/// Exact label bytes of the lossy publisher data channel (wire-compatible)
pub const LOSSY_DC_LABEL: &str = "_lossy";

/// How a reconnection is performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectMode {
    /// Resume the same session: signaling reconnect plus ICE restart
    Quick,
    /// Tear down all RTC state and redo the initial connect sequence
    Full,
}

/// How a session was (or is being) established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Normal,
    Reconnect(ReconnectMode),
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Engine-initiated teardown (e.g. reconfiguring before a connect)
    Sdk,
    /// Network failure, with the underlying error when known
    Network(Option<String>),
    /// Application asked to disconnect
    User,
    /// The server sent a non-recoverable leave
    ServerLeave,
}

/// Top-level session state.
///
/// Derived equality is "deep" and includes associated values; gating checks
/// ("already connected?") use [`ConnectionState::same_kind`], which compares
/// tags only. The `Connecting(Reconnect(Quick))` to
/// `Connecting(Reconnect(Full))` transition is therefore still a change that
/// notifies delegates.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected(DisconnectReason),
    Connecting(ConnectionMode),
    Connected(ConnectionMode),
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected(DisconnectReason::Sdk)
    }
}

impl ConnectionState {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionState::Disconnected(_))
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting(_))
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    /// Whether a reconnection (quick or full) is in progress
    pub fn is_reconnecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting(ConnectionMode::Reconnect(_))
        )
    }

    /// Tag-only equality, ignoring associated values
    pub fn same_kind(&self, other: &ConnectionState) -> bool {
        matches!(
            (self, other),
            (ConnectionState::Disconnected(_), ConnectionState::Disconnected(_))
                | (ConnectionState::Connecting(_), ConnectionState::Connecting(_))
                | (ConnectionState::Connected(_), ConnectionState::Connected(_))
        )
    }

    /// The reconnect mode carried by a `Connecting(Reconnect(_))` or
    /// `Connected(Reconnect(_))` state
    pub fn reconnect_mode(&self) -> Option<ReconnectMode> {
        match self {
            ConnectionState::Connecting(ConnectionMode::Reconnect(mode))
            | ConnectionState::Connected(ConnectionMode::Reconnect(mode)) => Some(*mode),
            _ => None,
        }
    }
}

/// Delivery class of an outbound application packet.
///
/// Selects the publisher data channel and the wire kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Reliable,
    Lossy,
}

impl Reliability {
    pub fn wire_kind(&self) -> proto::data_packet::Kind {
        match self {
            Reliability::Reliable => proto::data_packet::Kind::Reliable,
            Reliability::Lossy => proto::data_packet::Kind::Lossy,
        }
    }

    pub fn dc_label(&self) -> &'static str {
        match self {
            Reliability::Reliable => RELIABLE_DC_LABEL,
            Reliability::Lossy => LOSSY_DC_LABEL,
        }
    }
}
