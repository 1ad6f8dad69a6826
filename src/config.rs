//! Configuration types for the session engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::proto;
use crate::{EngineError, Result};

/// Deadline for the server's join response after signaling connect
pub const DEFAULT_JOIN_RESPONSE_TIMEOUT: Duration = Duration::from_secs(7);

/// Deadline for a transport to reach the connected state
pub const DEFAULT_TRANSPORT_STATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for a publisher data channel to open
pub const DEFAULT_PUBLISHER_DATA_CHANNEL_OPEN_TIMEOUT: Duration = Duration::from_secs(7);

/// Deadline for the server's response to an add-track request
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Gap between quick-reconnect attempts (inter-attempt delay, not a wait)
pub const DEFAULT_QUICK_RECONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Number of quick-reconnect attempts before degrading to a full reconnect
pub const QUICK_RECONNECT_ATTEMPTS: usize = 3;

/// ICE server entry (STUN or TURN)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs (stun:, turn: or turns: scheme)
    pub urls: Vec<String>,

    /// Username for TURN authentication (empty for STUN)
    #[serde(default)]
    pub username: String,

    /// Credential for TURN authentication (empty for STUN)
    #[serde(default)]
    pub credential: String,
}

impl From<&proto::IceServer> for IceServer {
    fn from(server: &proto::IceServer) -> Self {
        Self {
            urls: server.urls.clone(),
            username: server.username.clone(),
            credential: server.credential.clone(),
        }
    }
}

/// Candidate filtering policy for ICE gathering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceTransportPolicy {
    /// Use any candidate type
    All,
    /// Only relay (TURN) candidates
    Relay,
}

/// RTC configuration applied to both peer connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtcConfiguration {
    /// Configured ICE servers; when empty, the join response's servers apply
    pub ice_servers: Vec<IceServer>,

    /// Candidate filtering policy (default: All)
    pub ice_transport_policy: IceTransportPolicy,

    /// Keep gathering candidates for the lifetime of the connection
    pub continual_gathering: bool,
}

impl Default for RtcConfiguration {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            ice_transport_policy: IceTransportPolicy::All,
            continual_gathering: true,
        }
    }
}

impl RtcConfiguration {
    /// Merge the join response's ICE servers into this configuration.
    ///
    /// Explicitly configured servers take precedence; the server-provided
    /// list applies only when none were configured.
    pub fn merge_join_ice_servers(&self, join: &proto::JoinResponse) -> Self {
        let mut merged = self.clone();
        if merged.ice_servers.is_empty() {
            merged.ice_servers = join.ice_servers.iter().map(IceServer::from).collect();
        }
        merged
    }
}

/// Options governing how a session is established
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Subscribe to existing tracks automatically on join
    pub auto_subscribe: bool,

    /// RTC configuration for both transports
    pub rtc_config: RtcConfiguration,

    /// Signal protocol version advertised to the server
    pub protocol_version: u32,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            auto_subscribe: true,
            rtc_config: RtcConfiguration::default(),
            protocol_version: 8,
        }
    }
}

/// Options governing in-session behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomOptions {
    /// Emit periodic transport stats to delegates
    pub report_stats: bool,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self { report_stats: false }
    }
}

/// The engine's well-known deadlines, overridable for tuning and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTimeouts {
    /// Deadline for the server's join response
    pub join_response: Duration,
    /// Deadline for a transport to reach the connected state
    pub transport_state: Duration,
    /// Deadline for a publisher data channel to open
    pub publisher_data_channel_open: Duration,
    /// Deadline for the server's response to an add-track request
    pub publish: Duration,
    /// Gap between quick-reconnect attempts
    pub quick_reconnect_retry: Duration,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            join_response: DEFAULT_JOIN_RESPONSE_TIMEOUT,
            transport_state: DEFAULT_TRANSPORT_STATE_TIMEOUT,
            publisher_data_channel_open: DEFAULT_PUBLISHER_DATA_CHANNEL_OPEN_TIMEOUT,
            publish: DEFAULT_PUBLISH_TIMEOUT,
            quick_reconnect_retry: DEFAULT_QUICK_RECONNECT_RETRY_DELAY,
        }
    }
}

/// Immutable snapshot of connect and room options held by the engine.
///
/// After `connect`, only the engine itself mutates this (token rotation and
/// ICE-server refresh).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub connect: ConnectOptions,
    pub room: RoomOptions,
    pub timeouts: EngineTimeouts,
}

impl EngineConfig {
    pub fn new(connect: ConnectOptions, room: RoomOptions) -> Self {
        Self { connect, room, timeouts: EngineTimeouts::default() }
    }

    /// Validate configured values that would otherwise fail deep inside the
    /// RTC stack
    pub fn validate(&self) -> Result<()> {
        for server in &self.connect.rtc_config.ice_servers {
            if server.urls.is_empty() {
                return Err(EngineError::Config(
                    "ICE server entry with no URLs".to_string(),
                ));
            }
            for url in &server.urls {
                if !url.starts_with("stun:") && !url.starts_with("turn:") && !url.starts_with("turns:")
                {
                    return Err(EngineError::Config(format!(
                        "ICE server URL must use stun:, turn: or turns: scheme, got: {}",
                        url
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.connect.auto_subscribe);
        assert!(!config.room.report_stats);
    }

    #[test]
    fn test_invalid_ice_scheme_rejected() {
        let mut config = EngineConfig::default();
        config.connect.rtc_config.ice_servers.push(IceServer {
            urls: vec!["http://not-ice.example.com".to_string()],
            ..Default::default()
        });

        assert!(matches!(
            config.validate(),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_join_ice_servers_used_when_unconfigured() {
        let config = RtcConfiguration::default();
        let join = proto::JoinResponse {
            ice_servers: vec![proto::IceServer {
                urls: vec!["stun:stun.example.com:3478".to_string()],
                username: String::new(),
                credential: String::new(),
            }],
            subscriber_primary: true,
            ..Default::default()
        };

        let merged = config.merge_join_ice_servers(&join);
        assert_eq!(merged.ice_servers.len(), 1);
        assert_eq!(merged.ice_servers[0].urls[0], "stun:stun.example.com:3478");
    }

    #[test]
    fn test_configured_ice_servers_take_precedence() {
        let mut config = RtcConfiguration::default();
        config.ice_servers.push(IceServer {
            urls: vec!["turn:turn.example.com:443".to_string()],
            username: "u".to_string(),
            credential: "c".to_string(),
        });

        let join = proto::JoinResponse {
            ice_servers: vec![proto::IceServer {
                urls: vec!["stun:stun.example.com:3478".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };

        let merged = config.merge_join_ice_servers(&join);
        assert_eq!(merged.ice_servers.len(), 1);
        assert_eq!(merged.ice_servers[0].urls[0], "turn:turn.example.com:443");
    }
}
