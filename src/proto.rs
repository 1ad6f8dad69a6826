//! Wire protocol types
//!
//! The signaling peer exchanges binary protobuf frames, and the publisher
//! data channels carry serialized [`DataPacket`]s. The message set below is
//! kept in-tree with hand-written `prost` derives and stable field tags, so
//! the crate builds without a protoc toolchain. Unknown oneof variants decode
//! to `None` and are ignored by the engine for forward compatibility.

/// Peer connection a signaling message is addressed to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SignalTarget {
    Publisher = 0,
    Subscriber = 1,
}

/// Kind of a published track
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TrackType {
    Audio = 0,
    Video = 1,
    Data = 2,
}

/// Origin of a published track
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TrackSource {
    Unknown = 0,
    Camera = 1,
    Microphone = 2,
    ScreenShare = 3,
}

/// ICE server entry delivered in the join response
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IceServer {
    #[prost(string, repeated, tag = "1")]
    pub urls: Vec<String>,
    #[prost(string, tag = "2")]
    pub username: String,
    #[prost(string, tag = "3")]
    pub credential: String,
}

/// First frame of every session; configures the transports
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JoinResponse {
    #[prost(message, repeated, tag = "1")]
    pub ice_servers: Vec<IceServer>,
    #[prost(bool, tag = "2")]
    pub subscriber_primary: bool,
    #[prost(string, tag = "3")]
    pub participant_sid: String,
    #[prost(string, tag = "4")]
    pub server_version: String,
}

/// SDP offer or answer
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionDescription {
    /// "offer" or "answer"
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(string, tag = "2")]
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { r#type: "offer".to_string(), sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { r#type: "answer".to_string(), sdp: sdp.into() }
    }
}

/// Per-candidate ICE exchange ("trickle")
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TrickleRequest {
    /// JSON-encoded candidate (candidate string, sdpMid, sdpMLineIndex)
    #[prost(string, tag = "1")]
    pub candidate_init: String,
    #[prost(enumeration = "SignalTarget", tag = "2")]
    pub target: i32,
}

/// Server-initiated disconnect
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LeaveRequest {
    #[prost(bool, tag = "1")]
    pub can_reconnect: bool,
}

/// Request to publish a track
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddTrackRequest {
    /// Client-generated track id, correlates the response
    #[prost(string, tag = "1")]
    pub cid: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(enumeration = "TrackType", tag = "3")]
    pub r#type: i32,
    #[prost(enumeration = "TrackSource", tag = "4")]
    pub source: i32,
    #[prost(bool, tag = "5")]
    pub muted: bool,
    #[prost(uint32, tag = "6")]
    pub width: u32,
    #[prost(uint32, tag = "7")]
    pub height: u32,
}

/// Server-assigned track metadata
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TrackInfo {
    #[prost(string, tag = "1")]
    pub sid: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(enumeration = "TrackType", tag = "3")]
    pub r#type: i32,
    #[prost(enumeration = "TrackSource", tag = "4")]
    pub source: i32,
    #[prost(bool, tag = "5")]
    pub muted: bool,
}

/// Response to [`AddTrackRequest`], matched by `cid`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TrackPublishedResponse {
    #[prost(string, tag = "1")]
    pub cid: String,
    #[prost(message, optional, tag = "2")]
    pub track: Option<TrackInfo>,
}

/// Active-speaker entry
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpeakerInfo {
    #[prost(string, tag = "1")]
    pub sid: String,
    #[prost(float, tag = "2")]
    pub level: f32,
    #[prost(bool, tag = "3")]
    pub active: bool,
}

/// Speaker levels forwarded by the server
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActiveSpeakerUpdate {
    #[prost(message, repeated, tag = "1")]
    pub speakers: Vec<SpeakerInfo>,
}

/// Application payload routed through the SFU
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserPacket {
    #[prost(string, tag = "1")]
    pub participant_sid: String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(string, repeated, tag = "3")]
    pub destination_sids: Vec<String>,
}

/// Frame format of the publisher/subscriber data channels
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DataPacket {
    #[prost(enumeration = "data_packet::Kind", tag = "1")]
    pub kind: i32,
    #[prost(oneof = "data_packet::Value", tags = "2, 3")]
    pub value: Option<data_packet::Value>,
}

pub mod data_packet {
    /// Delivery class the packet was sent with
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Kind {
        Reliable = 0,
        Lossy = 1,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(message, tag = "2")]
        User(super::UserPacket),
        #[prost(message, tag = "3")]
        Speaker(super::ActiveSpeakerUpdate),
    }
}

/// Client -> server signaling envelope
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignalRequest {
    #[prost(oneof = "signal_request::Message", tags = "1, 2, 3, 4, 5")]
    pub message: Option<signal_request::Message>,
}

pub mod signal_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "1")]
        Offer(super::SessionDescription),
        #[prost(message, tag = "2")]
        Answer(super::SessionDescription),
        #[prost(message, tag = "3")]
        Trickle(super::TrickleRequest),
        #[prost(message, tag = "4")]
        AddTrack(super::AddTrackRequest),
        #[prost(message, tag = "5")]
        Leave(super::LeaveRequest),
    }
}

/// Server -> client signaling envelope
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignalResponse {
    #[prost(oneof = "signal_response::Message", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub message: Option<signal_response::Message>,
}

pub mod signal_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "1")]
        Join(super::JoinResponse),
        #[prost(message, tag = "2")]
        Answer(super::SessionDescription),
        #[prost(message, tag = "3")]
        Offer(super::SessionDescription),
        #[prost(message, tag = "4")]
        Trickle(super::TrickleRequest),
        #[prost(message, tag = "5")]
        TrackPublished(super::TrackPublishedResponse),
        #[prost(message, tag = "6")]
        Leave(super::LeaveRequest),
        #[prost(string, tag = "7")]
        RefreshToken(String),
    }
}
