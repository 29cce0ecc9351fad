//! Frame types for the Live protocol.
//!
//! Each frame is serialized using MessagePack.

use serde::{Deserialize, Serialize};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u8 = 1;

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    /// Malformed request.
    pub const BAD_REQUEST: u16 = 4000;
    /// The channel handler refused the operation.
    pub const DENIED: u16 = 4003;
    /// The channel handler does not know the path.
    pub const NOT_FOUND: u16 = 4004;
    /// No feature module claims the channel.
    pub const UNKNOWN_CHANNEL: u16 = 4010;
    /// Server-side failure.
    pub const INTERNAL: u16 = 5000;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Subscribe = 0x03,
    Subscribed = 0x04,
    Unsubscribe = 0x05,
    Publish = 0x06,
    Publication = 0x07,
    Join = 0x08,
    Leave = 0x09,
    Ack = 0x0A,
    Error = 0x0B,
    Ping = 0x0C,
    Pong = 0x0D,
}

/// A client seen on a channel, as carried by join/leave frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Connection identifier.
    pub client_id: String,
    /// Signed-in user id.
    pub user_id: i64,
    /// User login.
    pub login: String,
}

/// A retained or live publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationData {
    /// Per-channel monotonically increasing offset.
    pub offset: u64,
    /// Message payload.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client handshake.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version the client speaks.
        version: u8,
    },

    /// Server handshake reply.
    #[serde(rename = "connected")]
    Connected {
        /// Assigned client id.
        client_id: String,
        /// Protocol version.
        version: u8,
        /// Heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Subscribe to a channel.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Request ID.
        id: u64,
        /// Channel in `scope/namespace/path` form.
        channel: String,
        /// Optional subscribe payload handed to the channel handler.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_bytes::ByteBuf>,
    },

    /// Subscription established.
    #[serde(rename = "subscribed")]
    Subscribed {
        /// ID of the subscribe request.
        id: u64,
        /// Channel subscribed to.
        channel: String,
        /// Initial payload chosen by the channel handler.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_bytes::ByteBuf>,
        /// Recovered history, oldest first.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        publications: Vec<PublicationData>,
    },

    /// Unsubscribe from a channel.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Request ID.
        id: u64,
        /// Channel name.
        channel: String,
    },

    /// Publish a message to a channel.
    #[serde(rename = "publish")]
    Publish {
        /// Optional request ID for acknowledgment.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        /// Target channel.
        channel: String,
        /// Message payload.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Server push of a message on a subscribed channel.
    #[serde(rename = "publication")]
    Publication {
        /// Source channel.
        channel: String,
        /// The publication.
        publication: PublicationData,
    },

    /// A client joined a subscribed channel.
    #[serde(rename = "join")]
    Join {
        /// Channel name.
        channel: String,
        /// Who joined.
        info: ClientInfo,
    },

    /// A client left a subscribed channel.
    #[serde(rename = "leave")]
    Leave {
        /// Channel name.
        channel: String,
        /// Who left.
        info: ClientInfo,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Subscribe { .. } => FrameType::Subscribe,
            Frame::Subscribed { .. } => FrameType::Subscribed,
            Frame::Unsubscribe { .. } => FrameType::Unsubscribe,
            Frame::Publish { .. } => FrameType::Publish,
            Frame::Publication { .. } => FrameType::Publication,
            Frame::Join { .. } => FrameType::Join,
            Frame::Leave { .. } => FrameType::Leave,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a Subscribe frame.
    #[must_use]
    pub fn subscribe(id: u64, channel: impl Into<String>) -> Self {
        Frame::Subscribe {
            id,
            channel: channel.into(),
            data: None,
        }
    }

    /// Create a Publish frame.
    #[must_use]
    pub fn publish(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Frame::Publish {
            id: None,
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Create a Publish frame that asks for an acknowledgment.
    #[must_use]
    pub fn publish_with_ack(
        id: u64,
        channel: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Frame::Publish {
            id: Some(id),
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Create a Publication frame.
    #[must_use]
    pub fn publication(channel: impl Into<String>, offset: u64, payload: impl Into<Vec<u8>>) -> Self {
        Frame::Publication {
            channel: channel.into(),
            publication: PublicationData {
                offset,
                payload: payload.into(),
            },
        }
    }

    /// Create an Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a Connected frame.
    #[must_use]
    pub fn connected(client_id: impl Into<String>, heartbeat: u32) -> Self {
        Frame::Connected {
            client_id: client_id.into(),
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }
}
