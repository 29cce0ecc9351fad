//! # live-protocol
//!
//! Channel naming and wire protocol for the Live messaging layer.
//!
//! - [`channel`] - `scope/namespace/path` parsing and org-scoped keys
//! - [`frames`] - frames exchanged between clients and the server
//! - [`codec`] - length-prefixed MessagePack framing
//!
//! ## Example
//!
//! ```rust
//! use live_protocol::{codec, ChannelAddress, Frame};
//!
//! let channel = ChannelAddress::parse("core/broadcast/news").unwrap();
//! let frame = Frame::publish(channel.to_string(), b"hello".to_vec());
//!
//! let encoded = codec::encode(&frame).unwrap();
//! assert_eq!(codec::decode(&encoded).unwrap(), frame);
//! ```

pub mod channel;
pub mod codec;
pub mod frames;

pub use channel::{
    org_channel, split_org_channel, ChannelAddress, ChannelError, Scope,
    MAX_CHANNEL_NAME_LENGTH,
};
pub use codec::{decode, encode, ProtocolError};
pub use frames::{codes, ClientInfo, Frame, FrameType, PublicationData, PROTOCOL_VERSION};
