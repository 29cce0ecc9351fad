//! Length-prefixed MessagePack framing.
//!
//! Layout on the wire: a 4-byte big-endian length followed by the
//! MessagePack-encoded [`Frame`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

fn read_length(prefix: &[u8]) -> Result<usize, ProtocolError> {
    let mut raw = [0u8; LENGTH_PREFIX_SIZE];
    raw.copy_from_slice(&prefix[..LENGTH_PREFIX_SIZE]);
    let length = u32::from_be_bytes(raw) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    Ok(length)
}

/// Encode a frame to bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(buf.freeze())
}

/// Decode exactly one frame from the start of `data`.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let total_size = LENGTH_PREFIX_SIZE + read_length(data)?;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = read_length(buf)?;
    if buf.len() < LENGTH_PREFIX_SIZE + length {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    Ok(Some(rmp_serde::from_slice(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{ClientInfo, PublicationData};

    #[test]
    fn test_subscribed_frame_survives_encoding() {
        let frame = Frame::Subscribed {
            id: 9,
            channel: "core/broadcast/news".to_string(),
            data: Some(serde_bytes::ByteBuf::from(b"initial".to_vec())),
            publications: vec![
                PublicationData {
                    offset: 1,
                    payload: b"a".to_vec(),
                },
                PublicationData {
                    offset: 2,
                    payload: b"b".to_vec(),
                },
            ],
        };

        let decoded = decode(&encode(&frame).unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_join_frame_survives_encoding() {
        let frame = Frame::Join {
            channel: "core/dashboard/uid/abc".to_string(),
            info: ClientInfo {
                client_id: "c1".to_string(),
                user_id: 3,
                login: "alice".to_string(),
            },
        };
        assert_eq!(decode(&encode(&frame).unwrap()).unwrap(), frame);
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&Frame::subscribe(1, "core/a/b")).unwrap();

        match decode(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
        match decode(&encoded[..2]) {
            Err(ProtocolError::Incomplete(2)) => {}
            other => panic!("Expected Incomplete(2), got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(matches!(
            decode_from(&mut buf),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_streaming_decode_waits_for_full_frame() {
        let first = encode(&Frame::subscribe(1, "core/a/one")).unwrap();
        let second = encode(&Frame::publish("core/a/two", b"hi".to_vec())).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second[..3]);

        assert_eq!(
            decode_from(&mut buf).unwrap(),
            Some(Frame::subscribe(1, "core/a/one"))
        );
        assert_eq!(decode_from(&mut buf).unwrap(), None);

        buf.extend_from_slice(&second[3..]);
        assert_eq!(
            decode_from(&mut buf).unwrap(),
            Some(Frame::publish("core/a/two", b"hi".to_vec()))
        );
        assert!(buf.is_empty());
    }
}
