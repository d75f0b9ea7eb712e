//! Stream framing for the p2p TCP connection.
//!
//! There is no separate length header: every frame is one RLP list and its
//! own prefix says how long it is. The decoder yields raw frames; signature
//! checks and message decoding happen one layer up.

use bytes::{Bytes, BytesMut};
use rlp::Rlp;
use tokio_util::codec::{Decoder, Encoder};

use crate::p2p_message::SignedMessage;
use crate::value::{self, RlpError};
use crate::ProtocolError;

/// Maximum frame size: 16 MB.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Codec splitting a byte stream into self-delimited RLP frames.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        if !Rlp::new(&src[..]).is_list() {
            return Err(ProtocolError::NotAList(src[0]));
        }

        let total = match value::frame_length(&src[..]) {
            Ok(total) => total,
            // Long-form length bytes not here yet
            Err(RlpError::Incomplete) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if total > MAX_FRAME_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: total,
                max: MAX_FRAME_SIZE,
            });
        }

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        tracing::trace!(len = total, buffered = src.len(), "frame complete");
        Ok(Some(src.split_to(total).freeze()))
    }
}

impl Encoder<&SignedMessage> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &SignedMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = item.to_bytes();
        if frame.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p_message::{HandshakeMessage, P2pMessage};
    use bytes::BufMut;

    fn ack_frame(nonce: u128) -> BytesMut {
        let signed =
            SignedMessage::sign(&P2pMessage::Handshake(HandshakeMessage::Ack { version: 0 }), nonce)
                .unwrap();
        let mut buf = BytesMut::new();
        FrameCodec.encode(&signed, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let mut codec = FrameCodec;
        let mut buf = ack_frame(1);
        let first_len = buf.len();
        buf.extend_from_slice(&ack_frame(2));

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.len(), first_len);
        assert_ne!(first, second);
        assert!(buf.is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());

        let signed = SignedMessage::from_bytes(&first).unwrap();
        signed.verify(1).unwrap();
    }

    #[test]
    fn test_partial_frame() {
        let mut codec = FrameCodec;
        let mut full = ack_frame(7);
        let total = full.len();
        let mut partial = full.split_to(total / 2);

        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&full);
        let frame = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(frame.len(), total);
    }

    #[test]
    fn test_partial_long_prefix() {
        let mut codec = FrameCodec;
        // 0xf9 announces two length bytes; only one has arrived.
        let mut buf = BytesMut::from(&[0xf9u8, 0x01][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_string_frame_rejected() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[0x83u8, b'a', b'b', b'c'][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::NotAList(0x83))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        // List with a 4-byte length: 0xf7 + 4
        buf.put_u8(0xfb);
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::MessageTooLarge { .. })));
    }
}
