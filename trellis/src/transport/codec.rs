//! Length-prefixed envelope framing.
//!
//! Each frame is a big-endian `u32` length followed by one
//! [`wire::Envelope`] marshaled in the connection's negotiated media type.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::ProtocolError;
use crate::codec::MediaType;
use crate::wire;

const LENGTH_PREFIX: usize = std::mem::size_of::<u32>();

/// Encodes and decodes envelope frames for one connection.
#[derive(Clone, Copy, Debug)]
pub struct EnvelopeCodec {
    media: MediaType,
    max_frame_size: usize,
}

impl EnvelopeCodec {
    /// Creates a codec speaking `media`, rejecting frames larger than
    /// `max_frame_size`.
    pub fn new(media: MediaType, max_frame_size: usize) -> EnvelopeCodec {
        EnvelopeCodec {
            media,
            max_frame_size,
        }
    }
}

impl Encoder<wire::Envelope> for EnvelopeCodec {
    type Error = ProtocolError;

    fn encode(&mut self, envelope: wire::Envelope, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let bytes = self
            .media
            .marshal(&envelope)
            .map_err(|status| ProtocolError::Encode(status.to_string()))?;
        if bytes.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                length: bytes.len(),
                limit: self.max_frame_size,
            });
        }
        dst.reserve(LENGTH_PREFIX + bytes.len());
        dst.put_u32(bytes.len() as u32);
        dst.put_slice(&bytes);
        Ok(())
    }
}

impl Decoder for EnvelopeCodec {
    type Item = wire::Envelope;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<wire::Envelope>, ProtocolError> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let mut length_bytes = [0u8; LENGTH_PREFIX];
        length_bytes.copy_from_slice(&src[..LENGTH_PREFIX]);
        let length = u32::from_be_bytes(length_bytes) as usize;
        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                length,
                limit: self.max_frame_size,
            });
        }
        if src.len() < LENGTH_PREFIX + length {
            src.reserve(LENGTH_PREFIX + length - src.len());
            return Ok(None);
        }
        src.advance(LENGTH_PREFIX);
        let frame = src.split_to(length);
        self.media
            .unmarshal(&frame)
            .map(Some)
            .map_err(|status| ProtocolError::Decode(status.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Payload;

    #[test]
    fn frames_round_trip_in_every_encoding() {
        for media in MediaType::SUPPORTED {
            let mut codec = EnvelopeCodec::new(media, 1024);
            let envelope = wire::Envelope {
                id: 7,
                payload: Some(Payload::Message(b"abc".to_vec())),
            };

            let mut buf = BytesMut::new();
            codec.encode(envelope.clone(), &mut buf).unwrap();
            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, envelope, "{media:?}");
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let mut codec = EnvelopeCodec::new(MediaType::Protobuf, 1024);
        let mut buf = BytesMut::new();
        codec
            .encode(
                wire::Envelope {
                    id: 1,
                    payload: None,
                },
                &mut buf,
            )
            .unwrap();

        let full = buf.clone();
        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.put_slice(&full[full.len() - 1..]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut codec = EnvelopeCodec::new(MediaType::Json, 8);
        let mut buf = BytesMut::new();
        let envelope = wire::Envelope {
            id: 1,
            payload: Some(Payload::Message(vec![0; 64])),
        };
        assert!(matches!(
            codec.encode(envelope, &mut buf),
            Err(ProtocolError::FrameTooLarge { .. })
        ));

        let mut buf = BytesMut::new();
        buf.put_u32(1 << 24);
        buf.put_slice(&[0; 8]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }
}
