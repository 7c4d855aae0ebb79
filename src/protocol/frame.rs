//! Frame format and tokio codec
//!
//! Binary format: [tag(u8)] [seq(u64)] [body_len(u32)] [body...] [checksum(u64)]
//!
//! The checksum is xxhash64 over tag, seq, body_len and body. A bad checksum
//! is not a framing error: the frame is still delimited correctly, so the
//! codec hands it up and the dispatcher answers with a decode error.

use super::types::DecodeError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use xxhash_rust::xxh64::Xxh64;

/// tag + seq + body_len
pub const HEADER_LEN: usize = 1 + 8 + 4;

/// trailing checksum
pub const TRAILER_LEN: usize = 8;

/// Set on the tag of every successful response
pub const RESPONSE_FLAG: u8 = 0x80;

/// Tag of error responses
pub const ERROR_TAG: u8 = 0xFF;

/// Default upper bound for a frame body
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// One wire message
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Method tag for requests, flagged method or error tag for responses
    pub tag: u8,
    /// Correlates a response with its request
    pub seq: u64,
    pub body: Bytes,
    /// Checksum as carried on the wire
    pub checksum: u64,
}

/// xxhash64 over the header fields and the body
pub fn checksum(tag: u8, seq: u64, body: &[u8]) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.update(&[tag]);
    hasher.update(&seq.to_le_bytes());
    hasher.update(&(body.len() as u32).to_le_bytes());
    hasher.update(body);
    hasher.digest()
}

impl Frame {
    /// Create a frame with a fresh checksum
    pub fn new(tag: u8, seq: u64, body: Bytes) -> Self {
        let checksum = checksum(tag, seq, &body);
        Frame {
            tag,
            seq,
            body,
            checksum,
        }
    }

    /// Verify the carried checksum against the content
    pub fn verify(&self) -> Result<(), DecodeError> {
        let actual = checksum(self.tag, self.seq, &self.body);
        if actual != self.checksum {
            return Err(DecodeError::Checksum {
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }

    /// Total size on the wire
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.body.len() + TRAILER_LEN
    }
}

/// Length-delimited frame codec, used on both ends of a connection
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame: usize,
}

impl FrameCodec {
    pub fn new(max_frame: usize) -> Self {
        FrameCodec { max_frame }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // Peek at the length without consuming anything
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&src[9..HEADER_LEN]);
        let body_len = u32::from_le_bytes(len_bytes) as usize;

        if body_len > self.max_frame {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds limit of {}", body_len, self.max_frame),
            ));
        }

        let total = HEADER_LEN + body_len + TRAILER_LEN;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let tag = src.get_u8();
        let seq = src.get_u64_le();
        src.advance(4);
        let body = src.split_to(body_len).freeze();
        let checksum = src.get_u64_le();

        Ok(Some(Frame {
            tag,
            seq,
            body,
            checksum,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), io::Error> {
        if frame.body.len() > self.max_frame {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds limit of {}", frame.body.len(), self.max_frame),
            ));
        }

        dst.reserve(frame.wire_len());
        dst.put_u8(frame.tag);
        dst.put_u64_le(frame.seq);
        dst.put_u32_le(frame.body.len() as u32);
        dst.put_slice(&frame.body);
        dst.put_u64_le(frame.checksum);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_frame() {
        let frame = Frame::new(3, 42, Bytes::from("payload"));
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();

        codec.encode(frame.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), frame.wire_len());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.verify().is_ok());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let frame = Frame::new(1, 1, Bytes::from("abcdef"));
        let mut codec = FrameCodec::default();
        let mut full = BytesMut::new();
        codec.encode(frame.clone(), &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.put_u8(full[full.len() - 1]);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(frame));
    }

    #[test]
    fn test_checksum_validation() {
        let mut frame = Frame::new(1, 1, Bytes::from("key"));
        frame.checksum ^= 0xFF;

        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();

        // Still delimited, but fails verification
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(decoded.verify(), Err(DecodeError::Checksum { .. })));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::new(4);
        let mut buf = BytesMut::new();
        buf.put_u8(1);
        buf.put_u64_le(1);
        buf.put_u32_le(5);

        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Frame::new(1, 1, Bytes::from("a")), &mut buf).unwrap();
        codec.encode(Frame::new(2, 2, Bytes::from("b")), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().seq, 1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().seq, 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
