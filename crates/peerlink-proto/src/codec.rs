//! Frame header encoding and decoding.
//!
//! [`FrameCodec`] is pure: it never performs I/O. It also implements the
//! `tokio_util` codec traits so it can drive `FramedRead`/`FramedWrite`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::Frame;

/// Size of the compact header in bytes.
pub const COMPACT_HEADER_LEN: usize = 12;

/// Size of the extended header in bytes.
pub const EXTENDED_HEADER_LEN: usize = 16;

/// Most buffer space reserved ahead of bytes actually received. A declared
/// payload length is untrusted until its bytes arrive.
pub const RESERVE_CHUNK: usize = 64 * 1024;

/// Header layout spoken on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderProfile {
    /// `frame_type | tag | length`.
    #[default]
    Compact,
    /// `total_length | frame_type | tag | length`, where
    /// `total_length = length + 16`.
    Extended,
}

impl HeaderProfile {
    /// Number of header bytes preceding the payload.
    #[must_use]
    pub const fn header_len(self) -> usize {
        match self {
            Self::Compact => COMPACT_HEADER_LEN,
            Self::Extended => EXTENDED_HEADER_LEN,
        }
    }

    /// Largest payload the length fields of this profile can describe.
    #[must_use]
    pub const fn max_encodable(self) -> u32 {
        match self {
            Self::Compact => u32::MAX,
            Self::Extended => u32::MAX - EXTENDED_HEADER_LEN as u32,
        }
    }
}

impl std::fmt::Display for HeaderProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compact => write!(f, "compact"),
            Self::Extended => write!(f, "extended"),
        }
    }
}

impl std::str::FromStr for HeaderProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "extended" => Ok(Self::Extended),
            other => Err(format!("unknown header profile: {other}")),
        }
    }
}

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Application-defined payload kind.
    pub frame_type: u32,
    /// Correlation tag.
    pub tag: u32,
    /// Payload length in bytes.
    pub length: u32,
}

/// Encoder/decoder for one header profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    profile: HeaderProfile,
    max_payload: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(HeaderProfile::default())
    }
}

impl FrameCodec {
    /// Create a codec for `profile` accepting any payload the profile can carry.
    #[must_use]
    pub const fn new(profile: HeaderProfile) -> Self {
        Self {
            profile,
            max_payload: profile.max_encodable(),
        }
    }

    /// Limit payload sizes in both directions.
    #[must_use]
    pub const fn with_max_payload(mut self, max: u32) -> Self {
        let cap = self.profile.max_encodable();
        self.max_payload = if max < cap { max } else { cap };
        self
    }

    /// Header profile in use.
    #[must_use]
    pub const fn profile(&self) -> HeaderProfile {
        self.profile
    }

    /// Largest accepted payload length.
    #[must_use]
    pub const fn max_payload(&self) -> u32 {
        self.max_payload
    }

    /// Number of header bytes preceding each payload.
    #[must_use]
    pub const fn header_len(&self) -> usize {
        self.profile.header_len()
    }

    fn check_len(&self, len: usize) -> Result<u32, ProtocolError> {
        match u32::try_from(len) {
            Ok(n) if n <= self.max_payload => Ok(n),
            _ => Err(ProtocolError::PayloadTooLarge {
                len: len as u64,
                max: u64::from(self.max_payload),
            }),
        }
    }

    /// Encode `header || payload` into a fresh buffer.
    pub fn encode(&self, frame_type: u32, tag: u32, payload: &[u8]) -> Result<Bytes, ProtocolError> {
        let mut dst = BytesMut::with_capacity(self.header_len() + payload.len());
        self.encode_into(frame_type, tag, payload, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Encode a [`Frame`] into a fresh buffer.
    pub fn encode_frame(&self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        self.encode(frame.frame_type, frame.tag, &frame.payload)
    }

    /// Append `header || payload` to `dst`.
    pub fn encode_into(
        &self,
        frame_type: u32,
        tag: u32,
        payload: &[u8],
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        let length = self.check_len(payload.len())?;
        dst.reserve(self.header_len() + payload.len());
        if self.profile == HeaderProfile::Extended {
            dst.put_u32(length + EXTENDED_HEADER_LEN as u32);
        }
        dst.put_u32(frame_type);
        dst.put_u32(tag);
        dst.put_u32(length);
        dst.put_slice(payload);
        Ok(())
    }

    /// Decode a header from the first [`header_len`](Self::header_len) bytes of `buf`.
    pub fn decode_header(&self, buf: &[u8]) -> Result<Header, ProtocolError> {
        let header_len = self.header_len();
        if buf.len() < header_len {
            return Err(ProtocolError::Truncated {
                needed: header_len,
                available: buf.len(),
            });
        }

        let mut cur = &buf[..header_len];
        let total = match self.profile {
            HeaderProfile::Compact => None,
            HeaderProfile::Extended => Some(cur.get_u32()),
        };
        let header = Header {
            frame_type: cur.get_u32(),
            tag: cur.get_u32(),
            length: cur.get_u32(),
        };

        if let Some(total) = total {
            if u64::from(total) != u64::from(header.length) + EXTENDED_HEADER_LEN as u64 {
                return Err(ProtocolError::LengthMismatch {
                    total,
                    payload: header.length,
                });
            }
        }
        if header.length > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                len: u64::from(header.length),
                max: u64::from(self.max_payload),
            });
        }
        Ok(header)
    }

    /// Bytes needed to finish the frame at the start of `buf`, assuming its
    /// header (if complete) is valid.
    fn frame_len_hint(&self, buf: &[u8]) -> usize {
        let header_len = self.header_len();
        match self.decode_header(buf) {
            Ok(header) => header_len + header.length as usize,
            Err(_) => header_len,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let header_len = self.header_len();
        if src.len() < header_len {
            src.reserve(header_len - src.len());
            return Ok(None);
        }

        let header = self.decode_header(src)?;
        let frame_len = header_len + header.length as usize;
        if src.len() < frame_len {
            src.reserve((frame_len - src.len()).min(RESERVE_CHUNK));
            return Ok(None);
        }

        src.advance(header_len);
        let payload = src.split_to(header.length as usize).freeze();
        Ok(Some(Frame {
            frame_type: header.frame_type,
            tag: header.tag,
            payload,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::Truncated {
                needed: self.frame_len_hint(src),
                available: src.len(),
            }),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        self.encode_into(frame.frame_type, frame.tag, &frame.payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::frame_types;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn test_compact_layout() {
        let codec = FrameCodec::new(HeaderProfile::Compact);
        let bytes = codec.encode(0x0102_0304, 5, b"ab").expect("encode");
        assert_eq!(
            &bytes[..],
            &[1, 2, 3, 4, 0, 0, 0, 5, 0, 0, 0, 2, b'a', b'b']
        );
    }

    #[test]
    fn test_extended_layout() {
        let codec = FrameCodec::new(HeaderProfile::Extended);
        let bytes = codec.encode(frame_types::STATUS, 0, b"xyz").expect("encode");
        assert_eq!(bytes.len(), 16 + 3);
        assert_eq!(&bytes[..4], &19u32.to_be_bytes());
        assert_eq!(&bytes[4..8], &frame_types::STATUS.to_be_bytes());
        assert_eq!(&bytes[12..16], &3u32.to_be_bytes());
    }

    #[test_case(0 ; "empty payload")]
    #[test_case(1 ; "one byte")]
    #[test_case(255 ; "255 bytes")]
    #[test_case(65536 ; "64 KiB")]
    fn test_round_trip_lengths(len: usize) {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        for profile in [HeaderProfile::Compact, HeaderProfile::Extended] {
            let mut codec = FrameCodec::new(profile);
            let bytes = codec.encode(u32::MAX, 42, &payload).expect("encode");

            let header = codec.decode_header(&bytes).expect("header");
            assert_eq!(header.frame_type, u32::MAX);
            assert_eq!(header.tag, 42);
            assert_eq!(header.length as usize, len);

            let mut buf = BytesMut::from(&bytes[..]);
            let frame = codec.decode(&mut buf).expect("decode").expect("complete");
            assert_eq!(&frame.payload[..], &payload[..]);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_compact_header_has_no_total_length() {
        let codec = FrameCodec::default();
        let bytes = codec.encode(1, 2, b"four").expect("encode");
        assert_eq!(bytes.len(), COMPACT_HEADER_LEN + 4);
        assert_eq!(&bytes[8..12], &4u32.to_be_bytes());
    }

    #[test]
    fn test_decode_header_short_input() {
        let codec = FrameCodec::default();
        let err = codec.decode_header(&[0u8; 11]).expect_err("should fail");
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                needed: 12,
                available: 11
            }
        ));
    }

    #[test]
    fn test_extended_length_mismatch() {
        let codec = FrameCodec::new(HeaderProfile::Extended);
        let mut raw = BytesMut::new();
        raw.put_u32(99);
        raw.put_u32(frame_types::DATA);
        raw.put_u32(0);
        raw.put_u32(4);
        let err = codec.decode_header(&raw).expect_err("should fail");
        assert!(matches!(
            err,
            ProtocolError::LengthMismatch {
                total: 99,
                payload: 4
            }
        ));
    }

    #[test]
    fn test_encode_over_limit() {
        let codec = FrameCodec::default().with_max_payload(8);
        let err = codec.encode(1, 0, &[0u8; 9]).expect_err("should fail");
        assert!(matches!(err, ProtocolError::PayloadTooLarge { len: 9, max: 8 }));
        assert!(codec.encode(1, 0, &[0u8; 8]).is_ok());
    }

    #[test]
    fn test_decode_over_limit() {
        let big = FrameCodec::default().encode(1, 0, &[7u8; 32]).expect("encode");
        let small = FrameCodec::default().with_max_payload(16);
        let err = small.decode_header(&big).expect_err("should fail");
        assert!(matches!(err, ProtocolError::PayloadTooLarge { len: 32, max: 16 }));
    }

    #[test]
    fn test_with_max_payload_clamped_to_profile() {
        let codec = FrameCodec::new(HeaderProfile::Extended).with_max_payload(u32::MAX);
        assert_eq!(codec.max_payload(), u32::MAX - 16);
    }

    #[test]
    fn test_decoder_waits_for_full_frame() {
        let mut codec = FrameCodec::default();
        let bytes = codec.encode(3, 4, b"payload").expect("encode");

        let mut buf = BytesMut::from(&bytes[..5]);
        assert!(codec.decode(&mut buf).expect("decode").is_none());
        buf.extend_from_slice(&bytes[5..14]);
        assert!(codec.decode(&mut buf).expect("decode").is_none());
        buf.extend_from_slice(&bytes[14..]);
        let frame = codec.decode(&mut buf).expect("decode").expect("frame");
        assert_eq!(frame, Frame::new(3, 4, &b"payload"[..]));
    }

    #[test]
    fn test_decoder_does_not_reserve_declared_length() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u32(frame_types::DATA);
        buf.put_u32(0);
        buf.put_u32(0xFFFF_FFF0);

        assert!(codec.decode(&mut buf).expect("decode").is_none());
        assert!(buf.capacity() < 4 * RESERVE_CHUNK, "reserved {}", buf.capacity());

        buf.extend_from_slice(&[0u8; 100]);
        assert!(codec.decode(&mut buf).expect("decode").is_none());
        assert!(buf.capacity() < 4 * RESERVE_CHUNK, "reserved {}", buf.capacity());
    }

    #[test]
    fn test_decode_eof_partial_header() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 1, 0][..]);
        let err = codec.decode_eof(&mut buf).expect_err("should fail");
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                needed: 12,
                available: 5
            }
        ));
    }

    #[test]
    fn test_decode_eof_partial_payload() {
        let mut codec = FrameCodec::default();
        let bytes = codec.encode(1, 0, &[1u8; 10]).expect("encode");
        let mut buf = BytesMut::from(&bytes[..15]);
        let err = codec.decode_eof(&mut buf).expect_err("should fail");
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                needed: 22,
                available: 15
            }
        ));
    }

    #[test]
    fn test_decode_eof_clean() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        assert!(codec.decode_eof(&mut buf).expect("eof").is_none());
    }

    #[test]
    fn test_encoder_trait_appends() {
        let mut codec = FrameCodec::default();
        let mut dst = BytesMut::new();
        Encoder::encode(&mut codec, Frame::data("a"), &mut dst).expect("first");
        Encoder::encode(&mut codec, Frame::data("bc"), &mut dst).expect("second");
        assert_eq!(dst.len(), 13 + 14);

        let first = codec.decode(&mut dst).expect("decode").expect("frame");
        let second = codec.decode(&mut dst).expect("decode").expect("frame");
        assert_eq!(first.payload_text(), "a");
        assert_eq!(second.payload_text(), "bc");
    }

    #[test]
    fn test_profile_parse_and_display() {
        assert_eq!("Extended".parse::<HeaderProfile>(), Ok(HeaderProfile::Extended));
        assert_eq!("compact".parse::<HeaderProfile>(), Ok(HeaderProfile::Compact));
        assert!("wide".parse::<HeaderProfile>().is_err());
        assert_eq!(HeaderProfile::Extended.to_string(), "extended");
    }

    #[test]
    fn test_profile_serde() {
        let json = serde_json::to_string(&HeaderProfile::Extended).expect("serialize");
        assert_eq!(json, "\"extended\"");
    }

    proptest! {
        #[test]
        fn prop_header_round_trip(
            frame_type in any::<u32>(),
            tag in any::<u32>(),
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            extended in any::<bool>(),
        ) {
            let profile = if extended { HeaderProfile::Extended } else { HeaderProfile::Compact };
            let mut codec = FrameCodec::new(profile);
            let bytes = codec.encode(frame_type, tag, &payload).expect("encode");

            let header = codec.decode_header(&bytes).expect("header");
            prop_assert_eq!(header, Header { frame_type, tag, length: payload.len() as u32 });

            let mut buf = BytesMut::from(&bytes[..]);
            let frame = codec.decode(&mut buf).expect("decode").expect("frame");
            prop_assert_eq!(&frame.payload[..], &payload[..]);
        }

        #[test]
        fn prop_split_point_does_not_matter(
            payload in proptest::collection::vec(any::<u8>(), 0..128),
            split in 0usize..140,
        ) {
            let mut codec = FrameCodec::default();
            let bytes = codec.encode(frame_types::DATA, 1, &payload).expect("encode");
            let split = split.min(bytes.len());

            let mut buf = BytesMut::from(&bytes[..split]);
            let early = codec.decode(&mut buf).expect("decode");
            if split < bytes.len() {
                prop_assert!(early.is_none());
                buf.extend_from_slice(&bytes[split..]);
                let frame = codec.decode(&mut buf).expect("decode").expect("frame");
                prop_assert_eq!(&frame.payload[..], &payload[..]);
            } else {
                let frame = early.expect("frame");
                prop_assert_eq!(&frame.payload[..], &payload[..]);
            }
        }
    }
}
