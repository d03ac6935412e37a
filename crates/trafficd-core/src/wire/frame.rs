//! Fixed-size request frame and its codec.
//!
//! Layout (version 1, all integers big-endian):
//!
//! ```text
//! offset  size  field
//! 0       2     id     u16, caller-chosen correlation token
//! 2       1     kind   u8, 1 = infer, 2 = result, 3 = error
//! 3       1     arg1   length prefix (0..=255)
//! 4       255   arg1   data region (image path)
//! 259     1     arg2   length prefix (0..=15)
//! 260     15    arg2   data region (format tag)
//! ```
//!
//! Bytes past a declared length inside a data region are padding and are
//! never read as data.

use crate::config::WireConfig;
use crate::{DispatchError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::borrow::Cow;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use thiserror::Error;

/// Reasons a datagram is not a valid frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame is {actual} bytes, expected {}", WireConfig::FRAME_LEN)]
    Length { actual: usize },

    #[error("{field} declares {declared} bytes but holds at most {capacity}")]
    Overlong {
        field: &'static str,
        declared: usize,
        capacity: usize,
    },
}

/// Message kind byte.
///
/// Every byte value decodes; only [`MessageKind::Infer`] is a valid inbound
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Infer,
    Result,
    Error,
    /// Any other byte. [`From<u8>`] never yields `Unknown` for 1, 2 or 3, and
    /// routing goes by [`MessageKind::as_u8`], so a hand-built `Unknown(1)` is
    /// still an inference request.
    Unknown(u8),
}

impl MessageKind {
    pub const INFER: u8 = 1;
    pub const RESULT: u8 = 2;
    pub const ERROR: u8 = 3;

    pub fn as_u8(self) -> u8 {
        match self {
            MessageKind::Infer => Self::INFER,
            MessageKind::Result => Self::RESULT,
            MessageKind::Error => Self::ERROR,
            MessageKind::Unknown(raw) => raw,
        }
    }
}

impl From<u8> for MessageKind {
    fn from(raw: u8) -> Self {
        match raw {
            Self::INFER => MessageKind::Infer,
            Self::RESULT => MessageKind::Result,
            Self::ERROR => MessageKind::Error,
            other => MessageKind::Unknown(other),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind.as_u8()
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Infer => write!(f, "infer"),
            MessageKind::Result => write!(f, "result"),
            MessageKind::Error => write!(f, "error"),
            MessageKind::Unknown(raw) => write!(f, "unknown({})", raw),
        }
    }
}

/// A decoded request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub id: u16,
    pub kind: MessageKind,
    pub arg1: Vec<u8>,
    pub arg2: Vec<u8>,
}

impl RequestFrame {
    /// Build an inference request for an image on disk.
    pub fn infer(id: u16, image_path: impl AsRef<OsStr>, format: &str) -> Self {
        Self {
            id,
            kind: MessageKind::Infer,
            arg1: image_path.as_ref().as_bytes().to_vec(),
            arg2: format.as_bytes().to_vec(),
        }
    }

    /// `arg1` interpreted as a filesystem path.
    pub fn image_path(&self) -> PathBuf {
        PathBuf::from(OsStr::from_bytes(&self.arg1))
    }

    /// `arg2` interpreted as a format tag.
    pub fn format_tag(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.arg2)
    }

    /// Encode into a full-size frame.
    ///
    /// Arguments longer than their field are rejected rather than truncated.
    pub fn encode(&self) -> Result<Bytes> {
        check_capacity("arg1", &self.arg1, WireConfig::ARG1_CAPACITY)?;
        check_capacity("arg2", &self.arg2, WireConfig::ARG2_CAPACITY)?;

        let mut buf = BytesMut::with_capacity(WireConfig::FRAME_LEN);
        buf.put_u16(self.id);
        buf.put_u8(self.kind.as_u8());
        put_prefixed(&mut buf, &self.arg1, WireConfig::ARG1_CAPACITY);
        put_prefixed(&mut buf, &self.arg2, WireConfig::ARG2_CAPACITY);
        debug_assert_eq!(buf.len(), WireConfig::FRAME_LEN);
        Ok(buf.freeze())
    }
}

/// Decode a datagram into a [`RequestFrame`].
pub fn decode(buffer: &[u8]) -> std::result::Result<RequestFrame, DecodeError> {
    if buffer.len() != WireConfig::FRAME_LEN {
        return Err(DecodeError::Length {
            actual: buffer.len(),
        });
    }

    let mut buf = buffer;
    let id = buf.get_u16();
    let kind = MessageKind::from(buf.get_u8());
    let arg1 = take_prefixed(&mut buf, "arg1", WireConfig::ARG1_CAPACITY)?;
    let arg2 = take_prefixed(&mut buf, "arg2", WireConfig::ARG2_CAPACITY)?;

    Ok(RequestFrame {
        id,
        kind,
        arg1,
        arg2,
    })
}

/// Encode an error notice shaped like a request frame.
///
/// The message is clamped to the `arg1` capacity and the `arg2` region is
/// zero padding without a length prefix. The server does not send these on
/// the request channel.
pub fn encode_error_notice(id: u16, message: &str) -> Bytes {
    let text = &message.as_bytes()[..message.len().min(WireConfig::ARG1_CAPACITY)];

    let mut buf = BytesMut::with_capacity(WireConfig::FRAME_LEN);
    buf.put_u16(id);
    buf.put_u8(MessageKind::ERROR);
    put_prefixed(&mut buf, text, WireConfig::ARG1_CAPACITY);
    buf.put_bytes(0, 1 + WireConfig::ARG2_CAPACITY);
    buf.freeze()
}

fn check_capacity(field: &'static str, data: &[u8], capacity: usize) -> Result<()> {
    if data.len() > capacity {
        return Err(DispatchError::ArgumentTooLong {
            field,
            len: data.len(),
            capacity,
        });
    }
    Ok(())
}

fn put_prefixed(buf: &mut BytesMut, data: &[u8], capacity: usize) {
    // Callers guarantee data.len() <= capacity <= u8::MAX.
    buf.put_u8(data.len() as u8);
    buf.put_slice(data);
    buf.put_bytes(0, capacity - data.len());
}

fn take_prefixed(
    buf: &mut &[u8],
    field: &'static str,
    capacity: usize,
) -> std::result::Result<Vec<u8>, DecodeError> {
    let declared = buf.get_u8() as usize;
    if declared > capacity {
        return Err(DecodeError::Overlong {
            field,
            declared,
            capacity,
        });
    }
    let data = buf[..declared].to_vec();
    buf.advance(capacity);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RequestFrame {
        RequestFrame::infer(7, "/tmp/a.png", "png")
    }

    #[test]
    fn test_encode_is_fixed_size() {
        let bytes = sample().encode().unwrap();
        assert_eq!(bytes.len(), WireConfig::FRAME_LEN);
        // id big-endian, then kind
        assert_eq!(&bytes[..3], &[0x00, 0x07, 0x01]);
        assert_eq!(bytes[3] as usize, "/tmp/a.png".len());
        assert_eq!(bytes[259], 3);
        assert_eq!(&bytes[260..263], b"png");
    }

    #[test]
    fn test_decode_reproduces_fields() {
        let frame = RequestFrame {
            id: 0xBEEF,
            kind: MessageKind::Unknown(200),
            arg1: vec![b'x'; WireConfig::ARG1_CAPACITY],
            arg2: vec![b'y'; WireConfig::ARG2_CAPACITY],
        };
        let decoded = decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);

        let empty = RequestFrame {
            id: 0,
            kind: MessageKind::Infer,
            arg1: Vec::new(),
            arg2: Vec::new(),
        };
        assert_eq!(decode(&empty.encode().unwrap()).unwrap(), empty);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let bytes = sample().encode().unwrap();

        assert_eq!(
            decode(&[0u8; 10]),
            Err(DecodeError::Length { actual: 10 })
        );
        assert!(decode(&bytes[..WireConfig::FRAME_LEN - 1]).is_err());

        let mut longer = bytes.to_vec();
        longer.push(0);
        assert_eq!(
            decode(&longer),
            Err(DecodeError::Length {
                actual: WireConfig::FRAME_LEN + 1
            })
        );
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_overlong_arg2_prefix() {
        let mut bytes = sample().encode().unwrap().to_vec();
        bytes[259] = 16;
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Overlong {
                field: "arg2",
                declared: 16,
                capacity: 15
            })
        );
    }

    #[test]
    fn test_decode_ignores_padding() {
        let mut bytes = sample().encode().unwrap().to_vec();
        // Garbage after the declared arg1 length must not leak into the path.
        bytes[3 + 1 + 20] = b'!';
        bytes[260 + 10] = b'!';
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.image_path(), PathBuf::from("/tmp/a.png"));
        assert_eq!(decoded.format_tag(), "png");
    }

    #[test]
    fn test_encode_rejects_long_arguments() {
        let mut frame = sample();
        frame.arg2 = b"much-too-long-format".to_vec();
        match frame.encode() {
            Err(DispatchError::ArgumentTooLong { field, len, capacity }) => {
                assert_eq!(field, "arg2");
                assert_eq!(len, 20);
                assert_eq!(capacity, 15);
            }
            other => panic!("Expected ArgumentTooLong, got: {:?}", other),
        }

        frame = sample();
        frame.arg1 = vec![b'a'; 256];
        assert!(frame.encode().is_err());
    }

    #[test]
    fn test_message_kind_covers_every_byte() {
        for raw in 0..=u8::MAX {
            let kind = MessageKind::from(raw);
            assert_eq!(u8::from(kind), raw);
            assert_eq!(kind == MessageKind::Infer, raw == MessageKind::INFER);
        }
    }

    #[test]
    fn test_error_notice_layout() {
        let notice = encode_error_notice(42, "Inference failed");
        assert_eq!(notice.len(), WireConfig::FRAME_LEN);
        assert_eq!(&notice[..3], &[0x00, 42, MessageKind::ERROR]);
        assert_eq!(notice[3] as usize, "Inference failed".len());
        assert_eq!(&notice[4..4 + 16], b"Inference failed");
        assert!(notice[259..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_error_notice_clamps_message() {
        let long = "e".repeat(400);
        let notice = encode_error_notice(1, &long);
        assert_eq!(notice.len(), WireConfig::FRAME_LEN);
        assert_eq!(notice[3] as usize, WireConfig::ARG1_CAPACITY);

        let decoded = decode(&notice).unwrap();
        assert_eq!(decoded.kind, MessageKind::Error);
        assert_eq!(decoded.arg1.len(), WireConfig::ARG1_CAPACITY);
    }
}
