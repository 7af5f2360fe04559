//! Binary frame codec.
//!
//! Layout: `[u32 big-endian header length][UTF-8 app id][payload]`.
//! The codec never inspects the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::FrameError;

const LEN_PREFIX: usize = 4;

/// A decoded binary frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryFrame {
    /// Originating or destination mini-app.
    pub app_id: String,
    /// Opaque payload bytes.
    pub payload: Bytes,
}

impl BinaryFrame {
    /// Build a frame from parts.
    pub fn new(app_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            app_id: app_id.into(),
            payload: payload.into(),
        }
    }

    /// Encode this frame.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        encode(&self.app_id, &self.payload)
    }
}

/// Tag `payload` with `app_id`.
pub fn encode(app_id: &str, payload: &[u8]) -> Result<Bytes, FrameError> {
    let header = app_id.as_bytes();
    let header_len =
        u32::try_from(header.len()).map_err(|_| FrameError::AppIdTooLong(header.len()))?;
    let mut buf = BytesMut::with_capacity(LEN_PREFIX + header.len() + payload.len());
    buf.put_u32(header_len);
    buf.put_slice(header);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Split a frame into its app id and payload.
///
/// The payload is a zero-copy slice of `frame`.
pub fn decode(mut frame: Bytes) -> Result<BinaryFrame, FrameError> {
    if frame.len() < LEN_PREFIX {
        return Err(FrameError::TooShort { len: frame.len() });
    }
    let declared = frame.get_u32() as usize;
    if declared > frame.len() {
        return Err(FrameError::HeaderOverrun {
            declared,
            available: frame.len(),
        });
    }
    let header = frame.split_to(declared);
    let app_id = std::str::from_utf8(&header)
        .map_err(|_| FrameError::InvalidAppId)?
        .to_owned();
    Ok(BinaryFrame {
        app_id,
        payload: frame,
    })
}
