//! Frame encoding and the size-prefix-driven parser.
//!
//! A single inbound read may concatenate several frames; [`FrameIter`]
//! walks them by the size prefix. Oversized or version-mismatched frames
//! are wire errors, and a wire error is grounds for closing the socket
//! it arrived on.

use thiserror::Error;

use arus_common::constants::PROTOCOL_VERSION;

/// Outer header: u32 size + u16 version + u16 kind.
pub const HEADER_LENGTH: usize = 8;

/// Inner kind-0 header: sub-kind byte + 7 padding + u64 timestamp.
pub const SUB_HEADER_LENGTH: usize = 16;

/// Upper bound on a single frame. The largest legitimate frame is the
/// computer-state response (~21 KiB); anything near the cap is garbage.
pub const MAX_FRAME_LENGTH: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("truncated frame: {0} bytes")]
    Truncated(usize),

    #[error("frame size {0} exceeds maximum")]
    Oversized(u32),

    #[error("unsupported protocol version {0}")]
    BadVersion(u16),

    #[error("unknown request kind {0}")]
    UnknownKind(u16),

    #[error("unknown sub-kind {0}")]
    UnknownSubKind(u8),

    #[error("malformed {0} record")]
    MalformedRecord(&'static str),
}

/// Outer request kinds in use on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RequestKind {
    /// Sub-typed request/response pair (see [`SubKind`]).
    SubTyped = 0,
    /// Exchange public peers: empty request, packed IPv4 list response.
    ExchangePeers = 1,
    /// Broadcast a signed transfer record. No response.
    BroadcastTransfer = 3,
}

impl TryFrom<u16> for RequestKind {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::SubTyped),
            1 => Ok(Self::ExchangePeers),
            3 => Ok(Self::BroadcastTransfer),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

/// Inner sub-kinds carried by kind-0 frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubKind {
    ComputerState = 1,
    Environment = 2,
    TransferStatus = 3,
}

impl TryFrom<u8> for SubKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            1 => Ok(Self::ComputerState),
            2 => Ok(Self::Environment),
            3 => Ok(Self::TransferStatus),
            other => Err(WireError::UnknownSubKind(other)),
        }
    }
}

/// One parsed frame borrowing its payload from the inbound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub kind: RequestKind,
    pub payload: &'a [u8],
}

/// Encode a complete frame: header + payload.
pub fn encode_frame(kind: RequestKind, payload: &[u8]) -> Vec<u8> {
    let size = (HEADER_LENGTH + payload.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    out.extend_from_slice(&(kind as u16).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Encode a kind-0 frame with the inner sub-header and `body`.
pub fn encode_sub_request(sub: SubKind, timestamp: u64, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(SUB_HEADER_LENGTH + body.len());
    payload.push(sub as u8);
    payload.extend_from_slice(&[0u8; 7]);
    payload.extend_from_slice(&timestamp.to_le_bytes());
    payload.extend_from_slice(body);
    encode_frame(RequestKind::SubTyped, &payload)
}

/// Parse one frame off the front of `buf`; returns the frame and the number
/// of bytes consumed.
pub fn parse_frame(buf: &[u8]) -> Result<(Frame<'_>, usize), WireError> {
    if buf.len() < HEADER_LENGTH {
        return Err(WireError::Truncated(buf.len()));
    }
    let size = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if size as usize > MAX_FRAME_LENGTH {
        return Err(WireError::Oversized(size));
    }
    if (size as usize) < HEADER_LENGTH || buf.len() < size as usize {
        return Err(WireError::Truncated(buf.len()));
    }
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version != PROTOCOL_VERSION {
        return Err(WireError::BadVersion(version));
    }
    let kind = RequestKind::try_from(u16::from_le_bytes([buf[6], buf[7]]))?;
    Ok((
        Frame {
            kind,
            payload: &buf[HEADER_LENGTH..size as usize],
        },
        size as usize,
    ))
}

/// Iterator over concatenated frames in one inbound buffer.
///
/// Stops after yielding the first error; the caller closes the socket in
/// that case, so there is nothing meaningful to resynchronize to.
pub struct FrameIter<'a> {
    buf: &'a [u8],
    poisoned: bool,
}

impl<'a> FrameIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            poisoned: false,
        }
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<Frame<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.poisoned || self.buf.is_empty() {
            return None;
        }
        match parse_frame(self.buf) {
            Ok((frame, consumed)) => {
                self.buf = &self.buf[consumed..];
                Some(Ok(frame))
            }
            Err(e) => {
                self.poisoned = true;
                Some(Err(e))
            }
        }
    }
}

/// Parsed inner view of a kind-0 payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubFrame<'a> {
    pub sub: SubKind,
    pub timestamp: u64,
    pub body: &'a [u8],
}

pub fn parse_sub_frame(payload: &[u8]) -> Result<SubFrame<'_>, WireError> {
    if payload.len() < SUB_HEADER_LENGTH {
        return Err(WireError::Truncated(payload.len()));
    }
    let sub = SubKind::try_from(payload[0])?;
    let timestamp = u64::from_le_bytes(payload[8..16].try_into().expect("sub-header slice"));
    Ok(SubFrame {
        sub,
        timestamp,
        body: &payload[SUB_HEADER_LENGTH..],
    })
}
