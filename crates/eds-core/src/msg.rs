//! Framed messages
//!
//! On the wire a message is a 4-byte big-endian payload length followed by
//! the payload, which is one encoded record. A `Message` keeps the whole frame
//! (header included) in its primary buffer so the send path can write it
//! verbatim and resume from `sendoff` after a partial write.
//!
//! ```ignore
//! let mut msg = Message::new();
//! msg.create(&StatusResp { okmsg: b"done", ..Default::default() })?;
//! // ... send_msg(io, &mut msg) until Done ...
//! msg.reset();
//! // ... recv_msg(io, &mut msg) until Done ...
//! let req: SweeperReq<'_> = msg.parse()?;
//! ```
//!
//! Records returned by `parse` borrow the message, so the borrow checker
//! rejects a `reset` while any decoded view is still alive.

use thiserror::Error;

use crate::buf::Buffer;
use crate::error::{BufError, NetstringError};
use crate::record::Record;

/// Size of the length prefix.
pub const FRAME_HDR_LEN: usize = 4;

/// Default upper bound on a frame payload.
pub const DEFAULT_MAX_MSG_SIZE: usize = 4 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MsgError {
    #[error("message too big ({len} > {max} bytes)")]
    TooBig { len: usize, max: usize },
    #[error(transparent)]
    Codec(#[from] NetstringError),
    #[error(transparent)]
    Alloc(#[from] BufError),
}

/// Decode a frame header.
#[inline]
pub fn frame_len(hdr: &[u8; FRAME_HDR_LEN]) -> usize {
    u32::from_be_bytes(*hdr) as usize
}

/// Validate a declared payload length before any space is reserved for it.
#[inline]
pub fn check_len(len: usize, max: usize) -> Result<usize, MsgError> {
    if len > max {
        Err(MsgError::TooBig { len, max })
    } else {
        Ok(len)
    }
}

/// One framed message plus the scratch space its codec needs.
#[derive(Debug, Clone)]
pub struct Message {
    buf: Buffer,
    scratch: Buffer,
    sendoff: usize,
    max_size: usize,
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Message {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MSG_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buf: Buffer::new(),
            scratch: Buffer::new(),
            sendoff: 0,
            max_size: max_size.min(u32::MAX as usize),
        }
    }

    /// Prepare for the next exchange, keeping allocations.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.scratch.clear();
        self.sendoff = 0;
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Encode `rec` as a complete frame, replacing any previous content.
    pub fn create<'r, R: Record<'r>>(&mut self, rec: &R) -> Result<(), MsgError> {
        self.reset();
        let hdr = self.buf.alloc(FRAME_HDR_LEN)?;
        if let Err(e) = rec.serialize_with(&mut self.buf, &mut self.scratch) {
            self.buf.clear();
            return Err(e.into());
        }
        self.seal(hdr)
    }

    /// Frame an already-encoded payload.
    pub fn create_raw(&mut self, payload: &[u8]) -> Result<(), MsgError> {
        self.reset();
        check_len(payload.len(), self.max_size)?;
        let hdr = self.buf.alloc(FRAME_HDR_LEN)?;
        self.buf.append(payload)?;
        self.seal(hdr)
    }

    fn seal(&mut self, hdr: usize) -> Result<(), MsgError> {
        let len = self.buf.len() - hdr - FRAME_HDR_LEN;
        if let Err(e) = check_len(len, self.max_size) {
            self.buf.clear();
            return Err(e);
        }
        let be = (len as u32).to_be_bytes();
        self.buf.as_mut_slice()[hdr..hdr + FRAME_HDR_LEN].copy_from_slice(&be);
        Ok(())
    }

    /// Decode the payload as `R`. Trailing bytes after the record are ignored.
    pub fn parse<'m, R: Record<'m>>(&'m self) -> Result<R, MsgError> {
        let (rec, _left) = R::deserialize(self.payload())?;
        Ok(rec)
    }

    /// Payload length declared by the buffered header, if the header is in.
    pub fn declared_len(&self) -> Option<usize> {
        let hdr: &[u8; FRAME_HDR_LEN] = self.buf.as_slice().get(..FRAME_HDR_LEN)?.try_into().ok()?;
        Some(frame_len(hdr))
    }

    /// Number of bytes the receive path should still read to complete the
    /// frame. Fails if the declared length exceeds the limit.
    pub fn wanted(&self) -> Result<usize, MsgError> {
        let have = self.buf.len();
        match self.declared_len() {
            None => Ok(FRAME_HDR_LEN - have),
            Some(len) => {
                let len = check_len(len, self.max_size)?;
                Ok((FRAME_HDR_LEN + len).saturating_sub(have))
            }
        }
    }

    /// True once header and the full declared payload are buffered.
    pub fn is_complete(&self) -> bool {
        match self.declared_len() {
            Some(len) => self.buf.len() >= FRAME_HDR_LEN + len,
            None => false,
        }
    }

    /// Encoded payload without the header (empty until the header is in).
    pub fn payload(&self) -> &[u8] {
        let end = match self.declared_len() {
            Some(len) => (FRAME_HDR_LEN + len).min(self.buf.len()),
            None => return &[],
        };
        &self.buf.as_slice()[FRAME_HDR_LEN..end]
    }

    /// Whole frame, header included.
    #[inline]
    pub fn frame(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Raw buffer for the receive path.
    #[inline]
    pub fn buf_mut(&mut self) -> &mut Buffer {
        &mut self.buf
    }

    #[inline]
    pub fn sendoff(&self) -> usize {
        self.sendoff
    }

    #[inline]
    pub fn set_sendoff(&mut self, off: usize) {
        self.sendoff = off.min(self.buf.len());
    }

    /// Unsent tail of the frame.
    #[inline]
    pub fn unsent(&self) -> &[u8] {
        &self.buf.as_slice()[self.sendoff..]
    }
}
