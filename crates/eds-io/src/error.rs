//! I/O error type

use nix::errno::Errno;
use thiserror::Error;

use eds_core::{BufError, MsgError, NetstringError};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("{op}: {errno}")]
    Os { op: &'static str, errno: Errno },
    /// Orderly close between messages.
    #[error("connection closed by peer")]
    PeerClosed,
    /// Close in the middle of a read that needed more bytes.
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("message too big ({len} > {max} bytes)")]
    MsgTooBig { len: usize, max: usize },
    #[error("memory allocation error")]
    Mem,
    #[error("malformed fd message")]
    BadFdMessage,
    #[error("invalid socket path: {0}")]
    BadPath(String),
    #[error(transparent)]
    Codec(#[from] NetstringError),
}

pub type Result<T> = std::result::Result<T, IoError>;

impl IoError {
    /// Capture `errno` for a failed call to `op`.
    #[inline]
    pub fn last(op: &'static str) -> Self {
        IoError::Os { op, errno: Errno::last() }
    }

    #[inline]
    pub fn os(op: &'static str, errno: Errno) -> Self {
        IoError::Os { op, errno }
    }

    pub fn errno(&self) -> Option<Errno> {
        match self {
            IoError::Os { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// True for both flavors of peer close.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, IoError::PeerClosed | IoError::UnexpectedEof)
            || matches!(self.errno(), Some(Errno::ECONNRESET) | Some(Errno::EPIPE))
    }
}

impl From<BufError> for IoError {
    fn from(_: BufError) -> Self {
        IoError::Mem
    }
}

impl From<MsgError> for IoError {
    fn from(e: MsgError) -> Self {
        match e {
            MsgError::TooBig { len, max } => IoError::MsgTooBig { len, max },
            MsgError::Codec(e) => IoError::Codec(e),
            MsgError::Alloc(_) => IoError::Mem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = IoError::os("connect", Errno::ENOENT);
        assert!(e.to_string().starts_with("connect: ENOENT"));
        assert_eq!(IoError::UnexpectedEof.to_string(), "unexpected end of file");
        assert_eq!(
            IoError::from(MsgError::TooBig { len: 9, max: 8 }).to_string(),
            "message too big (9 > 8 bytes)"
        );
    }

    #[test]
    fn test_peer_closed_classification() {
        assert!(IoError::PeerClosed.is_peer_closed());
        assert!(IoError::UnexpectedEof.is_peer_closed());
        assert!(IoError::os("write", Errno::EPIPE).is_peer_closed());
        assert!(!IoError::os("write", Errno::EBADF).is_peer_closed());
        assert!(!IoError::Mem.is_peer_closed());
    }
}
