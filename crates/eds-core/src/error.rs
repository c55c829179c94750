//! Error types for the buffer and record codec

use thiserror::Error;

/// Buffer allocation failure.
///
/// A failed reserve leaves the buffer untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufError {
    #[error("buffer allocation failed ({requested} bytes)")]
    Alloc { requested: usize },
}

/// Netstring and record codec errors.
///
/// `Incomplete` is a control signal: the caller must buffer more input and
/// retry. Everything else is fatal to the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NetstringError {
    #[error("invalid netstring format")]
    Format,
    #[error("netstring length too large")]
    TooLarge,
    #[error("incomplete netstring")]
    Incomplete,
    #[error("field arity mismatch (expected {expected}, got {got})")]
    Arity { expected: usize, got: usize },
    #[error("field kind mismatch for '{field}'")]
    Kind { field: &'static str },
    #[error("memory allocation error")]
    Alloc,
}

impl NetstringError {
    /// True if more input may turn this into a successful parse.
    #[inline]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, NetstringError::Incomplete)
    }
}

impl From<BufError> for NetstringError {
    fn from(_: BufError) -> Self {
        NetstringError::Alloc
    }
}

pub type NsResult<T> = Result<T, NetstringError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strerror_text() {
        assert_eq!(NetstringError::Format.to_string(), "invalid netstring format");
        assert_eq!(NetstringError::TooLarge.to_string(), "netstring length too large");
        assert_eq!(
            BufError::Alloc { requested: 8 }.to_string(),
            "buffer allocation failed (8 bytes)"
        );
    }

    #[test]
    fn test_alloc_converts() {
        let e: NetstringError = BufError::Alloc { requested: 1 }.into();
        assert_eq!(e, NetstringError::Alloc);
        assert!(!e.is_incomplete());
        assert!(NetstringError::Incomplete.is_incomplete());
    }
}
