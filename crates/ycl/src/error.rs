//! Client-side error type

use eds_core::{MsgError, NetstringError};
use eds_io::IoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum YclError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error("codec: {0}")]
    Codec(#[from] NetstringError),
    /// The service answered with an error status.
    #[error("{0}")]
    Remote(String),
    /// Status response with neither message set.
    #[error("status response carries no status")]
    NoStatus,
    #[error("not connected")]
    Closed,
}

pub type Result<T> = std::result::Result<T, YclError>;

impl From<MsgError> for YclError {
    fn from(e: MsgError) -> Self {
        match e {
            MsgError::Codec(e) => YclError::Codec(e),
            other => YclError::Io(other.into()),
        }
    }
}
