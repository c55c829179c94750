//! Framework error type

use std::path::PathBuf;

use eds_io::IoError;
use nix::errno::Errno;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum EdsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Creating or binding a service socket failed.
    #[error("{svc}: listen on {}: {source}", path.display())]
    Listen {
        svc: String,
        path: PathBuf,
        #[source]
        source: IoError,
    },
    #[error("fork: {0}")]
    Fork(Errno),
    /// A service's module init hook refused to start.
    #[error("{svc}: init: {msg}")]
    Init { svc: String, msg: String },
    #[error(transparent)]
    Io(#[from] IoError),
    #[error("poll: {0}")]
    Poll(Errno),
    #[error("no such service: {0}")]
    NotFound(String),
    /// The worker stopped accepting and its last client is gone.
    #[error("{svc}: listener given up after {failures} failed accepts")]
    ListenerLost { svc: String, failures: usize },
}

pub type Result<T> = std::result::Result<T, EdsError>;

impl EdsError {
    pub(crate) fn sys(op: &'static str, errno: Errno) -> Self {
        EdsError::Io(IoError::os(op, errno))
    }
}
