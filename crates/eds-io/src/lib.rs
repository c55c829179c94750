//! # eds-io
//!
//! UNIX domain socket plumbing for EDS services and their clients.
//!
//! - [`io::Io`]: owned descriptor with blocking and single-shot calls
//! - [`frame`]: resumable `send_msg` / `recv_msg` for length-prefixed frames
//! - [`fdpass`]: one descriptor (or an error code) per `sendmsg`
//! - [`nullfd::NullFd`]: shared `/dev/null` handle

pub mod error;
pub mod fdpass;
pub mod frame;
pub mod io;
pub mod nullfd;

pub use error::{IoError, Result};
pub use fdpass::{recv_fd, send_fd, PassFd, Received};
pub use frame::{recv_msg, send_msg};
pub use io::{Io, Progress, ReadOutcome, DEFAULT_BACKLOG, READ_CHUNK};
pub use nullfd::NullFd;
