//! # eds-core
//!
//! Platform-agnostic building blocks shared by the EDS framework, the socket
//! I/O layer and the client helpers.
//!
//! - [`buf::Buffer`]: growable, zero-filled, aligned byte store
//! - [`netstring`]: `<len>:<bytes>,` codec
//! - [`record`]: generic field-map record engine and [`netstring_record!`]
//! - [`msg::Message`]: length-prefixed frame around one record
//! - [`idset::IdSet`], [`fdset::FdSet`]: fixed and growable bitsets
//! - [`env`], [`log`]: configuration lookups and the logging sink

pub mod buf;
pub mod env;
pub mod error;
pub mod fdset;
pub mod idset;
pub mod log;
pub mod msg;
pub mod netstring;
pub mod record;

pub use buf::{Buffer, BUF_ALIGNMENT};
pub use error::{BufError, NetstringError, NsResult};
pub use fdset::FdSet;
pub use idset::IdSet;
pub use log::Logger;
pub use msg::{Message, MsgError, DEFAULT_MAX_MSG_SIZE, FRAME_HDR_LEN};
pub use record::{FieldDesc, FieldKind, FieldRef, Record, Value};
