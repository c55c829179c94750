//! # ycl
//!
//! Blocking client side of the EDS services.
//!
//! - [`proto`]: request and response records
//! - [`ctx::YclCtx`]: one connection with framed and fd-passing calls
//! - [`cli::YclCli`]: one call per request type, with `strerror`
//! - [`paths`]: well-known socket locations

pub mod cli;
pub mod ctx;
pub mod error;
pub mod paths;
pub mod proto;

pub use cli::YclCli;
pub use ctx::YclCtx;
pub use error::{Result, YclError};
pub use proto::{ConnectorReq, EthframeReq, KnegReq, PcapReq, PortList, ResolverReq, StatusResp, SweeperReq};
