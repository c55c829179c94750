//! # eds
//!
//! Event-driven service framework for UNIX domain socket daemons.
//!
//! This crate provides:
//! - Service definitions with a callback builder ([`Service`])
//! - Per-client explicit state machine ([`Client`], [`ClientState`])
//! - A single-threaded `poll(2)` worker loop with tickers and accept timeouts
//! - A forking supervisor that restarts workers with backoff
//! - Environment-driven configuration ([`ServeConfig`])
//!
//! # Example
//!
//! ```ignore
//! use eds::{Client, ServeContext, Service, SvcCtx, Transition};
//!
//! #[derive(Default)]
//! struct EchoCli {
//!     msg: eds_core::Message,
//! }
//!
//! fn on_request(cli: &mut Client<EchoCli>, ctx: &mut SvcCtx<'_, ()>) {
//!     match cli.recv_msg(|u| &mut u.msg) {
//!         Ok(eds_io::Progress::Again) => {}
//!         Ok(eds_io::Progress::Done(())) => {
//!             let _ = cli.send_msg(|u| &mut u.msg, Transition::Read(on_request));
//!             cli.udata.msg.reset();
//!         }
//!         Err(e) => {
//!             ctx.report(e);
//!             cli.abort();
//!         }
//!     }
//! }
//!
//! let cx = ServeContext::new("echod")?;
//! let mut echo = Service::<EchoCli>::new("echo", "/var/run/eds/echo.sock").on_readable(on_request);
//! eds::serve(&mut [&mut echo], &cx)?;
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod service;
pub mod signal;
pub mod supervisor;
pub mod worker;

// Re-exports
pub use client::{Action, Arm, Client, ClientState, Transition, EXTERNAL_FD};
pub use config::{ConfigError, ServeConfig};
pub use context::ServeContext;
pub use error::{EdsError, Result};
pub use service::{Actions, ErrorFn, InitFn, Limits, ReapFn, Serve, Service, SvcCtx, SvcFn};
pub use supervisor::{serve, serve_single, serve_single_by_name, Supervisor};
pub use worker::{StopHandle, Worker};
