//! Request helpers
//!
//! Each call sends one request and blocks until the service has answered.
//! Failures are returned and their text is kept for [`YclCli::strerror`].
//!
//! ```ignore
//! let mut cli = YclCli::open(ycl::paths::socket(ycl::paths::SWEEPER))?;
//! match cli.sweep(b"10.0.0.0/24", true) {
//!     Ok(msg) => println!("{}", msg),
//!     Err(_) => eprintln!("sweep: {}", cli.strerror()),
//! }
//! ```

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::Path;

use eds_core::{Message, Record};
use eds_io::Io;
use tracing::debug;

use crate::ctx::YclCtx;
use crate::error::{Result, YclError};
use crate::proto::{ConnectorReq, EthframeReq, PcapReq, ResolverReq, StatusResp, SweeperReq};

#[derive(Debug, Default)]
pub struct YclCli {
    ctx: YclCtx,
    msg: Message,
    err: Option<String>,
}

impl YclCli {
    pub fn new(ctx: YclCtx) -> Self {
        Self {
            ctx,
            msg: Message::new(),
            err: None,
        }
    }

    /// Connect to the service at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut cli = Self::default();
        cli.reconnect(path)?;
        Ok(cli)
    }

    pub fn reconnect(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        debug!(path = %path.display(), "connecting");
        let res = YclCtx::connect(path).map(|ctx| self.ctx = ctx);
        self.track(res)
    }

    pub fn close(&mut self) {
        self.ctx.close();
    }

    pub fn ctx(&self) -> &YclCtx {
        &self.ctx
    }

    /// Text of the last failure.
    pub fn strerror(&self) -> &str {
        self.err.as_deref().unwrap_or("no error")
    }

    fn track<T>(&mut self, res: Result<T>) -> Result<T> {
        match &res {
            Ok(_) => self.err = None,
            Err(e) => self.err = Some(e.to_string()),
        }
        res
    }

    fn roundtrip<'r, R: Record<'r>>(&mut self, req: &R) -> Result<String> {
        self.msg.create(req)?;
        self.ctx.send_msg(&mut self.msg)?;
        self.ctx.recv_msg(&mut self.msg)?;
        self.msg.parse::<StatusResp<'_>>()?.into_result()
    }

    /// Send `req` and wait for its status response; the ok message on
    /// success.
    pub fn status_request<'r, R: Record<'r>>(&mut self, req: &R) -> Result<String> {
        let res = self.roundtrip(req);
        self.track(res)
    }

    pub fn sweep(&mut self, addrs: &[u8], arp: bool) -> Result<String> {
        let arp: &[u8] = if arp { b"yes" } else { b"" };
        self.status_request(&SweeperReq { addrs, arp })
    }

    /// Start a capture; packets go to `dumpfd`.
    pub fn pcap(&mut self, iface: &[u8], filter: &[u8], dumpfd: BorrowedFd<'_>) -> Result<String> {
        let res = self.ctx.send_fd(dumpfd);
        self.track(res)?;
        self.status_request(&PcapReq { iface, filter })
    }

    pub fn ethframe(&mut self, req: &EthframeReq<'_>) -> Result<String> {
        self.status_request(req)
    }

    /// Have the connector open a TCP connection; the connected (or still
    /// connecting) socket on success, the remote errno text otherwise.
    pub fn connect(&mut self, req: &ConnectorReq<'_>) -> Result<OwnedFd> {
        let res = (|| -> Result<_> {
            self.msg.create(req)?;
            self.ctx.send_msg(&mut self.msg)?;
            self.ctx.recv_fd()
        })();
        self.track(res)
    }

    /// Resolve `hosts` into `dstfd` and wait for the resolver to signal
    /// completion by closing the descriptor it passed back.
    pub fn resolve(&mut self, dstfd: BorrowedFd<'_>, hosts: &[u8], compress: bool) -> Result<()> {
        let res = (|| -> Result<_> {
            self.msg.create(&ResolverReq {
                hosts,
                compress: compress as i64,
            })?;
            self.ctx.send_fd(dstfd)?;
            self.ctx.send_msg(&mut self.msg)?;
            let done = Io::from_owned(self.ctx.recv_fd()?);
            done.wait(libc::POLLIN | libc::POLLPRI, None)?;
            Ok(())
        })();
        self.track(res)
    }

    /// Descriptor of the underlying connection.
    pub fn as_fd(&self) -> Result<BorrowedFd<'_>> {
        Ok(self.ctx.io()?.as_fd())
    }
}

impl From<YclCtx> for YclCli {
    fn from(ctx: YclCtx) -> Self {
        Self::new(ctx)
    }
}
