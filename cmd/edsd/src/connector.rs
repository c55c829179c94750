//! Connector service
//!
//! Opens outbound TCP connections on behalf of its peers. A request names
//! the destination (and optionally a local address to bind); the reply is
//! the connecting socket itself, passed over the UNIX socket, or the errno
//! that prevented it. The connect is started non-blocking and completes in
//! the peer's hands.

use std::mem;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};

use eds::{Arm, Client, SvcCtx};
use eds_core::Message;
use eds_io::{PassFd, Progress};
use tracing::{debug, error, info};
use ycl::ConnectorReq;

/// Upper bound (exclusive) for a requested retry count.
const MAX_RETRIES: i64 = 10;

#[derive(Debug, Default)]
pub struct ConnectorCli {
    msg: Message,
    conn: Option<OwnedFd>,
    connerr: i32,
}

pub fn on_readable(cli: &mut Client<ConnectorCli>, _ctx: &mut SvcCtx<'_, ()>) {
    match cli.recv_msg(|u| &mut u.msg) {
        Ok(Progress::Again) => return,
        Ok(Progress::Done(())) => {}
        Err(e) => {
            if !e.is_peer_closed() {
                error!(id = cli.id(), "connectorcli{}: {}", cli.id(), e);
            }
            cli.clear_actions();
            return;
        }
    }

    let res = match cli.udata.msg.parse::<ConnectorReq<'_>>().map(|req| start_connect(&req)) {
        Ok(res) => res,
        Err(e) => {
            error!(id = cli.id(), "connectorcli{}: connector_req parse error: {}", cli.id(), e);
            cli.clear_actions();
            return;
        }
    };
    cli.udata.msg.reset();

    let u = &mut cli.udata;
    match res {
        Ok(fd) => {
            u.conn = Some(fd);
            u.connerr = 0;
        }
        Err(errno) => {
            u.conn = None;
            u.connerr = if errno != 0 { errno } else { libc::EIO };
        }
    }
    cli.set_on_writable(on_sendfd, Arm::Defer);
}

fn on_sendfd(cli: &mut Client<ConnectorCli>, _ctx: &mut SvcCtx<'_, ()>) {
    let what = match cli.udata.conn.as_ref() {
        Some(fd) => PassFd::Fd(fd.as_fd()),
        None => PassFd::Err(cli.udata.connerr),
    };
    match eds_io::send_fd(cli.io(), what) {
        Ok(Progress::Again) => return,
        Ok(Progress::Done(())) => cli.set_on_readable(on_readable, Arm::Defer),
        Err(e) => {
            error!(id = cli.id(), "connectorcli{}: send_fd: {}", cli.id(), e);
            cli.clear_actions();
        }
    }
    // the peer holds its own copy now
    cli.udata.conn = None;
}

pub fn on_done(cli: &mut Client<ConnectorCli>, _ctx: &mut SvcCtx<'_, ()>) {
    info!(id = cli.id(), "connectorcli{}: done", cli.id());
}

pub fn on_finalize(cli: &mut Client<ConnectorCli>, _ctx: &mut SvcCtx<'_, ()>) {
    cli.udata.conn = None;
}

// ── Outbound connect ──

fn resolve(host: &[u8], port: &[u8]) -> Result<SocketAddr, i32> {
    let host = std::str::from_utf8(host).map_err(|_| libc::EINVAL)?;
    let port: u16 = std::str::from_utf8(port)
        .ok()
        .and_then(|p| p.parse().ok())
        .ok_or(libc::EINVAL)?;
    (host, port)
        .to_socket_addrs()
        .map_err(|e| e.raw_os_error().unwrap_or(libc::EHOSTUNREACH))?
        .next()
        .ok_or(libc::EHOSTUNREACH)
}

fn sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut ss: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(a) => {
            let sin = unsafe { &mut *(&mut ss as *mut _ as *mut libc::sockaddr_in) };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = a.port().to_be();
            sin.sin_addr.s_addr = u32::from(*a.ip()).to_be();
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(a) => {
            let sin6 = unsafe { &mut *(&mut ss as *mut _ as *mut libc::sockaddr_in6) };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = a.port().to_be();
            sin6.sin6_addr.s6_addr = a.ip().octets();
            sin6.sin6_flowinfo = a.flowinfo();
            sin6.sin6_scope_id = a.scope_id();
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (ss, len as libc::socklen_t)
}

#[inline]
fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

fn tcp_socket(family: libc::c_int) -> Result<OwnedFd, i32> {
    let fd = unsafe { libc::socket(family, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(errno());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    let raw = fd.as_raw_fd();
    let fl = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if fl < 0 || unsafe { libc::fcntl(raw, libc::F_SETFL, fl | libc::O_NONBLOCK) } < 0 {
        return Err(errno());
    }
    if unsafe { libc::fcntl(raw, libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(errno());
    }
    Ok(fd)
}

/// Start a non-blocking TCP connect as described by `req`. The socket is
/// returned while the connect may still be in progress.
pub fn start_connect(req: &ConnectorReq<'_>) -> Result<OwnedFd, i32> {
    if !req.proto.is_empty() && req.proto != b"tcp" {
        return Err(libc::EPROTONOSUPPORT);
    }
    let dst = resolve(req.dstaddr, req.dstport)?;
    let family = match dst {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };
    let nretries = if req.nretries > 0 && req.nretries < MAX_RETRIES { req.nretries } else { 0 };

    let mut attempt = 0;
    loop {
        let fd = tcp_socket(family)?;
        let raw = fd.as_raw_fd();
        if req.reuse_addr != 0 {
            let on: libc::c_int = 1;
            let ret = unsafe {
                libc::setsockopt(
                    raw,
                    libc::SOL_SOCKET,
                    libc::SO_REUSEADDR,
                    &on as *const _ as *const libc::c_void,
                    mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            };
            if ret < 0 {
                return Err(errno());
            }
        }
        if !req.bindaddr.is_empty() || !req.bindport.is_empty() {
            let host: &[u8] = if req.bindaddr.is_empty() {
                if family == libc::AF_INET { b"0.0.0.0" } else { b"::" }
            } else {
                req.bindaddr
            };
            let port: &[u8] = if req.bindport.is_empty() { b"0" } else { req.bindport };
            let (ss, len) = sockaddr(&resolve(host, port)?);
            if unsafe { libc::bind(raw, &ss as *const _ as *const libc::sockaddr, len) } < 0 {
                return Err(errno());
            }
        }

        let (ss, len) = sockaddr(&dst);
        if unsafe { libc::connect(raw, &ss as *const _ as *const libc::sockaddr, len) } == 0 {
            return Ok(fd);
        }
        match errno() {
            libc::EINPROGRESS | libc::EINTR => return Ok(fd),
            e @ (libc::EADDRNOTAVAIL | libc::EAGAIN | libc::EADDRINUSE) if attempt < nretries => {
                attempt += 1;
                debug!(%dst, attempt, "connect: errno {}, retrying", e);
            }
            e => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::drive;
    use eds::{ServeConfig, ServeContext, Service, Worker};
    use eds_core::Logger;
    use eds_io::Io;
    use std::net::TcpListener;
    use std::time::Duration;
    use ycl::{YclCli, YclCtx, YclError};

    fn req<'a>(addr: &'a [u8], port: &'a [u8]) -> ConnectorReq<'a> {
        ConnectorReq {
            dstaddr: addr,
            dstport: port,
            ..Default::default()
        }
    }

    #[test]
    fn test_start_connect_rejects_bad_input() {
        assert_eq!(start_connect(&req(b"127.0.0.1", b"notaport")).unwrap_err(), libc::EINVAL);
        let mut udp = req(b"127.0.0.1", b"53");
        udp.proto = b"udp";
        assert_eq!(start_connect(&udp).unwrap_err(), libc::EPROTONOSUPPORT);
    }

    #[test]
    fn test_connects_on_behalf_of_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port().to_string();

        let cx = ServeContext::with_config(Logger::sink(), ServeConfig::new()).unwrap();
        let mut svc = Service::<ConnectorCli>::new("connector", "/unused.sock")
            .on_readable(on_readable)
            .on_done(on_done)
            .on_finalize(on_finalize);
        let mut w = Worker::new(&mut svc, &cx).unwrap();
        let (a, b) = Io::pair().unwrap();
        w.add_client(b, w.service().actions()).unwrap();

        let peer = std::thread::spawn(move || {
            let mut cli = YclCli::new(YclCtx::from_io(a));
            let ok = cli.connect(&req(b"127.0.0.1", port.as_bytes()));
            let bad = cli.connect(&req(b"127.0.0.1", b"notaport"));
            (ok, matches!(bad, Err(YclError::Remote(_))))
        });
        drive(&mut w, &peer);
        let (ok, bad_is_remote) = peer.join().unwrap();
        assert!(bad_is_remote);

        let conn = Io::from_owned(ok.unwrap());
        assert!(conn.wait(libc::POLLOUT, Some(Duration::from_secs(2))).unwrap());
        listener.accept().unwrap();
    }
}
