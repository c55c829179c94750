//! Sweeper service
//!
//! Accepts one `SweeperReq` per connection and acknowledges it on the next
//! tick with an ok status. The sweep itself runs elsewhere; this service
//! only validates and schedules.
//!
//! States: `on_readable` (reading the request) -> ticker armed with
//! `on_term` watching the socket -> "done" sent -> `on_term` on close.

use eds::{Arm, Client, SvcCtx, Transition};
use eds_core::Message;
use eds_io::{IoError, Progress};
use tracing::{error, info};
use ycl::{StatusResp, SweeperReq};

/// Largest request accepted, in bytes.
pub const MAX_CMDSZ: usize = 1 << 22;

#[derive(Debug)]
pub struct SweeperCli {
    msg: Message,
}

impl Default for SweeperCli {
    fn default() -> Self {
        Self {
            msg: Message::with_max_size(MAX_CMDSZ),
        }
    }
}

pub fn on_readable(cli: &mut Client<SweeperCli>, _ctx: &mut SvcCtx<'_, ()>) {
    let errmsg = match cli.recv_msg(|u| &mut u.msg) {
        Ok(Progress::Again) => return,
        Ok(Progress::Done(())) => match cli.udata.msg.parse::<SweeperReq<'_>>().map(|req| req.addrs.is_empty()) {
            Ok(true) => "addrs not set".to_string(),
            Ok(false) => {
                cli.set_ticker(Some(on_tick));
                cli.set_on_readable(on_term, Arm::Defer);
                return;
            }
            Err(e) => format!("request error: {}", e),
        },
        Err(IoError::PeerClosed | IoError::UnexpectedEof) => "premature connection termination".to_string(),
        Err(IoError::MsgTooBig { .. }) => "maximum command size exceeded".to_string(),
        Err(e) => e.to_string(),
    };

    error!(id = cli.id(), "sweepercli{}: {}", cli.id(), errmsg);
    respond(cli, &StatusResp::err(&errmsg), Transition::Done);
}

/// The peer closed or sent more: either way the exchange is over.
fn on_term(cli: &mut Client<SweeperCli>, _ctx: &mut SvcCtx<'_, ()>) {
    cli.clear_actions();
}

fn on_tick(cli: &mut Client<SweeperCli>, _ctx: &mut SvcCtx<'_, ()>) {
    cli.set_ticker(None);
    respond(cli, &StatusResp::ok("done"), Transition::Read(on_term));
}

fn respond(cli: &mut Client<SweeperCli>, resp: &StatusResp<'_>, next: Transition<SweeperCli>) {
    if let Err(e) = cli.udata.msg.create(resp) {
        error!(id = cli.id(), "sweepercli{}: response serialization error: {}", cli.id(), e);
        cli.abort();
        return;
    }
    // a failed send finishes the client
    let _ = cli.send_msg(|u| &mut u.msg, next);
}

pub fn on_done(cli: &mut Client<SweeperCli>, _ctx: &mut SvcCtx<'_, ()>) {
    info!(id = cli.id(), "sweepercli{}: done", cli.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::drive;
    use eds::{ServeConfig, ServeContext, Service, Worker};
    use eds_core::Logger;
    use eds_io::Io;
    use std::time::{Duration, Instant};
    use ycl::{YclCli, YclCtx, YclError};

    fn context() -> ServeContext {
        ServeContext::with_config(Logger::sink(), ServeConfig::new().tick_slice(Duration::from_millis(30))).unwrap()
    }

    fn service() -> Service<SweeperCli> {
        Service::new("sweeper", "/unused.sock").on_readable(on_readable).on_done(on_done)
    }

    #[test]
    fn test_done_after_tick() {
        let cx = context();
        let mut svc = service();
        let mut w = Worker::new(&mut svc, &cx).unwrap();
        let (a, b) = Io::pair().unwrap();
        w.add_client(b, w.service().actions()).unwrap();

        let peer = std::thread::spawn(move || {
            let start = Instant::now();
            let mut cli = YclCli::new(YclCtx::from_io(a));
            let res = cli.sweep(b"10.0.0.0/30", true);
            (res.unwrap(), start.elapsed())
        });
        drive(&mut w, &peer);
        let (msg, elapsed) = peer.join().unwrap();
        assert_eq!(msg, "done");
        assert!(elapsed >= Duration::from_millis(20));
        // response sent, client waits for the peer to hang up
        for _ in 0..5 {
            w.poll_once(Some(Duration::from_millis(10))).unwrap();
        }
        assert_eq!(w.nclients(), 0);
    }

    #[test]
    fn test_missing_addrs() {
        let cx = context();
        let mut svc = service();
        let mut w = Worker::new(&mut svc, &cx).unwrap();
        let (a, b) = Io::pair().unwrap();
        w.add_client(b, w.service().actions()).unwrap();

        let peer = std::thread::spawn(move || {
            let mut cli = YclCli::new(YclCtx::from_io(a));
            let res = cli.sweep(b"", false);
            (matches!(res, Err(YclError::Remote(_))), cli.strerror().to_string())
        });
        drive(&mut w, &peer);
        let (remote, text) = peer.join().unwrap();
        assert!(remote);
        assert_eq!(text, "addrs not set");
        assert_eq!(w.nclients(), 0);
    }

    #[test]
    fn test_truncated_request() {
        let cx = context();
        let mut svc = service();
        let mut w = Worker::new(&mut svc, &cx).unwrap();
        let (a, b) = Io::pair().unwrap();
        w.add_client(b, w.service().actions()).unwrap();

        a.write_all(&[0, 0, 0, 50, b'8', b':']).unwrap();
        w.poll_once(Some(Duration::from_millis(50))).unwrap();
        assert_eq!(w.nclients(), 1);
        a.set_nonblock(false).unwrap();
        unsafe { libc::shutdown(a.fd(), libc::SHUT_WR) };
        w.poll_once(Some(Duration::from_millis(50))).unwrap();

        let mut resp = Message::new();
        while eds_io::recv_msg(&a, &mut resp).unwrap().is_again() {}
        let status: StatusResp<'_> = resp.parse().unwrap();
        assert_eq!(status.errmsg, b"premature connection termination");
    }
}
