//! Echo service: every framed message is written back unchanged.

use eds::{Client, SvcCtx, Transition};
use eds_core::Message;
use eds_io::Progress;
use tracing::debug;

#[derive(Debug, Default)]
pub struct EchoCli {
    msg: Message,
}

pub fn on_readable(cli: &mut Client<EchoCli>, ctx: &mut SvcCtx<'_, ()>) {
    match cli.recv_msg(|u| &mut u.msg) {
        Ok(Progress::Again) => {}
        Ok(Progress::Done(())) => {
            let res = cli.send_msg(|u| &mut u.msg, Transition::Read(on_readable));
            cli.udata.msg.reset();
            if let Err(e) = res {
                debug!(id = cli.id(), "echo: {}", e);
            }
        }
        Err(e) if e.is_peer_closed() => cli.clear_actions(),
        Err(e) => {
            ctx.report(format_args!("echocli{}: {}", cli.id(), e));
            cli.abort();
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

    #[test]
    fn test_echo_two_requests_one_connection() {
        let cx = ServeContext::with_config(Logger::sink(), ServeConfig::new()).unwrap();
        let mut svc = Service::<EchoCli>::new("echo", "/unused.sock").on_readable(on_readable);
        let mut w = Worker::new(&mut svc, &cx).unwrap();
        let (a, b) = Io::pair().unwrap();
        w.add_client(b, w.service().actions()).unwrap();

        let peer = std::thread::spawn(move || {
            let ctx = ycl::YclCtx::from_io(a);
            let mut msg = Message::new();
            for text in [&b"one"[..], b"two"] {
                msg.create_raw(text).unwrap();
                ctx.send_msg(&mut msg).unwrap();
                ctx.recv_msg(&mut msg).unwrap();
                assert_eq!(msg.payload(), text);
            }
        });
        drive(&mut w, &peer);
        peer.join().unwrap();
    }
}
