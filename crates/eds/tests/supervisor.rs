//! Two forked workers share one listener; fifty concurrent peers must each
//! get exactly their own request echoed back.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use eds::{Client, ServeConfig, ServeContext, Service, SvcCtx, Transition};
use eds_core::{Logger, Message};
use eds_io::{Io, IoError, Progress};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

const PEERS: usize = 50;

#[derive(Debug, Default)]
struct EchoCli {
    msg: Message,
}

fn on_request(cli: &mut Client<EchoCli>, ctx: &mut SvcCtx<'_, ()>) {
    match cli.recv_msg(|u| &mut u.msg) {
        Ok(Progress::Again) => {}
        Ok(Progress::Done(())) => {
            let res = cli.send_msg(|u| &mut u.msg, Transition::Read(on_request));
            cli.udata.msg.reset();
            if let Err(e) = res {
                ctx.report(e);
            }
        }
        Err(IoError::PeerClosed) => cli.clear_actions(),
        Err(e) => {
            ctx.report(e);
            cli.abort();
        }
    }
}

fn connect(path: &Path) -> Io {
    let start = Instant::now();
    loop {
        match Io::connect_unix(path) {
            Ok(io) => return io,
            Err(e) if start.elapsed() > Duration::from_secs(5) => panic!("connect: {}", e),
            Err(_) => thread::sleep(Duration::from_millis(10)),
        }
    }
}

fn roundtrip(path: &Path, payload: &[u8]) -> Vec<u8> {
    let io = connect(path);
    let mut req = Message::new();
    req.create_raw(payload).unwrap();
    io.write_all(req.frame()).unwrap();

    let mut resp = Message::new();
    while eds_io::recv_msg(&io, &mut resp).unwrap().is_again() {}
    resp.payload().to_vec()
}

#[test]
fn test_two_workers_serve_concurrent_peers() {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("echo.sock");

    let server_path = path.clone();
    let server = thread::spawn(move || {
        let config = ServeConfig::new().nprocs(2).shutdown_grace(Duration::from_millis(500));
        let cx = ServeContext::with_config(Logger::sink(), config).unwrap();
        let mut echo = Service::<EchoCli>::new("echo", server_path).on_readable(on_request);
        eds::serve(&mut [&mut echo], &cx)
    });

    let peers: Vec<_> = (0..PEERS)
        .map(|i| {
            let path = path.clone();
            thread::spawn(move || {
                let payload = format!("peer-{}", i).into_bytes();
                assert_eq!(roundtrip(&path, &payload), payload);
            })
        })
        .collect();
    for peer in peers {
        peer.join().unwrap();
    }

    kill(Pid::this(), Signal::SIGTERM).unwrap();
    server.join().unwrap().unwrap();
    assert!(!path.exists());
}
