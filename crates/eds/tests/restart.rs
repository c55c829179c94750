//! A worker that exits is reported and replaced after its backoff delay.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use eds::{Client, ServeConfig, ServeContext, Service, SvcCtx, Transition};
use eds_core::{Logger, Message};
use eds_io::{Io, Progress};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

static REPORTS: Mutex<Vec<String>> = Mutex::new(Vec::new());

fn record(_svc: &str, msg: &str) {
    REPORTS.lock().unwrap().push(msg.to_string());
}

#[derive(Debug, Default)]
struct Cli {
    msg: Message,
}

fn on_request(cli: &mut Client<Cli>, _ctx: &mut SvcCtx<'_, ()>) {
    match cli.recv_msg(|u| &mut u.msg) {
        Ok(Progress::Again) => {}
        Ok(Progress::Done(())) if cli.udata.msg.payload() == b"die" => std::process::exit(3),
        Ok(Progress::Done(())) => {
            let _ = cli.send_msg(|u| &mut u.msg, Transition::Done);
        }
        Err(_) => cli.abort(),
    }
}

fn request(path: &Path, payload: &[u8]) -> Option<Vec<u8>> {
    let io = Io::connect_unix(path).ok()?;
    let mut req = Message::new();
    req.create_raw(payload).unwrap();
    io.write_all(req.frame()).ok()?;
    let mut resp = Message::new();
    loop {
        match eds_io::recv_msg(&io, &mut resp) {
            Ok(Progress::Done(())) => return Some(resp.payload().to_vec()),
            Ok(Progress::Again) => continue,
            Err(_) => return None,
        }
    }
}

fn request_until_served(path: &Path, payload: &[u8]) -> Vec<u8> {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(5) {
        if let Some(resp) = request(path, payload) {
            return resp;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("service never answered");
}

#[test]
fn test_exited_worker_is_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("fragile.sock");

    let server_path = path.clone();
    let server = thread::spawn(move || {
        let config = ServeConfig::new()
            .nprocs(1)
            .restart_backoff(Duration::from_millis(50))
            .shutdown_grace(Duration::from_millis(500));
        let cx = ServeContext::with_config(Logger::sink(), config).unwrap();
        let mut svc = Service::<Cli>::new("fragile", server_path)
            .on_readable(on_request)
            .on_svc_error(record);
        eds::serve(&mut [&mut svc], &cx)
    });

    assert_eq!(request_until_served(&path, b"ping"), b"ping");
    assert_eq!(request(&path, b"die"), None);
    assert_eq!(request_until_served(&path, b"again"), b"again");

    kill(Pid::this(), Signal::SIGTERM).unwrap();
    server.join().unwrap().unwrap();

    let reports = REPORTS.lock().unwrap();
    assert!(
        reports.iter().any(|r| r.starts_with("child:0 PID:") && r.ends_with("exited (status: 3)")),
        "{:?}",
        *reports
    );
}
