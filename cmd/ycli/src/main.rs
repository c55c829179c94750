//! ycli - talk to the EDS services from the shell
//!
//! Usage:
//!     ycli sweep 10.0.0.0/24 --arp
//!     ycli pcap eth0 'tcp port 80' -o dump.pcap
//!     ycli connect 192.0.2.10 443
//!     ycli resolve example.org example.net
//!     ycli echo hello
//!
//! Each subcommand connects to the service's well-known socket under
//! `EDS_RUNDIR` unless `--socket` names another one.

use std::fs::File;
use std::io::Write;
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use eds_core::{Logger, Message};
use eds_io::Io;
use ycl::{paths, ConnectorReq, YclCli, YclCtx};

#[derive(Parser, Debug)]
#[command(name = "ycli", about = "EDS service client", version)]
struct Args {
    /// Service socket (defaults to the service's socket under EDS_RUNDIR)
    #[arg(short, long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Ask the sweeper to probe an address range
    Sweep {
        addrs: String,
        /// Use ARP on directly attached networks
        #[arg(long)]
        arp: bool,
    },
    /// Start a capture written to a file
    Pcap {
        iface: String,
        #[arg(default_value = "")]
        filter: String,
        /// Capture output
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Have the connector open a TCP connection
    Connect {
        addr: String,
        port: u16,
        /// Local address to bind before connecting
        #[arg(long)]
        bind: Option<String>,
        /// Retries on transient address errors
        #[arg(long, default_value_t = 0)]
        retries: i64,
        /// Seconds to wait for the connect to complete
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
    /// Resolve host names; results go to stdout
    Resolve {
        #[arg(required = true)]
        hosts: Vec<String>,
        #[arg(long)]
        compress: bool,
    },
    /// Send a message to the echo service and print the reply
    Echo { text: String },
}

impl Cmd {
    fn socket_name(&self) -> &'static str {
        match self {
            Cmd::Sweep { .. } | Cmd::Pcap { .. } => paths::SWEEPER,
            Cmd::Connect { .. } => paths::CONNECTOR,
            Cmd::Resolve { .. } => paths::RESOLVER,
            Cmd::Echo { .. } => paths::ECHO,
        }
    }
}

fn open(args: &Args) -> Result<YclCli> {
    let path = args.socket.clone().unwrap_or_else(|| paths::socket(args.cmd.socket_name()));
    YclCli::open(&path).with_context(|| format!("connecting to {}", path.display()))
}

/// Wait for a non-blocking connect to finish and report its outcome.
fn finish_connect(io: &Io, timeout: Duration) -> Result<()> {
    if !io.wait(libc::POLLOUT, Some(timeout))? {
        bail!("connect timed out");
    }
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            io.fd(),
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if ret < 0 {
        return Err(std::io::Error::last_os_error()).context("getsockopt");
    }
    if err != 0 {
        return Err(std::io::Error::from_raw_os_error(err)).context("connect");
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let mut cli = open(&args)?;

    match &args.cmd {
        Cmd::Sweep { addrs, arp } => match cli.sweep(addrs.as_bytes(), *arp) {
            Ok(msg) => println!("{}", msg),
            Err(_) => bail!("sweep: {}", cli.strerror()),
        },
        Cmd::Pcap { iface, filter, output } => {
            let dump = File::create(output).with_context(|| format!("creating {}", output.display()))?;
            match cli.pcap(iface.as_bytes(), filter.as_bytes(), dump.as_fd()) {
                Ok(msg) => println!("{}", msg),
                Err(_) => bail!("pcap: {}", cli.strerror()),
            }
        }
        Cmd::Connect {
            addr,
            port,
            bind,
            retries,
            timeout,
        } => {
            let port = port.to_string();
            let req = ConnectorReq {
                dstaddr: addr.as_bytes(),
                dstport: port.as_bytes(),
                bindaddr: bind.as_deref().unwrap_or("").as_bytes(),
                nretries: *retries,
                ..Default::default()
            };
            let fd = match cli.connect(&req) {
                Ok(fd) => fd,
                Err(_) => bail!("connect: {}", cli.strerror()),
            };
            let io = Io::from_owned(fd);
            finish_connect(&io, Duration::from_secs(*timeout))?;
            println!("connected to {}:{} (fd {})", addr, port, io.fd());
        }
        Cmd::Resolve { hosts, compress } => {
            let hosts = hosts.join(" ");
            let stdout = std::io::stdout();
            stdout.lock().flush()?;
            if cli.resolve(stdout.as_fd(), hosts.as_bytes(), *compress).is_err() {
                bail!("resolve: {}", cli.strerror());
            }
        }
        Cmd::Echo { text } => {
            let ctx: &YclCtx = cli.ctx();
            let mut msg = Message::new();
            msg.create_raw(text.as_bytes())?;
            ctx.send_msg(&mut msg).context("echo send")?;
            ctx.recv_msg(&mut msg).context("echo recv")?;
            println!("{}", String::from_utf8_lossy(msg.payload()));
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let logger = Logger::stderr("ycli");
    logger.scope(|| run(args))
}
