//! edsd - EDS service daemon
//!
//! Hosts the sweeper, connector and echo services, each on its own UNIX
//! socket under the base path. By default every service gets a supervised
//! pool of worker processes; `--single` runs one service in the foreground
//! without forking.
//!
//! Usage:
//!     cargo build --release -p edsd
//!     ./target/release/edsd [--basepath DIR] [--nprocs N]
//!     ./target/release/edsd --single echo
//!
//! Environment: `EDS_RUNDIR` picks the default base path, `EDS_LOG` the
//! log filter, and the `EDS_*` variables documented on `ServeConfig` the
//! framework settings.
//!
//! Test with:
//!     ./target/release/ycli echo hello

mod connector;
mod echo;
mod sweeper;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use eds::{Serve, ServeConfig, ServeContext, Service};
use eds_core::Logger;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "edsd", about = "EDS service daemon", version)]
struct Args {
    /// Directory holding the service sockets (must be absolute)
    #[arg(short, long, default_value_os_t = ycl::paths::rundir())]
    basepath: PathBuf,

    /// Run only the named service, in this process
    #[arg(short, long, value_name = "SERVICE")]
    single: Option<String>,

    /// Worker processes per service (overrides EDS_NPROCS)
    #[arg(short, long)]
    nprocs: Option<usize>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn on_svc_error(svc: &str, msg: &str) {
    error!(svc, "{}", msg);
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServeConfig::from_env();
    if let Some(n) = args.nprocs {
        config = config.nprocs(n);
    }
    if args.print_config {
        config.print();
        return Ok(());
    }

    if !args.basepath.is_absolute() {
        bail!("basepath must be absolute: {}", args.basepath.display());
    }
    std::fs::create_dir_all(&args.basepath)
        .with_context(|| format!("creating {}", args.basepath.display()))?;

    let cx = ServeContext::with_config(Logger::stderr("edsd"), config).context("initializing context")?;

    let mut sweeper = Service::<sweeper::SweeperCli>::new("sweeper", args.basepath.join(ycl::paths::SWEEPER))
        .on_readable(sweeper::on_readable)
        .on_done(sweeper::on_done)
        .on_svc_error(on_svc_error);
    let mut connector =
        Service::<connector::ConnectorCli>::new("connector", args.basepath.join(ycl::paths::CONNECTOR))
            .on_readable(connector::on_readable)
            .on_done(connector::on_done)
            .on_finalize(connector::on_finalize)
            .on_svc_error(on_svc_error);
    let mut echo = Service::<echo::EchoCli>::new("echo", args.basepath.join(ycl::paths::ECHO))
        .on_readable(echo::on_readable)
        .on_svc_error(on_svc_error);

    let mut services: [&mut dyn Serve; 3] = [&mut sweeper, &mut connector, &mut echo];

    match args.single.as_deref() {
        Some(name) => eds::serve_single_by_name(&mut services, name, &cx)
            .with_context(|| format!("serving {}", name))?,
        None => eds::serve(&mut services, &cx).context("serving")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["edsd", "--basepath", "/tmp/eds", "--single", "echo", "-n", "3"]).unwrap();
        assert_eq!(args.basepath, PathBuf::from("/tmp/eds"));
        assert_eq!(args.single.as_deref(), Some("echo"));
        assert_eq!(args.nprocs, Some(3));
        assert!(!args.print_config);
    }

    #[test]
    fn test_args_reject_bad_nprocs() {
        assert!(Args::try_parse_from(["edsd", "--nprocs", "many"]).is_err());
    }
}
