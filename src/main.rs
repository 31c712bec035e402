//! cni-dedup - CNI plugin binary
//!
//! Reads the network configuration from stdin and the verb from `CNI_COMMAND`,
//! prints the result (or error object) on stdout and logs to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Attach, as a container runtime would
//! CNI_COMMAND=ADD CNI_CONTAINERID=abc CNI_NETNS=/var/run/netns/abc \
//!   CNI_IFNAME=eth0 CNI_PATH=/opt/cni/bin \
//!   cni-dedup < /etc/cni/net.d/10-dedup.conf
//!
//! # Supported protocol versions
//! echo '{"cniVersion":"1.0.0"}' | CNI_COMMAND=VERSION cni-dedup
//!
//! # Verbose logs to a file
//! CNI_DEDUP_LOG_LEVEL=debug CNI_DEDUP_LOG_FILE=/var/log/cni-dedup.log ...
//! ```

use clap::Parser;
use cni_dedup::cni::{self, Invocation, SUPPORTED_VERSIONS};
use cni_dedup::core::ebtables::Ebtables;
use cni_dedup::core::link::HostLinks;
use cni_dedup::core::resolver::HostAddresses;
use cni_dedup::Plugin;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, warn};

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "cni-dedup")]
#[command(about = "CNI hook: promiscuous bridge + ebtables dedup rules", long_about = None)]
#[command(version = build::CLAP_LONG_VERSION)]
struct Cli {
    #[command(flatten)]
    invocation: Invocation,

    /// ebtables binary
    #[arg(long, env = "CNI_DEDUP_EBTABLES", default_value = "ebtables")]
    ebtables: PathBuf,

    /// iproute2 `ip` binary used to enable promiscuous mode
    #[arg(long, env = "CNI_DEDUP_IP", default_value = "ip")]
    ip: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "CNI_DEDUP_LOG_LEVEL", default_value = "warn")]
    log_level: tracing::Level,

    /// Append logs to this file instead of stderr
    #[arg(long, env = "CNI_DEDUP_LOG_FILE")]
    log_file: Option<PathBuf>,
}

fn init_logging(level: tracing::Level, log_file: Option<&Path>) {
    // stdout belongs to the CNI result
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    if let Some(path) = log_file
        && let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
    {
        builder.with_ansi(false).with_writer(file).init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.log_file.as_deref());

    if cli.invocation.command.is_none() {
        println!(
            "cni-dedup {}\nCNI protocol versions supported: {}",
            build::PKG_VERSION,
            SUPPORTED_VERSIONS.join(", ")
        );
        return ExitCode::SUCCESS;
    }

    if !nix::unistd::getuid().is_root() {
        warn!("Not running as root; link and ebtables changes will likely fail");
    }

    let mut stdin = Vec::new();
    if let Err(e) = std::io::stdin().read_to_end(&mut stdin) {
        return fail(&e.into(), &[]);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return fail(&e.into(), &stdin),
    };

    let plugin = Plugin::new(
        HostLinks::with_ip_program(&cli.ip),
        HostAddresses,
        Ebtables::with_program(&cli.ebtables),
    );

    match runtime.block_on(cni::run(&plugin, &cli.invocation, &stdin)) {
        Ok(Some(result)) => match serde_json::to_string(&result) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => fail(&e.into(), &stdin),
        },
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => fail(&e, &stdin),
    }
}

fn fail(err: &cni_dedup::Error, stdin: &[u8]) -> ExitCode {
    error!("{err}");
    let object = cni::error_object(err, &cni::cni_version_of(stdin));
    println!("{object}");
    ExitCode::FAILURE
}
