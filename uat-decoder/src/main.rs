//! uat-decoder: 978 MHz UAT receiver.
//!
//! Reads I/Q samples (file or stdin) or pre-demodulated Stratux v3 frames
//! from a serial port, runs the uat-core pipeline, and publishes raw and
//! decoded-JSON message lines to stdout and/or TCP clients.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::exit;
use std::str::FromStr;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info};

use uat_core::convert::SampleFormat;
use uat_core::decode::AdsbRecord;
use uat_core::dispatch::MessageDispatch;
use uat_core::wire;

mod output;
mod source;

use source::ClockMode;

/// Exit code telling supervisors not to restart us: the configuration is
/// wrong and will stay wrong.
const EXIT_NO_RESTART: i32 = 64;

/// A `[host:]port` listen specification.
#[derive(Debug, Clone)]
struct ListenAddr {
    host: String,
    port: u16,
}

impl FromStr for ListenAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<ListenAddr, String> {
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port),
            None => ("0.0.0.0".to_string(), s),
        };
        let port: u16 = port
            .parse()
            .map_err(|_| format!("invalid listen port in {s:?}"))?;
        if host.is_empty() {
            return Err(format!("invalid listen host in {s:?}"));
        }
        Ok(ListenAddr { host, port })
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Parser)]
#[command(
    name = "uat-decoder",
    version,
    about = "978 MHz UAT decoder: SDR samples in, raw/JSON messages out"
)]
struct Cli {
    /// Write raw messages to stdout
    #[arg(long)]
    raw_stdout: bool,

    /// Write decoded JSON to stdout
    #[arg(long)]
    json_stdout: bool,

    /// Sample format: CU8, CS8, CS16H, or CF32H
    #[arg(long)]
    format: Option<SampleFormat>,

    /// Read sample data from stdin
    #[arg(long)]
    stdin: bool,

    /// Read sample data from a file
    #[arg(long)]
    file: Option<PathBuf>,

    /// Throttle file input to realtime
    #[arg(long)]
    file_throttle: bool,

    /// Read messages from a Stratux v3 UAT dongle on the given serial
    /// port (must be configured for 2 Mbps 8N1)
    #[arg(long, value_name = "PATH")]
    stratuxv3: Option<PathBuf>,

    /// Listen for connections on [host:]port and provide raw messages
    #[arg(long, value_name = "[HOST:]PORT")]
    raw_port: Vec<ListenAddr>,

    /// Listen for connections on [host:]port and provide decoded JSON
    #[arg(long, value_name = "[HOST:]PORT")]
    json_port: Vec<ListenAddr>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // help and version included: supervisors must not restart
            let _ = e.print();
            exit(EXIT_NO_RESTART);
        }
    };

    let inputs =
        cli.stdin as usize + cli.file.is_some() as usize + cli.stratuxv3.is_some() as usize;
    if inputs != 1 {
        error!("exactly one of --stdin, --file, or --stratuxv3 must be used");
        exit(EXIT_NO_RESTART);
    }

    if cli.stratuxv3.is_none() && cli.format.is_none() {
        error!("--format is required for sample input");
        exit(EXIT_NO_RESTART);
    }

    // Bind all listen ports up front; a busy port is a configuration error.
    let (raw_tx, _) = broadcast::channel::<String>(1024);
    let (json_tx, _) = broadcast::channel::<String>(1024);

    for addr in &cli.raw_port {
        let listener = bind_or_die(addr, "--raw-port").await;
        tokio::spawn(output::serve_lines(
            listener,
            raw_tx.clone(),
            Some(output::header_line()),
        ));
        info!("--raw-port: listening for connections on {addr}");
    }
    for addr in &cli.json_port {
        let listener = bind_or_die(addr, "--json-port").await;
        tokio::spawn(output::serve_lines(listener, json_tx.clone(), None));
        info!("--json-port: listening for connections on {addr}");
    }

    let pipeline = tokio::task::spawn_blocking(move || run_pipeline(cli, raw_tx, json_tx));

    tokio::select! {
        result = pipeline => match result.expect("pipeline panicked") {
            Ok(()) => {
                info!("message source reports EOF; ran out of things to do, exiting");
                exit(0);
            }
            Err(e) => {
                error!("message source reports error: {e:#}");
                exit(1);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("caught signal, exiting");
            exit(1);
        }
    }
}

async fn bind_or_die(addr: &ListenAddr, option: &str) -> tokio::net::TcpListener {
    match tokio::net::TcpListener::bind((addr.host.as_str(), addr.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("{option}: could not listen on {addr}: {e}");
            exit(EXIT_NO_RESTART);
        }
    }
}

/// The single-threaded receive chain: source -> dispatch -> outputs.
fn run_pipeline(
    cli: Cli,
    raw_tx: broadcast::Sender<String>,
    json_tx: broadcast::Sender<String>,
) -> anyhow::Result<()> {
    use std::io::Write;

    let dispatch = MessageDispatch::new();

    if cli.raw_stdout {
        dispatch.add_client(|frames| {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for frame in frames {
                let _ = writeln!(out, "{}", wire::format_frame(frame));
            }
            let _ = out.flush();
        });
    }

    if cli.json_stdout {
        dispatch.add_client(|frames| {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for frame in frames.iter().filter(|f| f.is_downlink()) {
                let _ = writeln!(out, "{}", AdsbRecord::decode(frame).to_json());
            }
            let _ = out.flush();
        });
    }

    if !cli.raw_port.is_empty() {
        dispatch.add_client(move |frames| {
            for frame in frames {
                // send fails only when no client is connected
                let _ = raw_tx.send(format!("{}\n", wire::format_frame(frame)));
            }
        });
    }

    if !cli.json_port.is_empty() {
        dispatch.add_client(move |frames| {
            for frame in frames.iter().filter(|f| f.is_downlink()) {
                let _ = json_tx.send(format!("{}\n", AdsbRecord::decode(frame).to_json()));
            }
        });
    }

    let sink = |frames: Vec<uat_core::types::RawFrame>| dispatch.dispatch(&frames);

    if let Some(path) = &cli.stratuxv3 {
        info!("reading Stratux v3 messages from {}", path.display());
        let port = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        return source::run_stratux_source(port, sink).context("stratux source failed");
    }

    let format = cli.format.expect("format checked at startup");
    if let Some(path) = &cli.file {
        info!("reading {format:?} samples from {}", path.display());
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        source::run_sample_source(file, format, ClockMode::Synthetic, cli.file_throttle, sink)
            .context("sample source failed")
    } else {
        info!("reading {format:?} samples from stdin");
        source::run_sample_source(io::stdin(), format, ClockMode::Wall, false, sink)
            .context("sample source failed")
    }
}
