//! Entry point for `arq-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **send** or **recv**.
//! All protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, signal handling, argument parsing, file I/O).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::fs::File;

use arq_over_udp::config::{self, Mode, TransferConfig, DEFAULT_PORT, DEFAULT_WINDOW};
use arq_over_udp::{shutdown_channel, RecvConnection, SendConnection, Shutdown, Socket};

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a file to a waiting receiver.
    Send {
        /// File to read.
        #[arg(short, long)]
        file: PathBuf,
        /// Receiver address (e.g. 127.0.0.1:12987).
        #[arg(short, long)]
        to: String,
        #[command(flatten)]
        opts: TransferOpts,
    },
    /// Wait for one incoming file and write it out.
    Recv {
        /// File to write.
        #[arg(short, long)]
        file: PathBuf,
        #[command(flatten)]
        opts: TransferOpts,
    },
}

#[derive(Args)]
struct TransferOpts {
    /// Local UDP port.
    #[arg(short, long, default_value_t = i64::from(DEFAULT_PORT), allow_negative_numbers = true)]
    port: i64,
    /// stop-and-wait or sliding-window.
    #[arg(short, long, default_value = "sliding-window")]
    mode: Mode,
    /// Window size in segments (sliding-window only).
    #[arg(short, long, default_value_t = DEFAULT_WINDOW)]
    window: u32,
    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
}

impl TransferOpts {
    fn config(&self) -> Result<TransferConfig> {
        let config = TransferConfig::new(self.mode)
            .with_window_size(self.window)?
            .with_timeout(Duration::from_millis(self.timeout_ms))?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let shutdown = ctrl_c_shutdown();

    match cli.command {
        Command::Send { file, to, opts } => {
            let config = opts.config()?;
            let port = config::validate_port(opts.port)?;
            let destination = config::resolve_remote(&to)?;
            let input = File::open(&file)
                .await
                .with_context(|| format!("opening {}", file.display()))?;
            let socket = Socket::open(port)
                .await
                .with_context(|| format!("opening UDP port {port}"))?;

            log::info!("Sending {} to {destination}", file.display());
            let report = SendConnection::new(socket, config)
                .with_shutdown(shutdown)
                .send(input, destination)
                .await
                .context("send failed")?;
            println!(
                "sent {} bytes in {} segments ({} retransmissions)",
                report.bytes_sent, report.segments, report.retransmissions
            );
        }
        Command::Recv { file, opts } => {
            let config = opts.config()?;
            let port = config::validate_port(opts.port)?;
            let output = File::create(&file)
                .await
                .with_context(|| format!("creating {}", file.display()))?;
            let socket = Socket::open(port)
                .await
                .with_context(|| format!("opening UDP port {port}"))?;

            log::info!("Receiving into {} on port {port}", file.display());
            let report = RecvConnection::new(socket, config)
                .with_shutdown(shutdown)
                .receive(output)
                .await
                .context("receive failed")?;
            match report.peer {
                Some(peer) => println!(
                    "received {} bytes in {} segments from {peer}",
                    report.bytes_written, report.segments_delivered
                ),
                None => println!("received {} bytes", report.bytes_written),
            }
        }
    }
    Ok(())
}

/// Fire the returned [`Shutdown`] on Ctrl-C.
fn ctrl_c_shutdown() -> Shutdown {
    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-C received, stopping");
            trigger.trigger();
        }
    });
    shutdown
}
