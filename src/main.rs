use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use netsentry::analysis::{CredentialGate, PortProfileAnalyzer};
use netsentry::config::{DEFAULT_CAPACITY, SessionConfig};
use netsentry::export::{self, ExportFormat};
use netsentry::{CaptureSession, HexDump, SessionEvent};

#[derive(Parser, Debug)]
#[command(name = "netsentry")]
#[command(about = "Simulated network capture feed with a hex/ASCII/binary packet inspector")]
#[command(version = "1.0.0")]
struct Args {
    /// Verbose logging (default: false)
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a live capture session and print each packet as it arrives
    Capture {
        /// Time to capture in seconds (0 = until Ctrl+C)
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Milliseconds between generated packets
        #[arg(short, long, default_value = "300")]
        interval_ms: u64,

        /// Packets kept in the capture window
        #[arg(short, long, default_value_t = DEFAULT_CAPACITY)]
        capacity: usize,

        /// Seed for reproducible traffic
        #[arg(short, long)]
        seed: Option<u64>,

        /// Export the capture window to this file when done
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Export to a timestamped file in the current directory
        #[arg(long = "export", conflicts_with = "output")]
        export_default: bool,

        /// Export format
        #[arg(short, long, value_enum, default_value = "json")]
        format: ExportFormat,
    },
    /// Generate packets and dump one of them
    Inspect {
        /// Number of packets to generate
        #[arg(short = 'n', long, default_value = "20")]
        count: u64,

        /// Packet id to inspect (default: newest)
        #[arg(short, long)]
        id: Option<u64>,

        /// Packets kept in the capture window
        #[arg(short, long, default_value_t = DEFAULT_CAPACITY)]
        capacity: usize,

        /// Seed for reproducible traffic
        #[arg(short, long)]
        seed: Option<u64>,

        /// Also print each byte in binary
        #[arg(short, long, default_value = "false")]
        binary: bool,
    },
    /// Generate packets and describe one of them
    Analyze {
        /// Number of packets to generate
        #[arg(short = 'n', long, default_value = "20")]
        count: u64,

        /// Packet id to analyze (default: newest)
        #[arg(short, long)]
        id: Option<u64>,

        /// Seed for reproducible traffic
        #[arg(short, long)]
        seed: Option<u64>,

        /// Refuse to analyze unless this environment variable holds a key
        #[arg(long)]
        require_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match args.command {
        Commands::Capture {
            duration,
            interval_ms,
            capacity,
            seed,
            output,
            export_default,
            format,
        } => {
            let config = SessionConfig {
                capacity,
                tick_interval: Duration::from_millis(interval_ms),
                seed,
                ..Default::default()
            };
            let output = match (output, export_default) {
                (Some(path), _) => Some(path),
                (None, true) => Some(PathBuf::from(export::default_file_name(
                    chrono::Utc::now(),
                    format,
                ))),
                (None, false) => None,
            };
            run_capture(config, duration, output, format).await?;
        }
        Commands::Inspect {
            count,
            id,
            capacity,
            seed,
            binary,
        } => {
            let config = SessionConfig {
                capacity,
                seed,
                ..Default::default()
            };
            let session = prefilled_session(config, count)?;
            inspect(&session, id, binary)?;
        }
        Commands::Analyze {
            count,
            id,
            seed,
            require_key,
        } => {
            let config = SessionConfig {
                seed,
                ..Default::default()
            };
            let session = prefilled_session(config, count)?;
            analyze(&session, id, require_key).await?;
        }
    }

    Ok(())
}

async fn run_capture(
    config: SessionConfig,
    duration: u64,
    output: Option<PathBuf>,
    format: ExportFormat,
) -> Result<()> {
    info!("Starting NetSentry simulated capture");
    let session = CaptureSession::new(config).context("Invalid capture settings")?;
    let events = session.subscribe();
    let start_time = Instant::now();

    session.start();

    let deadline = async {
        if duration == 0 {
            std::future::pending::<()>().await
        } else {
            tokio::time::sleep(Duration::from_secs(duration)).await
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut poll = tokio::time::interval(session.config().tick_interval / 2);
    let mut last_report = Instant::now();

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Capture duration reached");
                break;
            }
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            _ = poll.tick() => {
                for event in events.try_iter() {
                    match event {
                        SessionEvent::PacketCaptured(id) => {
                            if let Some(packet) = session.packet(id) {
                                info!("{}", packet.summary());
                            }
                        }
                        other => debug!("Session event: {:?}", other),
                    }
                }

                if last_report.elapsed() >= Duration::from_secs(5) {
                    let stats = session.stats();
                    info!(
                        "Buffer: {}/{} packets ({}%) - Evicted: {}",
                        stats.len, stats.capacity, stats.utilization_percent, stats.total_evicted
                    );
                    last_report = Instant::now();
                }
            }
        }
    }

    session.stop();

    let stats = session.stats();
    info!("======= CAPTURE SUMMARY =======");
    info!("Total time: {:.2} seconds", start_time.elapsed().as_secs_f64());
    info!("Packets generated: {}", stats.total_appended);
    info!("Packets held: {}/{} ({}%)", stats.len, stats.capacity, stats.utilization_percent);
    info!("Packets evicted: {}", stats.total_evicted);
    info!("===============================");

    if let Some(path) = output {
        export::export_to_file(&session.snapshot(), &path, format)
            .with_context(|| format!("Failed to export capture to {}", path.display()))?;
    }

    Ok(())
}

fn prefilled_session(config: SessionConfig, count: u64) -> Result<CaptureSession> {
    let session = CaptureSession::new(config).context("Invalid capture settings")?;
    for _ in 0..count {
        session.tick();
    }
    debug!("Generated {} packets", count);
    Ok(session)
}

fn select_packet(session: &CaptureSession, id: Option<u64>) -> Result<()> {
    let Some(id) = id.or_else(|| session.snapshot().last().map(|p| p.id)) else {
        bail!("No packets captured");
    };
    if !session.select(id) {
        bail!("Packet {} is not in the capture window (no selection)", id);
    }
    Ok(())
}

fn inspect(session: &CaptureSession, id: Option<u64>, binary: bool) -> Result<()> {
    select_packet(session, id)?;
    let view = session.view();
    let Some(packet) = view.selected else {
        bail!("Selection was lost");
    };

    println!("Packet #{}", packet.id);
    println!("  Protocol:    {}", packet.protocol);
    println!("  Source:      {}:{}", packet.source_ip, packet.source_port);
    println!("  Destination: {}:{}", packet.dest_ip, packet.dest_port);
    println!("  Length:      {} bytes ({} captured)", packet.length, packet.payload.len());
    println!();
    print!("{}", HexDump::new(&packet.payload).with_binary(binary));
    Ok(())
}

async fn analyze(
    session: &CaptureSession,
    id: Option<u64>,
    require_key: Option<String>,
) -> Result<()> {
    select_packet(session, id)?;

    let handle = match require_key {
        Some(var) => {
            let gate = CredentialGate::with_var(PortProfileAnalyzer, var);
            session.request_analysis(Arc::new(gate))
        }
        None => session.request_analysis(Arc::new(PortProfileAnalyzer)),
    };
    let Some(handle) = handle else {
        bail!("No packet selected");
    };
    if let Err(e) = handle.await {
        warn!("Analysis task failed: {}", e);
    }

    let view = session.view();
    if let (Some(packet), Some(text)) = (view.selected.as_ref(), view.analysis.text()) {
        println!("{}", packet.summary());
        println!("{}", text);
    }
    Ok(())
}
