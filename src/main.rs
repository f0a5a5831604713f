use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use crossbeam::channel;
use std::io::Write as _;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info};

mod analysis;
mod packet;
mod receiver;
mod sender;
mod stats;

use packet::PacketRecord;
use receiver::ReceiverSession;
use stats::{StatsAggregator, StatsSnapshot};

#[derive(Parser, Debug)]
#[command(name = "udp-transceiver")]
#[command(about = "Bidirectional UDP transceiver with payload analysis")]
struct Args {
    /// Target IP address or hostname
    #[arg(short = 'i', long, default_value = "127.0.0.1")]
    ip: String,

    /// Target port
    #[arg(short = 'p', long, default_value = "8888")]
    port: u16,

    /// Local port for receiving (default: same as target port)
    #[arg(short = 'l', long)]
    local_port: Option<u16>,

    /// Operation mode
    #[arg(short = 'm', long, value_enum, default_value = "both")]
    mode: Mode,

    /// Message to send non-interactively (json:<doc> sends JSON)
    #[arg(long)]
    message: Option<String>,

    /// Print received packet records as JSON lines
    #[arg(long)]
    json: bool,

    /// Verbose logging (default: false)
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Send,
    Receive,
    Both,
}

impl Mode {
    fn receives(self) -> bool {
        matches!(self, Mode::Receive | Mode::Both)
    }

    fn sends(self) -> bool {
        matches!(self, Mode::Send | Mode::Both)
    }
}

/// Handles for a running receiver session: stop flag plus the receive and
/// presentation threads to join on shutdown.
struct ReceiverHandles {
    stop: receiver::StopHandle,
    receive_thread: thread::JoinHandle<()>,
    printer_thread: thread::JoinHandle<()>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .init();

    let target = resolve_target(&args.ip, args.port)?;
    let local_port = args.local_port.unwrap_or(args.port);

    info!("Starting UDP transceiver");
    info!("Target: {}", target);
    info!("Local port: {} ({:?} mode)", local_port, args.mode);

    let stats = Arc::new(StatsAggregator::new());

    let handles = if args.mode.receives() {
        Some(start_receiver(local_port, Arc::clone(&stats), args.json)?)
    } else {
        None
    };

    if args.mode.sends() {
        if let Some(message) = &args.message {
            send_line(target, message);
        } else {
            interactive_loop(target, &stats).await?;
        }
    } else {
        // Receive-only: run until interrupted
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, shutting down");
    }

    if let Some(handles) = handles {
        handles.stop.stop();
        if handles.receive_thread.join().is_err() {
            error!("Receiver thread panicked");
        }
        if handles.printer_thread.join().is_err() {
            error!("Printer thread panicked");
        }
    }

    print_stats(&stats.snapshot());
    Ok(())
}

fn resolve_target(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("invalid target address {host}:{port}"))?
        .next()
        .with_context(|| format!("target {host}:{port} resolved to no addresses"))
}

/// Bind the listener and spawn the receive loop plus the presentation
/// thread that drains the record channel.
fn start_receiver(local_port: u16, stats: Arc<StatsAggregator>, json_output: bool) -> Result<ReceiverHandles> {
    let (tx, rx) = channel::unbounded::<PacketRecord>();
    let session = ReceiverSession::bind(
        IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        local_port,
        stats,
        tx,
    )?;
    let stop = session.stop_handle();

    let receive_thread = thread::spawn(move || {
        if let Err(e) = session.run() {
            error!("Receiver failed: {:#}", e);
        }
    });

    // Channel disconnects when the session drops its sender, ending this loop
    let printer_thread = thread::spawn(move || {
        for record in rx {
            print_record(&record, json_output);
        }
    });

    Ok(ReceiverHandles {
        stop,
        receive_thread,
        printer_thread,
    })
}

/// Console loop: each line is a command (quit/exit, stats, json:<doc>) or a
/// text payload to transmit. Ctrl+C ends the session as well.
async fn interactive_loop(target: SocketAddr, stats: &StatsAggregator) -> Result<()> {
    println!("Interactive mode - type messages to send (or commands):");
    println!("  quit | exit    end the session");
    println!("  stats          show traffic statistics");
    println!("  json:<doc>     validate and send a JSON document");
    println!("  anything else  send as UTF-8 text");
    println!("{}", "─".repeat(80));

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("Enter message: ");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        };
        let Some(line) = line else {
            break; // EOF
        };
        let input = line.trim();

        match input.to_lowercase().as_str() {
            "quit" | "exit" => break,
            "stats" => print_stats(&stats.snapshot()),
            "" => continue,
            _ => send_line(target, input),
        }
    }
    Ok(())
}

/// Send one console line, honoring the json:<doc> prefix convention. Send
/// failures are reported and do not end the session.
fn send_line(target: SocketAddr, input: &str) {
    let result = match input.strip_prefix("json:") {
        Some(document) => sender::send_json(target, document.trim()),
        None => sender::send_text(target, input),
    };
    match result {
        Ok(sent) => println!("Sent {sent} bytes to {target}"),
        Err(e) => eprintln!("Send failed: {e:#}"),
    }
}

fn print_record(record: &PacketRecord, json_output: bool) {
    if json_output {
        match serde_json::to_string(record) {
            Ok(line) => println!("{line}"),
            Err(e) => error!("Failed to serialize record: {}", e),
        }
        return;
    }

    println!(
        "\nPacket #{} received at {}",
        record.sequence,
        record.received_at.format("%Y-%m-%dT%H:%M:%S%.6f")
    );
    println!("  From: {}", record.sender);
    println!(
        "  Size: {} bytes ({} cumulative)",
        record.size_bytes, record.cumulative_bytes
    );

    let formats: Vec<_> = record
        .content
        .possible_formats
        .iter()
        .map(|f| format!("{f:?}").to_lowercase())
        .collect();
    println!(
        "  Possible formats: {}",
        if formats.is_empty() {
            "unknown".to_string()
        } else {
            formats.join(", ")
        }
    );

    if let Some(text) = record.content.utf8_text() {
        println!("  Text content: {text:?}");
    }
    if let Some(json) = &record.content.json_content {
        println!("  JSON data: {json}");
    }
    if let (Some(be), Some(le)) = (record.content.as_u32_be, record.content.as_u32_le) {
        println!("  As u32: {be} (BE) / {le} (LE)");
    }
    if record.size_bytes <= 32 {
        println!("  Hex: {}", record.raw_hex);
    }
    println!("{}", "─".repeat(80));
}

fn print_stats(snapshot: &StatsSnapshot) {
    println!("\n=== Traffic Statistics ===");
    println!("  Runtime: {:.2} seconds", snapshot.runtime_seconds);
    println!("  Total packets: {}", snapshot.total_packets);
    println!("  Total bytes: {}", snapshot.total_bytes);
    println!("  Average packet size: {:.2} bytes", snapshot.average_packet_size);
    println!("  Packets per second: {:.2}", snapshot.packets_per_second);
    if let Some(last) = snapshot.last_packet_at {
        println!("  Last packet: {}", last.format("%Y-%m-%dT%H:%M:%S%.6f"));
    }
}
