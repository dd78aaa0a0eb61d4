//! classmeshd: classroom mesh node.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use classmesh_core::config::MeshConfig;
use classmesh_core::Role;
use classmesh_services::{
    format_size, EventSink, MeshNode, Progress, SendProgress, UNKNOWN_NAME,
};

const DEFAULT_WAIT_SECS: u64 = 3;

enum Command {
    Run,
    Peers,
    Send(PathBuf),
    Message(String),
}

fn print_usage() {
    println!("Usage: classmeshd [options] [command]");
    println!();
    println!("Commands:");
    println!("  run              Join the mesh and stay until Ctrl-C (default)");
    println!("  peers            Discover peers, list them, and exit");
    println!("  send <path>      Discover peers, send a file to them, and exit");
    println!("  message <text>   Discover peers, message all of them, and exit");
    println!();
    println!("Options:");
    println!("  --name <name>    Display name (overrides config)");
    println!("  --role <role>    teacher or student (overrides config)");
    println!(
        "  --wait <secs>    Discovery window before one-shot commands (default: {})",
        DEFAULT_WAIT_SECS
    );
}

/// Event handlers that print what happens on the mesh.
fn console_events() -> EventSink {
    let events = EventSink::new();
    events.on_peer_discovered(|host| println!("peer joined: {host}"));
    events.on_message_received(|m| {
        println!("[{} @ {}] {}", m.sender_name, m.sender_host, m.text)
    });
    events.on_file_complete(|f| {
        println!(
            "received {} ({}) from {} -> {}",
            f.file_name,
            format_size(f.size_bytes),
            f.sender_name,
            f.path.display()
        )
    });
    events.on_error(|e| eprintln!("error: {e}"));
    events
}

fn load_config() -> MeshConfig {
    if let Err(e) = MeshConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    MeshConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeshConfig::defaults_with_env()
    })
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn cmd_run(node: MeshNode) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutdown signal received");
    node.shutdown().await;
    Ok(())
}

async fn cmd_peers(node: MeshNode, wait: Duration) -> Result<()> {
    tokio::time::sleep(wait).await;
    let peers = node.registry().entries();
    if peers.is_empty() {
        println!("No peers found.");
    }
    for peer in peers {
        println!(
            "  {:<16} {}",
            peer.address.host.to_string(),
            peer.display_name.as_deref().unwrap_or(UNKNOWN_NAME)
        );
    }
    node.shutdown().await;
    Ok(())
}

async fn cmd_send(node: MeshNode, wait: Duration, path: &Path) -> Result<()> {
    tokio::time::sleep(wait).await;
    let report = |p: &Progress| {
        println!("  {} {}/{} ({:.0}%)", p.label, p.completed, p.total, p.percent)
    };
    let report: SendProgress<'_> = &report;
    let sent = node.send_file(path, Some(report)).await;
    node.shutdown().await;
    anyhow::ensure!(sent, "failed to send {}", path.display());
    println!("Sent {}.", path.display());
    Ok(())
}

async fn cmd_message(node: MeshNode, wait: Duration, text: &str) -> Result<()> {
    tokio::time::sleep(wait).await;
    let delivered = node.broadcast_message(text).await;
    let peers = node.registry().len();
    node.shutdown().await;
    anyhow::ensure!(delivered > 0, "message reached no peers");
    println!("Delivered to {delivered} of {peers} peers.");
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config = load_config();
    let mut wait = Duration::from_secs(DEFAULT_WAIT_SECS);

    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--name" => {
                i += 1;
                config.identity.display_name =
                    args.get(i).context("--name requires a value")?.clone();
            }
            "--role" => {
                i += 1;
                config.identity.role = args
                    .get(i)
                    .context("--role requires a value")?
                    .parse::<Role>()?;
            }
            "--wait" => {
                i += 1;
                let secs: u64 = args
                    .get(i)
                    .context("--wait requires a value")?
                    .parse()
                    .context("--wait must be a number of seconds")?;
                wait = Duration::from_secs(secs);
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    let command = match remaining.as_slice() {
        ["run"] | [] => Command::Run,
        ["peers"] => Command::Peers,
        ["send", path] => Command::Send(PathBuf::from(path)),
        ["message", words @ ..] if !words.is_empty() => Command::Message(words.join(" ")),
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            return Ok(());
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    tracing::info!(
        name = %config.identity.display_name,
        role = %config.identity.role,
        "classmeshd starting"
    );
    let node = MeshNode::start(config, console_events())
        .await
        .context("failed to start mesh node")?;

    match command {
        Command::Run => cmd_run(node).await,
        Command::Peers => cmd_peers(node, wait).await,
        Command::Send(path) => cmd_send(node, wait, &path).await,
        Command::Message(text) => cmd_message(node, wait, &text).await,
    }
}
