//! pipetbot - Main entry point
//!
//! Builds a deck from configuration and runs or checks protocol files on the
//! configured liquid handler backend.

mod config;
mod protocol;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use pipetbot_core::ResourceKind;
use pipetbot_handler::{BackendRegistry, LiquidHandler, LiquidHandlerBackend};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "pipetbot")]
#[command(about = "Liquid handling protocol runner")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "pipetbot.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Run a protocol on the configured backend
    Run { protocol: PathBuf },
    /// Resolve every step of a protocol without running it
    Check { protocol: PathBuf },
    /// Write an example configuration file
    WriteDefaultConfig { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("pipetbot v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        CliCommand::WriteDefaultConfig { path } => {
            config::save_default_config(&path)?;
            println!("Wrote example configuration to {}", path.display());
        }
        CliCommand::Check { protocol } => {
            let config = config::load_config(&args.config)?;
            let deck = config.build_deck()?;
            let protocol = protocol::load_protocol(&protocol)?;
            let actions = protocol::check(&protocol, &deck)?;
            println!("{} steps resolved", actions.len());
        }
        CliCommand::Run { protocol } => {
            let config = config::load_config(&args.config)?;
            let deck = config.build_deck()?;
            let protocol = protocol::load_protocol(&protocol)?;

            let registry = BackendRegistry::with_defaults();
            let backend = registry
                .deserialize(&config.backend)
                .with_context(|| format!("Cannot build backend {}", config.backend.backend_type))?;
            info!(backend = %config.backend.backend_type, "Backend created");

            let mut lh = LiquidHandler::with_config(backend, deck, config.handler.clone());
            lh.setup().await?;

            let started_at = Utc::now();
            let steps = protocol::run(&protocol, &mut lh).await?;
            print_summary(&lh, steps, started_at);
        }
    }

    Ok(())
}

fn print_summary<B: LiquidHandlerBackend>(lh: &LiquidHandler<B>, steps: usize, started_at: DateTime<Utc>) {
    let finished_at = Utc::now();
    println!(
        "Ran {} steps on {} in {} ms (started {})",
        steps,
        lh.backend().serialize().backend_type,
        (finished_at - started_at).num_milliseconds(),
        started_at.to_rfc3339()
    );

    let tree = lh.deck().tree();
    for (slot, labware) in lh.deck().labware() {
        let filled: Vec<(String, f64)> = tree
            .children(labware)
            .iter()
            .filter_map(|id| match &tree.get(*id)?.kind {
                ResourceKind::Well(tracker) if tracker.volume() > 0.0 => Some((tree.name_of(*id), tracker.volume())),
                _ => None,
            })
            .collect();
        if filled.is_empty() {
            continue;
        }
        println!("Slot {} ({}):", slot, tree.name_of(labware));
        for (name, volume) in filled {
            println!("  - {}: {:.2} uL", name, volume);
        }
    }
}
