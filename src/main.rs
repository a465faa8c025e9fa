//! MIDI Thru - route a MIDI controller to a synth
//!
//! Selects one input and one output, forwards traffic between them and keeps
//! the routing valid across hot-plug.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use midi_thru::config::AppConfig;
use midi_thru::directory::{self, MidirDirectory, PortDirectory, TopologyEvent, VirtualDirectory};
use midi_thru::engine::RoutingEngine;
use midi_thru::paths::AppPaths;
use midi_thru::preferences::SledPreferences;

/// MIDI Thru - forward one MIDI input to one MIDI output
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Use an in-memory directory with demo ports instead of system MIDI
    #[arg(long = "virtual")]
    virtual_ports: bool,

    /// Input port id to select after start
    #[arg(long)]
    input: Option<String>,

    /// Output port id to select after start
    #[arg(long)]
    output: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let paths = AppPaths::detect();
    paths.ensure_directories()?;

    let _log_guard = init_logging(&args.log_level, &paths)?;

    let config_path = args.config.clone().unwrap_or_else(|| paths.config.clone());
    let config = AppConfig::load(&config_path).await?;
    info!("Configuration: {}", config_path.display());

    if args.list_ports {
        let inputs = directory::midir_backend::list_inputs(&config.midi.client_name)?;
        let outputs = directory::midir_backend::list_outputs(&config.midi.client_name)?;
        cli::print_ports(&inputs, &outputs, None);
        return Ok(());
    }

    let directory: Arc<dyn PortDirectory> = if args.virtual_ports {
        info!("Using virtual MIDI ports");
        Arc::new(VirtualDirectory::with_ports(
            &[("virtual-in", "Virtual Controller")],
            &[("virtual-out", "Virtual Synth")],
        ))
    } else {
        Arc::new(MidirDirectory::new(
            config.midi.client_name.clone(),
            config.hotplug_poll_interval(),
        ))
    };

    let db_path = config
        .state
        .db_path
        .clone()
        .unwrap_or_else(|| paths.prefs_db_path());
    let preferences = Arc::new(SledPreferences::open(&db_path)?);

    let engine = RoutingEngine::new(directory, preferences, config.engine_options());
    engine.set_feedback_hook(Arc::new(|channel: u8| debug!("Activity on channel {}", channel)));
    engine.set_topology_hook(Arc::new(|event: &TopologyEvent| match event {
        TopologyEvent::Connected(port) => {
            info!("Connected {} '{}'", port.direction, port.display_name())
        },
        TopologyEvent::Disconnected(port) => {
            info!("Disconnected {} '{}'", port.direction, port.display_name())
        },
    }));

    tokio::time::sleep(config.startup_delay()).await;

    if !engine.start().await {
        warn!("MIDI unavailable, use 'rescan' to retry");
    }

    if args.input.is_some() || args.output.is_some() {
        let routing = engine.routing();
        engine.set_routing(
            args.input.as_deref().or(routing.input_id.as_deref()),
            args.output.as_deref().or(routing.output_id.as_deref()),
        );
    }

    run_repl(&engine).await?;

    engine.shutdown();
    info!("MIDI Thru shutdown complete");
    Ok(())
}

async fn run_repl(engine: &RoutingEngine) -> Result<()> {
    let mut lines = cli::spawn_reader("thru> ")?;
    println!("Type 'help' for commands");

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                match cli::parse(&line) {
                    Ok(Some(command)) => {
                        if !cli::execute(engine, command).await {
                            break;
                        }
                    },
                    Ok(None) => {},
                    Err(e) => println!("  {:#}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}

fn init_logging(
    level: &str,
    paths: &AppPaths,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level: {}", level))?;

    let file_appender = tracing_appender::rolling::daily(&paths.logs_dir, "midi-thru.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}
