//! carwatch - vehicle telemetry poller
//!
//! Polls the vehicle API on an adaptive schedule and fans every snapshot out
//! to a SQLite store, an optional MQTT broker and a stall watchdog.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/carwatch/carwatch.db (~/.local/share/carwatch/carwatch.db)
//! - Logs: $XDG_STATE_HOME/carwatch/carwatch.log (~/.local/state/carwatch/carwatch.log)
//! - Config: $XDG_CONFIG_HOME/carwatch/config.toml (~/.config/carwatch/config.toml)

mod signals;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use carwatch_core::sinks::Sink;
use carwatch_core::{
    Broadcaster, Config, Database, Error, Exit, FileCredentialProvider, Gatherer,
    HttpTelemetrySource, MqttBroker, MqttSource, PersistSink, PublishOptions, RepublishSink,
    Retrying, Schedule, Supervisor, WatchdogSink,
};
use clap::{ArgAction, Parser, Subcommand};

/// The watchdog saw no snapshot for a whole window
const EXIT_STALLED: u8 = 3;
/// Any other task failure
const EXIT_FATAL: u8 = 1;

#[derive(Parser)]
#[command(name = "carwatch")]
#[command(about = "Poll vehicle telemetry and fan it out to storage and MQTT")]
#[command(version)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/carwatch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Vehicle display name to follow
    #[arg(long, global = true)]
    vehicle: Option<String>,

    /// MQTT broker host (enables the broker)
    #[arg(long, global = true)]
    broker_host: Option<String>,

    /// MQTT broker port
    #[arg(long, global = true)]
    broker_port: Option<u16>,

    /// MQTT topic to publish to, or to read from in bridge mode
    #[arg(long, global = true)]
    topic: Option<String>,

    /// Disable the broker even if configured
    #[arg(long, global = true, conflicts_with = "broker_host")]
    no_broker: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Poll the vehicle and fan snapshots out to all sinks
    Gather,
    /// Read snapshots from the broker and persist them
    Bridge,
    /// Show configuration and store contents
    Status,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let mut config = if args.config.is_some() {
        Config::load_from(&config_path).context("failed to load configuration")?
    } else {
        Config::load().context("failed to load configuration")?
    };
    apply_overrides(&mut config, &args);

    match args.command {
        Command::Status => {
            status(&config, &config_path)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Gather => {
            config.validate().context("invalid configuration")?;
            run_pipeline(config, args.command)
        }
        Command::Bridge => {
            config.validate_bridge().context("invalid configuration")?;
            run_pipeline(config, args.command)
        }
    }
}

/// Command line flags win over the config file.
fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(db) = &args.db {
        config.store.path = Some(db.clone());
    }
    if let Some(vehicle) = &args.vehicle {
        config.vehicle.name = vehicle.clone();
    }
    if let Some(host) = &args.broker_host {
        config.broker.enabled = true;
        config.broker.host = Some(host.clone());
    }
    if let Some(port) = args.broker_port {
        config.broker.port = port;
    }
    if let Some(topic) = &args.topic {
        config.broker.topic = Some(topic.clone());
    }
    if args.no_broker {
        config.broker.enabled = false;
    }
    match args.verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
}

fn run_pipeline(config: Config, command: Command) -> Result<ExitCode> {
    let _log_guard =
        carwatch_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "carwatch starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let exit = runtime.block_on(async {
        let supervisor = match command {
            Command::Bridge => bridge(&config)?,
            _ => gather(&config)?,
        };
        Ok::<_, anyhow::Error>(supervisor.run_until(signals::shutdown()).await)
    })?;

    Ok(ExitCode::from(exit_status(&exit)))
}

fn gather(config: &Config) -> Result<Supervisor> {
    let tx = Broadcaster::with_max_backlog(config.channel.max_backlog);
    let mut sinks = core_sinks(config)?;

    if config.broker.is_ready() {
        let topic = config.broker.topic.clone().context("broker.topic is not set")?;
        let broker = MqttBroker::new(&config.broker).context("failed to configure broker")?;
        let options = PublishOptions::from_config(&config.broker);
        let republish = RepublishSink::new(broker, topic, options);
        sinks.push(Box::new(Retrying::new(
            republish,
            tx.clone(),
            config.broker.retry_delay(),
        )));
    } else {
        tracing::info!("Broker disabled, snapshots will not be republished");
    }

    let source = HttpTelemetrySource::new(&config.api).context("failed to build API client")?;
    let credentials = FileCredentialProvider::new(config.auth.cache_path());
    let gatherer = Gatherer::new(
        source,
        credentials,
        config.vehicle.name.clone(),
        Schedule::from_config(&config.gatherer, &config.api),
    );

    tracing::info!(
        vehicle = %config.vehicle.name,
        sinks = sinks.len(),
        "Starting gather pipeline"
    );
    Ok(Supervisor::launch(tx, sinks, "gatherer", |tx| gatherer.run(tx)))
}

fn bridge(config: &Config) -> Result<Supervisor> {
    let tx = Broadcaster::with_max_backlog(config.channel.max_backlog);
    let sinks = core_sinks(config)?;

    let topic = config.broker.topic.clone().context("broker.topic is not set")?;
    let broker = MqttBroker::new(&config.broker).context("failed to configure broker")?;
    let source = MqttSource::new(broker, topic);
    let delay = config.broker.retry_delay();

    tracing::info!(sinks = sinks.len(), "Starting bridge pipeline");
    Ok(Supervisor::launch(tx, sinks, "bridge", move |tx| source.run(tx, delay)))
}

/// Persistence and watchdog, which every pipeline runs unwrapped.
fn core_sinks(config: &Config) -> Result<Vec<Box<dyn Sink>>> {
    let db_path = config.store.path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;

    let sinks: Vec<Box<dyn Sink>> = vec![
        Box::new(PersistSink::new(Arc::new(db))),
        Box::new(WatchdogSink::new(config.watchdog.window())),
    ];
    Ok(sinks)
}

fn exit_status(exit: &Exit) -> u8 {
    match &exit.result {
        Ok(()) if exit.is_signal() => 0,
        Err(Error::Stalled { .. }) => EXIT_STALLED,
        _ => EXIT_FATAL,
    }
}

fn status(config: &Config, config_path: &std::path::Path) -> Result<()> {
    let db_path = config.store.path();

    println!("carwatch {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!(
        "Config:    {}{}",
        config_path.display(),
        if config_path.exists() { "" } else { " (not found, using defaults)" }
    );
    println!(
        "Vehicle:   {}",
        if config.vehicle.name.is_empty() {
            "(not set)"
        } else {
            config.vehicle.name.as_str()
        }
    );
    if config.broker.is_ready() {
        println!(
            "Broker:    {}:{} topic {}",
            config.broker.host.as_deref().unwrap_or_default(),
            config.broker.port,
            config.broker.topic.as_deref().unwrap_or_default()
        );
    } else {
        println!("Broker:    disabled");
    }
    println!("Log:       {}", Config::log_path().display());
    println!("Database:  {}", db_path.display());

    if !db_path.exists() {
        println!("Snapshots: 0 (no database yet)");
        return Ok(());
    }

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    let count = db.snapshot_count().context("failed to count snapshots")?;
    println!("Snapshots: {}", count);
    match db.latest_snapshot_at().context("failed to read latest snapshot")? {
        Some(at) => println!("Latest:    {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Latest:    never"),
    }

    Ok(())
}
