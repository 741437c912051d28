use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tokio::sync::watch;

use decoyd::config::Config;
use decoyd::database::Database;
use decoyd::journal::Journal;
use decoyd::models::{Event, EventFilter};
use decoyd::report::{summarize, time_bounds};
use decoyd::scan::{detect, ScanAlert};
use decoyd::Sensor;

#[derive(Parser)]
#[command(name = "decoyd")]
#[command(author, version, about = "Low-interaction network deception sensor")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the sensor listeners
    Start {
        /// Address to bind listeners on (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Listener port, may be given multiple times (overrides config)
        #[arg(short, long)]
        port: Vec<u16>,
    },

    /// Summarize recorded events
    Report {
        /// Read events from the JSONL journal instead of the database
        #[arg(short, long)]
        journal: bool,

        /// Only include events from this source address
        #[arg(short, long)]
        source: Option<IpAddr>,

        /// Only include events at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Number of sources to list
        #[arg(short, long, default_value = "10")]
        top: usize,
    },

    /// Check recorded events for port sweeps
    Detect {
        /// Read events from the JSONL journal instead of the database
        #[arg(short, long)]
        journal: bool,

        /// Detection window in seconds (overrides config)
        #[arg(short, long)]
        window: Option<u64>,

        /// Distinct ports within the window that raise an alert (overrides config)
        #[arg(short, long)]
        threshold: Option<u32>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Retry location lookups for events recorded without one
    UpdateGeo {
        /// Seconds to wait between lookups
        #[arg(long, default_value = "1")]
        delay: u64,
    },

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Table row for per-source counts
#[derive(Tabled)]
struct SourceRow {
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Events")]
    events: usize,
    #[tabled(rename = "Location")]
    location: String,
}

/// Table row for per-port counts
#[derive(Tabled)]
struct PortRow {
    #[tabled(rename = "Port")]
    port: u16,
    #[tabled(rename = "Events")]
    events: usize,
}

/// Table row for scan alerts
#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Window start")]
    window_start: String,
    #[tabled(rename = "Distinct ports")]
    distinct_ports: usize,
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Start { bind, port } => cmd_start(config, bind, port).await,
        Commands::Report {
            journal,
            source,
            since,
            top,
        } => cmd_report(config, journal, source, since, top).await,
        Commands::Detect {
            journal,
            window,
            threshold,
            json,
        } => cmd_detect(config, journal, window, threshold, json).await,
        Commands::UpdateGeo { delay } => cmd_update_geo(config, delay).await,
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

async fn cmd_start(mut config: Config, bind: Option<String>, ports: Vec<u16>) -> Result<()> {
    if let Some(bind) = bind {
        config.listener.bind_addr = bind;
    }
    if !ports.is_empty() {
        config.listener.ports = ports;
    }

    println!("Starting decoyd sensor...");

    let sensor = Sensor::new(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
        println!("\nShutting down...");
        let _ = shutdown_tx.send(true);
    });

    // Returns once every listener has stopped and in-flight
    // connections have been recorded.
    sensor.run(shutdown_rx).await
}

async fn cmd_report(
    config: Config,
    journal: bool,
    source: Option<IpAddr>,
    since: Option<DateTime<Utc>>,
    top: usize,
) -> Result<()> {
    let events = load_events(&config, journal, source, since)?;

    if events.is_empty() {
        println!("No events recorded");
        return Ok(());
    }

    let summary = summarize(&events);

    // Last usable location per source, for the table below
    let mut locations: HashMap<IpAddr, String> = HashMap::new();
    for event in &events {
        if let Some(location) = &event.location {
            if event.has_location() {
                locations.insert(event.source_address, location.clone());
            }
        }
    }

    println!("{}", "=== decoyd Report ===".bold());
    println!();
    println!("Total events: {}", summary.total.to_string().cyan());
    if let Some((first, last)) = time_bounds(&events) {
        println!("First event:  {}", first.format("%Y-%m-%d %H:%M:%S"));
        println!("Last event:   {}", last.format("%Y-%m-%d %H:%M:%S"));
    }

    println!("\n{}", "Top Sources:".bold());
    let rows: Vec<SourceRow> = summary
        .by_source
        .iter()
        .take(top)
        .map(|(addr, count)| SourceRow {
            source: addr.to_string(),
            events: *count,
            location: locations.get(addr).cloned().unwrap_or_default(),
        })
        .collect();
    println!("{}", Table::new(rows));

    println!("\n{}", "Ports:".bold());
    let rows: Vec<PortRow> = summary
        .by_port
        .iter()
        .map(|(port, count)| PortRow {
            port: *port,
            events: *count,
        })
        .collect();
    println!("{}", Table::new(rows));

    Ok(())
}

async fn cmd_detect(
    config: Config,
    journal: bool,
    window: Option<u64>,
    threshold: Option<u32>,
    json: bool,
) -> Result<()> {
    let window_secs = window.unwrap_or(config.detector.window_secs);
    let threshold = threshold.unwrap_or(config.detector.port_threshold);

    let events = load_events(&config, journal, None, None)?;
    let alerts: Vec<ScanAlert> = detect(
        &events,
        chrono::Duration::seconds(window_secs as i64),
        threshold,
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&alerts)?);
        return Ok(());
    }

    if alerts.is_empty() {
        println!(
            "No port scans detected ({} events examined)",
            events.len()
        );
        return Ok(());
    }

    println!(
        "{} {} source(s) touched {} or more distinct ports within {}s",
        "Port scan:".red().bold(),
        alerts.len(),
        threshold,
        window_secs
    );

    let rows: Vec<AlertRow> = alerts
        .iter()
        .map(|a| AlertRow {
            source: a.source_address.to_string(),
            window_start: a.window_start.format("%Y-%m-%d %H:%M:%S").to_string(),
            distinct_ports: a.distinct_port_count,
        })
        .collect();
    println!("{}", Table::new(rows));

    Ok(())
}

async fn cmd_update_geo(config: Config, delay: u64) -> Result<()> {
    let sensor = Sensor::new(config)?;
    let (updated, attempted) = sensor
        .backfill_locations(std::time::Duration::from_secs(delay))
        .await?;

    if attempted == 0 {
        println!("All recorded events already carry a location");
    } else {
        println!(
            "{} {} of {} address(es)",
            "Updated:".green().bold(),
            updated,
            attempted
        );
    }

    Ok(())
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();
    let toml_str = toml::to_string_pretty(&config)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &toml_str)?;
            println!("Configuration written to {}", path.display());
        }
        None => {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

/// Load events from the structured store, or from the journal when
/// `journal` is set. Filters apply identically on both paths. A store
/// or journal that was never written reads as zero events; reading
/// does not create either file.
fn load_events(
    config: &Config,
    journal: bool,
    source: Option<IpAddr>,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<Event>> {
    if journal {
        let mut events = Journal::read_events(config.journal_path())?;
        if let Some(source) = source {
            events.retain(|e| e.source_address == source);
        }
        if let Some(since) = since {
            events.retain(|e| e.timestamp >= since);
        }
        Ok(events)
    } else {
        if !config.db_path().exists() {
            return Ok(Vec::new());
        }
        let db = Database::open(config.db_path())?;
        db.events(&EventFilter { source, since })
    }
}
