//! VBUS collector: captures bus data, decodes it, and stores snapshots

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vbus_protocol::{
    Decoder, SpecCatalog, SplitPolicy, TransportConfig, TransportError, VBusConnection,
};
use vbus_storage::MeasurementStore;

mod capture;
mod config;

use config::CollectorConfig;

#[derive(Parser)]
#[command(version, about = "Collects and decodes VBUS data from solar-thermal controllers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Periodically capture, decode and store snapshots in SQLite
    Collect {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
        /// SQLite database path
        #[arg(long, default_value = "data/vbus.db")]
        db: String,
        /// Minutes between snapshots
        #[arg(long, default_value_t = 5)]
        interval: u64,
        /// Seconds of bus data to soak up per snapshot
        #[arg(long, default_value_t = 2)]
        window: u64,
        /// Frame splitting policy for live reads
        #[arg(long, default_value = "drop-boundary")]
        policy: SplitPolicy,
    },
    /// Save periodic raw captures to files for offline analysis
    Capture {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
        /// Total seconds to run
        #[arg(long, default_value_t = 300)]
        duration: u64,
        /// Seconds between captures
        #[arg(long, default_value_t = 30)]
        interval: u64,
        /// Seconds of bus data to soak up per capture
        #[arg(long, default_value_t = 2)]
        window: u64,
        /// Output directory for capture files and the manifest
        #[arg(long, default_value = "captures")]
        outdir: PathBuf,
    },
    /// Decode a capture file and print the readings as JSON
    Parse {
        /// Specification catalog JSON
        #[arg(long)]
        spec: PathBuf,
        /// Raw capture file
        file: PathBuf,
        /// Frame splitting policy; capture files are complete, keep all
        #[arg(long, default_value = "keep-all")]
        policy: SplitPolicy,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vbus_collector=info,vbus_protocol=info,vbus_storage=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Collect {
            config,
            db,
            interval,
            window,
            policy,
        } => run_collect(&config, &db, interval, window, policy).await,
        Command::Capture {
            config,
            duration,
            interval,
            window,
            outdir,
        } => {
            let config = CollectorConfig::from_file(&config)?;
            tokio::task::spawn_blocking(move || {
                capture::run_capture_session(&config.transport, duration, interval, window, &outdir)
            })
            .await?
        }
        Command::Parse { spec, file, policy } => run_parse(&spec, &file, policy),
    }
}

async fn run_collect(
    config_path: &Path,
    db: &str,
    interval_minutes: u64,
    window: u64,
    policy: SplitPolicy,
) -> anyhow::Result<()> {
    let config = CollectorConfig::from_file(config_path)?;
    let catalog = SpecCatalog::from_file(&config.spec_file)?;
    let decoder = Decoder::with_policy(catalog, policy);
    let store = MeasurementStore::open(db).await?;

    tracing::info!(interval_minutes, db, "collector started");

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("collector stopping");
                break;
            }
            _ = ticker.tick() => {}
        }

        if let Err(e) = collect_once(&config.transport, &decoder, &store, window).await {
            tracing::warn!("snapshot failed: {e:#}");
        }
    }

    Ok(())
}

/// One collection cycle: connect, soak, decode, store
async fn collect_once(
    transport: &TransportConfig,
    decoder: &Decoder,
    store: &MeasurementStore,
    window: u64,
) -> anyhow::Result<()> {
    let transport = transport.clone();
    let raw = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, TransportError> {
        let mut conn = VBusConnection::open(&transport)?;
        conn.read_window(Duration::from_secs(window))
    })
    .await??;

    if raw.is_empty() {
        tracing::warn!("no data received this cycle");
        return Ok(());
    }

    let decoded = decoder.decode(&raw);
    if decoded.readings.is_empty() {
        tracing::info!(
            frames = decoded.stats.frames,
            short_frames = decoded.stats.short_frames,
            unmatched = decoded.stats.unmatched,
            "no usable data this cycle"
        );
        return Ok(());
    }

    let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let rows = store.insert_snapshot(&ts, &decoded.readings).await?;
    tracing::info!(
        %ts,
        rows,
        devices = decoded.readings.len(),
        skipped_fields = decoded.stats.skipped_fields,
        "snapshot stored"
    );
    Ok(())
}

fn run_parse(spec: &Path, file: &Path, policy: SplitPolicy) -> anyhow::Result<()> {
    let catalog = SpecCatalog::from_file(spec)?;
    let decoder = Decoder::with_policy(catalog, policy);

    let raw = std::fs::read(file)?;
    let decoded = decoder.decode(&raw);
    tracing::info!(
        frames = decoded.stats.frames,
        short_frames = decoded.stats.short_frames,
        unsupported_version = decoded.stats.unsupported_version,
        unmatched = decoded.stats.unmatched,
        skipped_fields = decoded.stats.skipped_fields,
        "capture decoded"
    );

    println!("{}", serde_json::to_string_pretty(&decoded.readings)?);
    Ok(())
}
