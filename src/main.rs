use anyhow::{Context, Result};
use azure_exporter::azure::auth::AuthSettings;
use azure_exporter::azure::client::AzureClient;
use azure_exporter::azure::http::Deadline;
use azure_exporter::collector::Exporter;
use azure_exporter::config::SharedConfig;
use azure_exporter::listing::{self, ListingKind};
use azure_exporter::{server, VERSION};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Prometheus exporter for Azure Monitor metrics
#[derive(Parser, Debug)]
#[command(name = "azure-metrics-exporter", version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "azure.yml")]
    config_file: PathBuf,

    /// Address to listen on for scrape requests
    #[arg(long, default_value = "0.0.0.0:9276")]
    listen_address: SocketAddr,

    /// Time budget of one collection cycle, in seconds
    #[arg(long, default_value_t = 60)]
    scrape_timeout: u64,

    /// Print the metric definitions of every configured resource and exit
    #[arg(long)]
    list_definitions: bool,

    /// Print the metric namespaces of every configured resource and exit
    #[arg(long, conflicts_with = "list_definitions")]
    list_namespaces: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&PathBuf>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(tracing_level).into())
        .from_env_lossy();

    let Some(log_path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
        return Ok(None);
    };

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level, args.log_file.as_ref())?;
    tracing::info!("azure-metrics-exporter {} starting", VERSION);

    let config = Arc::new(
        SharedConfig::load(&args.config_file)
            .with_context(|| format!("error loading config {}", args.config_file.display()))?,
    );
    let scrape_timeout = Duration::from_secs(args.scrape_timeout);

    if args.list_definitions || args.list_namespaces {
        let kind = if args.list_definitions {
            ListingKind::Definitions
        } else {
            ListingKind::Namespaces
        };
        return print_listing(&config, kind, scrape_timeout).await;
    }

    let exporter = Exporter::initialize(config, scrape_timeout)
        .await
        .context("failed to initialize exporter")?;

    server::run_server(Arc::new(exporter), args.listen_address).await
}

async fn print_listing(config: &SharedConfig, kind: ListingKind, timeout: Duration) -> Result<()> {
    let snapshot = config.snapshot();
    let client = AzureClient::new(AuthSettings::from_config(&snapshot))?;
    let deadline = Deadline::after(timeout);

    let reports = listing::list(&client, &snapshot, kind, &deadline)
        .await
        .context("failed to list metrics")?;

    for report in reports {
        println!("{}", report);
    }
    Ok(())
}
