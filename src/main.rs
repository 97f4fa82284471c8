use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use labwatch::config::{AppConfig, DeviceEntry};
use labwatch::dom::Document;
use labwatch::monitor;
use labwatch::status::board::{render_board, snapshot, BadgeState};
use labwatch::status::client::HttpStatusClient;
use labwatch::status::StatusPoller;
use labwatch::table::render::{render_table, TableData};
use labwatch::table::TableController;

#[derive(Parser, Debug)]
#[command(name = "labwatch")]
#[command(version)]
#[command(about = "Device status and table tools for the lab console")]
struct Args {
    /// Refresh the given devices once and print their status as JSON
    #[arg(short, long, num_args = 1.., value_name = "ID")]
    status: Vec<String>,

    /// Print the server's status for every device it knows about
    #[arg(short, long)]
    all: bool,

    /// Run in daemon mode, polling the configured devices
    #[arg(short, long)]
    daemon: bool,

    /// Filter and sort a JSON table file
    #[arg(short, long, value_name = "FILE")]
    table: Option<PathBuf>,

    /// Only show table rows containing this text
    #[arg(long, value_name = "TERM", requires = "table")]
    filter: Option<String>,

    /// Sort by this column (0-based); repeat to click the header again
    #[arg(long = "sort", value_name = "COLUMN", requires = "table")]
    sort: Vec<usize>,

    /// Config file to use instead of the default location
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Console server URL, overrides the config file
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // Tables need neither the server nor the config
    if let Some(path) = &args.table {
        return run_table(path, args.filter.as_deref(), &args.sort);
    }

    let mut config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(url) = args.base_url {
        config.base_url = url;
    }

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            if args.all {
                return print_all(&config).await;
            }

            if args.daemon {
                return run_daemon(&config).await;
            }

            let ids = if args.status.is_empty() {
                config.devices.iter().map(|d| d.id.clone()).collect()
            } else {
                args.status
            };
            if ids.is_empty() {
                anyhow::bail!("No devices given and none configured");
            }
            print_status(&config, &ids).await
        })
        .await
}

async fn print_status(config: &AppConfig, ids: &[String]) -> Result<()> {
    // Use the configured names where the device is known
    let devices: Vec<DeviceEntry> = ids
        .iter()
        .map(|id| {
            config
                .devices
                .iter()
                .find(|d| &d.id == id)
                .cloned()
                .unwrap_or_else(|| DeviceEntry {
                    id: id.clone(),
                    name: None,
                })
        })
        .collect();

    let mut doc = Document::new();
    let root = doc.root();
    let cards = render_board(&mut doc, root, &devices);
    let doc = doc.into_shared();

    let client = HttpStatusClient::new(&config.base_url)?;
    let poller = StatusPoller::new(doc.clone(), client, config.poller_options())?;
    poller.refresh(ids).wait().await;

    let doc = doc.borrow();
    for (device, card) in devices.iter().zip(&cards) {
        let shown = snapshot(&doc, card);
        let output = serde_json::json!({
            "id": shown.id,
            "name": device.display_name(),
            "status": shown.status,
            "last_seen": shown.last_seen,
        });
        println!("{}", serde_json::to_string(&output)?);
    }
    Ok(())
}

async fn print_all(config: &AppConfig) -> Result<()> {
    let client = HttpStatusClient::new(&config.base_url)?;
    let records = client
        .fetch_all()
        .await
        .with_context(|| format!("Failed to fetch device status from {}", config.base_url))?;
    let formatter = config.poller_options().formatter;

    for record in records {
        let status = record
            .is_online
            .map(BadgeState::from_online)
            .unwrap_or(BadgeState::Unknown);
        let output = serde_json::json!({
            "id": record.entity_id,
            "status": status,
            "last_seen": record.last_seen_at.map(|t| formatter.format(&t)),
        });
        println!("{}", serde_json::to_string(&output)?);
    }
    Ok(())
}

async fn run_daemon(config: &AppConfig) -> Result<()> {
    tracing::info!("Starting labwatch daemon");
    monitor::start_monitoring(config).await
}

fn run_table(path: &Path, filter: Option<&str>, sorts: &[usize]) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read table {}", path.display()))?;
    let data: TableData = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse table {}", path.display()))?;
    data.check_shape()?;

    let mut doc = Document::new();
    let root = doc.root();
    let table = render_table(&mut doc, root, &data);

    let mut controller = TableController::new(doc.into_shared(), table)?;
    for &column in sorts {
        if controller.apply_sort(column).is_none() {
            tracing::warn!("No column {} to sort by", column);
        }
    }
    if let Some(term) = filter {
        let summary = controller.apply_filter(term);
        tracing::debug!("{} rows shown, {} hidden", summary.visible, summary.hidden);
    }

    println!("{}", controller.header_labels().join("\t"));
    for row in controller.visible_rows() {
        println!("{}", row.join("\t"));
    }
    Ok(())
}
