use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use snmp_supervision::{
    actors::{alert::AlertHandle, poller::PollerHandle, storage::StorageHandle},
    alerts::AlertEngine,
    config::{Config, read_config_file},
    notify::{NotificationBatcher, notifier_for},
    poller::FleetPoller,
    snmp::{SessionFactory, udp::UdpSessionFactory},
    storage,
    util::{get_config_path, get_notify_url},
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(about = "SNMP fleet supervision")]
struct Args {
    /// Config file (defaults to $SUPERVISION_CONFIG, then ./config.json)
    #[arg(short, long)]
    config: Option<String>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Poll every equipment once, print the statuses as JSON and exit
    #[arg(long)]
    once: bool,

    /// Check every equipment once and print the connectivity reports
    #[arg(long, conflicts_with = "once")]
    check: bool,

    /// Send a test notification through the configured channel and exit
    #[arg(long, conflicts_with_all = ["once", "check"])]
    test_notification: bool,
}

fn log_level(args: &Args, config: &Config) -> LevelFilter {
    match args.verbose {
        0 => config
            .log_level
            .as_deref()
            .and_then(|level| LevelFilter::from_str(level).ok())
            .unwrap_or(LevelFilter::INFO),
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("snmp_supervision", level),
        ("supervisor", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(get_config_path);
    let mut config = read_config_file(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    init(log_level(&args, &config));
    trace!("started with args: {args:?}");

    if let Some(url) = get_notify_url() {
        debug!("notification url overridden from environment");
        config.notifications.override_url(url);
    }

    let sessions: Arc<dyn SessionFactory> = Arc::new(UdpSessionFactory);
    let poller = Arc::new(FleetPoller::from_config(sessions, &config));

    if args.once {
        return poll_once(&poller, &config).await;
    }
    if args.check {
        return check_connectivity(&poller, &config).await;
    }
    if args.test_notification {
        return send_test_notification(&config).await;
    }

    run_service(poller, config).await
}

async fn poll_once(poller: &Arc<FleetPoller>, config: &Config) -> anyhow::Result<()> {
    let mut statuses = poller.poll_all(&config.equipment).await;
    statuses.sort_by_key(|status| status.id);

    let json = serde_json::to_string_pretty(&statuses).context("failed to serialize statuses")?;
    println!("{json}");
    Ok(())
}

async fn check_connectivity(poller: &Arc<FleetPoller>, config: &Config) -> anyhow::Result<()> {
    let mut reports = Vec::with_capacity(config.equipment.len());
    for equipment in &config.equipment {
        let report = poller.test_connectivity(equipment).await;
        if !report.online {
            warn!("{} ({}) did not answer", equipment.name, equipment.ip);
        }
        reports.push(serde_json::json!({
            "id": equipment.id,
            "name": equipment.name,
            "ip": equipment.ip,
            "report": report,
        }));
    }

    let json = serde_json::to_string_pretty(&reports).context("failed to serialize reports")?;
    println!("{json}");
    Ok(())
}

async fn send_test_notification(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(storage::MemoryBackend::new());
    let batcher = NotificationBatcher::new(store, notifier_for(&config.notifications.channel), &config.notifications);

    let report = batcher.send_test().await;
    if report.success {
        info!("{}", report.detail);
        Ok(())
    } else {
        anyhow::bail!("test notification failed: {}", report.detail)
    }
}

async fn run_service(poller: Arc<FleetPoller>, config: Config) -> anyhow::Result<()> {
    let store = storage::open(&config.storage)
        .await
        .context("failed to open storage backend")?;
    match store.health_check().await {
        Ok(health) => info!("{}", health.message),
        Err(e) => error!("storage health check failed: {e}"),
    }

    let batcher = Arc::new(NotificationBatcher::new(
        store.clone().alert_store(),
        notifier_for(&config.notifications.channel),
        &config.notifications,
    ));

    // subscribers first, the poller publishes its first cycle right away
    let (event_tx, _) = broadcast::channel(16);
    let storage_handle = StorageHandle::spawn(
        store.clone().metrics_store(),
        event_tx.subscribe(),
        config.storage.retention_days(),
    );
    let alert_handle = AlertHandle::spawn(
        AlertEngine::new(),
        store.clone().alert_store(),
        batcher,
        event_tx.subscribe(),
        config.notifications.interval(),
    );
    let poller_handle = PollerHandle::spawn(
        poller,
        config.equipment.clone(),
        config.polling.interval(),
        event_tx,
    );

    info!(
        "supervising {} equipment every {}s",
        config.equipment.len(),
        config.polling.interval().as_secs()
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    if let Err(e) = poller_handle.shutdown().await {
        error!("{e:#}");
    }
    alert_handle.shutdown().await;
    storage_handle.shutdown().await;

    Ok(())
}
