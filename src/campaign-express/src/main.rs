//! Campaign Express: bulk promotional messaging for a restaurant's
//! customer base.
//!
//! Command-line entry point: estimates audiences and runs one campaign
//! end to end from JSON customer fixtures.

use anyhow::Context;
use campaign_channels::{MockTransport, Transport, WhatsAppConfig, WhatsAppProvider};
use campaign_core::config::AppConfig;
use campaign_core::types::{CompletedOrder, Customer, DispatchProgress, TargetCriteria};
use campaign_dispatch::CampaignService;
use campaign_management::InMemoryCampaignStore;
use campaign_segmentation::InMemoryCustomerSource;
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "campaign-express")]
#[command(about = "Bulk promotional messaging with batched, rate-limited dispatch")]
#[command(version)]
struct Cli {
    /// TOML config file, overlaid by CAMPAIGN_EXPRESS__* variables
    #[arg(long, env = "CAMPAIGN_EXPRESS_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "CAMPAIGN_EXPRESS__NODE_ID")]
    node_id: Option<String>,

    /// Dispatch batch size (overrides config)
    #[arg(long, env = "CAMPAIGN_EXPRESS__DISPATCH__BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Expose Prometheus metrics on this port while running
    #[arg(long, env = "CAMPAIGN_EXPRESS__METRICS__PORT")]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count the customers a criteria file would select
    Estimate(SelectionArgs),
    /// Create a campaign from a criteria file and dispatch it
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct SelectionArgs {
    /// JSON array of customers
    #[arg(long)]
    customers: PathBuf,

    /// JSON array of completed orders, for the recency filter
    #[arg(long)]
    orders: Option<PathBuf>,

    /// JSON target criteria object
    #[arg(long)]
    criteria: PathBuf,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Campaign name
    #[arg(long)]
    name: String,

    /// Message body sent to every recipient
    #[arg(long)]
    content: String,

    /// Reference to the promotion being advertised
    #[arg(long)]
    promotion_ref: Option<String>,

    /// Use the scripted transport instead of WhatsApp
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[arg(long, env = "WHATSAPP_API_BASE_URL", default_value = "https://graph.facebook.com/v19.0")]
    whatsapp_api_base_url: String,

    #[arg(long, env = "WHATSAPP_ACCESS_TOKEN", default_value = "")]
    whatsapp_access_token: String,

    #[arg(long, env = "WHATSAPP_PHONE_NUMBER_ID", default_value = "")]
    whatsapp_phone_number_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_express=info,campaign_dispatch=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load_from(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(batch_size) = cli.batch_size {
        config.dispatch.batch_size = batch_size;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.enabled = true;
        config.metrics.port = port;
    }
    config.validate()?;

    info!(
        node_id = %config.node_id,
        batch_size = config.dispatch.batch_size,
        message_delay_ms = config.dispatch.message_delay_ms,
        batch_delay_ms = config.dispatch.batch_delay_ms,
        "Configuration loaded"
    );

    if config.metrics.enabled {
        start_metrics(&config)?;
    }

    match cli.command {
        Command::Estimate(args) => estimate(&config, args).await,
        Command::Send(args) => send(&config, args).await,
    }
}

fn start_metrics(config: &AppConfig) -> anyhow::Result<()> {
    let host: IpAddr = config.metrics.host.parse()?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(host, config.metrics.port))
        .install()?;
    info!(port = config.metrics.port, "Metrics exporter started");
    Ok(())
}

async fn estimate(config: &AppConfig, args: SelectionArgs) -> anyhow::Result<()> {
    let (customers, criteria) = load_selection(&args)?;
    let service = CampaignService::new(
        config,
        customers,
        Arc::new(InMemoryCampaignStore::new()),
        Arc::new(MockTransport::new()),
    );

    let estimate = service.estimate_recipients(&criteria).await?;
    if !estimate.skipped_filters.is_empty() {
        warn!(skipped = ?estimate.skipped_filters, "Estimate ignored unavailable filters");
    }
    println!("{}", serde_json::to_string_pretty(&estimate)?);
    Ok(())
}

async fn send(config: &AppConfig, args: SendArgs) -> anyhow::Result<()> {
    let (customers, criteria) = load_selection(&args.selection)?;
    let transport: Arc<dyn Transport> = if args.dry_run {
        Arc::new(MockTransport::new())
    } else {
        Arc::new(WhatsAppProvider::new(WhatsAppConfig {
            api_base_url: args.whatsapp_api_base_url,
            access_token: args.whatsapp_access_token,
            phone_number_id: args.whatsapp_phone_number_id,
        }))
    };
    let store = Arc::new(InMemoryCampaignStore::new());
    let service = CampaignService::new(config, customers, store, transport);

    let created = service
        .create_campaign(args.promotion_ref, &args.name, criteria, None)
        .await;
    let campaign_id = match (created.success, created.campaign_id) {
        (true, Some(id)) => id,
        _ => anyhow::bail!(
            "campaign not created: {}",
            created.error.unwrap_or_else(|| "unknown error".to_string())
        ),
    };
    info!(
        campaign_id = %campaign_id,
        recipients = created.total_recipients,
        "Campaign ready, dispatching"
    );

    let reporter = |p: DispatchProgress| {
        info!(
            campaign_id = %campaign_id,
            sent = p.sent,
            failed = p.failed,
            total = p.total,
            "Dispatch progress"
        );
    };
    let result = service.dispatch(campaign_id, &args.content, &reporter).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        anyhow::bail!("dispatch of campaign {} did not finish", campaign_id);
    }
    Ok(())
}

fn load_selection(
    args: &SelectionArgs,
) -> anyhow::Result<(Arc<InMemoryCustomerSource>, TargetCriteria)> {
    let customers: Vec<Customer> = read_json(&args.customers)?;
    let orders: Vec<CompletedOrder> = match &args.orders {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };
    let criteria: TargetCriteria = read_json(&args.criteria)?;

    info!(
        customers = customers.len(),
        orders = orders.len(),
        "Customer fixtures loaded"
    );
    let source = InMemoryCustomerSource::new(customers).with_orders(orders);
    Ok((Arc::new(source), criteria))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
