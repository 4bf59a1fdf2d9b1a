//! Kraken Cost Dashboard - Main Entry Point
//!
//! Serves the dashboard JSON API, or prints a cost summary / open positions
//! for the configured credentials.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use kraken_cost_dashboard::cache::TtlCache;
use kraken_cost_dashboard::config::Config;
use kraken_cost_dashboard::exchange::{Credentials, FuturesApi, KrakenClient};
use kraken_cost_dashboard::service::{format_ms, DashboardService};
use kraken_cost_dashboard::utils::decimal::format_usd;
use kraken_cost_dashboard::utils::time::now_millis;
use kraken_cost_dashboard::web::{self, AppState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Kraken Cost Dashboard CLI
#[derive(Parser)]
#[command(name = "kraken-cost-dashboard")]
#[command(version, about = "Fees, funding and open positions on Kraken Futures")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dashboard API server (default)
    Serve {
        /// Interface to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the fee and funding summary for the configured credentials
    Summary {
        /// Number of days to summarize
        #[arg(short, long, default_value = "7")]
        days: u32,
    },

    /// Print open positions with accumulated costs
    Positions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    init_logging(&config.server.log_dir)?;
    config.validate()?;

    let cache = TtlCache::from_config(&config.cache)?;
    let client: Arc<dyn FuturesApi> = Arc::new(KrakenClient::new(&config.kraken)?);
    let service = DashboardService::new(client, cache, &config.cache, config.dashboard.clone());

    match cli.command {
        Some(Commands::Summary { days }) => show_summary(&service, &config, days).await,
        Some(Commands::Positions) => show_positions(&service, &config).await,
        Some(Commands::Serve { host, port }) => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(service, &config).await
        }
        None => serve(service, &config).await,
    }
}

async fn serve(service: DashboardService<dyn FuturesApi>, config: &Config) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║         Kraken Cost Dashboard v{}                       ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");
    log_config(config);

    let purger = service.clone();
    let purge_every = Duration::from_secs(config.cache.ttl_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = purger.purge_expired(now_millis());
            debug!("🧹 Cache purge removed {} entries", removed);
        }
    });

    let state = AppState::new(service, config);
    web::run_server(config, state).await
}

fn configured_credentials(config: &Config) -> Result<Credentials> {
    let creds = Credentials::new(&config.kraken.api_key, &config.kraken.api_secret);
    if !creds.is_complete() {
        bail!("Set DASH__KRAKEN__API_KEY and DASH__KRAKEN__API_SECRET to use this command");
    }
    Ok(creds)
}

async fn show_summary(service: &DashboardService<dyn FuturesApi>, config: &Config, days: u32) -> Result<()> {
    let creds = configured_credentials(config)?;
    let history = service.history_for(&creds, days, true).await?;
    let summary = &history.summary;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              KRAKEN FUTURES COST SUMMARY                   ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    println!("\n📊 Period: {}", summary.period);
    println!("   ├─ Trading Fees:     {}", format_usd(summary.total_fees));
    println!("   ├─ Funding Paid:     {}", format_usd(summary.total_funding));
    println!("   ├─ Total Cost:       {}", format_usd(summary.total_cost));
    println!("   ├─ Avg Daily Fees:   {}", format_usd(summary.avg_daily_fees));
    println!("   ├─ Avg Daily Funding:{}", format_usd(summary.avg_daily_funding));
    println!("   ├─ Trades:           {}", summary.trade_count);
    println!("   └─ Volume:           {}", format_usd(summary.total_volume));

    println!("\n📅 Daily");
    for point in history.daily.iter().filter(|p| !p.fees.is_zero() || !p.funding.is_zero()) {
        println!(
            "   {}  fees {:>12}  funding {:>12}",
            point.date,
            format_usd(point.fees),
            format_usd(point.funding)
        );
    }
    println!("\n   Last updated: {}", format_ms(history.last_updated));

    Ok(())
}

async fn show_positions(service: &DashboardService<dyn FuturesApi>, config: &Config) -> Result<()> {
    let creds = configured_credentials(config)?;
    let positions = service.detailed_positions(&creds).await?;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              OPEN POSITIONS                                ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if positions.is_empty() {
        println!("\n   No open positions.");
        return Ok(());
    }

    for p in &positions {
        println!("\n   ┌─ {} ({})", p.symbol, p.side);
        println!("   ├─ Size:             {} @ ${:.2}", p.size, p.avg_price);
        println!("   ├─ Mark Price:       ${:.2}", p.current_price);
        println!("   ├─ Unrealized P&L:   {}", format_usd(p.unrealized_pnl));
        println!("   ├─ Funding Paid:     {}", format_usd(p.accumulated_funding));
        println!("   ├─ Fees Paid:        {}", format_usd(p.accumulated_fees));
        if let Some(opened) = &p.opened_date {
            println!("   ├─ Opened:           {}", opened);
        }
        if p.data_is_capped {
            println!("   ├─ ⚠️  Costs cover the last year only");
        }
        if let Some(err) = &p.error {
            println!("   ├─ ❌ {}", err);
        }
        println!("   └─ Net P&L:          {}", format_usd(p.net_unrealized_pnl));
    }

    Ok(())
}

/// Initialize logging to stdout and a daily rolling file.
fn init_logging(log_dir: &str) -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "kraken-dashboard.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the whole program
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("kraken_cost_dashboard=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Kraken API: {}", config.kraken.base_url);
    info!(
        "   Fallback credentials: {}",
        if config.kraken.api_key.is_empty() { "none" } else { "configured" }
    );
    info!(
        "   Cache: {:?} (ttl {}s, fee schedules {}s)",
        config.cache.backend, config.cache.ttl_secs, config.cache.fee_schedule_ttl_secs
    );
    info!("   History window: {} days", config.dashboard.history_days);
    info!("   Credential cooldown: {}s", config.dashboard.credential_cooldown_secs);
    if config.server.debug {
        info!("   ⚠️  Debug mode: credential cookies are sent without Secure");
    }
    match &config.server.static_dir {
        Some(dir) => info!("   Frontend: {}", dir),
        None => info!("   Frontend: not served"),
    }
}
