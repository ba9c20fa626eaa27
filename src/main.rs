//! Polymarket duration-risk hedging bot entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use polymarket_hedge::api::{create_router, AppState};
use polymarket_hedge::BotError;
use polymarket_hedge::config::Config;
use polymarket_hedge::driver::Driver;
use polymarket_hedge::feed::{QuoteFeed, ReconnectConfig};
use polymarket_hedge::gateway::{GatewaySettings, OrderGateway, OrderVenue};
use polymarket_hedge::hedger::{HedgeMachine, ProfitCounter};
use polymarket_hedge::ledger::{PositionLedger, PositionSource};
use polymarket_hedge::market::{MarketRotator, PolymarketClient, SimulatedExchange, SlugRotator};
use polymarket_hedge::metrics;
use polymarket_hedge::risk::RiskGovernor;
use polymarket_hedge::signing::address_from_private_key;
use polymarket_hedge::utils::shutdown_signal;

/// Polymarket duration-risk hedging bot.
#[derive(Parser, Debug)]
#[command(name = "polymarket-hedge")]
#[command(about = "Hedged two-leg trading on rotating Polymarket up/down markets")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the hedging loop (default).
    Run {
        /// Paper trade against live quotes (overrides DRY_RUN).
        #[arg(long)]
        dry_run: Option<bool>,

        /// HTTP server port for health/status (overrides PORT).
        #[arg(short, long)]
        port: Option<u16>,

        /// Subscribe to the WebSocket book feed (overrides USE_WSS).
        #[arg(long)]
        websocket: bool,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Discover the market that is live right now.
    DiscoverMarket,

    /// Print reconciled positions for the live market.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("polymarket_hedge=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    metrics::init_metrics();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(),
        Some(Command::DiscoverMarket) => cmd_discover_market().await,
        Some(Command::Status) => cmd_status().await,
        Some(Command::Run {
            dry_run,
            port,
            websocket,
        }) => cmd_run(dry_run, port, websocket).await,
        None => cmd_run(None, None, false).await,
    }
}

fn load_config() -> polymarket_hedge::Result<Config> {
    let config = Config::load().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        BotError::from(e)
    })?;
    Ok(config)
}

/// Check configuration validity.
fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("POLYMARKET HEDGE BOT - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    if let Err(e) = config.validate() {
        println!("FAILED");
        println!("  Error: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed"));
    }
    println!("OK");

    print!("Checking private key... ");
    if config.polymarket_private_key.is_empty() {
        println!("not set (dry run only)");
    } else {
        match address_from_private_key(&config.polymarket_private_key) {
            Ok(addr) => {
                println!("OK");
                println!("  Wallet address: {}", addr);
            }
            Err(e) => {
                println!("FAILED");
                println!("  Error: {}", e);
                return Err(anyhow::anyhow!("Private key invalid"));
            }
        }
    }

    let params = config.strategy();
    let thresholds = config.risk_thresholds();
    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Series: {} ({}s windows)", config.market_slug_prefix, config.market_window_seconds);
    if config.is_magic_link() && config.polymarket_funder.is_none() {
        println!("  WARNING: Magic.link requires POLYMARKET_FUNDER to be set!");
    }
    println!("  Order Size: {} shares", params.order_size);
    println!("  Profit Ceiling: ${}", params.profit_ceiling);
    println!("  Max Entry Price: ${}", params.max_entry_price);
    println!("  Bid Band: ${} - ${}", params.min_bid, params.max_bid);
    println!("  Max Imbalance: {} shares", thresholds.max_imbalance);
    println!(
        "  Stop New Trades / Force Close: {}s / {}s",
        thresholds.stop_new_trades.as_secs(),
        thresholds.force_close.as_secs()
    );
    println!("  Dry Run: {}", config.dry_run);
    println!("  WebSocket: {}", if config.use_wss { "Enabled" } else { "Disabled" });
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Discover the market that is live right now.
async fn cmd_discover_market() -> anyhow::Result<()> {
    let config = load_config()?;
    let client = PolymarketClient::new(&config)?;
    let mut rotator = SlugRotator::new(client.http().clone(), &config);

    println!("Searching for live {} market...", config.market_slug_prefix);
    match rotator.current_market().await? {
        Some(market) => {
            println!("MARKET FOUND");
            println!("  Slug: {}", market.slug);
            println!("  ID: {}", market.id);
            println!("  UP Token: {}", market.up_token_id);
            println!("  DOWN Token: {}", market.down_token_id);
            println!("  Tick Size: {}", market.tick_size);
            println!("  Time Remaining: {}", market.time_remaining_str());
        }
        None => {
            println!("NO ACTIVE MARKET FOUND");
            println!("Markets open every {}s. Try again shortly.", config.market_window_seconds);
        }
    }
    Ok(())
}

/// Print reconciled positions for the live market.
async fn cmd_status() -> anyhow::Result<()> {
    let config = load_config()?;
    let client = PolymarketClient::new(&config)?;
    let mut rotator = SlugRotator::new(client.http().clone(), &config);

    let Some(market) = rotator.current_market().await? else {
        println!("No active market");
        return Ok(());
    };

    let mut ledger = PositionLedger::new(&market);
    if !ledger.refresh(&client).await {
        return Err(anyhow::anyhow!("Position refresh failed"));
    }
    println!("Market: {} ({} left)", market.slug, market.time_remaining_str());
    println!("{}", serde_json::to_string_pretty(&ledger.snapshot())?);
    Ok(())
}

/// Run the hedging loop until Ctrl+C.
async fn cmd_run(
    dry_run_override: Option<bool>,
    port_override: Option<u16>,
    websocket: bool,
) -> anyhow::Result<()> {
    let mut config = load_config()?;
    if let Some(dry_run) = dry_run_override {
        config.dry_run = dry_run;
    }
    if let Some(port) = port_override {
        config.port = port;
    }
    config.use_wss |= websocket;

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }

    info!(
        mode = if config.dry_run { "PAPER" } else { "LIVE TRADING" },
        series = %config.market_slug_prefix,
        order_size = %config.order_size,
        profit_ceiling = %config.profit_ceiling,
        websocket = config.use_wss,
        "Configuration loaded"
    );

    if config.metrics_enabled {
        metrics::install_prometheus(SocketAddr::from(([0, 0, 0, 0], config.metrics_port)));
    }

    let profit = ProfitCounter::new();
    let app_state = AppState::new(profit.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    let router = create_router(app_state.clone());
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    let client = Arc::new(PolymarketClient::new(&config)?);
    let feed = Arc::new(QuoteFeed::new(
        client.clone(),
        Duration::from_millis(config.quote_stale_ms),
    ));

    let venue: Arc<dyn OrderVenue>;
    let positions: Arc<dyn PositionSource>;
    let mut paper = None;
    if config.dry_run {
        let (tx, rx) = mpsc::unbounded_channel();
        let sim = Arc::new(SimulatedExchange::new().with_fill_notices(tx));
        venue = sim.clone();
        positions = sim.clone();
        paper = Some((sim, rx));
    } else {
        venue = client.clone();
        positions = client.clone();
    }

    let machine = HedgeMachine::new(
        OrderGateway::new(venue, GatewaySettings::from_config(&config)),
        feed.clone(),
        positions,
        RiskGovernor::new(config.risk_thresholds()),
        config.strategy(),
    );
    let rotator = SlugRotator::new(client.http().clone(), &config);

    let mut driver = Driver::new(machine, Box::new(rotator), feed, profit.clone(), app_state);
    if config.use_wss {
        driver = driver.with_push_feed(
            config.polymarket_ws_url.clone(),
            ReconnectConfig::from_config(&config),
        );
    }
    if let Some((sim, fills)) = paper {
        driver = driver.with_paper_exchange(sim).with_fill_notices(fills);
    }

    driver.run(shutdown_signal()).await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server error"),
        Err(e) => error!(error = %e, "HTTP server task failed"),
    }
    info!(profit = %profit.total(), "Stopped");
    Ok(())
}
