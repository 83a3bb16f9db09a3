//! Vela trading service: boots the bus, market data, strategy scheduler,
//! risk manager, order and position managers, and wires them together.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vela_bus::EventBus;
use vela_market_data::{AggregatorConfig, MarketDataAggregator};
use vela_storage::{CandleStore, MemoryCache};
use vela_trading::strategy::runtime::StoreSnapshotSource;
use vela_trading::{
    OrderManager, PositionManager, RiskManager, SimulatedExecutor, StrategyScheduler,
    TradingConfig, TradingCoordinator,
};
use vela_types::Timeframe;

#[derive(Debug, Parser)]
#[command(name = "vela-trader", about = "Vela trading core service")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Candle store base directory
    #[arg(long, default_value = "./data/candles")]
    data_dir: PathBuf,

    /// Timeframe strategies evaluate on
    #[arg(long, default_value = "1h")]
    timeframe: Timeframe,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = TradingConfig::load(cli.config.as_deref()).context("loading configuration")?;

    info!("🚀 starting Vela trading service");

    let bus = Arc::new(EventBus::default());
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(CandleStore::new(&cli.data_dir));

    let aggregator = MarketDataAggregator::new(AggregatorConfig::default(), Arc::clone(&bus));
    aggregator.start().context("starting market data aggregator")?;
    info!("✅ market data aggregator up");

    let source = Arc::new(StoreSnapshotSource::new(
        Arc::clone(&store),
        Arc::clone(&aggregator),
        cli.timeframe,
    ));
    let scheduler = StrategyScheduler::new(config.scheduler.clone(), Arc::clone(&bus), source);
    scheduler.run();
    info!("✅ strategy scheduler up");

    let risk = RiskManager::new(config.risk.clone(), Arc::clone(&bus));
    vela_trading::risk::RiskObserver::attach(Arc::clone(&risk), &bus);
    info!("✅ risk manager up");

    let orders = OrderManager::new(
        config.order_limits.clone(),
        Arc::clone(&bus),
        cache,
        Arc::new(SimulatedExecutor::default()),
    );
    orders.run();
    info!("✅ order manager up");

    let positions = PositionManager::new();

    let coordinator = TradingCoordinator::new(
        Arc::clone(&bus),
        Arc::clone(&scheduler),
        Arc::clone(&risk),
        Arc::clone(&orders),
        Arc::clone(&positions),
    );
    coordinator.attach();
    info!("✅ coordinator wired, trading core ready");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    scheduler.stop();
    aggregator.shutdown().await;
    info!("👋 trading service stopped");
    Ok(())
}
