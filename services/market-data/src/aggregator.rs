//! Cross-venue fan-in: caches the latest normalized data per venue and pair,
//! rebroadcasts it on the event bus and to direct subscribers, and computes
//! a VWAP-based aggregated price on a fixed cadence.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use vela_bus::{events, EventBus, PublishOptions};
use vela_types::{AggregatedPrice, MarketDataKind, OrderBook, Pair, Ticker, TradeTick, Venue};

use crate::client::{ClientEvent, VenueClient};
use crate::config::AggregatorConfig;
use crate::{MarketDataEvent, MarketPayload, Result};

/// Cheap clone handle used by consumers that only read caches
pub type AggregatorHandle = Arc<MarketDataAggregator>;

/// Multi-venue market-data aggregator
pub struct MarketDataAggregator {
    config: AggregatorConfig,
    bus: Arc<EventBus>,
    clients: Vec<Arc<VenueClient>>,
    tickers: DashMap<(Venue, Pair), Ticker>,
    books: DashMap<(Venue, Pair), OrderBook>,
    trades: DashMap<Pair, Mutex<VecDeque<TradeTick>>>,
    aggregated: DashMap<Pair, AggregatedPrice>,
    /// Direct subscribers keyed `type:pair`
    direct: DashMap<String, broadcast::Sender<MarketDataEvent>>,
    shutdown: watch::Sender<bool>,
}

impl MarketDataAggregator {
    pub fn new(config: AggregatorConfig, bus: Arc<EventBus>) -> Arc<Self> {
        let clients = config
            .venues
            .iter()
            .map(|vc| Arc::new(VenueClient::new(vc.clone())))
            .collect();
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            bus,
            clients,
            tickers: DashMap::new(),
            books: DashMap::new(),
            trades: DashMap::new(),
            aggregated: DashMap::new(),
            direct: DashMap::new(),
            shutdown,
        })
    }

    /// Connect every venue client and start the fan-in and aggregation tasks
    pub fn start(self: &Arc<Self>) -> Result<()> {
        for client in &self.clients {
            let (events_tx, events_rx) = mpsc::channel(4096);
            client.connect(events_tx)?;
            let this = Arc::clone(self);
            let venue = client.venue();
            tokio::spawn(async move { this.fan_in(venue, events_rx).await });
        }

        let this = Arc::clone(self);
        tokio::spawn(async move { this.aggregation_loop().await });
        info!(venues = self.clients.len(), "market-data aggregator started");
        Ok(())
    }

    /// Ask every venue for a channel on `pair`
    pub async fn subscribe(&self, kind: MarketDataKind, pair: &Pair) -> Result<()> {
        for client in &self.clients {
            client.subscribe(kind, pair.clone()).await?;
        }
        Ok(())
    }

    /// Drop a channel on every venue
    pub async fn unsubscribe(&self, kind: MarketDataKind, pair: &Pair) -> Result<()> {
        for client in &self.clients {
            client.unsubscribe(kind, pair.clone()).await?;
        }
        Ok(())
    }

    /// Direct subscription keyed `type:pair`, bypassing the bus
    pub fn subscribe_direct(
        &self,
        kind: MarketDataKind,
        pair: &Pair,
    ) -> broadcast::Receiver<MarketDataEvent> {
        let key = direct_key(kind, pair);
        self.direct
            .entry(key)
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    pub fn latest_ticker(&self, venue: Venue, pair: &Pair) -> Option<Ticker> {
        self.tickers.get(&(venue, pair.clone())).map(|t| t.clone())
    }

    pub fn latest_book(&self, venue: Venue, pair: &Pair) -> Option<OrderBook> {
        self.books.get(&(venue, pair.clone())).map(|b| b.clone())
    }

    pub fn latest_aggregated(&self, pair: &Pair) -> Option<AggregatedPrice> {
        self.aggregated.get(pair).map(|a| a.clone())
    }

    /// Best current price for a pair: the VWAP when we have one, otherwise
    /// any venue's last ticker price
    pub fn latest_price(&self, pair: &Pair) -> Option<Decimal> {
        if let Some(agg) = self.aggregated.get(pair) {
            return Some(agg.vwap);
        }
        self.tickers
            .iter()
            .find(|entry| &entry.key().1 == pair)
            .map(|entry| entry.value().price)
    }

    /// Most recent trades for a pair, newest last
    pub fn recent_trades(&self, pair: &Pair, limit: usize) -> Vec<TradeTick> {
        self.trades
            .get(pair)
            .map(|ring| {
                let ring = ring.lock();
                let skip = ring.len().saturating_sub(limit);
                ring.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Stop the aggregation loop and disconnect every client
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        for client in &self.clients {
            if let Err(e) = client.disconnect().await {
                warn!(venue = %client.venue(), error = %e, "disconnect failed");
            }
        }
    }

    async fn fan_in(self: Arc<Self>, venue: Venue, mut events: mpsc::Receiver<ClientEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Connected => info!(%venue, "venue feed up"),
                ClientEvent::Disconnected { code, reason } => {
                    info!(%venue, ?code, %reason, "venue feed down");
                }
                ClientEvent::Error { message } => warn!(%venue, %message, "venue feed error"),
                ClientEvent::Data(data) => self.ingest(data).await,
            }
        }
        debug!(%venue, "fan-in task finished");
    }

    async fn ingest(&self, event: MarketDataEvent) {
        match &event.data {
            MarketPayload::Ticker(ticker) => {
                self.tickers
                    .insert((event.exchange, event.pair.clone()), ticker.clone());
                let payload = serde_json::json!({
                    "pair": event.pair.canonical(),
                    "price": ticker.price,
                    "exchange": event.exchange,
                    "ts": event.ts,
                });
                self.bus
                    .publish(events::MARKET_PRICE_UPDATE, payload, PublishOptions::default())
                    .await;
            }
            MarketPayload::Book(book) => {
                self.books
                    .insert((event.exchange, event.pair.clone()), book.clone());
            }
            MarketPayload::Trade(trade) => {
                let ring = self
                    .trades
                    .entry(event.pair.clone())
                    .or_insert_with(|| Mutex::new(VecDeque::with_capacity(128)));
                let mut ring = ring.lock();
                if ring.len() == self.config.max_cached_trades {
                    ring.pop_front();
                }
                ring.push_back(trade.clone());
            }
        }

        if let Ok(payload) = serde_json::to_value(&event) {
            self.bus
                .publish(events::MARKET_DATA, payload, PublishOptions::default())
                .await;
        }

        let key = direct_key(event.kind, &event.pair);
        if let Some(sender) = self.direct.get(&key) {
            // Lagging receivers just miss frames; market data is replaceable.
            let _ = sender.send(event);
        }
    }

    async fn aggregation_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut tick =
            tokio::time::interval(Duration::from_millis(self.config.aggregation_interval_ms));
        loop {
            tokio::select! {
                _ = tick.tick() => self.aggregate_once().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("aggregation loop stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One aggregation pass over every pair with at least one live ticker
    pub async fn aggregate_once(&self) {
        let mut pairs: Vec<Pair> = self.tickers.iter().map(|e| e.key().1.clone()).collect();
        pairs.sort_by_key(|p| p.canonical());
        pairs.dedup();

        for pair in pairs {
            let tickers: Vec<Ticker> = self
                .tickers
                .iter()
                .filter(|e| e.key().1 == pair)
                .map(|e| e.value().clone())
                .collect();
            if tickers.is_empty() {
                continue;
            }
            let Some(aggregated) = compute_aggregate(&pair, &tickers) else {
                continue;
            };

            if let Ok(payload) = serde_json::to_value(&aggregated) {
                self.bus
                    .publish(events::MARKET_AGGREGATED_PRICE, payload, PublishOptions::default())
                    .await;
            }
            self.aggregated.insert(pair, aggregated);
        }
    }
}

fn direct_key(kind: MarketDataKind, pair: &Pair) -> String {
    format!("{}:{}", kind.as_str(), pair.canonical())
}

fn compute_aggregate(pair: &Pair, tickers: &[Ticker]) -> Option<AggregatedPrice> {
    let total_volume: Decimal = tickers.iter().map(|t| t.volume).sum();
    let vwap = if total_volume > Decimal::ZERO {
        tickers.iter().map(|t| t.price * t.volume).sum::<Decimal>() / total_volume
    } else {
        // No volume reported anywhere: fall back to the plain mean.
        tickers.iter().map(|t| t.price).sum::<Decimal>() / Decimal::from(tickers.len())
    };

    let best_bid = tickers.iter().map(|t| t.bid).max()?;
    let best_ask = tickers.iter().map(|t| t.ask).min()?;
    let spread = best_ask - best_bid;
    let spread_pct = if best_bid > Decimal::ZERO {
        spread / best_bid
    } else {
        Decimal::ZERO
    };

    let mut exchanges: Vec<Venue> = tickers.iter().map(|t| t.exchange).collect();
    exchanges.sort_by_key(|v| v.as_str());
    exchanges.dedup();

    Some(AggregatedPrice {
        pair: pair.clone(),
        vwap,
        best_bid,
        best_ask,
        spread,
        spread_pct,
        total_volume,
        exchange_count: exchanges.len(),
        exchanges,
        ts: chrono::Utc::now().timestamp_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ticker(venue: Venue, price: Decimal, bid: Decimal, ask: Decimal, volume: Decimal) -> Ticker {
        Ticker {
            exchange: venue,
            pair: Pair::parse("BTC/USD").unwrap(),
            price,
            bid,
            ask,
            high_24h: price + dec!(100),
            low_24h: price - dec!(100),
            volume,
            ts: 1,
        }
    }

    #[test]
    fn vwap_weights_by_volume() {
        let pair = Pair::parse("BTC/USD").unwrap();
        let tickers = vec![
            ticker(Venue::Binance, dec!(50000), dec!(49990), dec!(50010), dec!(30)),
            ticker(Venue::Kraken, dec!(50100), dec!(49995), dec!(50005), dec!(10)),
        ];
        let agg = compute_aggregate(&pair, &tickers).unwrap();
        // (50000*30 + 50100*10) / 40 = 50025
        assert_eq!(agg.vwap, dec!(50025));
        assert_eq!(agg.best_bid, dec!(49995));
        assert_eq!(agg.best_ask, dec!(50005));
        assert_eq!(agg.spread, dec!(10));
        assert_eq!(agg.exchange_count, 2);
    }

    #[test]
    fn zero_volume_falls_back_to_mean() {
        let pair = Pair::parse("BTC/USD").unwrap();
        let tickers = vec![
            ticker(Venue::Binance, dec!(100), dec!(99), dec!(101), dec!(0)),
            ticker(Venue::Kraken, dec!(110), dec!(109), dec!(111), dec!(0)),
        ];
        let agg = compute_aggregate(&pair, &tickers).unwrap();
        assert_eq!(agg.vwap, dec!(105));
    }

    #[tokio::test]
    async fn ingest_updates_caches_and_direct_subscribers() {
        let bus = Arc::new(EventBus::default());
        let aggregator = MarketDataAggregator::new(AggregatorConfig::default(), bus);
        let pair = Pair::parse("BTC/USD").unwrap();

        let mut direct = aggregator.subscribe_direct(MarketDataKind::Ticker, &pair);

        let t = ticker(Venue::Kraken, dec!(50000), dec!(49990), dec!(50010), dec!(5));
        aggregator
            .ingest(MarketDataEvent {
                kind: MarketDataKind::Ticker,
                exchange: Venue::Kraken,
                pair: pair.clone(),
                data: MarketPayload::Ticker(t.clone()),
                ts: 1,
            })
            .await;

        assert_eq!(aggregator.latest_ticker(Venue::Kraken, &pair), Some(t));
        assert_eq!(aggregator.latest_price(&pair), Some(dec!(50000)));

        let received = direct.recv().await.unwrap();
        assert_eq!(received.kind, MarketDataKind::Ticker);

        aggregator.aggregate_once().await;
        let agg = aggregator.latest_aggregated(&pair).unwrap();
        assert_eq!(agg.vwap, dec!(50000));
    }

    #[tokio::test]
    async fn trade_ring_is_bounded() {
        let bus = Arc::new(EventBus::default());
        let config = AggregatorConfig { max_cached_trades: 5, ..Default::default() };
        let aggregator = MarketDataAggregator::new(config, bus);
        let pair = Pair::parse("ETH/USD").unwrap();

        for i in 0..12 {
            aggregator
                .ingest(MarketDataEvent {
                    kind: MarketDataKind::Trade,
                    exchange: Venue::Coinbase,
                    pair: pair.clone(),
                    data: MarketPayload::Trade(TradeTick {
                        exchange: Venue::Coinbase,
                        pair: pair.clone(),
                        price: Decimal::from(i),
                        amount: dec!(1),
                        side: None,
                        ts: i,
                    }),
                    ts: i,
                })
                .await;
        }

        let trades = aggregator.recent_trades(&pair, 100);
        assert_eq!(trades.len(), 5);
        assert_eq!(trades[0].ts, 7);
        assert_eq!(trades[4].ts, 11);
    }
}
