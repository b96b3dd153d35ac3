use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use trade_sentinel::broker::{Broker, BrokerPosition, OrderFill, OrderRequest, Quote};
use trade_sentinel::config::Config;
use trade_sentinel::error::BrokerError;
use trade_sentinel::market::MarketFeed;
use trade_sentinel::models::{
    Bias, Direction, MarketSnapshot, OrderFlow, SessionInfo, Timeframe, TimeframeMetrics,
    VolatilityRegime,
};

pub fn test_config() -> Config {
    let mut cfg = Config::from_env();
    cfg.symbols = vec!["XAUUSD".to_string()];
    cfg.data_dir = std::env::temp_dir()
        .join(format!("sentinel_integ_{}", std::process::id()))
        .to_string_lossy()
        .to_string();
    cfg
}

/// A benign snapshot that clears every gate; tests mutate the field under test.
pub fn make_snapshot(f: impl FnOnce(&mut MarketSnapshot)) -> MarketSnapshot {
    let mut timeframes = HashMap::new();
    timeframes.insert(
        Timeframe::M15,
        TimeframeMetrics {
            confluence: 70.0,
            bias: Bias::Bullish,
            atr: 5.0,
        },
    );
    timeframes.insert(
        Timeframe::H1,
        TimeframeMetrics {
            confluence: 65.0,
            bias: Bias::Bullish,
            atr: 12.0,
        },
    );

    let mut snap = MarketSnapshot {
        symbol: "XAUUSD".to_string(),
        taken_at: Utc::now(),
        bid: 99.95,
        ask: 100.05,
        spread: 0.1,
        nominal_spread: 0.05,
        session: SessionInfo {
            name: "london".to_string(),
            weight: 1.5,
            low_liquidity: false,
        },
        regime: VolatilityRegime::Stable,
        timeframes,
        order_flow: Some(OrderFlow {
            delta: 20.0,
            cvd_trend: Bias::Bullish,
            absorption_zones: vec![],
        }),
        structure: vec![],
        vwap: Some(99.5),
        news_blackout: false,
        session_driven: true,
        momentum_quality: None,
        liquidity_position: None,
    };
    f(&mut snap);
    snap
}

/// Recording broker double with per-test failure switches.
pub struct MockBroker {
    pub orders: Vec<OrderRequest>,
    pub closed: Vec<u64>,
    pub positions: Vec<BrokerPosition>,
    pub reject_next: Option<String>,
    pub fail_transport: bool,
    next_ticket: u64,
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            orders: Vec::new(),
            closed: Vec::new(),
            positions: Vec::new(),
            reject_next: None,
            fail_transport: false,
            next_ticket: 1000,
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn get_quote(&mut self, _symbol: &str) -> Result<Quote, BrokerError> {
        if self.fail_transport {
            return Err(BrokerError::Connectivity("mock down".to_string()));
        }
        Ok(Quote {
            bid: 99.95,
            ask: 100.05,
        })
    }

    async fn place_order(&mut self, order: &OrderRequest) -> Result<OrderFill, BrokerError> {
        if self.fail_transport {
            return Err(BrokerError::Connectivity("mock down".to_string()));
        }
        if let Some(msg) = self.reject_next.take() {
            if msg.contains("margin") {
                return Err(BrokerError::InsufficientMargin);
            }
            return Err(BrokerError::Rejected(msg));
        }
        self.next_ticket += 1;
        let fill = OrderFill {
            ticket: self.next_ticket,
            fill_price: match order.direction {
                Direction::Buy => 100.05,
                Direction::Sell => 99.95,
            },
        };
        self.positions.push(BrokerPosition {
            ticket: fill.ticket,
            symbol: order.symbol.clone(),
            direction: order.direction,
            volume: order.volume,
            entry_price: fill.fill_price,
            profit: 0.0,
        });
        self.orders.push(order.clone());
        Ok(fill)
    }

    async fn modify_position(
        &mut self,
        _ticket: u64,
        _stop_loss: Option<f64>,
        _take_profit: Option<f64>,
    ) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn close_position(&mut self, ticket: u64) -> Result<(), BrokerError> {
        if self.fail_transport {
            return Err(BrokerError::Connectivity("mock down".to_string()));
        }
        self.closed.push(ticket);
        self.positions.retain(|p| p.ticket != ticket);
        Ok(())
    }

    async fn open_positions(&mut self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(self.positions.clone())
    }
}

/// Feed double serving canned snapshots per symbol.
pub struct MockFeed {
    pub snapshots: HashMap<String, MarketSnapshot>,
}

impl MockFeed {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self {
            snapshots: HashMap::new(),
        }
    }
}

#[async_trait]
impl MarketFeed for MockFeed {
    async fn fetch_snapshot(&mut self, symbol: &str) -> Result<MarketSnapshot> {
        match self.snapshots.get(symbol) {
            Some(snap) => Ok(snap.clone()),
            None => bail!("no canned snapshot for {}", symbol),
        }
    }
}
