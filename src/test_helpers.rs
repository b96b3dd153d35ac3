//! Shared builders for unit tests. Defaults are chosen to pass every gate:
//! individual tests mutate exactly the field under test.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::broker::{Broker, BrokerPosition, OrderFill, OrderRequest, Quote};
use crate::config::{Config, DefenseConfig, GateConfig, SessionTime};
use crate::error::BrokerError;
use crate::models::{
    Bias, Direction, MarketSnapshot, OrderFlow, PlanStatus, SessionInfo, Timeframe,
    TimeframeMetrics, TradePlan, VolatilityRegime,
};

pub fn default_test_config() -> Config {
    let mut sessions = HashMap::new();
    sessions.insert(
        "asian".to_string(),
        SessionTime {
            start: (20, 0),
            end: (0, 0),
        },
    );
    sessions.insert(
        "london".to_string(),
        SessionTime {
            start: (2, 0),
            end: (5, 0),
        },
    );
    sessions.insert(
        "ny_forex".to_string(),
        SessionTime {
            start: (7, 0),
            end: (10, 0),
        },
    );
    sessions.insert(
        "ny_indices".to_string(),
        SessionTime {
            start: (8, 30),
            end: (12, 0),
        },
    );

    let mut session_weights = HashMap::new();
    session_weights.insert("london".to_string(), 1.5);
    session_weights.insert("ny_forex".to_string(), 1.5);
    session_weights.insert("ny_indices".to_string(), 1.3);
    session_weights.insert("asian".to_string(), 0.3);
    session_weights.insert("off_session".to_string(), 0.3);

    Config {
        symbols: vec!["XAUUSD".to_string()],
        broker_url: "http://127.0.0.1:8787".to_string(),
        broker_token: String::new(),
        feed_url: "http://127.0.0.1:8788".to_string(),
        evaluator_interval_secs: 30,
        snapshot_ttl_secs: 30,
        gates: GateConfig {
            min_rr: 1.5,
            max_cost_fraction: 0.20,
            slippage_volatile: 0.05,
            slippage_normal: 0.03,
            atr_stop_multiple: 0.5,
            atr_timeframe: Timeframe::M15,
            max_spread_multiple: 3.0,
        },
        low_liquidity_tags: vec![
            "range-scalp".to_string(),
            "range-fade".to_string(),
            "mean-reversion".to_string(),
            "fvg-retracement".to_string(),
            "pd-array".to_string(),
            "ob-rejection".to_string(),
        ],
        defense: DefenseConfig {
            warn_l1_score: -3.0,
            warn_l2_score: -5.0,
            hedge_score: -8.0,
            restore_score: -1.0,
            hedge_ratio: 0.5,
            hedge_stop_atr: 0.5,
            flat_timer_minutes: 75,
            fast_check_secs: 30,
            deep_check_secs: 900,
            early_deep_cross_count: 3,
        },
        sessions,
        session_weights,
        data_dir: "data".to_string(),
        archive_interval_secs: 300,
        log_level: "info".to_string(),
    }
}

/// A benign snapshot that passes every gate, customized per test.
pub fn snapshot_with(f: impl FnOnce(&mut MarketSnapshot)) -> MarketSnapshot {
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

pub fn make_plan(direction: Direction, entry: f64, stop: f64, target: f64) -> TradePlan {
    let now = Utc::now();
    TradePlan {
        plan_id: format!("test-{}", now.timestamp_nanos_opt().unwrap_or_default()),
        symbol: "XAUUSD".to_string(),
        direction,
        entry_price: entry,
        stop_loss: stop,
        take_profit: target,
        volume: 0.5,
        status: PlanStatus::Pending,
        conditions: vec![],
        strategy_tag: "range-scalp".to_string(),
        created_at: now,
        expires_at: now + Duration::hours(8),
        min_rr: None,
        atr_validation: false,
        require_active_session: None,
        ticket: None,
        executed_at: None,
        profit_loss: None,
        exit_price: None,
        close_time: None,
        close_reason: None,
        cancel_requested: false,
        reject_reason: None,
    }
}

pub fn plan_with(f: impl FnOnce(&mut TradePlan)) -> TradePlan {
    let mut plan = make_plan(Direction::Buy, 100.0, 95.0, 110.0);
    f(&mut plan);
    plan
}

/// In-memory broker double. Records every order; failure modes are armed
/// per test through the public fields.
pub struct MockBroker {
    pub orders: Vec<OrderRequest>,
    pub closed: Vec<u64>,
    pub positions: Vec<BrokerPosition>,
    /// Refuse the next order with this message (consumed once).
    pub reject_next: Option<String>,
    /// Every call fails at the transport level while set.
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

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn get_quote(&mut self, _symbol: &str) -> Result<Quote, BrokerError> {
        if self.fail_transport {
            return Err(BrokerError::Connectivity("mock transport down".to_string()));
        }
        Ok(Quote {
            bid: 99.95,
            ask: 100.05,
        })
    }

    async fn place_order(&mut self, order: &OrderRequest) -> Result<OrderFill, BrokerError> {
        if self.fail_transport {
            return Err(BrokerError::Connectivity("mock transport down".to_string()));
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
        self.orders.push(order.clone());
        Ok(fill)
    }

    async fn modify_position(
        &mut self,
        _ticket: u64,
        _stop_loss: Option<f64>,
        _take_profit: Option<f64>,
    ) -> Result<(), BrokerError> {
        if self.fail_transport {
            return Err(BrokerError::Connectivity("mock transport down".to_string()));
        }
        Ok(())
    }

    async fn close_position(&mut self, ticket: u64) -> Result<(), BrokerError> {
        if self.fail_transport {
            return Err(BrokerError::Connectivity("mock transport down".to_string()));
        }
        self.closed.push(ticket);
        self.positions.retain(|p| p.ticket != ticket);
        Ok(())
    }

    async fn open_positions(&mut self) -> Result<Vec<BrokerPosition>, BrokerError> {
        if self.fail_transport {
            return Err(BrokerError::Connectivity("mock transport down".to_string()));
        }
        Ok(self.positions.clone())
    }
}
