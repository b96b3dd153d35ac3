use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{Bias, Direction, StructureSignal, Timeframe, VolatilityRegime, VwapSide};

/// Session label as resolved for the snapshot's symbol at capture time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub name: String,
    pub weight: f64,
    pub low_liquidity: bool,
}

/// Per-timeframe indicator readout supplied by the market-data collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeframeMetrics {
    /// Weighted composite, 0-100.
    pub confluence: f64,
    pub bias: Bias,
    pub atr: f64,
}

/// Order-flow readout. Absent entirely when the feed is down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFlow {
    /// Net buy-minus-sell volume over the feed's rolling window.
    pub delta: f64,
    pub cvd_trend: Bias,
    /// Price bands where aggression failed to move price: (low, high).
    pub absorption_zones: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StructureObservation {
    pub signal: StructureSignal,
    pub direction: Direction,
    /// Detector confidence, 0-1.
    pub confidence: f64,
}

/// An immutable, timestamped read of market conditions for one symbol.
/// Constructed fresh per refresh and never mutated; readers hold it behind
/// an `Arc` so a cache refresh can never tear a snapshot mid-evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub taken_at: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    pub spread: f64,
    /// The symbol's typical spread, for execution-quality comparison.
    pub nominal_spread: f64,
    pub session: SessionInfo,
    pub regime: VolatilityRegime,
    pub timeframes: HashMap<Timeframe, TimeframeMetrics>,
    pub order_flow: Option<OrderFlow>,
    pub structure: Vec<StructureObservation>,
    pub vwap: Option<f64>,
    pub news_blackout: bool,
    /// Whether this symbol's volatility is session-driven (forex/indices)
    /// as opposed to round-the-clock (crypto).
    pub session_driven: bool,
    /// Momentum quality from the collaborator, 0-1, if available.
    pub momentum_quality: Option<f64>,
    /// Position of price within the intraday liquidity range, 0-1
    /// (0 = at session low, 1 = at session high), if available.
    pub liquidity_position: Option<f64>,
}

impl MarketSnapshot {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Fill price for the given direction: BUY pays the ask, SELL hits the bid.
    pub fn entry_price(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Buy => self.ask,
            Direction::Sell => self.bid,
        }
    }

    pub fn metrics(&self, tf: Timeframe) -> Option<&TimeframeMetrics> {
        self.timeframes.get(&tf)
    }

    pub fn atr(&self, tf: Timeframe) -> Option<f64> {
        self.timeframes.get(&tf).map(|m| m.atr)
    }

    /// Which side of VWAP the mid price sits on, if VWAP is known.
    pub fn vwap_side(&self) -> Option<VwapSide> {
        self.vwap.map(|v| {
            if self.mid() >= v {
                VwapSide::Above
            } else {
                VwapSide::Below
            }
        })
    }

    pub fn in_absorption_zone(&self, price: f64) -> Option<bool> {
        self.order_flow
            .as_ref()
            .map(|of| of.absorption_zones.iter().any(|&(lo, hi)| price >= lo && price <= hi))
    }

    pub fn has_structure(&self, signal: StructureSignal, direction: Direction) -> bool {
        self.structure
            .iter()
            .any(|s| s.signal == signal && s.direction == direction)
    }
}
