use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bias::Bullish => write!(f, "bullish"),
            Bias::Bearish => write!(f, "bearish"),
            Bias::Neutral => write!(f, "neutral"),
        }
    }
}

impl Bias {
    pub fn matches(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Bias::Bullish, Direction::Buy) | (Bias::Bearish, Direction::Sell)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityRegime {
    Stable,
    Transitional,
    Volatile,
}

impl fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityRegime::Stable => write!(f, "stable"),
            VolatilityRegime::Transitional => write!(f, "transitional"),
            VolatilityRegime::Volatile => write!(f, "volatile"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VwapSide {
    Above,
    Below,
}

impl VwapSide {
    /// The side a winning position wants price to stay on.
    pub fn favoring(direction: Direction) -> VwapSide {
        match direction {
            Direction::Buy => VwapSide::Above,
            Direction::Sell => VwapSide::Below,
        }
    }
}

impl fmt::Display for VwapSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VwapSide::Above => write!(f, "above"),
            VwapSide::Below => write!(f, "below"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureSignal {
    ChangeOfCharacter,
    BreakOfStructure,
    OrderBlockTouch,
    LiquiditySweep,
}

impl fmt::Display for StructureSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureSignal::ChangeOfCharacter => write!(f, "change_of_character"),
            StructureSignal::BreakOfStructure => write!(f, "break_of_structure"),
            StructureSignal::OrderBlockTouch => write!(f, "order_block_touch"),
            StructureSignal::LiquiditySweep => write!(f, "liquidity_sweep"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanStatus {
    Pending,
    Executing,
    Executed,
    Expired,
    Cancelled,
    Rejected,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Executed
                | PlanStatus::Expired
                | PlanStatus::Cancelled
                | PlanStatus::Rejected
        )
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStatus::Pending => write!(f, "PENDING"),
            PlanStatus::Executing => write!(f, "EXECUTING"),
            PlanStatus::Executed => write!(f, "EXECUTED"),
            PlanStatus::Expired => write!(f, "EXPIRED"),
            PlanStatus::Cancelled => write!(f, "CANCELLED"),
            PlanStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeState {
    Healthy,
    WarningL1,
    WarningL2,
    Hedged,
    Recovering,
    Closed,
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeState::Healthy => write!(f, "healthy"),
            TradeState::WarningL1 => write!(f, "warning_l1"),
            TradeState::WarningL2 => write!(f, "warning_l2"),
            TradeState::Hedged => write!(f, "hedged"),
            TradeState::Recovering => write!(f, "recovering"),
            TradeState::Closed => write!(f, "closed"),
        }
    }
}
