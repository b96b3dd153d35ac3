use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Broker gateway failures. `Rejected` and `InsufficientMargin` are the
/// broker explicitly refusing the order; `Connectivity` is transport-level
/// and always retryable on a later tick.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("insufficient margin")]
    InsufficientMargin,

    #[error("broker unreachable: {0}")]
    Connectivity(String),
}

impl BrokerError {
    /// Transport failures leave the plan/position in place for retry;
    /// explicit rejections do not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Connectivity(_))
    }
}

/// A required snapshot field was missing. Conditions that depend on it
/// evaluate false (fail-closed); this is logged at debug, never surfaced.
#[derive(Debug, Error)]
#[error("market data unavailable: {0}")]
pub struct DataUnavailable(pub &'static str);

/// A state transition that must be unreachable by construction was attempted
/// anyway, e.g. executing an already-EXECUTED plan. Logged at error level.
#[derive(Debug, Error)]
#[error("invariant violation: {0}")]
pub struct InvariantViolation(pub String);

/// Plan-ingestion failures, returned to the command surface as typed results.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("unknown condition key: {0}")]
    UnknownCondition(String),

    #[error("condition `{key}` has invalid value: {reason}")]
    InvalidConditionValue { key: String, reason: String },

    #[error("invalid plan geometry: {0}")]
    InvalidGeometry(String),

    #[error("volume must be positive, got {0}")]
    InvalidVolume(f64),

    #[error("plan not found: {0}")]
    NotFound(String),
}

/// Why a plan was held back or rejected during an evaluation pass. This is a
/// normal negative evaluation result, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum RejectReason {
    /// reward/risk below the configured minimum, or reward non-positive.
    RiskReward { ratio: f64, min: f64 },
    /// Take-profit on the wrong side of entry for the stated direction.
    WrongSideReward,
    /// Spread + expected slippage eats too much of the reward.
    CostErosion { cost_fraction: f64 },
    /// Stop distance under 0.5x ATR; likely stopped out by noise.
    StopInsideNoise { risk: f64, atr: f64 },
    /// Low-liquidity session and the strategy tag is not range-suited.
    LowLiquiditySession { session: String },
    /// High-impact news window active for the symbol.
    NewsBlackout,
    /// Current spread above the nominal-spread multiple.
    SpreadTooWide { spread: f64, nominal: f64 },
    /// Past expires_at.
    Expired,
    /// A gate's required snapshot input was missing; retried next tick.
    MissingData { field: String },
    /// Broker refused the order.
    BrokerRejected { message: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::RiskReward { ratio, min } => {
                write!(f, "risk/reward {:.3} below minimum {:.2}", ratio, min)
            }
            RejectReason::WrongSideReward => {
                write!(f, "take-profit on the wrong side of entry")
            }
            RejectReason::CostErosion { cost_fraction } => {
                write!(f, "execution cost {:.1}% of reward", cost_fraction * 100.0)
            }
            RejectReason::StopInsideNoise { risk, atr } => {
                write!(f, "stop distance {:.5} under 0.5x ATR {:.5}", risk, atr)
            }
            RejectReason::LowLiquiditySession { session } => {
                write!(f, "low-liquidity session `{}`", session)
            }
            RejectReason::NewsBlackout => write!(f, "news blackout window active"),
            RejectReason::SpreadTooWide { spread, nominal } => {
                write!(f, "spread {:.5} above 3x nominal {:.5}", spread, nominal)
            }
            RejectReason::Expired => write!(f, "plan expired"),
            RejectReason::MissingData { field } => {
                write!(f, "snapshot missing `{}`", field)
            }
            RejectReason::BrokerRejected { message } => {
                write!(f, "broker rejected: {}", message)
            }
        }
    }
}
