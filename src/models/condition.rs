use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::PlanError;
use crate::models::{Bias, Direction, StructureSignal, Timeframe};

/// A declared entry condition. The set is closed: string-keyed inputs are
/// normalized into these variants at plan ingestion, so evaluation never
/// sees a raw key. All conditions on a plan combine with logical AND.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Condition {
    /// Price within `tolerance` of `target` (absolute distance).
    PriceNear { target: f64, tolerance: f64 },
    /// Confluence score for the timeframe at or above `score` (0-100).
    MinConfluence { timeframe: Timeframe, score: f64 },
    /// Higher-timeframe bias must lean with the plan direction.
    BiasAlignment { timeframe: Timeframe, bias: Bias },
    /// Net order-flow delta on the plan's side (buying for BUY, selling for SELL).
    NetPressure { direction: Direction },
    /// Cumulative volume delta trending with the plan direction.
    CvdTrend { direction: Direction },
    /// Current price must not sit inside a known absorption zone.
    AvoidAbsorption,
    /// A structure signal in the plan's direction must be present.
    Structure {
        signal: StructureSignal,
        direction: Direction,
    },
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::PriceNear { target, tolerance } => {
                write!(f, "price within {} of {}", tolerance, target)
            }
            Condition::MinConfluence { timeframe, score } => {
                write!(f, "{} confluence >= {}", timeframe, score)
            }
            Condition::BiasAlignment { timeframe, bias } => {
                write!(f, "{} bias {}", timeframe, bias)
            }
            Condition::NetPressure { direction } => {
                write!(f, "net pressure {}", direction)
            }
            Condition::CvdTrend { direction } => write!(f, "cvd trend {}", direction),
            Condition::AvoidAbsorption => write!(f, "outside absorption zones"),
            Condition::Structure { signal, direction } => {
                write!(f, "{} {}", signal, direction)
            }
        }
    }
}

/// A raw, string-keyed condition as it arrives from the command surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionSpec {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

/// Upstream plan sources spell the same semantic condition several ways.
/// Aliasing is a normalization step at ingestion only.
fn canonical_key(key: &str) -> &str {
    match key.trim().to_lowercase().replace('-', "_").as_str() {
        "price_near" | "price_proximity" | "target_price" | "entry_proximity" => "price_near",
        "min_confluence" | "confluence" | "confluence_score" | "min_confluence_score" => {
            "min_confluence"
        }
        "bias" | "bias_alignment" | "mtf_bias" | "htf_bias" => "bias_alignment",
        "net_pressure" | "net_buying_pressure" | "net_selling_pressure" | "order_flow_pressure"
        | "orderflow_delta" | "orderflow_delta_positive" | "orderflow_delta_negative"
        | "delta_positive" | "delta_negative" => "net_pressure",
        "cvd_trend" | "cvd" | "cumulative_delta_trend" | "delta_trend" => "cvd_trend",
        "avoid_absorption" | "absorption" | "no_absorption" | "absorption_avoidance" => {
            "avoid_absorption"
        }
        "structure" | "structure_signal" | "choch" | "bos" | "order_block" | "liquidity_sweep" => {
            "structure"
        }
        _ => "",
    }
}

fn num_field(obj: &Value, field: &str, key: &str) -> Result<f64, PlanError> {
    obj.get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| PlanError::InvalidConditionValue {
            key: key.to_string(),
            reason: format!("missing numeric field `{}`", field),
        })
}

fn str_field<'a>(obj: &'a Value, field: &str, key: &str) -> Result<&'a str, PlanError> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| PlanError::InvalidConditionValue {
            key: key.to_string(),
            reason: format!("missing string field `{}`", field),
        })
}

fn parse_timeframe(s: &str, key: &str) -> Result<Timeframe, PlanError> {
    Timeframe::from_str_loose(s).ok_or_else(|| PlanError::InvalidConditionValue {
        key: key.to_string(),
        reason: format!("unknown timeframe `{}`", s),
    })
}

fn parse_bias(s: &str, key: &str) -> Result<Bias, PlanError> {
    match s.trim().to_lowercase().as_str() {
        "bullish" | "long" | "buy" => Ok(Bias::Bullish),
        "bearish" | "short" | "sell" => Ok(Bias::Bearish),
        "neutral" => Ok(Bias::Neutral),
        other => Err(PlanError::InvalidConditionValue {
            key: key.to_string(),
            reason: format!("unknown bias `{}`", other),
        }),
    }
}

fn parse_direction(s: &str, key: &str) -> Result<Direction, PlanError> {
    match s.trim().to_lowercase().as_str() {
        "buy" | "long" | "buying" => Ok(Direction::Buy),
        "sell" | "short" | "selling" => Ok(Direction::Sell),
        other => Err(PlanError::InvalidConditionValue {
            key: key.to_string(),
            reason: format!("unknown direction `{}`", other),
        }),
    }
}

fn parse_structure_signal(s: &str, key: &str) -> Result<StructureSignal, PlanError> {
    match s.trim().to_lowercase().replace('-', "_").as_str() {
        "choch" | "change_of_character" => Ok(StructureSignal::ChangeOfCharacter),
        "bos" | "break_of_structure" => Ok(StructureSignal::BreakOfStructure),
        "order_block" | "order_block_touch" | "ob_touch" => Ok(StructureSignal::OrderBlockTouch),
        "liquidity_sweep" | "sweep" => Ok(StructureSignal::LiquiditySweep),
        other => Err(PlanError::InvalidConditionValue {
            key: key.to_string(),
            reason: format!("unknown structure signal `{}`", other),
        }),
    }
}

impl Condition {
    /// Normalize one raw spec into a canonical condition. `plan_direction`
    /// fills in directional conditions whose spec carries only a boolean
    /// (e.g. `net_buying_pressure: true` on a BUY plan).
    pub fn from_spec(spec: &ConditionSpec, plan_direction: Direction) -> Result<Self, PlanError> {
        let key = canonical_key(&spec.key);
        let v = &spec.value;
        match key {
            "price_near" => Ok(Condition::PriceNear {
                target: num_field(v, "target", &spec.key)?,
                tolerance: num_field(v, "tolerance", &spec.key)?,
            }),
            "min_confluence" => {
                let score = match v {
                    Value::Number(n) => n.as_f64().unwrap_or(0.0),
                    _ => num_field(v, "score", &spec.key)?,
                };
                if !(0.0..=100.0).contains(&score) {
                    return Err(PlanError::InvalidConditionValue {
                        key: spec.key.clone(),
                        reason: format!("score {} outside 0-100", score),
                    });
                }
                let timeframe = match v.get("timeframe").and_then(Value::as_str) {
                    Some(s) => parse_timeframe(s, &spec.key)?,
                    None => Timeframe::M15,
                };
                Ok(Condition::MinConfluence { timeframe, score })
            }
            "bias_alignment" => {
                let bias = match v {
                    Value::String(s) => parse_bias(s, &spec.key)?,
                    _ => parse_bias(str_field(v, "bias", &spec.key)?, &spec.key)?,
                };
                let timeframe = match v.get("timeframe").and_then(Value::as_str) {
                    Some(s) => parse_timeframe(s, &spec.key)?,
                    None => Timeframe::H1,
                };
                Ok(Condition::BiasAlignment { timeframe, bias })
            }
            "net_pressure" => {
                let direction = match v {
                    Value::String(s) => parse_direction(s, &spec.key)?,
                    Value::Bool(true) | Value::Null => plan_direction,
                    _ => parse_direction(str_field(v, "direction", &spec.key)?, &spec.key)?,
                };
                Ok(Condition::NetPressure { direction })
            }
            "cvd_trend" => {
                let direction = match v {
                    Value::String(s) => parse_direction(s, &spec.key)?,
                    Value::Bool(true) | Value::Null => plan_direction,
                    _ => parse_direction(str_field(v, "direction", &spec.key)?, &spec.key)?,
                };
                Ok(Condition::CvdTrend { direction })
            }
            "avoid_absorption" => Ok(Condition::AvoidAbsorption),
            "structure" => {
                let signal = match v {
                    Value::String(s) => parse_structure_signal(s, &spec.key)?,
                    Value::Null => parse_structure_signal(&spec.key, &spec.key)?,
                    _ => parse_structure_signal(
                        str_field(v, "signal", &spec.key)?,
                        &spec.key,
                    )?,
                };
                let direction = match v.get("direction").and_then(Value::as_str) {
                    Some(s) => parse_direction(s, &spec.key)?,
                    None => plan_direction,
                };
                Ok(Condition::Structure { signal, direction })
            }
            _ => Err(PlanError::UnknownCondition(spec.key.clone())),
        }
    }
}
