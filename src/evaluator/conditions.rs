use tracing::debug;

use crate::models::{Bias, Condition, Direction, MarketSnapshot};

/// Evaluate one declared condition against the snapshot. Any unavailable
/// data source makes the condition false — fail-closed, never fail-open.
pub fn condition_holds(cond: &Condition, snap: &MarketSnapshot) -> bool {
    let holds = match cond {
        Condition::PriceNear { target, tolerance } => {
            (snap.mid() - target).abs() <= *tolerance
        }
        Condition::MinConfluence { timeframe, score } => snap
            .metrics(*timeframe)
            .map(|m| m.confluence >= *score)
            .unwrap_or(false),
        Condition::BiasAlignment { timeframe, bias } => snap
            .metrics(*timeframe)
            .map(|m| m.bias == *bias)
            .unwrap_or(false),
        Condition::NetPressure { direction } => snap
            .order_flow
            .as_ref()
            .map(|of| match direction {
                Direction::Buy => of.delta > 0.0,
                Direction::Sell => of.delta < 0.0,
            })
            .unwrap_or(false),
        Condition::CvdTrend { direction } => snap
            .order_flow
            .as_ref()
            .map(|of| match direction {
                Direction::Buy => of.cvd_trend == Bias::Bullish,
                Direction::Sell => of.cvd_trend == Bias::Bearish,
            })
            .unwrap_or(false),
        Condition::AvoidAbsorption => {
            // Unknown zones = feed down = assume we might be inside one.
            matches!(snap.in_absorption_zone(snap.mid()), Some(false))
        }
        Condition::Structure { signal, direction } => snap.has_structure(*signal, *direction),
    };

    if !holds {
        debug!("condition not met: {}", cond);
    }
    holds
}

/// True when every declared condition holds simultaneously.
pub fn all_conditions_hold(conditions: &[Condition], snap: &MarketSnapshot) -> bool {
    conditions.iter().all(|c| condition_holds(c, snap))
}
