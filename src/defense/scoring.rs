use tracing::debug;

use crate::models::{Bias, Direction, MarketSnapshot, StructureSignal, Timeframe, VolatilityRegime};

const WEIGHT_STRUCTURE: f64 = 0.40;
const WEIGHT_MOMENTUM: f64 = 0.35;
const WEIGHT_LOCATION: f64 = 0.25;

/// Full-range composite score is +/-10; thresholds in config are on this scale.
const SCORE_SCALE: f64 = 10.0;

#[derive(Debug, Clone, Copy)]
pub struct ScoreBreakdown {
    /// Each component in [-1, 1]; positive favors the position.
    pub structure: f64,
    pub momentum: f64,
    pub location: f64,
    pub composite: f64,
    pub regime: VolatilityRegime,
}

/// Structure-break component: supportive minus adverse break confidence.
/// No observations at all degrades to neutral rather than failing the tick.
fn structure_component(direction: Direction, snap: &MarketSnapshot) -> f64 {
    let breaks = snap.structure.iter().filter(|s| {
        matches!(
            s.signal,
            StructureSignal::BreakOfStructure | StructureSignal::ChangeOfCharacter
        )
    });

    let mut supportive: f64 = 0.0;
    let mut adverse: f64 = 0.0;
    for obs in breaks {
        if obs.direction == direction {
            supportive = supportive.max(obs.confidence);
        } else {
            adverse = adverse.max(obs.confidence);
        }
    }
    (supportive - adverse).clamp(-1.0, 1.0)
}

/// Momentum quality signed by whether the entry-timeframe bias still leans
/// with the position. Missing data contributes the neutral midpoint (0).
fn momentum_component(direction: Direction, snap: &MarketSnapshot) -> f64 {
    let quality = match snap.momentum_quality {
        Some(q) => q.clamp(0.0, 1.0),
        None => return 0.0,
    };
    match snap.metrics(Timeframe::M15).map(|m| m.bias) {
        Some(bias) if bias.matches(direction) => quality,
        Some(Bias::Neutral) | None => 0.0,
        Some(_) => -quality,
    }
}

/// Location within the intraday liquidity range: a long bleeding toward the
/// session low (where sell-side stops rest) scores negative, and vice versa.
fn location_component(direction: Direction, snap: &MarketSnapshot) -> f64 {
    let lp = match snap.liquidity_position {
        Some(lp) => lp.clamp(0.0, 1.0),
        None => return 0.0,
    };
    match direction {
        Direction::Buy => 2.0 * lp - 1.0,
        Direction::Sell => 1.0 - 2.0 * lp,
    }
}

/// Weighted composite signal score for an open position, on the +/-10 scale.
pub fn composite_score(direction: Direction, snap: &MarketSnapshot) -> ScoreBreakdown {
    let structure = structure_component(direction, snap);
    let momentum = momentum_component(direction, snap);
    let location = location_component(direction, snap);
    let composite = SCORE_SCALE
        * (WEIGHT_STRUCTURE * structure + WEIGHT_MOMENTUM * momentum + WEIGHT_LOCATION * location);

    debug!(
        "Score {} {}: structure={:.2} momentum={:.2} location={:.2} -> {:.2}",
        snap.symbol, direction, structure, momentum, location, composite
    );

    ScoreBreakdown {
        structure,
        momentum,
        location,
        composite,
        regime: snap.regime,
    }
}
