use tracing::debug;

use crate::config::Config;
use crate::error::RejectReason;
use crate::models::{MarketSnapshot, TradePlan, VolatilityRegime};

/// Result of the mandatory gate pipeline. Fatal failures depend only on the
/// plan's immutable geometry and reject the plan terminally; retryable
/// failures are market-state dependent and re-checked next tick.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Pass,
    Fatal(RejectReason),
    Retry(RejectReason),
}

/// Run the mandatory gates in order, independent of declared conditions.
/// Expiry is handled by the evaluator before this pipeline runs.
pub fn check_gates(plan: &TradePlan, snap: &MarketSnapshot, cfg: &Config) -> GateOutcome {
    let risk = plan.risk();
    let reward = plan.signed_reward();

    // 1. Risk/reward geometry. Reward must sit on the correct side of entry
    //    and clear both the configured minimum and 1.0 strictly.
    if reward <= 0.0 {
        debug!("{}: take-profit on wrong side of entry", plan.plan_id);
        return GateOutcome::Fatal(RejectReason::WrongSideReward);
    }
    if risk <= 0.0 {
        return GateOutcome::Fatal(RejectReason::RiskReward {
            ratio: 0.0,
            min: cfg.gates.min_rr,
        });
    }
    let min_rr = plan.min_rr.unwrap_or(cfg.gates.min_rr).max(1.0);
    let ratio = reward / risk;
    if ratio < min_rr {
        debug!("{}: R/R {:.3} below {:.2}", plan.plan_id, ratio, min_rr);
        return GateOutcome::Fatal(RejectReason::RiskReward { ratio, min: min_rr });
    }

    // 2. Execution-cost erosion: spread plus assumed slippage vs reward.
    let slippage = match snap.regime {
        VolatilityRegime::Volatile => cfg.gates.slippage_volatile,
        _ => cfg.gates.slippage_normal,
    };
    let cost = snap.spread + slippage * risk;
    let cost_fraction = cost / reward;
    if cost_fraction > cfg.gates.max_cost_fraction {
        debug!(
            "{}: cost {:.1}% of reward",
            plan.plan_id,
            cost_fraction * 100.0
        );
        return GateOutcome::Retry(RejectReason::CostErosion { cost_fraction });
    }

    // 3. Immediate-stop-out risk: stop inside the noise band.
    if plan.atr_validation {
        match snap.atr(cfg.gates.atr_timeframe) {
            Some(atr) => {
                if risk < cfg.gates.atr_stop_multiple * atr {
                    debug!("{}: stop {:.5} inside 0.5x ATR {:.5}", plan.plan_id, risk, atr);
                    return GateOutcome::Retry(RejectReason::StopInsideNoise { risk, atr });
                }
            }
            None => {
                return GateOutcome::Retry(RejectReason::MissingData {
                    field: format!("atr[{}]", cfg.gates.atr_timeframe),
                })
            }
        }
    }

    // 4. Session gate: low-liquidity hours block everything except the
    //    range/mean-reversion allow-list.
    let session_required = plan.require_active_session.unwrap_or(snap.session_driven);
    if session_required
        && snap.session.low_liquidity
        && !cfg.allows_low_liquidity(&plan.strategy_tag)
    {
        debug!(
            "{}: blocked in `{}` (tag {})",
            plan.plan_id, snap.session.name, plan.strategy_tag
        );
        return GateOutcome::Retry(RejectReason::LowLiquiditySession {
            session: snap.session.name.clone(),
        });
    }

    // 5. News blackout.
    if snap.news_blackout {
        debug!("{}: news blackout active", plan.plan_id);
        return GateOutcome::Retry(RejectReason::NewsBlackout);
    }

    // 6. Execution quality: spread against the symbol's nominal.
    if snap.nominal_spread > 0.0 && snap.spread > cfg.gates.max_spread_multiple * snap.nominal_spread
    {
        debug!(
            "{}: spread {:.5} > {}x nominal {:.5}",
            plan.plan_id, snap.spread, cfg.gates.max_spread_multiple, snap.nominal_spread
        );
        return GateOutcome::Retry(RejectReason::SpreadTooWide {
            spread: snap.spread,
            nominal: snap.nominal_spread,
        });
    }

    GateOutcome::Pass
}
