use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::broker::Broker;
use crate::defense::{DefenseEvent, DefenseMonitor};
use crate::error::{PlanError, RejectReason};
use crate::models::{Condition, ConditionSpec, Direction, PlanStatus, TradePlan, TradeState};
use crate::store::PlanStore;

/// Default plan lifetime when the request carries no expiry.
const DEFAULT_TTL_HOURS: i64 = 8;

/// Inbound plan submission, as sent by strategy tooling. Conditions arrive
/// as loose key/value pairs and are normalized here, once, at ingestion.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanRequest {
    #[serde(default)]
    pub plan_id: Option<String>,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub volume: f64,
    #[serde(default)]
    pub conditions: Vec<ConditionSpec>,
    #[serde(default)]
    pub strategy_tag: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub min_rr: Option<f64>,
    #[serde(default)]
    pub atr_validation: bool,
    #[serde(default)]
    pub require_active_session: Option<bool>,
}

/// Validate and register a new plan. Rejecting malformed geometry here
/// keeps the evaluator free of per-tick sanity checks: every stored plan
/// already has a positive risk distance and a stop on the correct side.
pub fn submit_plan(store: &mut PlanStore, req: PlanRequest) -> Result<String, PlanError> {
    if req.volume <= 0.0 || !req.volume.is_finite() {
        return Err(PlanError::InvalidVolume(req.volume));
    }

    let stop_ok = match req.direction {
        Direction::Buy => req.stop_loss < req.entry_price,
        Direction::Sell => req.stop_loss > req.entry_price,
    };
    if !stop_ok {
        return Err(PlanError::InvalidGeometry(format!(
            "{} stop {} on wrong side of entry {}",
            req.direction, req.stop_loss, req.entry_price
        )));
    }

    let mut conditions = Vec::with_capacity(req.conditions.len());
    for spec in &req.conditions {
        conditions.push(Condition::from_spec(spec, req.direction)?);
    }

    let now = Utc::now();
    let plan_id = req
        .plan_id
        .unwrap_or_else(|| format!("plan-{}-{}", req.symbol, now.timestamp_millis()));

    let plan = TradePlan {
        plan_id: plan_id.clone(),
        symbol: req.symbol,
        direction: req.direction,
        entry_price: req.entry_price,
        stop_loss: req.stop_loss,
        take_profit: req.take_profit,
        volume: req.volume,
        status: PlanStatus::Pending,
        conditions,
        strategy_tag: req.strategy_tag,
        created_at: now,
        expires_at: req
            .expires_at
            .unwrap_or_else(|| now + Duration::hours(DEFAULT_TTL_HOURS)),
        min_rr: req.min_rr,
        atr_validation: req.atr_validation,
        require_active_session: req.require_active_session,
        ticket: None,
        executed_at: None,
        profit_loss: None,
        exit_price: None,
        close_time: None,
        close_reason: None,
        cancel_requested: false,
        reject_reason: None,
    };

    info!(
        "Plan {} registered: {} {} @ {:.5} ({} conditions)",
        plan.plan_id,
        plan.direction,
        plan.symbol,
        plan.entry_price,
        plan.conditions.len()
    );
    store.insert(plan);
    Ok(plan_id)
}

/// Flag a pending plan for cancellation; the evaluator honors it at the
/// start of its next pass.
pub fn cancel_plan(store: &mut PlanStore, plan_id: &str) -> Result<(), PlanError> {
    if store.get(plan_id).is_none() {
        return Err(PlanError::NotFound(plan_id.to_string()));
    }
    if store.request_cancel(plan_id) {
        info!("Plan {} flagged for cancellation", plan_id);
    }
    Ok(())
}

/// Manually unwind the hedge leg of a defended position.
pub async fn cancel_hedge(
    monitor: &mut DefenseMonitor,
    broker: &mut dyn Broker,
    ticket: u64,
) -> Result<bool, PlanError> {
    if !monitor.contains(ticket) {
        return Err(PlanError::NotFound(format!("ticket {}", ticket)));
    }
    Ok(monitor.cancel_hedge(ticket, broker, Utc::now()).await)
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanStatusReport {
    pub plan_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub status: PlanStatus,
    pub reject_reason: Option<RejectReason>,
    pub ticket: Option<u64>,
    pub expires_at: DateTime<Utc>,
}

pub fn plan_status(store: &PlanStore, plan_id: &str) -> Result<PlanStatusReport, PlanError> {
    let plan = store
        .get(plan_id)
        .ok_or_else(|| PlanError::NotFound(plan_id.to_string()))?;
    Ok(PlanStatusReport {
        plan_id: plan.plan_id.clone(),
        symbol: plan.symbol.clone(),
        direction: plan.direction,
        status: plan.status,
        reject_reason: plan.reject_reason.clone(),
        ticket: plan.ticket,
        expires_at: plan.expires_at,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionStatusReport {
    pub ticket: u64,
    pub symbol: String,
    pub state: TradeState,
    pub score: f64,
    pub hedge_ticket: Option<u64>,
    pub history: Vec<DefenseEvent>,
}

pub fn position_status(monitor: &DefenseMonitor) -> Vec<PositionStatusReport> {
    let mut reports: Vec<PositionStatusReport> = monitor
        .tickets()
        .into_iter()
        .filter_map(|t| monitor.get(t))
        .map(|st| PositionStatusReport {
            ticket: st.ticket,
            symbol: st.symbol.clone(),
            state: st.state,
            score: st.score,
            hedge_ticket: st.hedge_ticket,
            history: st.history.clone(),
        })
        .collect();
    reports.sort_by_key(|r| r.ticket);
    reports
}
