use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{InvariantViolation, RejectReason};
use crate::models::{Condition, Direction, PlanStatus};

/// A pending trade idea with its declared entry conditions. The plan owns
/// its condition set exclusively. Status moves one way only: the four
/// mutators below are the sole writers, and `Pending -> Executing ->
/// Executed` is the only path that reaches a broker call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePlan {
    pub plan_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub volume: f64,
    pub status: PlanStatus,
    pub conditions: Vec<Condition>,
    pub strategy_tag: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    // Per-plan gate knobs, set at ingestion.
    #[serde(default)]
    pub min_rr: Option<f64>,
    #[serde(default)]
    pub atr_validation: bool,
    /// None = default from the symbol's session_driven flag.
    #[serde(default)]
    pub require_active_session: Option<bool>,

    // Fill bookkeeping, populated once executed.
    #[serde(default)]
    pub ticket: Option<u64>,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub profit_loss: Option<f64>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_reason: Option<String>,

    #[serde(default)]
    pub cancel_requested: bool,
    /// Most recent gate/condition rejection, surfaced by status queries.
    #[serde(default)]
    pub reject_reason: Option<RejectReason>,
}

impl TradePlan {
    /// Risk distance from entry to stop.
    pub fn risk(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }

    /// Reward distance from entry to target, signed for the stated
    /// direction: negative means the target sits on the wrong side.
    pub fn signed_reward(&self) -> f64 {
        match self.direction {
            Direction::Buy => self.take_profit - self.entry_price,
            Direction::Sell => self.entry_price - self.take_profit,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Atomically claim the plan for execution. The in-flight marker: a
    /// second tick observing `Executing` skips this plan entirely.
    pub fn begin_execution(&mut self) -> Result<(), InvariantViolation> {
        if self.status != PlanStatus::Pending {
            return Err(InvariantViolation(format!(
                "plan {} cannot begin execution from {}",
                self.plan_id, self.status
            )));
        }
        self.status = PlanStatus::Executing;
        Ok(())
    }

    /// Record a successful fill. Only valid from `Executing`.
    pub fn record_fill(&mut self, ticket: u64, at: DateTime<Utc>) -> Result<(), InvariantViolation> {
        if self.status != PlanStatus::Executing {
            return Err(InvariantViolation(format!(
                "plan {} cannot record fill from {}",
                self.plan_id, self.status
            )));
        }
        self.status = PlanStatus::Executed;
        self.ticket = Some(ticket);
        self.executed_at = Some(at);
        Ok(())
    }

    /// Return an in-flight plan to Pending after a transport-level broker
    /// failure, so the next tick retries.
    pub fn revert_to_pending(&mut self) {
        if self.status == PlanStatus::Executing {
            self.status = PlanStatus::Pending;
        }
    }

    /// Terminal rejection. A no-op unless the plan is Pending or Executing
    /// (broker rejection arrives while in flight).
    pub fn reject(&mut self, reason: RejectReason) {
        if matches!(self.status, PlanStatus::Pending | PlanStatus::Executing) {
            self.status = PlanStatus::Rejected;
            self.reject_reason = Some(reason);
        }
    }

    pub fn expire(&mut self) {
        if self.status == PlanStatus::Pending {
            self.status = PlanStatus::Expired;
            self.reject_reason = Some(RejectReason::Expired);
        }
    }

    pub fn cancel(&mut self) {
        if self.status == PlanStatus::Pending {
            self.status = PlanStatus::Cancelled;
        }
    }
}
