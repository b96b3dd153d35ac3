pub mod scoring;

pub use scoring::{composite_score, ScoreBreakdown};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerPosition, OrderRequest};
use crate::config::DefenseConfig;
use crate::models::{
    Direction, MarketSnapshot, StructureSignal, Timeframe, TradeState, VwapSide,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefenseEvent {
    pub at: DateTime<Utc>,
    pub event: String,
}

/// Tracked defensive state for one open broker ticket. Exactly one exists
/// per open position; archived once `state` reaches Closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefensiveTradeState {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_atr: f64,
    pub volume: f64,
    pub state: TradeState,
    pub score: f64,
    pub vwap_cross_count: u32,
    #[serde(default)]
    pub crosses_since_deep: u32,
    #[serde(default)]
    pub last_vwap_side: Option<VwapSide>,
    #[serde(default)]
    pub hedge_ticket: Option<u64>,
    #[serde(default)]
    pub flat_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_deep_check: Option<DateTime<Utc>>,
    /// Set by the fast check when a VWAP-side flip coincides with a volume
    /// flip against the position; consumed by the next deep check.
    #[serde(default)]
    pub flip_pending: bool,
    #[serde(default)]
    pub history: Vec<DefenseEvent>,
    #[serde(default)]
    pub exit_reason: Option<String>,
}

impl DefensiveTradeState {
    fn record(&mut self, at: DateTime<Utc>, event: impl Into<String>) {
        self.history.push(DefenseEvent {
            at,
            event: event.into(),
        });
    }
}

/// Outcome of one fast (cheap) check.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastCheck {
    /// An event-driven deep check should run now.
    pub deep_due: bool,
    /// The hedge flat-timer deadline has elapsed; force-close both legs.
    pub flat_timer_fired: bool,
}

enum Step {
    To(TradeState),
    Act(PlannedAction),
}

enum PlannedAction {
    OpenHedge,
    CloseHedgeAndRestore,
}

/// Tracks every open position through the defensive state machine and
/// issues hedge/close actions through the broker. A broker failure leaves
/// the pre-action state untouched for retry on a later tick.
pub struct DefenseMonitor {
    pub states: HashMap<u64, DefensiveTradeState>,
    pub closed: Vec<DefensiveTradeState>,
}

impl Default for DefenseMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl DefenseMonitor {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            closed: Vec::new(),
        }
    }

    /// Restore tracked states from a crash-recovery archive.
    pub fn restore(states: Vec<DefensiveTradeState>) -> Self {
        Self {
            states: states.into_iter().map(|s| (s.ticket, s)).collect(),
            closed: Vec::new(),
        }
    }

    pub fn contains(&self, ticket: u64) -> bool {
        self.states.contains_key(&ticket)
    }

    pub fn tickets(&self) -> Vec<u64> {
        let mut t: Vec<u64> = self.states.keys().copied().collect();
        t.sort_unstable();
        t
    }

    pub fn get(&self, ticket: u64) -> Option<&DefensiveTradeState> {
        self.states.get(&ticket)
    }

    /// Begin tracking a newly observed open position.
    pub fn adopt(&mut self, pos: &BrokerPosition, entry_atr: f64, now: DateTime<Utc>) {
        if self.states.contains_key(&pos.ticket) {
            return;
        }
        let mut state = DefensiveTradeState {
            ticket: pos.ticket,
            symbol: pos.symbol.clone(),
            direction: pos.direction,
            entry_price: pos.entry_price,
            entry_atr,
            volume: pos.volume,
            state: TradeState::Healthy,
            score: 0.0,
            vwap_cross_count: 0,
            crosses_since_deep: 0,
            last_vwap_side: None,
            hedge_ticket: None,
            flat_deadline: None,
            last_deep_check: None,
            flip_pending: false,
            history: Vec::new(),
            exit_reason: None,
        };
        state.record(now, format!("tracking opened ({} {})", pos.symbol, pos.direction));
        info!(
            "Defense tracking #{}: {} {} @ {:.5}",
            pos.ticket, pos.symbol, pos.direction, pos.entry_price
        );
        self.states.insert(pos.ticket, state);
    }

    /// Whether the scheduled deep check is due for this ticket.
    pub fn deep_check_due(&self, ticket: u64, cfg: &DefenseConfig, now: DateTime<Utc>) -> bool {
        match self.states.get(&ticket) {
            Some(st) => match st.last_deep_check {
                Some(last) => now - last >= Duration::seconds(cfg.deep_check_secs as i64),
                None => true,
            },
            None => false,
        }
    }

    /// Fast check: cheap signals only. Updates the VWAP-cross counter,
    /// detects the hedge-confluence flip, and compares the flat-timer
    /// deadline against the wall clock. No broker calls, no scoring.
    pub fn fast_check(
        &mut self,
        ticket: u64,
        snap: &MarketSnapshot,
        cfg: &DefenseConfig,
        now: DateTime<Utc>,
    ) -> FastCheck {
        let mut out = FastCheck::default();
        let Some(st) = self.states.get_mut(&ticket) else {
            return out;
        };
        if st.state == TradeState::Closed {
            return out;
        }

        if let Some(side) = snap.vwap_side() {
            if let Some(prev) = st.last_vwap_side {
                if prev != side {
                    st.vwap_cross_count += 1;
                    st.crosses_since_deep += 1;

                    let against = side != VwapSide::favoring(st.direction);
                    let volume_against = snap
                        .order_flow
                        .as_ref()
                        .map(|of| match st.direction {
                            Direction::Buy => of.delta < 0.0,
                            Direction::Sell => of.delta > 0.0,
                        })
                        .unwrap_or(false);

                    if against && volume_against {
                        st.flip_pending = true;
                        out.deep_due = true;
                        debug!(
                            "#{} VWAP+volume flip against position (crosses={})",
                            ticket, st.vwap_cross_count
                        );
                    }
                }
            }
            st.last_vwap_side = Some(side);
        }

        if st.crosses_since_deep >= cfg.early_deep_cross_count {
            out.deep_due = true;
        }

        if st.state == TradeState::Hedged {
            if let Some(deadline) = st.flat_deadline {
                if now >= deadline {
                    out.flat_timer_fired = true;
                }
            }
        }

        out
    }

    /// Deep check: re-score the position, walk the state-transition
    /// function, and execute at most one resulting broker action.
    pub async fn deep_check(
        &mut self,
        ticket: u64,
        snap: &MarketSnapshot,
        broker: &mut dyn Broker,
        cfg: &DefenseConfig,
        now: DateTime<Utc>,
    ) {
        let Some(st) = self.states.get_mut(&ticket) else {
            return;
        };
        if st.state == TradeState::Closed {
            return;
        }

        let breakdown = composite_score(st.direction, snap);
        st.score = breakdown.composite;
        st.crosses_since_deep = 0;
        st.last_deep_check = Some(now);
        let flip = std::mem::take(&mut st.flip_pending);
        let resumption = snap.has_structure(StructureSignal::BreakOfStructure, st.direction);

        let score = st.score;
        let mut action = None;
        // The escalation chain can cascade (e.g. 0 -> -7 walks HEALTHY ->
        // WARNING_L1 -> WARNING_L2 in one pass); guard bounds the walk.
        let mut guard = 0;
        while guard < 4 {
            guard += 1;
            let step = match st.state {
                TradeState::Healthy if score <= cfg.warn_l1_score => {
                    Some(Step::To(TradeState::WarningL1))
                }
                TradeState::WarningL1 if score <= cfg.warn_l2_score => {
                    Some(Step::To(TradeState::WarningL2))
                }
                TradeState::WarningL1 if score >= cfg.restore_score => {
                    Some(Step::To(TradeState::Healthy))
                }
                TradeState::WarningL2 if score <= cfg.hedge_score || flip => {
                    Some(Step::Act(PlannedAction::OpenHedge))
                }
                TradeState::WarningL2 if score > cfg.warn_l1_score => {
                    Some(Step::To(TradeState::WarningL1))
                }
                TradeState::Hedged if resumption => Some(Step::To(TradeState::Recovering)),
                TradeState::Recovering if score >= cfg.restore_score => {
                    Some(Step::Act(PlannedAction::CloseHedgeAndRestore))
                }
                TradeState::Recovering if score <= cfg.warn_l2_score && !resumption => {
                    Some(Step::To(TradeState::Hedged))
                }
                _ => None,
            };

            match step {
                None => break,
                Some(Step::To(next)) => {
                    let from = st.state;
                    st.state = next;
                    st.record(now, format!("{} -> {} (score {:.2})", from, next, score));
                    info!("#{} {} -> {} (score {:.2})", ticket, from, next, score);
                    if next == TradeState::Recovering {
                        // Flat timer paused while recovery is confirmed.
                        st.flat_deadline = None;
                    }
                    if next == TradeState::Hedged {
                        // Re-hedge from RECOVERING: hedge leg is still open,
                        // so no new order -- just restart the flat timer.
                        st.flat_deadline =
                            Some(now + Duration::minutes(cfg.flat_timer_minutes));
                        break;
                    }
                }
                Some(Step::Act(a)) => {
                    action = Some(a);
                    break;
                }
            }
        }

        match action {
            Some(PlannedAction::OpenHedge) => self.open_hedge(ticket, snap, broker, cfg, now).await,
            Some(PlannedAction::CloseHedgeAndRestore) => {
                self.close_hedge_and_restore(ticket, broker, now).await
            }
            None => {}
        }
    }

    /// Open the hedge leg: 50% of the open volume, opposite direction,
    /// protective stop at 0.5x ATR from the hedge entry. Idempotent: a
    /// position already holding a hedge ticket is not re-hedged.
    async fn open_hedge(
        &mut self,
        ticket: u64,
        snap: &MarketSnapshot,
        broker: &mut dyn Broker,
        cfg: &DefenseConfig,
        now: DateTime<Utc>,
    ) {
        let Some(st) = self.states.get_mut(&ticket) else {
            return;
        };

        if st.hedge_ticket.is_some() {
            st.state = TradeState::Hedged;
            st.flat_deadline = Some(now + Duration::minutes(cfg.flat_timer_minutes));
            st.record(now, "re-entered hedged (hedge leg already open)");
            return;
        }

        let hedge_dir = st.direction.opposite();
        let hedge_entry = snap.entry_price(hedge_dir);
        let atr = snap.atr(Timeframe::M15).unwrap_or(st.entry_atr);
        let stop = match hedge_dir {
            Direction::Buy => hedge_entry - atr * cfg.hedge_stop_atr,
            Direction::Sell => hedge_entry + atr * cfg.hedge_stop_atr,
        };
        let order = OrderRequest {
            symbol: st.symbol.clone(),
            direction: hedge_dir,
            volume: st.volume * cfg.hedge_ratio,
            stop_loss: stop,
            take_profit: 0.0,
            comment: format!("hedge:{}", st.ticket),
        };

        match broker.place_order(&order).await {
            Ok(fill) => {
                st.hedge_ticket = Some(fill.ticket);
                st.state = TradeState::Hedged;
                st.flat_deadline = Some(now + Duration::minutes(cfg.flat_timer_minutes));
                st.record(
                    now,
                    format!(
                        "hedge opened #{} {} {:.2} @ {:.5}",
                        fill.ticket, hedge_dir, order.volume, fill.fill_price
                    ),
                );
                info!(
                    "#{} HEDGED: hedge #{} {} {:.2} @ {:.5} (stop {:.5})",
                    ticket, fill.ticket, hedge_dir, order.volume, fill.fill_price, stop
                );
            }
            Err(e) => {
                // Pre-action state kept; retried on a later deep check.
                warn!("#{} hedge order failed: {}", ticket, e);
                st.record(now, format!("hedge order failed: {}", e));
            }
        }
    }

    /// Recovery confirmed: close the hedge leg and restore HEALTHY.
    async fn close_hedge_and_restore(
        &mut self,
        ticket: u64,
        broker: &mut dyn Broker,
        now: DateTime<Utc>,
    ) {
        let Some(st) = self.states.get_mut(&ticket) else {
            return;
        };

        if let Some(hedge) = st.hedge_ticket {
            if let Err(e) = broker.close_position(hedge).await {
                warn!("#{} hedge close failed: {}", ticket, e);
                st.record(now, format!("hedge close failed: {}", e));
                return;
            }
            st.record(now, format!("hedge #{} closed on recovery", hedge));
            st.hedge_ticket = None;
        }
        let from = st.state;
        st.state = TradeState::Healthy;
        st.flat_deadline = None;
        st.record(now, format!("{} -> healthy (score {:.2})", from, st.score));
        info!("#{} recovered -> healthy (score {:.2})", ticket, st.score);
    }

    /// Operator-requested hedge cancellation: close the hedge leg and drop
    /// back to WARNING_L2 without waiting for a recovery signal. The next
    /// deep check re-scores from there.
    pub async fn cancel_hedge(
        &mut self,
        ticket: u64,
        broker: &mut dyn Broker,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(st) = self.states.get_mut(&ticket) else {
            return false;
        };
        if !matches!(st.state, TradeState::Hedged | TradeState::Recovering) {
            return false;
        }
        if let Some(hedge) = st.hedge_ticket {
            if let Err(e) = broker.close_position(hedge).await {
                warn!("#{} hedge cancel failed: {}", ticket, e);
                st.record(now, format!("hedge cancel failed: {}", e));
                return false;
            }
            st.record(now, format!("hedge #{} cancelled on request", hedge));
            st.hedge_ticket = None;
        }
        st.state = TradeState::WarningL2;
        st.flat_deadline = None;
        info!("#{} hedge cancelled -> warning_l2", ticket);
        true
    }

    /// Flat-timer expiry: close the hedge leg, then the original position.
    /// Partial failure keeps the state machine in HEDGED for retry.
    pub async fn flat_close(
        &mut self,
        ticket: u64,
        broker: &mut dyn Broker,
        now: DateTime<Utc>,
    ) {
        let Some(st) = self.states.get_mut(&ticket) else {
            return;
        };
        if st.state != TradeState::Hedged {
            return;
        }

        if let Some(hedge) = st.hedge_ticket {
            if let Err(e) = broker.close_position(hedge).await {
                warn!("#{} flat close: hedge leg failed: {}", ticket, e);
                st.record(now, format!("flat close hedge failed: {}", e));
                return;
            }
            st.record(now, format!("hedge #{} closed (flat timer)", hedge));
            st.hedge_ticket = None;
        }

        match broker.close_position(ticket).await {
            Ok(()) => {
                st.state = TradeState::Closed;
                st.exit_reason = Some("flat_timer".to_string());
                st.record(now, "closed by flat timer");
                info!("#{} CLOSED by flat timer", ticket);
                self.archive(ticket);
            }
            Err(e) => {
                warn!("#{} flat close: original leg failed: {}", ticket, e);
                if let Some(st) = self.states.get_mut(&ticket) {
                    st.record(now, format!("flat close original failed: {}", e));
                }
            }
        }
    }

    /// The underlying position disappeared at the broker (manual close,
    /// stop-out, take-profit). A dangling hedge leg must come down first;
    /// until it does the state stays live so the next sweep retries.
    pub async fn on_external_close(
        &mut self,
        ticket: u64,
        broker: &mut dyn Broker,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        let Some(st) = self.states.get_mut(&ticket) else {
            return;
        };

        if let Some(hedge) = st.hedge_ticket {
            match broker.close_position(hedge).await {
                Ok(()) => {
                    st.record(now, format!("hedge #{} closed with position", hedge));
                    st.hedge_ticket = None;
                }
                Err(e) => {
                    warn!("#{} dangling hedge #{} close failed: {}", ticket, hedge, e);
                    st.record(now, format!("dangling hedge #{} close failed: {}", hedge, e));
                    return;
                }
            }
        }

        st.state = TradeState::Closed;
        st.exit_reason = Some(reason.to_string());
        st.record(now, format!("closed externally: {}", reason));
        info!("#{} closed externally ({})", ticket, reason);
        self.archive(ticket);
    }

    fn archive(&mut self, ticket: u64) {
        if let Some(st) = self.states.remove(&ticket) {
            self.closed.push(st);
        }
    }
}
