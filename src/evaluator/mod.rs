pub mod conditions;
pub mod gates;

pub use conditions::{all_conditions_hold, condition_holds};
pub use gates::{check_gates, GateOutcome};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, OrderRequest};
use crate::config::Config;
use crate::error::RejectReason;
use crate::market::SnapshotCache;
use crate::models::{PlanStatus, TradePlan};
use crate::store::PlanStore;

/// What happened to one plan during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// All gates and conditions held; exactly one broker call was made.
    Executed { ticket: u64 },
    /// Terminal rejection (plan geometry or broker refusal).
    Rejected(RejectReason),
    /// Blocked this tick by a retryable gate; re-evaluated next tick.
    Held(RejectReason),
    /// Gates passed but a declared condition is not yet met.
    ConditionsPending,
    Cancelled,
    Expired,
    /// Action already in flight for this identity; tick is a no-op.
    InFlight,
    /// No fresh snapshot for the symbol.
    NoSnapshot,
    /// Broker transport failed; plan returned to PENDING for retry.
    BrokerRetry,
}

#[derive(Debug, Clone)]
pub struct TickReport {
    pub plan_id: String,
    pub outcome: TickOutcome,
}

/// The plan condition evaluator. Stateless between ticks: every pass
/// re-derives its decision from the plan and the latest cached snapshot.
pub struct PlanEvaluator;

impl PlanEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// One evaluation pass over every non-terminal plan. Per-plan failures
    /// are isolated: a broker error on one plan never aborts the others.
    pub async fn run_tick(
        &self,
        store: &mut PlanStore,
        cache: &SnapshotCache,
        broker: &mut dyn Broker,
        cfg: &Config,
    ) -> Vec<TickReport> {
        let mut reports = Vec::new();

        for plan_id in store.non_terminal_ids() {
            let Some(plan) = store.get(&plan_id) else {
                continue;
            };
            let mut plan = plan.clone();
            let prior_reason = plan.reject_reason.clone();

            let outcome = self
                .evaluate_one(&mut plan, store, cache, broker, cfg)
                .await;

            // Only write back passes that changed the plan; a held or
            // waiting plan would otherwise rewrite the file every tick.
            let dirty = match &outcome {
                TickOutcome::ConditionsPending
                | TickOutcome::InFlight
                | TickOutcome::NoSnapshot => false,
                TickOutcome::Held(reason) => prior_reason.as_ref() != Some(reason),
                _ => true,
            };
            if dirty {
                store.update(plan);
            }

            reports.push(TickReport {
                plan_id,
                outcome,
            });
        }

        reports
    }

    async fn evaluate_one(
        &self,
        plan: &mut TradePlan,
        store: &mut PlanStore,
        cache: &SnapshotCache,
        broker: &mut dyn Broker,
        cfg: &Config,
    ) -> TickOutcome {
        let now = Utc::now();

        // External cancel honored before anything else.
        if plan.cancel_requested && plan.status == PlanStatus::Pending {
            plan.cancel();
            info!("{} cancelled on request", plan.plan_id);
            return TickOutcome::Cancelled;
        }

        // Expiry: unconditional, skips every other check.
        if plan.is_expired(now) {
            plan.expire();
            info!("{} expired", plan.plan_id);
            return TickOutcome::Expired;
        }

        // In-flight marker: a second tick arriving while an action is in
        // flight for this identity is a no-op for this identity only.
        if plan.status == PlanStatus::Executing {
            debug!("{} action in flight, skipping", plan.plan_id);
            return TickOutcome::InFlight;
        }

        let Some(snap) = cache.get(&plan.symbol) else {
            debug!("{}: no fresh snapshot for {}", plan.plan_id, plan.symbol);
            return TickOutcome::NoSnapshot;
        };

        match check_gates(plan, &snap, cfg) {
            GateOutcome::Fatal(reason) => {
                info!("{} rejected: {}", plan.plan_id, reason);
                plan.reject(reason.clone());
                return TickOutcome::Rejected(reason);
            }
            GateOutcome::Retry(reason) => {
                plan.reject_reason = Some(reason.clone());
                return TickOutcome::Held(reason);
            }
            GateOutcome::Pass => {}
        }

        if !all_conditions_hold(&plan.conditions, &snap) {
            return TickOutcome::ConditionsPending;
        }

        // Everything holds simultaneously: claim the plan, then call the
        // broker exactly once.
        if let Err(violation) = plan.begin_execution() {
            // Unreachable by construction; terminal states never get here.
            error!("{}", violation);
            return TickOutcome::InFlight;
        }
        // The claim must hit the store before the broker call: a crash
        // mid-call restarts as EXECUTING, never as a re-fireable PENDING.
        store.update(plan.clone());

        let order = OrderRequest {
            symbol: plan.symbol.clone(),
            direction: plan.direction,
            volume: plan.volume,
            stop_loss: plan.stop_loss,
            take_profit: plan.take_profit,
            comment: plan.strategy_tag.clone(),
        };

        match broker.place_order(&order).await {
            Ok(fill) => {
                let filled_at = Utc::now();
                if let Err(violation) = plan.record_fill(fill.ticket, filled_at) {
                    error!("{}", violation);
                    return TickOutcome::InFlight;
                }
                info!(
                    "{} EXECUTED: {} {} {:.2} -> ticket #{} @ {:.5}",
                    plan.plan_id,
                    plan.direction,
                    plan.symbol,
                    plan.volume,
                    fill.ticket,
                    fill.fill_price
                );
                TickOutcome::Executed {
                    ticket: fill.ticket,
                }
            }
            Err(e) if e.is_retryable() => {
                warn!("{} broker unreachable, retrying next tick: {}", plan.plan_id, e);
                plan.revert_to_pending();
                TickOutcome::BrokerRetry
            }
            Err(e) => {
                warn!("{} broker rejected: {}", plan.plan_id, e);
                let reason = RejectReason::BrokerRejected {
                    message: e.to_string(),
                };
                plan.reject(reason.clone());
                TickOutcome::Rejected(reason)
            }
        }
    }
}

impl Default for PlanEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use crate::models::{Condition, Direction, OrderFlow, Bias};
    use crate::test_helpers::{
        default_test_config, make_plan, plan_with, snapshot_with, MockBroker,
    };

    fn cache_with_default_snapshot() -> SnapshotCache {
        let mut cache = SnapshotCache::new(StdDuration::from_secs(30));
        cache.put(snapshot_with(|_| {}));
        cache
    }

    #[tokio::test]
    async fn clean_plan_executes_exactly_once() {
        let cfg = default_test_config();
        let cache = cache_with_default_snapshot();
        let mut broker = MockBroker::new();
        let mut store = PlanStore::in_memory();
        let plan = make_plan(Direction::Buy, 100.0, 95.0, 110.0);
        let id = plan.plan_id.clone();
        store.insert(plan);

        let eval = PlanEvaluator::new();
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert!(matches!(reports[0].outcome, TickOutcome::Executed { .. }));
        assert_eq!(broker.orders.len(), 1);
        assert_eq!(store.get(&id).unwrap().status, PlanStatus::Executed);

        // Idempotence: an executed plan is terminal; re-running the
        // evaluator issues no second broker call.
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert!(reports.is_empty());
        assert_eq!(broker.orders.len(), 1);
    }

    #[tokio::test]
    async fn no_snapshot_holds_the_plan() {
        let cfg = default_test_config();
        let cache = SnapshotCache::new(StdDuration::from_secs(30));
        let mut broker = MockBroker::new();
        let mut store = PlanStore::in_memory();
        let plan = make_plan(Direction::Buy, 100.0, 95.0, 110.0);
        let id = plan.plan_id.clone();
        store.insert(plan);

        let eval = PlanEvaluator::new();
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert_eq!(reports[0].outcome, TickOutcome::NoSnapshot);
        assert_eq!(store.get(&id).unwrap().status, PlanStatus::Pending);
        assert!(broker.orders.is_empty());
    }

    #[tokio::test]
    async fn bad_rr_never_executes_for_any_snapshot() {
        let cfg = default_test_config();
        let mut broker = MockBroker::new();
        let mut store = PlanStore::in_memory();
        let plan = make_plan(Direction::Buy, 4495.896, 4485.000, 4505.000);
        let id = plan.plan_id.clone();
        store.insert(plan);

        let eval = PlanEvaluator::new();
        let cache = cache_with_default_snapshot();
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert!(matches!(reports[0].outcome, TickOutcome::Rejected(_)));
        assert_eq!(store.get(&id).unwrap().status, PlanStatus::Rejected);
        assert!(broker.orders.is_empty());

        // Terminal: never revisited no matter how good later snapshots are.
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert!(reports.is_empty());
        assert!(broker.orders.is_empty());
    }

    #[tokio::test]
    async fn expired_plan_never_executes_later() {
        let cfg = default_test_config();
        let cache = cache_with_default_snapshot();
        let mut broker = MockBroker::new();
        let mut store = PlanStore::in_memory();
        let plan = plan_with(|p| {
            p.expires_at = Utc::now() - chrono::Duration::minutes(1);
        });
        let id = plan.plan_id.clone();
        store.insert(plan);

        let eval = PlanEvaluator::new();
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert_eq!(reports[0].outcome, TickOutcome::Expired);
        assert_eq!(store.get(&id).unwrap().status, PlanStatus::Expired);

        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert!(reports.is_empty());
        assert!(broker.orders.is_empty());
    }

    #[tokio::test]
    async fn cancel_honored_before_evaluation() {
        let cfg = default_test_config();
        let cache = cache_with_default_snapshot();
        let mut broker = MockBroker::new();
        let mut store = PlanStore::in_memory();
        let mut plan = make_plan(Direction::Buy, 100.0, 95.0, 110.0);
        plan.plan_id = "p1".to_string();
        store.insert(plan);
        store.request_cancel("p1");

        let eval = PlanEvaluator::new();
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert_eq!(reports[0].outcome, TickOutcome::Cancelled);
        assert!(broker.orders.is_empty());
    }

    #[tokio::test]
    async fn delta_flip_gates_order_flow_condition() {
        let cfg = default_test_config();
        let mut broker = MockBroker::new();
        let mut store = PlanStore::in_memory();
        let plan = plan_with(|p| {
            p.conditions = vec![Condition::NetPressure {
                direction: Direction::Buy,
            }];
        });
        let id = plan.plan_id.clone();
        store.insert(plan);
        let eval = PlanEvaluator::new();

        // Selling pressure: condition false, no execution.
        let mut cache = SnapshotCache::new(StdDuration::from_secs(30));
        cache.put(snapshot_with(|s| {
            s.order_flow = Some(OrderFlow {
                delta: -50.0,
                cvd_trend: Bias::Bearish,
                absorption_zones: vec![],
            });
        }));
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert_eq!(reports[0].outcome, TickOutcome::ConditionsPending);
        assert!(broker.orders.is_empty());

        // Delta flips positive: exactly one execution.
        cache.put(snapshot_with(|s| {
            s.order_flow = Some(OrderFlow {
                delta: 10.0,
                cvd_trend: Bias::Bullish,
                absorption_zones: vec![],
            });
        }));
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert!(matches!(reports[0].outcome, TickOutcome::Executed { .. }));
        assert_eq!(broker.orders.len(), 1);
        assert_eq!(store.get(&id).unwrap().status, PlanStatus::Executed);
    }

    #[tokio::test]
    async fn broker_rejection_is_terminal() {
        let cfg = default_test_config();
        let cache = cache_with_default_snapshot();
        let mut broker = MockBroker::new();
        broker.reject_next = Some("invalid volume".to_string());
        let mut store = PlanStore::in_memory();
        let plan = make_plan(Direction::Buy, 100.0, 95.0, 110.0);
        let id = plan.plan_id.clone();
        store.insert(plan);

        let eval = PlanEvaluator::new();
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert!(matches!(reports[0].outcome, TickOutcome::Rejected(_)));
        let stored = store.get(&id).unwrap();
        assert_eq!(stored.status, PlanStatus::Rejected);
        assert!(stored.reject_reason.is_some());
    }

    #[tokio::test]
    async fn connectivity_failure_returns_plan_to_pending() {
        let cfg = default_test_config();
        let cache = cache_with_default_snapshot();
        let mut broker = MockBroker::new();
        broker.fail_transport = true;
        let mut store = PlanStore::in_memory();
        let plan = make_plan(Direction::Buy, 100.0, 95.0, 110.0);
        let id = plan.plan_id.clone();
        store.insert(plan);

        let eval = PlanEvaluator::new();
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert_eq!(reports[0].outcome, TickOutcome::BrokerRetry);
        assert_eq!(store.get(&id).unwrap().status, PlanStatus::Pending);

        // Broker back up: next tick executes.
        broker.fail_transport = false;
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert!(matches!(reports[0].outcome, TickOutcome::Executed { .. }));
    }

    #[tokio::test]
    async fn one_plans_broker_error_does_not_abort_others() {
        let cfg = default_test_config();
        let cache = cache_with_default_snapshot();
        let mut broker = MockBroker::new();
        broker.reject_next = Some("margin".to_string());
        let mut store = PlanStore::in_memory();

        let mut a = make_plan(Direction::Buy, 100.0, 95.0, 110.0);
        a.plan_id = "a".to_string();
        store.insert(a);
        let mut b = make_plan(Direction::Buy, 100.0, 95.0, 110.0);
        b.plan_id = "b".to_string();
        store.insert(b);

        let eval = PlanEvaluator::new();
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert_eq!(reports.len(), 2);
        // First plan hit the rejection, second still executed.
        let executed = reports
            .iter()
            .filter(|r| matches!(r.outcome, TickOutcome::Executed { .. }))
            .count();
        let rejected = reports
            .iter()
            .filter(|r| matches!(r.outcome, TickOutcome::Rejected(_)))
            .count();
        assert_eq!((executed, rejected), (1, 1));
    }

    /// Broker double that reads the persisted plan file from inside the
    /// order call, capturing whatever status was on disk at that moment.
    struct StatusWitnessBroker {
        file: std::path::PathBuf,
        status_at_call: Option<String>,
    }

    #[async_trait::async_trait]
    impl Broker for StatusWitnessBroker {
        async fn get_quote(&mut self, _symbol: &str) -> Result<crate::broker::Quote, crate::error::BrokerError> {
            Ok(crate::broker::Quote {
                bid: 99.95,
                ask: 100.05,
            })
        }

        async fn place_order(
            &mut self,
            _order: &OrderRequest,
        ) -> Result<crate::broker::OrderFill, crate::error::BrokerError> {
            let content = std::fs::read_to_string(&self.file).unwrap_or_default();
            let parsed: serde_json::Value =
                serde_json::from_str(&content).unwrap_or(serde_json::Value::Null);
            self.status_at_call = parsed
                .as_object()
                .and_then(|plans| plans.values().next())
                .and_then(|plan| plan.get("status"))
                .and_then(|status| status.as_str())
                .map(str::to_string);
            Ok(crate::broker::OrderFill {
                ticket: 7001,
                fill_price: 100.05,
            })
        }

        async fn modify_position(
            &mut self,
            _ticket: u64,
            _stop_loss: Option<f64>,
            _take_profit: Option<f64>,
        ) -> Result<(), crate::error::BrokerError> {
            Ok(())
        }

        async fn close_position(&mut self, _ticket: u64) -> Result<(), crate::error::BrokerError> {
            Ok(())
        }

        async fn open_positions(
            &mut self,
        ) -> Result<Vec<crate::broker::BrokerPosition>, crate::error::BrokerError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn executing_state_hits_disk_before_the_broker_call() {
        let dir = std::env::temp_dir().join(format!("sentinel_claim_{}", std::process::id()));
        let mut cfg = default_test_config();
        cfg.data_dir = dir.to_string_lossy().to_string();

        let mut store = PlanStore::new(&cfg);
        let plan = make_plan(Direction::Buy, 100.0, 95.0, 110.0);
        let id = plan.plan_id.clone();
        store.insert(plan);

        let cache = cache_with_default_snapshot();
        let mut broker = StatusWitnessBroker {
            file: std::path::Path::new(&cfg.data_dir).join("plans.json"),
            status_at_call: None,
        };

        let eval = PlanEvaluator::new();
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert!(matches!(reports[0].outcome, TickOutcome::Executed { .. }));

        // A crash during the order call must restart as EXECUTING, never
        // as a re-fireable PENDING.
        assert_eq!(broker.status_at_call.as_deref(), Some("EXECUTING"));
        assert_eq!(store.get(&id).unwrap().status, PlanStatus::Executed);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn waiting_plan_does_not_rewrite_the_store_file() {
        let dir = std::env::temp_dir().join(format!("sentinel_quiet_{}", std::process::id()));
        let mut cfg = default_test_config();
        cfg.data_dir = dir.to_string_lossy().to_string();

        let mut store = PlanStore::new(&cfg);
        store.insert(plan_with(|p| {
            p.conditions = vec![Condition::NetPressure {
                direction: Direction::Buy,
            }];
        }));

        // Remove the file seeded by insert: any write-back would recreate it.
        let file = std::path::Path::new(&cfg.data_dir).join("plans.json");
        std::fs::remove_file(&file).unwrap();

        let mut cache = SnapshotCache::new(StdDuration::from_secs(30));
        cache.put(snapshot_with(|s| s.order_flow = None));
        let mut broker = MockBroker::new();
        let eval = PlanEvaluator::new();

        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert_eq!(reports[0].outcome, TickOutcome::ConditionsPending);
        assert!(!file.exists());

        // Once something actually changes, the file comes back.
        cache.put(snapshot_with(|_| {}));
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert!(matches!(reports[0].outcome, TickOutcome::Executed { .. }));
        assert!(file.exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn low_liquidity_session_blocks_trend_strategy() {
        let cfg = default_test_config();
        let mut cache = SnapshotCache::new(StdDuration::from_secs(30));
        cache.put(snapshot_with(|s| {
            s.session.name = "asian".to_string();
            s.session.low_liquidity = true;
        }));
        let mut broker = MockBroker::new();
        let mut store = PlanStore::in_memory();
        let plan = plan_with(|p| p.strategy_tag = "breakout".to_string());
        store.insert(plan);

        let eval = PlanEvaluator::new();
        let reports = eval.run_tick(&mut store, &cache, &mut broker, &cfg).await;
        assert!(matches!(
            reports[0].outcome,
            TickOutcome::Held(RejectReason::LowLiquiditySession { .. })
        ));
        assert!(broker.orders.is_empty());
    }
}
