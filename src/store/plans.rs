use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::Config;
use crate::models::{PlanStatus, TradePlan};

/// Durable record of trade plans, keyed by plan_id. Persists the whole map
/// as pretty JSON on every mutation, loading it back on construction.
pub struct PlanStore {
    plans: HashMap<String, TradePlan>,
    file: Option<PathBuf>,
}

impl PlanStore {
    pub fn new(cfg: &Config) -> Self {
        let mut store = Self {
            plans: HashMap::new(),
            file: Some(Path::new(&cfg.data_dir).join("plans.json")),
        };
        store.load_state();
        store
    }

    /// A store with no backing file (tests, evaluation replays).
    pub fn in_memory() -> Self {
        Self {
            plans: HashMap::new(),
            file: None,
        }
    }

    pub fn insert(&mut self, plan: TradePlan) {
        self.plans.insert(plan.plan_id.clone(), plan);
        self.save_state();
    }

    /// Replace the stored copy of a plan after mutation.
    pub fn update(&mut self, plan: TradePlan) {
        self.plans.insert(plan.plan_id.clone(), plan);
        self.save_state();
    }

    pub fn get(&self, plan_id: &str) -> Option<&TradePlan> {
        self.plans.get(plan_id)
    }

    pub fn request_cancel(&mut self, plan_id: &str) -> bool {
        let found = match self.plans.get_mut(plan_id) {
            Some(plan) if plan.status == PlanStatus::Pending => {
                plan.cancel_requested = true;
                true
            }
            _ => false,
        };
        if found {
            self.save_state();
        }
        found
    }

    /// IDs of every plan that is not in a terminal state, in stable order.
    pub fn non_terminal_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .plans
            .values()
            .filter(|p| !p.status.is_terminal())
            .map(|p| p.plan_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn non_terminal_for(&self, symbol: &str) -> Vec<&TradePlan> {
        self.plans
            .values()
            .filter(|p| !p.status.is_terminal() && p.symbol == symbol)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    fn save_state(&self) {
        let Some(ref file) = self.file else { return };
        if let Some(parent) = file.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string_pretty(&self.plans) {
            let _ = fs::write(file, json);
        }
    }

    fn load_state(&mut self) {
        let Some(ref file) = self.file else { return };
        if let Ok(content) = fs::read_to_string(file) {
            match serde_json::from_str::<HashMap<String, TradePlan>>(&content) {
                Ok(plans) => self.plans = plans,
                Err(e) => debug!("Plan store load skipped: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use crate::test_helpers::make_plan;

    #[test]
    fn non_terminal_queries() {
        let mut store = PlanStore::in_memory();
        let plan = make_plan(Direction::Buy, 100.0, 95.0, 110.0);
        let id = plan.plan_id.clone();
        store.insert(plan);

        let mut done = make_plan(Direction::Sell, 100.0, 105.0, 90.0);
        done.plan_id = "done".to_string();
        done.expire();
        store.insert(done);

        assert_eq!(store.non_terminal_ids(), vec![id.clone()]);
        assert_eq!(store.non_terminal_for("XAUUSD").len(), 1);
        assert!(store.non_terminal_for("EURUSD").is_empty());
    }

    #[test]
    fn cancel_only_marks_pending_plans() {
        let mut store = PlanStore::in_memory();
        let mut plan = make_plan(Direction::Buy, 100.0, 95.0, 110.0);
        plan.plan_id = "p1".to_string();
        store.insert(plan);
        assert!(store.request_cancel("p1"));
        assert!(store.get("p1").unwrap().cancel_requested);
        assert!(!store.request_cancel("missing"));
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("sentinel_test_{}", std::process::id()));
        let mut cfg = crate::test_helpers::default_test_config();
        cfg.data_dir = dir.to_string_lossy().to_string();

        let mut store = PlanStore::new(&cfg);
        let plan = make_plan(Direction::Buy, 100.0, 95.0, 110.0);
        let id = plan.plan_id.clone();
        store.insert(plan);

        let reloaded = PlanStore::new(&cfg);
        assert!(reloaded.get(&id).is_some());
        let _ = std::fs::remove_dir_all(dir);
    }
}
