use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedConfig = Arc<RwLock<Config>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTime {
    pub start: (u32, u32),
    pub end: (u32, u32),
}

/// Gate thresholds for the plan evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum reward/risk ratio.
    pub min_rr: f64,
    /// Maximum (spread + slippage) as a fraction of reward.
    pub max_cost_fraction: f64,
    /// Assumed slippage as a fraction of risk, by volatility regime.
    pub slippage_volatile: f64,
    pub slippage_normal: f64,
    /// Reject when risk < this multiple of ATR (with atr_validation on).
    pub atr_stop_multiple: f64,
    /// Timeframe whose ATR backs the stop-noise gate.
    pub atr_timeframe: crate::models::Timeframe,
    /// Reject when current spread exceeds this multiple of nominal.
    pub max_spread_multiple: f64,
}

/// Thresholds and timers for the defensive state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefenseConfig {
    pub warn_l1_score: f64,
    pub warn_l2_score: f64,
    pub hedge_score: f64,
    pub restore_score: f64,
    /// Fraction of the open volume hedged when entering HEDGED.
    pub hedge_ratio: f64,
    /// Protective stop on the hedge leg, in ATR multiples.
    pub hedge_stop_atr: f64,
    /// Minutes from entering HEDGED to the forced flat of both legs.
    pub flat_timer_minutes: i64,
    pub fast_check_secs: u64,
    pub deep_check_secs: u64,
    /// VWAP crosses since the last deep check that force an early one.
    pub early_deep_cross_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Symbols under management
    pub symbols: Vec<String>,

    // Bridges
    pub broker_url: String,
    pub broker_token: String,
    pub feed_url: String,

    // Evaluator
    pub evaluator_interval_secs: u64,
    pub snapshot_ttl_secs: u64,
    pub gates: GateConfig,

    // Strategy tags allowed to trade low-liquidity sessions
    // (range / mean-reversion styles; trend and breakout stay blocked).
    pub low_liquidity_tags: Vec<String>,

    // Defense
    pub defense: DefenseConfig,

    // Sessions (ET, minute offsets from midnight)
    pub sessions: HashMap<String, SessionTime>,
    pub session_weights: HashMap<String, f64>,

    // Persistence
    pub data_dir: String,
    pub archive_interval_secs: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };
        let env_f64 = |key: &str, default: f64| -> f64 {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };
        let env_u64 = |key: &str, default: u64| -> u64 {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        let mut sessions = HashMap::new();
        sessions.insert(
            "asian".to_string(),
            SessionTime {
                start: (20, 0),
                end: (0, 0),
            },
        );
        sessions.insert(
            "london".to_string(),
            SessionTime {
                start: (2, 0),
                end: (5, 0),
            },
        );
        sessions.insert(
            "ny_forex".to_string(),
            SessionTime {
                start: (7, 0),
                end: (10, 0),
            },
        );
        sessions.insert(
            "ny_indices".to_string(),
            SessionTime {
                start: (8, 30),
                end: (12, 0),
            },
        );

        let mut session_weights = HashMap::new();
        session_weights.insert("london".to_string(), 1.5);
        session_weights.insert("ny_forex".to_string(), 1.5);
        session_weights.insert("ny_indices".to_string(), 1.3);
        session_weights.insert("asian".to_string(), 0.3);
        session_weights.insert("off_session".to_string(), 0.3);

        Config {
            symbols: env("SYMBOLS", "XAUUSD")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            broker_url: env("BROKER_URL", "http://127.0.0.1:8787"),
            broker_token: env("BROKER_TOKEN", ""),
            feed_url: env("FEED_URL", "http://127.0.0.1:8788"),
            evaluator_interval_secs: env_u64("EVALUATOR_INTERVAL", 30),
            snapshot_ttl_secs: env_u64("SNAPSHOT_TTL", 30),
            gates: GateConfig {
                min_rr: env_f64("MIN_RR", 1.5),
                max_cost_fraction: env_f64("MAX_COST_FRACTION", 0.20),
                slippage_volatile: 0.05,
                slippage_normal: 0.03,
                atr_stop_multiple: 0.5,
                atr_timeframe: crate::models::Timeframe::M15,
                max_spread_multiple: 3.0,
            },
            low_liquidity_tags: vec![
                "range-scalp".to_string(),
                "range-fade".to_string(),
                "mean-reversion".to_string(),
                "fvg-retracement".to_string(),
                "pd-array".to_string(),
                "ob-rejection".to_string(),
            ],
            defense: DefenseConfig {
                warn_l1_score: -3.0,
                warn_l2_score: -5.0,
                hedge_score: -8.0,
                restore_score: -1.0,
                hedge_ratio: 0.5,
                hedge_stop_atr: 0.5,
                flat_timer_minutes: env_u64("FLAT_TIMER_MINUTES", 75) as i64,
                fast_check_secs: env_u64("DEFENSE_FAST_INTERVAL", 30),
                deep_check_secs: env_u64("DEFENSE_DEEP_INTERVAL", 900),
                early_deep_cross_count: 3,
            },
            sessions,
            session_weights,
            data_dir: env("DATA_DIR", "data"),
            archive_interval_secs: env_u64("ARCHIVE_INTERVAL", 300),
            log_level: env("LOG_LEVEL", "info"),
        }
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    pub fn allows_low_liquidity(&self, strategy_tag: &str) -> bool {
        let tag = strategy_tag.trim().to_lowercase();
        self.low_liquidity_tags.iter().any(|t| *t == tag)
    }
}
