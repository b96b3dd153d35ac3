use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use trade_sentinel::broker::Broker;
use trade_sentinel::config::{Config, SharedConfig};
use trade_sentinel::defense::DefenseMonitor;
use trade_sentinel::evaluator::PlanEvaluator;
use trade_sentinel::market::{MarketFeed, SessionManager, SnapshotCache};
use trade_sentinel::models::Timeframe;
use trade_sentinel::store::{DefenseArchive, PlanStore};

pub struct Sentinel {
    config: SharedConfig,
    broker: Box<dyn Broker>,
    feed: Box<dyn MarketFeed>,
    evaluator: PlanEvaluator,
    cache: SnapshotCache,
    sessions: SessionManager,
    plans: PlanStore,
    monitor: DefenseMonitor,
    archive: DefenseArchive,

    last_evaluation: Instant,
    last_fast_check: Instant,
    last_archive: Instant,
}

impl Sentinel {
    pub async fn new(
        config: SharedConfig,
        broker: Box<dyn Broker>,
        feed: Box<dyn MarketFeed>,
    ) -> Self {
        let cfg = config.read().await;

        info!("{}", "=".repeat(60));
        info!("Trade Sentinel starting up");
        info!("Symbols: {}", cfg.symbols.join(", "));
        info!(
            "Evaluator every {}s | defense fast {}s / deep {}s",
            cfg.evaluator_interval_secs, cfg.defense.fast_check_secs, cfg.defense.deep_check_secs
        );
        info!("{}", "=".repeat(60));

        let plans = PlanStore::new(&cfg);
        let archive = DefenseArchive::new(&cfg);
        let restored = archive.load_live();
        if !restored.is_empty() {
            info!("Restored {} tracked positions from archive", restored.len());
        }
        let monitor = DefenseMonitor::restore(restored);
        let cache = SnapshotCache::new(Duration::from_secs(cfg.snapshot_ttl_secs));
        let sessions = SessionManager::new(&cfg);

        drop(cfg);

        let now = Instant::now();
        Self {
            config,
            broker,
            feed,
            evaluator: PlanEvaluator::new(),
            cache,
            sessions,
            plans,
            monitor,
            archive,
            last_evaluation: now,
            last_fast_check: now,
            last_archive: now,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Sentinel is now running. Press Ctrl+C to stop.");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    self.shutdown().await;
                    return Ok(());
                }
                _ = self.tick() => {}
            }
        }
    }

    async fn tick(&mut self) {
        let cfg = self.config.read().await.clone();
        self.sessions.update(&cfg, None);

        if self.last_evaluation.elapsed().as_secs() >= cfg.evaluator_interval_secs {
            self.refresh_snapshots(&cfg).await;
            let reports = self
                .evaluator
                .run_tick(&mut self.plans, &self.cache, self.broker.as_mut(), &cfg)
                .await;
            if !reports.is_empty() {
                debug!("Evaluator pass: {} plans visited", reports.len());
            }
            self.last_evaluation = Instant::now();
        }

        if self.last_fast_check.elapsed().as_secs() >= cfg.defense.fast_check_secs {
            self.refresh_snapshots(&cfg).await;
            self.defense_pass(&cfg).await;
            self.last_fast_check = Instant::now();
        }

        if self.last_archive.elapsed().as_secs() >= cfg.archive_interval_secs {
            self.write_archive();
            self.last_archive = Instant::now();
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    async fn refresh_snapshots(&mut self, cfg: &Config) {
        for symbol in cfg.symbols.clone() {
            if self.cache.is_stale(&symbol) {
                self.cache
                    .refresh(&symbol, self.feed.as_mut(), &self.sessions, cfg)
                    .await;
            }
        }
    }

    /// One defense sweep: reconcile tracked states against the broker's
    /// open positions, then run fast checks and any due deep checks.
    async fn defense_pass(&mut self, cfg: &Config) {
        let now = Utc::now();

        let open = match self.broker.open_positions().await {
            Ok(p) => p,
            Err(e) => {
                warn!("Position sync failed: {}", e);
                return;
            }
        };
        let open_tickets: HashSet<u64> = open.iter().map(|p| p.ticket).collect();
        let hedge_tickets: HashSet<u64> = self
            .monitor
            .tickets()
            .into_iter()
            .filter_map(|t| self.monitor.get(t).and_then(|st| st.hedge_ticket))
            .collect();

        // Adopt positions that appeared at the broker (our fills or manual
        // entries). Hedge legs are tracked through their parent state.
        for pos in &open {
            if self.monitor.contains(pos.ticket) || hedge_tickets.contains(&pos.ticket) {
                continue;
            }
            let entry_atr = self
                .cache
                .get(&pos.symbol)
                .and_then(|s| s.atr(Timeframe::M15))
                .unwrap_or(0.0);
            self.monitor.adopt(pos, entry_atr, now);
        }

        // Positions that vanished at the broker were closed externally
        // (stop-out, take-profit, manual close).
        for ticket in self.monitor.tickets() {
            if !open_tickets.contains(&ticket) {
                self.monitor
                    .on_external_close(ticket, self.broker.as_mut(), "external_close", now)
                    .await;
            }
        }

        for ticket in self.monitor.tickets() {
            let Some(symbol) = self.monitor.get(ticket).map(|st| st.symbol.clone()) else {
                continue;
            };
            let Some(snap) = self.cache.get(&symbol) else {
                debug!("#{}: no fresh snapshot for {}", ticket, symbol);
                continue;
            };

            let fast = self.monitor.fast_check(ticket, &snap, &cfg.defense, now);
            if fast.deep_due || self.monitor.deep_check_due(ticket, &cfg.defense, now) {
                self.monitor
                    .deep_check(ticket, &snap, self.broker.as_mut(), &cfg.defense, now)
                    .await;
            }
            if fast.flat_timer_fired {
                self.monitor
                    .flat_close(ticket, self.broker.as_mut(), now)
                    .await;
            }
        }
    }

    fn write_archive(&mut self) {
        let newly_closed = std::mem::take(&mut self.monitor.closed);
        let live: Vec<_> = self.monitor.states.values().collect();
        self.archive.snapshot(live, &newly_closed);
    }

    async fn shutdown(&mut self) {
        info!("Shutting down...");
        self.write_archive();
        info!(
            "State archived: {} live, store holds {} plans",
            self.monitor.states.len(),
            self.plans.len()
        );
    }
}
