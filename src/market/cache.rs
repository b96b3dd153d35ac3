use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::Config;
use crate::market::{MarketFeed, SessionManager};
use crate::models::MarketSnapshot;

/// Per-symbol snapshot cache with a bounded TTL. Refresh replaces the whole
/// `Arc<MarketSnapshot>` in one store, so readers either see the previous
/// snapshot or the new one, never a partial write.
pub struct SnapshotCache {
    ttl: Duration,
    entries: HashMap<String, (Instant, Arc<MarketSnapshot>)>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// The cached snapshot for `symbol`, if still within TTL.
    pub fn get(&self, symbol: &str) -> Option<Arc<MarketSnapshot>> {
        self.entries.get(symbol).and_then(|(at, snap)| {
            if at.elapsed() <= self.ttl {
                Some(Arc::clone(snap))
            } else {
                None
            }
        })
    }

    pub fn is_stale(&self, symbol: &str) -> bool {
        self.get(symbol).is_none()
    }

    /// Fetch a fresh snapshot through the feed, overlay the locally resolved
    /// session, and atomically replace the cache entry. A failed fetch keeps
    /// the previous entry (which may then age out).
    pub async fn refresh(
        &mut self,
        symbol: &str,
        feed: &mut dyn MarketFeed,
        sessions: &SessionManager,
        _cfg: &Config,
    ) -> bool {
        match feed.fetch_snapshot(symbol).await {
            Ok(mut snap) => {
                snap.session = sessions.info();
                self.entries
                    .insert(symbol.to_string(), (Instant::now(), Arc::new(snap)));
                true
            }
            Err(e) => {
                debug!("Snapshot refresh {}: {}", symbol, e);
                false
            }
        }
    }

    /// Insert a pre-built snapshot directly (tests, replay).
    pub fn put(&mut self, snap: MarketSnapshot) {
        self.entries
            .insert(snap.symbol.clone(), (Instant::now(), Arc::new(snap)));
    }
}
