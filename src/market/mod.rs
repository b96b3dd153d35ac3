pub mod cache;
pub mod feed;
pub mod sessions;

pub use cache::SnapshotCache;
pub use feed::FeedClient;
pub use sessions::SessionManager;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::MarketSnapshot;

/// The market-data collaborator: produces a fresh snapshot for a symbol.
/// Implementations do the network work; evaluation only ever reads the
/// cached result.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    async fn fetch_snapshot(&mut self, symbol: &str) -> Result<MarketSnapshot>;
}
