mod bot;

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use trade_sentinel::broker::BridgeBroker;
use trade_sentinel::config::Config;
use trade_sentinel::market::FeedClient;

use crate::bot::Sentinel;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let broker = Box::new(BridgeBroker::new(&cfg));
    let feed = Box::new(FeedClient::new(&cfg));
    let shared_config = cfg.shared();

    let mut sentinel = Sentinel::new(shared_config, broker, feed).await;
    sentinel.run().await?;

    Ok(())
}
