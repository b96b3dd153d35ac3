use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::market::MarketFeed;
use crate::models::{
    MarketSnapshot, OrderFlow, SessionInfo, StructureObservation, Timeframe, TimeframeMetrics,
    VolatilityRegime,
};

const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct SnapshotPayload {
    bid: f64,
    ask: f64,
    nominal_spread: f64,
    regime: VolatilityRegime,
    timeframes: HashMap<String, TimeframeMetrics>,
    #[serde(default)]
    order_flow: Option<OrderFlow>,
    #[serde(default)]
    structure: Vec<StructureObservation>,
    #[serde(default)]
    vwap: Option<f64>,
    #[serde(default)]
    news_blackout: bool,
    #[serde(default)]
    session_driven: bool,
    #[serde(default)]
    momentum_quality: Option<f64>,
    #[serde(default)]
    liquidity_position: Option<f64>,
}

/// REST client for the indicator service that assembles snapshot payloads.
/// Session fields are overlaid by the cache from the local clock.
pub struct FeedClient {
    client: Client,
    base_url: String,
    last_request: Option<Instant>,
}

impl FeedClient {
    pub fn new(cfg: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: cfg.feed_url.trim_end_matches('/').to_string(),
            last_request: None,
        }
    }

    async fn throttle(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

#[async_trait]
impl MarketFeed for FeedClient {
    async fn fetch_snapshot(&mut self, symbol: &str) -> Result<MarketSnapshot> {
        self.throttle().await;

        let url = format!("{}/snapshot/{}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("Feed request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Feed error {}: {}", status, body);
        }

        let payload: SnapshotPayload = resp.json().await.context("Feed payload decode failed")?;

        let timeframes = payload
            .timeframes
            .into_iter()
            .filter_map(|(k, v)| Timeframe::from_str_loose(&k).map(|tf| (tf, v)))
            .collect();

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            taken_at: Utc::now(),
            bid: payload.bid,
            ask: payload.ask,
            spread: payload.ask - payload.bid,
            nominal_spread: payload.nominal_spread,
            // Placeholder; the cache overlays the clock-derived session.
            session: SessionInfo {
                name: "off_session".to_string(),
                weight: 0.5,
                low_liquidity: true,
            },
            regime: payload.regime,
            timeframes,
            order_flow: payload.order_flow,
            structure: payload.structure,
            vwap: payload.vwap,
            news_blackout: payload.news_blackout,
            session_driven: payload.session_driven,
            momentum_quality: payload.momentum_quality,
            liquidity_position: payload.liquidity_position,
        })
    }
}
