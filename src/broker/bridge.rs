use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::broker::{Broker, BrokerPosition, OrderFill, OrderRequest, Quote};
use crate::config::Config;
use crate::error::BrokerError;

const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct BridgeResponse<T> {
    ok: bool,
    error: Option<String>,
    data: Option<T>,
}

/// REST client for the execution bridge (the process that actually talks to
/// the trading terminal). Bridge-level "rejected" payloads map to
/// `BrokerError::Rejected`; anything transport-level is `Connectivity`.
pub struct BridgeBroker {
    client: Client,
    base_url: String,
    token: String,
    last_request: Option<Instant>,
}

impl BridgeBroker {
    pub fn new(cfg: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: cfg.broker_url.trim_end_matches('/').to_string(),
            token: cfg.broker_token.clone(),
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

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &mut self,
        path: &str,
    ) -> Result<T, BrokerError> {
        self.throttle().await;
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| BrokerError::Connectivity(e.to_string()))?;
        Self::decode(resp).await
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &mut self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, BrokerError> {
        self.throttle().await;
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| BrokerError::Connectivity(e.to_string()))?;
        Self::decode(resp).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        resp: reqwest::Response,
    ) -> Result<T, BrokerError> {
        let status = resp.status();
        if status.is_server_error() {
            return Err(BrokerError::Connectivity(format!("bridge {}", status)));
        }
        let parsed: BridgeResponse<T> = resp
            .json()
            .await
            .map_err(|e| BrokerError::Connectivity(format!("bad bridge payload: {}", e)))?;
        if parsed.ok {
            parsed
                .data
                .ok_or_else(|| BrokerError::Connectivity("missing data field".to_string()))
        } else {
            let msg = parsed.error.unwrap_or_else(|| "unspecified".to_string());
            debug!("Bridge refusal: {}", msg);
            if msg.to_lowercase().contains("margin") {
                Err(BrokerError::InsufficientMargin)
            } else {
                Err(BrokerError::Rejected(msg))
            }
        }
    }
}

#[async_trait]
impl Broker for BridgeBroker {
    async fn get_quote(&mut self, symbol: &str) -> Result<Quote, BrokerError> {
        self.get_json(&format!("/quote/{}", symbol)).await
    }

    async fn place_order(&mut self, order: &OrderRequest) -> Result<OrderFill, BrokerError> {
        self.post_json(
            "/order",
            json!({
                "symbol": order.symbol,
                "direction": order.direction,
                "volume": order.volume,
                "sl": order.stop_loss,
                "tp": order.take_profit,
                "comment": order.comment,
            }),
        )
        .await
    }

    async fn modify_position(
        &mut self,
        ticket: u64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), BrokerError> {
        let _: serde_json::Value = self
            .post_json(
                &format!("/position/{}/modify", ticket),
                json!({ "sl": stop_loss, "tp": take_profit }),
            )
            .await?;
        Ok(())
    }

    async fn close_position(&mut self, ticket: u64) -> Result<(), BrokerError> {
        let _: serde_json::Value = self
            .post_json(&format!("/position/{}/close", ticket), json!({}))
            .await?;
        Ok(())
    }

    async fn open_positions(&mut self) -> Result<Vec<BrokerPosition>, BrokerError> {
        self.get_json("/positions").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_payloads_with_and_without_data() {
        let filled: BridgeResponse<Quote> =
            serde_json::from_str(r#"{"ok":true,"data":{"bid":99.95,"ask":100.05}}"#).unwrap();
        assert!(filled.ok);
        assert_eq!(filled.data.unwrap().ask, 100.05);

        let refusal: BridgeResponse<OrderFill> =
            serde_json::from_str(r#"{"ok":false,"error":"not enough margin"}"#).unwrap();
        assert!(!refusal.ok);
        assert!(refusal.data.is_none());
        assert_eq!(refusal.error.as_deref(), Some("not enough margin"));
    }
}
