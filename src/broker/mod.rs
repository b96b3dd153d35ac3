pub mod bridge;

pub use bridge::BridgeBroker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::models::Direction;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Traceability tag carried on the broker order (strategy tag, or
    /// `hedge:{ticket}` for hedge legs).
    pub comment: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct OrderFill {
    pub ticket: u64,
    pub fill_price: f64,
}

/// One open position as reported by the broker.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerPosition {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub entry_price: f64,
    #[serde(default)]
    pub profit: f64,
}

/// The broker execution surface. One implementation per venue; tests use a
/// recording mock. All methods are fallible with the typed broker taxonomy.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn get_quote(&mut self, symbol: &str) -> Result<Quote, BrokerError>;
    async fn place_order(&mut self, order: &OrderRequest) -> Result<OrderFill, BrokerError>;
    async fn modify_position(
        &mut self,
        ticket: u64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), BrokerError>;
    async fn close_position(&mut self, ticket: u64) -> Result<(), BrokerError>;
    async fn open_positions(&mut self) -> Result<Vec<BrokerPosition>, BrokerError>;
}
