pub mod condition;
pub mod direction;
pub mod plan;
pub mod snapshot;
pub mod timeframe;

pub use condition::{Condition, ConditionSpec};
pub use direction::*;
pub use plan::TradePlan;
pub use snapshot::{
    MarketSnapshot, OrderFlow, SessionInfo, StructureObservation, TimeframeMetrics,
};
pub use timeframe::Timeframe;
