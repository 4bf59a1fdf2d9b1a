//! Aggregations over Kraken account history.
//!
//! Pure functions: everything here takes fetched rows and a clock value and
//! returns serializable results, so it is tested without the network.

pub mod assets;
pub mod daily;
pub mod period;
pub mod positions;

pub use assets::asset_from_contract;
pub use daily::{
    process_history, ChartSeries, DailyPoint, ProcessedHistory, Summary, TradeGroup, TradeRecord,
    VolumePoint, VolumeSeries,
};
pub use period::{day_range, period_boundaries};
pub use positions::{
    accumulate_costs, replay_to_open, unrealized_pnl, PositionCosts, PositionDetail,
    PositionSummary,
};
