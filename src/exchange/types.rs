//! Type definitions for Kraken Futures API responses.

use crate::utils::decimal::percent_to_rate;
use crate::utils::time::parse_log_date;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Account-log `info` value for funding settlements.
pub const ENTRY_TYPE_FUNDING_RATE_CHANGE: &str = "funding rate change";
/// Account-log `info` value for fills.
pub const ENTRY_TYPE_FUTURES_TRADE: &str = "futures trade";

/// Kraken API key pair as entered by the user.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    /// Base64 encoded, as issued by Kraken
    pub api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key_len", &self.api_key.len())
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// One row of `/api/history/v3/account-log`.
///
/// Kraken leaves most numeric columns `null` depending on the row type, so
/// everything except `date` and `info` is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountLogEntry {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(default)]
    pub fee: Option<Decimal>,
    #[serde(default)]
    pub realized_funding: Option<Decimal>,
    #[serde(default)]
    pub funding_rate: Option<Decimal>,
    #[serde(default)]
    pub trade_price: Option<Decimal>,
    #[serde(default)]
    pub mark_price: Option<Decimal>,
    /// Execution uid linking the row to an execution event
    #[serde(default)]
    pub execution: Option<String>,
    #[serde(default, alias = "size")]
    pub quantity: Option<Decimal>,
}

impl AccountLogEntry {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_log_date(&self.date)
    }

    pub fn is_funding(&self) -> bool {
        self.info == ENTRY_TYPE_FUNDING_RATE_CHANGE
    }

    pub fn is_trade(&self) -> bool {
        self.info == ENTRY_TYPE_FUTURES_TRADE
    }

    /// Contract in upper case (empty when absent).
    pub fn contract_upper(&self) -> String {
        self.contract.as_deref().unwrap_or_default().to_uppercase()
    }
}

/// Parameters for one account-log pagination run.
#[derive(Debug, Clone)]
pub struct AccountLogQuery {
    pub since_ms: i64,
    pub before_ms: i64,
    /// Repeated `info` filter; empty means all row types
    pub info: Vec<String>,
    pub limit: u32,
}

impl AccountLogQuery {
    pub const DEFAULT_LIMIT: u32 = 500;

    pub fn new(since_ms: i64, before_ms: i64) -> Self {
        Self {
            since_ms,
            before_ms,
            info: Vec::new(),
            limit: Self::DEFAULT_LIMIT,
        }
    }

    /// Only funding settlements and fills, the rows the dashboard aggregates.
    pub fn costs_only(mut self) -> Self {
        self.info = vec![
            ENTRY_TYPE_FUNDING_RATE_CHANGE.to_string(),
            ENTRY_TYPE_FUTURES_TRADE.to_string(),
        ];
        self
    }

    pub fn with_info(mut self, info: &str) -> Self {
        self.info.push(info.to_string());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }
}

/// One item of `/api/history/v3/executions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionEvent {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub event: Option<ExecutionEnvelope>,
    // Flat shape used by older responses
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, alias = "size")]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub direction: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionEnvelope {
    #[serde(default)]
    pub execution: Option<ExecutionWrapper>,
}

/// `event.execution`: either wraps a nested `execution` or is the detail itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionWrapper {
    #[serde(default)]
    pub execution: Option<ExecutionDetail>,
    #[serde(flatten)]
    pub inline: ExecutionDetail,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDetail {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub usd_value: Option<Decimal>,
    #[serde(default)]
    pub tradeable: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub order: Option<OrderInfo>,
    #[serde(default)]
    pub order_data: Option<OrderData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderInfo {
    #[serde(default)]
    pub tradeable: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderData {
    #[serde(default)]
    pub fee: Option<Decimal>,
}

/// Normalized execution: the only view the aggregations work with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub uid: Option<String>,
    pub timestamp_ms: i64,
    pub symbol: String,
    /// Sells are negative
    pub signed_quantity: Decimal,
    /// Absolute fee paid
    pub fee: Decimal,
    pub usd_value: Option<Decimal>,
}

impl ExecutionEvent {
    /// Nested-shape event as Kraken emits it for a single fill.
    pub fn trade(
        uid: &str,
        timestamp_ms: i64,
        symbol: &str,
        direction: &str,
        quantity: Decimal,
        fee: Decimal,
        usd_value: Option<Decimal>,
    ) -> Self {
        let detail = ExecutionDetail {
            uid: Some(uid.to_string()),
            quantity: Some(quantity),
            usd_value,
            order: Some(OrderInfo {
                tradeable: Some(symbol.to_string()),
                direction: Some(direction.to_string()),
            }),
            order_data: Some(OrderData { fee: Some(fee) }),
            ..ExecutionDetail::default()
        };

        Self {
            uid: Some(format!("evt-{}", uid)),
            timestamp: Some(timestamp_ms),
            event: Some(ExecutionEnvelope {
                execution: Some(ExecutionWrapper {
                    execution: Some(detail),
                    inline: ExecutionDetail::default(),
                }),
            }),
            ..Self::default()
        }
    }

    fn detail(&self) -> Option<&ExecutionDetail> {
        let wrapper = self.event.as_ref()?.execution.as_ref()?;
        Some(wrapper.execution.as_ref().unwrap_or(&wrapper.inline))
    }

    /// Normalize either response shape. `None` without a timestamp.
    pub fn fill(&self) -> Option<Fill> {
        let timestamp_ms = self.timestamp?;

        let (uid, symbol, quantity, direction, fee, usd_value) = match self.detail() {
            Some(detail) => {
                let order = detail.order.as_ref();
                let symbol = order
                    .and_then(|o| o.tradeable.clone())
                    .or_else(|| detail.tradeable.clone())
                    .or_else(|| detail.symbol.clone())
                    .unwrap_or_default();
                let direction = order.and_then(|o| o.direction.clone()).unwrap_or_default();
                let fee = detail
                    .order_data
                    .as_ref()
                    .and_then(|d| d.fee)
                    .unwrap_or_default();
                (
                    detail.uid.clone(),
                    symbol,
                    detail.quantity.unwrap_or_default(),
                    direction,
                    fee,
                    detail.usd_value,
                )
            }
            None => (
                self.uid.clone(),
                self.symbol.clone().unwrap_or_default(),
                self.quantity.unwrap_or_default(),
                self.direction.clone().unwrap_or_default(),
                Decimal::ZERO,
                None,
            ),
        };

        let quantity = quantity.abs();
        let signed_quantity = if direction.eq_ignore_ascii_case("sell") {
            -quantity
        } else {
            quantity
        };

        Some(Fill {
            uid,
            timestamp_ms,
            symbol: symbol.to_uppercase(),
            signed_quantity,
            fee: fee.abs(),
            usd_value,
        })
    }
}

/// Entry of `openPositions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPosition {
    pub symbol: String,
    #[serde(default)]
    pub side: String,
    pub size: Decimal,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub fill_time: Option<String>,
}

impl OpenPosition {
    pub fn new(symbol: &str, side: &str, size: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: side.to_string(),
            size,
            price,
            fill_time: None,
        }
    }

    /// Size with the sign of the side (short is negative).
    pub fn signed_size(&self) -> Decimal {
        if self.side.eq_ignore_ascii_case("short") {
            -self.size.abs()
        } else if self.side.eq_ignore_ascii_case("long") {
            self.size.abs()
        } else {
            self.size
        }
    }
}

/// `ticker` object of `/derivatives/api/v3/tickers/{symbol}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub symbol: String,
    #[serde(default)]
    pub mark_price: Option<Decimal>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub last: Option<Decimal>,
    #[serde(default)]
    pub vol24h: Option<Decimal>,
    #[serde(default)]
    pub open_interest: Option<Decimal>,
    #[serde(default)]
    pub funding_rate: Option<Decimal>,
    #[serde(default)]
    pub last_time: Option<String>,
}

impl Ticker {
    /// Mark price, else last trade.
    pub fn price(&self) -> Option<Decimal> {
        self.mark_price.or(self.last)
    }
}

/// Volume tier; fees are in percent (`0.02` = 0.02%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeTier {
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    #[serde(default)]
    pub usd_volume: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tiers: Vec<FeeTier>,
}

impl FeeSchedule {
    /// Highest tier whose threshold the volume reaches.
    pub fn tier_for(&self, volume: Decimal) -> Option<&FeeTier> {
        self.tiers
            .iter()
            .filter(|t| t.usd_volume <= volume)
            .max_by(|a, b| a.usd_volume.cmp(&b.usd_volume))
            .or_else(|| self.tiers.iter().min_by(|a, b| a.usd_volume.cmp(&b.usd_volume)))
    }
}

/// The user's current fee level. Rates are fractions (`0.0002` = 0.02%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeInfo {
    pub volume_30d: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub fee_schedules: Vec<FeeSchedule>,
}

impl FeeInfo {
    /// Pick the schedule with the largest user volume (or the first one) and
    /// its matching tier.
    pub fn from_schedules(schedules: Vec<FeeSchedule>, volumes: &HashMap<String, Decimal>) -> Self {
        let active = schedules
            .iter()
            .filter_map(|s| volumes.get(&s.uid).map(|v| (s, *v)))
            .max_by(|a, b| a.1.cmp(&b.1))
            .or_else(|| schedules.first().map(|s| (s, Decimal::ZERO)));

        let (volume_30d, maker_fee, taker_fee) = match active {
            Some((schedule, volume)) => match schedule.tier_for(volume) {
                Some(tier) => (
                    volume,
                    percent_to_rate(tier.maker_fee),
                    percent_to_rate(tier.taker_fee),
                ),
                None => (volume, Decimal::ZERO, Decimal::ZERO),
            },
            None => (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
        };

        Self {
            volume_30d,
            maker_fee,
            taker_fee,
            fee_schedules: schedules,
        }
    }
}
