//! Daily fee/funding/volume series built from the account log.
//!
//! One pass over the log produces everything the dashboard charts:
//! - a complete per-day series (zero-filled) for the fetch window
//! - the fee-bearing trade list
//! - per-day trade groups by asset and price
//!
//! Shorter chart windows are cut from the tail of the same series.

use super::assets::asset_from_contract;
use super::period::day_range;
use crate::exchange::{AccountLogEntry, Fill};
use crate::utils::decimal::{round_usd, safe_div};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Trades of one asset at one price on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeGroup {
    pub asset: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub count: u32,
    /// `HH:MM:SS` of the earliest trade in the group
    pub first_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub fees: Decimal,
    pub funding: Decimal,
    pub volume: Decimal,
    pub trade_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trades: Vec<TradeGroup>,
}

impl DailyPoint {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            fees: Decimal::ZERO,
            funding: Decimal::ZERO,
            volume: Decimal::ZERO,
            trade_count: 0,
            trades: Vec::new(),
        }
    }
}

/// A `futures trade` row with its volume resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub date: String,
    pub timestamp: i64,
    pub contract: String,
    pub fee: Decimal,
    pub trade_price: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub usd_volume: Decimal,
    pub execution_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub period: String,
    pub total_fees: Decimal,
    pub total_funding: Decimal,
    pub total_cost: Decimal,
    pub trade_count: u32,
    pub avg_daily_fees: Decimal,
    pub avg_daily_funding: Decimal,
    pub total_volume: Decimal,
}

impl Summary {
    pub fn from_points(points: &[DailyPoint], days: u32) -> Self {
        let total_fees: Decimal = points.iter().map(|p| p.fees).sum();
        let total_funding: Decimal = points.iter().map(|p| p.funding).sum();
        let total_volume: Decimal = points.iter().map(|p| p.volume).sum();
        let trade_count = points.iter().map(|p| p.trade_count).sum();
        let days_dec = Decimal::from(days);

        Self {
            period: format!("{} days", days),
            total_fees: round_usd(total_fees),
            total_funding: round_usd(total_funding),
            total_cost: round_usd(total_fees + total_funding),
            trade_count,
            avg_daily_fees: round_usd(safe_div(total_fees, days_dec)),
            avg_daily_funding: round_usd(safe_div(total_funding, days_dec)),
            total_volume: round_usd(total_volume),
        }
    }

    pub fn empty(days: u32) -> Self {
        Self::from_points(&[], days)
    }
}

/// Processed account history for one credential set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedHistory {
    pub daily: Vec<DailyPoint>,
    pub trades: Vec<TradeRecord>,
    pub summary: Summary,
    pub period_days: u32,
    pub last_updated: i64,
}

impl ProcessedHistory {
    /// The trailing `days` of the series with a recomputed summary. The
    /// trade list is kept whole.
    pub fn last_days(&self, days: u32) -> ProcessedHistory {
        if days >= self.period_days {
            return self.clone();
        }

        let skip = self.daily.len().saturating_sub(days as usize);
        let daily = self.daily[skip..].to_vec();
        let summary = Summary::from_points(&daily, days);

        ProcessedHistory {
            daily,
            trades: self.trades.clone(),
            summary,
            period_days: days,
            last_updated: self.last_updated,
        }
    }

    pub fn chart(&self) -> ChartSeries {
        ChartSeries::from_points(&self.daily)
    }

    pub fn volumes(&self) -> VolumeSeries {
        VolumeSeries {
            data: self
                .daily
                .iter()
                .map(|p| VolumePoint {
                    date: p.date,
                    volume: p.volume,
                })
                .collect(),
            period: format!("{} days", self.period_days),
            total_volume: self.summary.total_volume,
        }
    }
}

/// Parallel arrays for the fee/funding chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub labels: Vec<String>,
    pub fees: Vec<Decimal>,
    pub funding: Vec<Decimal>,
    /// Day label -> trade groups
    pub trades: BTreeMap<String, Vec<TradeGroup>>,
    pub total_fees: Decimal,
    pub total_funding: Decimal,
    pub total_cost: Decimal,
}

impl ChartSeries {
    pub fn from_points(points: &[DailyPoint]) -> Self {
        let total_fees: Decimal = points.iter().map(|p| p.fees).sum();
        let total_funding: Decimal = points.iter().map(|p| p.funding).sum();

        Self {
            labels: points.iter().map(|p| p.date.to_string()).collect(),
            fees: points.iter().map(|p| p.fees).collect(),
            funding: points.iter().map(|p| p.funding).collect(),
            trades: points
                .iter()
                .filter(|p| !p.trades.is_empty())
                .map(|p| (p.date.to_string(), p.trades.clone()))
                .collect(),
            total_fees: round_usd(total_fees),
            total_funding: round_usd(total_funding),
            total_cost: round_usd(total_fees + total_funding),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumePoint {
    pub date: NaiveDate,
    pub volume: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSeries {
    pub data: Vec<VolumePoint>,
    pub period: String,
    pub total_volume: Decimal,
}

#[derive(Default)]
struct DayAccumulator {
    fees: Decimal,
    funding: Decimal,
    volume: Decimal,
    trade_count: u32,
    // (asset, price) -> group, earliest timestamp
    groups: HashMap<(String, Decimal), (TradeGroup, i64)>,
}

/// Aggregate account-log rows into a `days`-long series ending at `now`.
///
/// Funding rows add `|realized_funding|`. Trade rows add `|fee|` and count as
/// a trade only when the fee is non-zero (Kraken books a zero-fee twin row
/// per fill). Volume is taken once per execution id from the matching fill's
/// USD value; without one, fee-bearing rows estimate it as
/// `fee / fallback_maker_fee`.
pub fn process_history(
    logs: &[AccountLogEntry],
    fills: &[Fill],
    days: u32,
    now: DateTime<Utc>,
    fallback_maker_fee: Decimal,
) -> ProcessedHistory {
    let window = day_range(days, now.date_naive());
    let mut accumulators: HashMap<NaiveDate, DayAccumulator> = window
        .iter()
        .map(|d| (*d, DayAccumulator::default()))
        .collect();

    let fills_by_id: HashMap<&str, &Fill> = fills
        .iter()
        .filter_map(|f| f.uid.as_deref().map(|uid| (uid, f)))
        .collect();
    let mut seen_executions: HashSet<&str> = HashSet::new();
    let mut grouped_executions: HashSet<&str> = HashSet::new();
    let mut trades = Vec::new();
    let mut skipped = 0usize;

    for log in logs {
        let Some(timestamp) = log.timestamp() else {
            skipped += 1;
            continue;
        };
        let Some(day) = accumulators.get_mut(&timestamp.date_naive()) else {
            continue;
        };

        if log.is_funding() {
            if let Some(funding) = log.realized_funding {
                day.funding += funding.abs();
            }
            continue;
        }

        if !log.is_trade() {
            continue;
        }
        let Some(fee) = log.fee.map(|f| f.abs()) else {
            continue;
        };

        if fee > Decimal::ZERO {
            day.fees += fee;
            day.trade_count += 1;
        }

        let exec_id = log.execution.as_deref();
        let fill = exec_id.and_then(|id| fills_by_id.get(id).copied());
        let trade_price = log.trade_price.filter(|p| *p > Decimal::ZERO);

        let mut quantity = None;
        let mut usd_volume = Decimal::ZERO;

        if let Some(id) = exec_id {
            if seen_executions.insert(id) {
                if let Some(fill) = fill {
                    quantity = Some(fill.signed_quantity.abs());
                    usd_volume = fill.usd_value.unwrap_or_default().abs();
                }
            }
        }

        let fill_has_value = fill.and_then(|f| f.usd_value).is_some();
        if usd_volume.is_zero() && fee > Decimal::ZERO && !fill_has_value {
            if let Some(price) = trade_price {
                usd_volume = safe_div(fee, fallback_maker_fee);
                quantity = Some(safe_div(usd_volume, price));
            }
        }

        day.volume += usd_volume;

        let asset = asset_from_contract(log.contract.as_deref().unwrap_or_default());
        let price = log.trade_price.or(log.mark_price).unwrap_or_default().abs();
        let ts_ms = timestamp.timestamp_millis();
        let time_label = timestamp.format("%H:%M:%S").to_string();
        // Twin rows share the execution id: count the fill once
        let first_of_execution = exec_id.map(|id| grouped_executions.insert(id)).unwrap_or(true);

        let (group, earliest) = day.groups.entry((asset.clone(), price)).or_insert_with(|| {
            (
                TradeGroup {
                    asset,
                    price,
                    quantity: Decimal::ZERO,
                    fee: Decimal::ZERO,
                    count: 0,
                    first_time: time_label.clone(),
                },
                ts_ms,
            )
        });
        group.fee += fee;
        if first_of_execution {
            group.quantity += log.quantity.map(|q| q.abs()).or(quantity).unwrap_or_default();
            group.count += 1;
        }
        if ts_ms < *earliest {
            *earliest = ts_ms;
            group.first_time = time_label;
        }

        trades.push(TradeRecord {
            date: log.date.clone(),
            timestamp: ts_ms,
            contract: log.contract.clone().unwrap_or_default(),
            fee,
            trade_price: log.trade_price,
            quantity,
            usd_volume,
            execution_id: log.execution.clone(),
        });
    }

    if skipped > 0 {
        debug!("Skipped {} log rows without a parseable date", skipped);
    }

    trades.sort_by_key(|t| t.timestamp);

    let daily: Vec<DailyPoint> = window
        .iter()
        .map(|date| match accumulators.remove(date) {
            Some(acc) => {
                let mut groups: Vec<TradeGroup> = acc
                    .groups
                    .into_values()
                    .map(|(mut g, _)| {
                        g.fee = round_usd(g.fee);
                        g
                    })
                    .collect();
                groups.sort_by(|a, b| a.asset.cmp(&b.asset).then(b.price.cmp(&a.price)));

                DailyPoint {
                    date: *date,
                    fees: round_usd(acc.fees),
                    funding: round_usd(acc.funding),
                    volume: round_usd(acc.volume),
                    trade_count: acc.trade_count,
                    trades: groups,
                }
            }
            None => DailyPoint::empty(*date),
        })
        .collect();

    let summary = Summary::from_points(&daily, days);

    ProcessedHistory {
        daily,
        trades,
        summary,
        period_days: days,
        last_updated: now.timestamp_millis(),
    }
}
