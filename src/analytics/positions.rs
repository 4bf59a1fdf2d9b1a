//! Per-position cost accounting.
//!
//! Kraken does not report when a position was opened, so the open time is
//! recovered by replaying fills backwards from the current size until the
//! net position returns to flat. Funding and fees are then summed from that
//! point on.

use crate::exchange::{AccountLogEntry, Fill, OpenPosition};
use crate::utils::decimal::round_usd;
use crate::utils::time::from_millis;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Net size below which a position counts as flat.
pub const FLAT_EPSILON: Decimal = dec!(0.0001);

/// Unrealized P&L in USD; zero when any input is missing or non-positive.
pub fn unrealized_pnl(signed_size: Decimal, avg_price: Decimal, current_price: Decimal) -> Decimal {
    if current_price <= Decimal::ZERO || avg_price <= Decimal::ZERO || signed_size.is_zero() {
        return Decimal::ZERO;
    }

    let pnl = if signed_size > Decimal::ZERO {
        (current_price - avg_price) * signed_size.abs()
    } else {
        (avg_price - current_price) * signed_size.abs()
    };
    round_usd(pnl)
}

/// Walk `fills` (one symbol, newest first) backwards from `current_size` and
/// return the timestamp at which the position was flat before.
pub fn replay_to_open(current_size: Decimal, fills_newest_first: &[Fill]) -> Option<i64> {
    let mut net = current_size;
    for fill in fills_newest_first {
        net -= fill.signed_quantity;
        if net.abs() < FLAT_EPSILON {
            return Some(fill.timestamp_ms);
        }
    }
    None
}

/// Accumulated costs of one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionCosts {
    pub symbol: String,
    pub opened_at_ms: Option<i64>,
    pub accumulated_funding: Decimal,
    pub accumulated_fees: Decimal,
    /// History was cut to one year
    pub data_is_capped: bool,
    pub error: Option<String>,
}

impl PositionCosts {
    pub fn failed(symbol: &str, error: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            opened_at_ms: None,
            accumulated_funding: Decimal::ZERO,
            accumulated_fees: Decimal::ZERO,
            data_is_capped: false,
            error: Some(error.into()),
        }
    }
}

/// Sum `|realized_funding|` of the symbol's funding rows dated at or after
/// `opened_ms`, and the fees of its fills at or after `from_ms`.
/// Returns `(funding, fees)` rounded to cents.
pub fn accumulate_costs(
    symbol: &str,
    opened_ms: i64,
    from_ms: i64,
    logs: &[AccountLogEntry],
    fills: &[Fill],
) -> (Decimal, Decimal) {
    let symbol = symbol.to_uppercase();

    let funding: Decimal = logs
        .iter()
        .filter(|log| log.funding_rate.is_some())
        .filter_map(|log| log.realized_funding.map(|f| (log, f)))
        .filter(|(log, _)| match log.timestamp() {
            Some(ts) => ts.timestamp_millis() >= opened_ms,
            // undated rows are kept
            None => true,
        })
        .filter(|(log, _)| log.contract_upper().contains(&symbol))
        .map(|(_, f)| f.abs())
        .sum();

    let fee_from = from_ms.max(opened_ms);
    let fees: Decimal = fills
        .iter()
        .filter(|f| f.symbol == symbol && f.timestamp_ms >= fee_from && f.fee > Decimal::ZERO)
        .map(|f| f.fee)
        .sum();

    (round_usd(funding), round_usd(fees))
}

/// Open position row for the basic positions list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSummary {
    pub symbol: String,
    pub size: Decimal,
    pub avg_price: Decimal,
    pub side: String,
}

impl From<&OpenPosition> for PositionSummary {
    fn from(position: &OpenPosition) -> Self {
        let side = if position.side.is_empty() {
            side_of(position.signed_size())
        } else {
            position.side.clone()
        };

        Self {
            symbol: position.symbol.clone(),
            size: position.size,
            avg_price: position.price,
            side,
        }
    }
}

/// Open position with price, P&L and accumulated costs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDetail {
    pub symbol: String,
    pub size: Decimal,
    pub avg_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub accumulated_funding: Decimal,
    pub accumulated_fees: Decimal,
    pub net_unrealized_pnl: Decimal,
    /// ISO-8601 UTC
    pub opened_date: Option<String>,
    pub data_is_capped: bool,
    pub error: Option<String>,
    pub side: String,
}

impl PositionDetail {
    /// Funding and fees are costs: net = unrealized - funding - fees.
    pub fn build(position: &OpenPosition, current_price: Decimal, costs: &PositionCosts) -> Self {
        let signed = position.signed_size();
        let unrealized = unrealized_pnl(signed, position.price, current_price);
        let net = round_usd(unrealized - costs.accumulated_funding - costs.accumulated_fees);

        Self {
            symbol: position.symbol.clone(),
            size: signed,
            avg_price: position.price,
            current_price,
            unrealized_pnl: unrealized,
            accumulated_funding: costs.accumulated_funding,
            accumulated_fees: costs.accumulated_fees,
            net_unrealized_pnl: net,
            opened_date: costs
                .opened_at_ms
                .and_then(from_millis)
                .map(|dt| dt.to_rfc3339()),
            data_is_capped: costs.data_is_capped,
            error: costs.error.clone(),
            side: side_of(signed),
        }
    }
}

fn side_of(signed_size: Decimal) -> String {
    if signed_size > Decimal::ZERO {
        "long".to_string()
    } else {
        "short".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ENTRY_TYPE_FUNDING_RATE_CHANGE;

    fn fill(ts: i64, symbol: &str, qty: Decimal, fee: Decimal) -> Fill {
        Fill {
            uid: Some(format!("f{}", ts)),
            timestamp_ms: ts,
            symbol: symbol.to_string(),
            signed_quantity: qty,
            fee,
            usd_value: None,
        }
    }

    fn funding_row(date: &str, contract: &str, amount: Decimal) -> AccountLogEntry {
        AccountLogEntry {
            date: date.to_string(),
            info: ENTRY_TYPE_FUNDING_RATE_CHANGE.to_string(),
            contract: Some(contract.to_string()),
            realized_funding: Some(amount),
            funding_rate: Some(dec!(0.0001)),
            ..AccountLogEntry::default()
        }
    }

    #[test]
    fn test_unrealized_pnl_long_and_short() {
        assert_eq!(unrealized_pnl(dec!(1), dec!(50000), dec!(51000)), dec!(1000));
        assert_eq!(unrealized_pnl(dec!(-1), dec!(50000), dec!(51000)), dec!(-1000));
        assert_eq!(unrealized_pnl(dec!(-0.5), dec!(3000), dec!(2900.555)), dec!(49.72));
    }

    #[test]
    fn test_unrealized_pnl_guards() {
        assert_eq!(unrealized_pnl(dec!(1), dec!(50000), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(unrealized_pnl(dec!(1), Decimal::ZERO, dec!(50000)), Decimal::ZERO);
        assert_eq!(unrealized_pnl(Decimal::ZERO, dec!(1), dec!(2)), Decimal::ZERO);
        assert_eq!(unrealized_pnl(dec!(1), dec!(-5), dec!(2)), Decimal::ZERO);
    }

    #[test]
    fn test_replay_finds_flat_point() {
        // bought 0.3 then 0.2, sold 0.1: currently long 0.4
        let fills = vec![
            fill(300, "PF_XBTUSD", dec!(-0.1), dec!(0)),
            fill(200, "PF_XBTUSD", dec!(0.2), dec!(0)),
            fill(100, "PF_XBTUSD", dec!(0.3), dec!(0)),
        ];
        assert_eq!(replay_to_open(dec!(0.4), &fills), Some(100));
        // a short that was built in one fill
        let fills = vec![fill(500, "PF_XBTUSD", dec!(-2), dec!(0))];
        assert_eq!(replay_to_open(dec!(-2), &fills), Some(500));
    }

    #[test]
    fn test_replay_without_flat_point() {
        let fills = vec![fill(100, "PF_XBTUSD", dec!(0.1), dec!(0))];
        assert_eq!(replay_to_open(dec!(1), &fills), None);
        assert_eq!(replay_to_open(dec!(1), &[]), None);
    }

    #[test]
    fn test_accumulate_costs_filters_symbol_and_time() {
        let logs = vec![
            funding_row("2024-01-10T08:00:00.000Z", "pf_xbtusd", dec!(-1.5)),
            funding_row("2024-01-11T08:00:00.000Z", "PF_XBTUSD", dec!(0.5)),
            funding_row("2024-01-11T08:00:00.000Z", "PF_ETHUSD", dec!(-9)),
            // before the position opened
            funding_row("2024-01-01T08:00:00.000Z", "PF_XBTUSD", dec!(-100)),
            AccountLogEntry {
                date: "2024-01-11T09:00:00.000Z".to_string(),
                contract: Some("PF_XBTUSD".to_string()),
                realized_funding: Some(dec!(-50)),
                ..AccountLogEntry::default()
            },
        ];
        let opened = 1_704_844_800_000; // 2024-01-10
        let fills = vec![
            fill(opened + 1, "PF_XBTUSD", dec!(1), dec!(0.75)),
            fill(opened + 2, "PF_XBTUSD", dec!(1), dec!(0)),
            fill(opened + 3, "PF_ETHUSD", dec!(1), dec!(3)),
            fill(opened - 1, "PF_XBTUSD", dec!(1), dec!(4)),
        ];

        let (funding, fees) = accumulate_costs("pf_xbtusd", opened, opened, &logs, &fills);
        assert_eq!(funding, dec!(2));
        assert_eq!(fees, dec!(0.75));
    }

    #[test]
    fn test_detail_net_subtracts_costs() {
        let position = OpenPosition::new("PF_XBTUSD", "long", dec!(1), dec!(50000));
        let costs = PositionCosts {
            symbol: "PF_XBTUSD".to_string(),
            opened_at_ms: Some(1_704_844_800_000),
            accumulated_funding: dec!(150),
            accumulated_fees: dec!(50),
            data_is_capped: false,
            error: None,
        };

        let detail = PositionDetail::build(&position, dec!(100000), &costs);
        assert_eq!(detail.unrealized_pnl, dec!(50000));
        assert_eq!(detail.net_unrealized_pnl, dec!(49800));
        assert_eq!(detail.side, "long");
        assert_eq!(detail.opened_date.as_deref(), Some("2024-01-10T00:00:00+00:00"));

        let json = serde_json::to_value(&detail).unwrap();
        assert!(json.get("netUnrealizedPnl").is_some());
        assert!(json.get("dataIsCapped").is_some());
    }

    #[test]
    fn test_detail_for_short_and_failed_costs() {
        let position = OpenPosition::new("PF_ETHUSD", "short", dec!(2), dec!(3000));
        let costs = PositionCosts::failed("PF_ETHUSD", "API Error: timeout");

        let detail = PositionDetail::build(&position, dec!(2900), &costs);
        assert_eq!(detail.size, dec!(-2));
        assert_eq!(detail.side, "short");
        assert_eq!(detail.unrealized_pnl, dec!(200));
        assert_eq!(detail.net_unrealized_pnl, dec!(200));
        assert_eq!(detail.error.as_deref(), Some("API Error: timeout"));
        assert!(detail.opened_date.is_none());

        let summary = PositionSummary::from(&position);
        assert_eq!(summary.side, "short");
        assert_eq!(summary.avg_price, dec!(3000));
    }
}
