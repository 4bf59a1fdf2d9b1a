//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Round a USD amount to cents (banker's rounding, like the exchange reports).
pub fn round_usd(value: Decimal) -> Decimal {
    value.round_dp(2)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Kraken publishes fee tiers in percent (`0.02` = 0.02%); convert to a rate.
pub fn percent_to_rate(percent: Decimal) -> Decimal {
    percent / dec!(100)
}

/// `$1,234,567.89`
pub fn format_usd(value: Decimal) -> String {
    let rounded = round_usd(value);
    let negative = rounded.is_sign_negative() && rounded != Decimal::ZERO;
    let text = format!("{:.2}", rounded.abs());
    let (whole, frac) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if negative {
        format!("-${}.{}", grouped, frac)
    } else {
        format!("${}.{}", grouped, frac)
    }
}

/// Rate to a percentage string with four decimals (`0.0002` -> `0.0200%`).
pub fn format_rate_percent(rate: Decimal) -> String {
    format!("{:.4}%", rate * dec!(100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_usd() {
        assert_eq!(round_usd(dec!(10.126)), dec!(10.13));
        assert_eq!(round_usd(dec!(10.125)), dec!(10.12)); // half to even
        assert_eq!(round_usd(dec!(-3.999)), dec!(-4.00));
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(10), dec!(4)), dec!(2.5));
        assert_eq!(safe_div(dec!(10), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_format_usd_groups_thousands() {
        assert_eq!(format_usd(dec!(1234567.891)), "$1,234,567.89");
        assert_eq!(format_usd(dec!(999)), "$999.00");
        assert_eq!(format_usd(Decimal::ZERO), "$0.00");
        assert_eq!(format_usd(dec!(-1500.5)), "-$1,500.50");
    }

    #[test]
    fn test_fee_rate_formatting() {
        assert_eq!(percent_to_rate(dec!(0.02)), dec!(0.0002));
        assert_eq!(format_rate_percent(dec!(0.0002)), "0.0200%");
        assert_eq!(format_rate_percent(dec!(-0.0001)), "-0.0100%");
    }
}
