//! Fixed-point money arithmetic.
//!
//! Every monetary figure the statistics engine reports passes through the
//! 2-decimal half-up rounding here. Stored amounts are `REAL` columns, so
//! conversion goes through the shortest decimal string representation of
//! the `f64`; binary-float noise must never reach the rounding step.

use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Round to two decimals, ties away from zero.
pub fn round_price(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Exact decimal from a stored `f64`, via its shortest decimal representation.
///
/// Non-finite inputs (garbage rows) collapse to zero rather than poisoning a
/// whole report.
pub fn price_from_f64(value: f64) -> Decimal {
    if !value.is_finite() {
        return Decimal::ZERO;
    }
    Decimal::from_str(&value.to_string()).unwrap_or(Decimal::ZERO)
}

/// Rounded price straight from a stored `f64`.
pub fn price_value(value: f64) -> Decimal {
    round_price(price_from_f64(value))
}

/// Split a gross amount into `(vat, net)` for an integer percent tax rate.
///
/// The steps and their rounding points reproduce the terminal's own math:
/// `divider = 1 + rate/100`; `raw_net = round(gross / divider)`;
/// `vat = round(-(raw_net - gross))`; `net = gross - vat`.
pub fn vat_net(tax_rate: i64, gross_raw: Decimal) -> (Decimal, Decimal) {
    let gross = round_price(gross_raw);
    let divider = round_price(Decimal::ONE + Decimal::from(tax_rate) / Decimal::from(100));
    if divider.is_zero() {
        return (Decimal::ZERO, gross);
    }
    let raw_net = round_price(gross / divider);
    let vat = round_price(-(raw_net - gross));
    let net = gross - vat;
    (vat, net)
}
