//! Lot sizing: fixed-fraction allocation, floored to whole shares.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Result of sizing one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingOutcome {
    Shares(i64),
    /// The allocation buys less than one whole share
    InsufficientFunds,
}

/// Size an entry as `allocation_pct` of available cash, floored to
/// whole shares. Anything below one share is an insufficient-funds
/// outcome, not an error.
pub fn size_entry(available: Decimal, allocation_pct: Decimal, price: Decimal) -> SizingOutcome {
    if price <= Decimal::ZERO {
        return SizingOutcome::InsufficientFunds;
    }
    let budget = available * allocation_pct;
    let shares = (budget / price).floor().to_i64().unwrap_or(0);
    if shares < 1 {
        SizingOutcome::InsufficientFunds
    } else {
        SizingOutcome::Shares(shares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_floors_to_whole_shares() {
        // 10% of 10_000 = 1_000, at 142.50 => 7.01 shares => 7
        assert_eq!(
            size_entry(dec!(10000), dec!(0.10), dec!(142.50)),
            SizingOutcome::Shares(7)
        );
    }

    #[test]
    fn test_below_one_share_is_insufficient() {
        // 10% of 4_000 = 400, cannot afford one 450 share
        assert_eq!(
            size_entry(dec!(4000), dec!(0.10), dec!(450)),
            SizingOutcome::InsufficientFunds
        );
    }

    #[test]
    fn test_exact_boundary() {
        assert_eq!(
            size_entry(dec!(1000), dec!(0.10), dec!(100)),
            SizingOutcome::Shares(1)
        );
        assert_eq!(
            size_entry(dec!(999), dec!(0.10), dec!(100)),
            SizingOutcome::InsufficientFunds
        );
    }

    #[test]
    fn test_non_positive_price_is_insufficient() {
        assert_eq!(
            size_entry(dec!(10000), dec!(0.10), dec!(0)),
            SizingOutcome::InsufficientFunds
        );
    }
}
