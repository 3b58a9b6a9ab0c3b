//! Stock quantities.
//!
//! Quantities are exact decimals: stock may be fractional (kg, m, l) and
//! reservation arithmetic must never drift the way binary floats do.

use rust_decimal::Decimal;

/// A signed stock quantity in the product's unit of measure.
pub type Quantity = Decimal;

/// Clamp a quantity at zero (negative stock never counts as available).
pub fn non_negative(qty: Quantity) -> Quantity {
    qty.max(Decimal::ZERO)
}

/// True when `qty` is strictly greater than zero.
pub fn is_positive(qty: Quantity) -> bool {
    qty > Decimal::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn non_negative_clamps_below_zero_only() {
        assert_eq!(non_negative(dec!(-2.5)), Decimal::ZERO);
        assert_eq!(non_negative(dec!(3.25)), dec!(3.25));
    }

    #[test]
    fn decimal_arithmetic_is_exact() {
        let total = dec!(0.1) + dec!(0.2);
        assert_eq!(total, dec!(0.3));
        assert!(is_positive(total));
        assert!(!is_positive(Decimal::ZERO));
    }
}
