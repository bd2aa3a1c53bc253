//! # Money Module
//!
//! Provides the `Money` type for USD amounts and the `CurrencyRate` snapshot
//! stamped on sales and debt payments.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌                                  │
//! │                                                                         │
//! │  A sale's four buckets must add back up to its total after every       │
//! │  settlement and return. With floats that drifts; with cents it cannot. │
//! │                                                                         │
//! │    total_amount == cash + click + terminal + debt   (exact, in cents)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use meridian_core::money::Money;
//! use meridian_core::quantity::Quantity;
//!
//! let unit_price = Money::from_cents(1250); // $12.50
//! let line = unit_price.multiply_quantity(Quantity::from_milli(1_500)); // 1.5 units
//! assert_eq!(line.cents(), 1875);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

use crate::quantity::Quantity;
use crate::MONEY_EPSILON_CENTS;

// =============================================================================
// Money Type
// =============================================================================

/// A USD amount in cents.
///
/// ## Design Decisions
/// - **i64 (signed)**: negative values are legal; a return can push the debt
///   bucket below zero when the shop owes the customer
/// - **Single field tuple struct**: zero-cost abstraction over i64
/// - **Serialized as integer cents** on the wire and in the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type), sqlx(transparent))]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from whole dollars.
    ///
    /// ```rust
    /// use meridian_core::money::Money;
    /// assert_eq!(Money::from_dollars(40).cents(), 4000);
    /// ```
    #[inline]
    pub const fn from_dollars(dollars: i64) -> Self {
        Money(dollars * 100)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the whole-dollar portion.
    #[inline]
    pub const fn dollars(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the cents portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Multiplies a unit amount by a fractional quantity.
    ///
    /// Quantities carry three decimal places, so the product is rounded
    /// half away from zero back to whole cents.
    ///
    /// ```rust
    /// use meridian_core::money::Money;
    /// use meridian_core::quantity::Quantity;
    ///
    /// let price = Money::from_cents(299);
    /// assert_eq!(price.multiply_quantity(Quantity::from_units(3)).cents(), 897);
    /// assert_eq!(price.multiply_quantity(Quantity::from_milli(333)).cents(), 100);
    /// ```
    ///
    /// Saturates at the `i64` range. Validated inputs never get there; use
    /// [`Money::checked_multiply_quantity`] where they might.
    pub fn multiply_quantity(&self, qty: Quantity) -> Money {
        Money::from_cents(saturate(round_div(
            self.0 as i128 * qty.milli() as i128,
            Quantity::SCALE as i128,
        )))
    }

    /// Like [`Money::multiply_quantity`], `None` when the result does not fit.
    ///
    /// ```rust
    /// use meridian_core::money::Money;
    /// use meridian_core::quantity::Quantity;
    ///
    /// let huge = Money::from_cents(i64::MAX / 2);
    /// assert!(huge.checked_multiply_quantity(Quantity::from_units(3)).is_none());
    /// ```
    pub fn checked_multiply_quantity(&self, qty: Quantity) -> Option<Money> {
        let cents = round_div(
            self.0 as i128 * qty.milli() as i128,
            Quantity::SCALE as i128,
        );
        i64::try_from(cents).ok().map(Money)
    }

    #[inline]
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Scales this amount by `numerator / denominator`, rounding half away
    /// from zero. Used to give back a proportional share of a recorded total.
    ///
    /// Returns zero when `denominator` is zero.
    pub fn prorate(&self, numerator: i64, denominator: i64) -> Money {
        if denominator == 0 {
            return Money::zero();
        }
        Money::from_cents(saturate(round_div(
            self.0 as i128 * numerator as i128,
            denominator as i128,
        )))
    }

    /// Quantity-weighted average of two unit costs, used when a restock
    /// arrives at a different cost than the stock already on hand.
    ///
    /// ```rust
    /// use meridian_core::money::Money;
    /// use meridian_core::quantity::Quantity;
    ///
    /// let avg = Money::weighted_average(
    ///     Money::from_cents(100), Quantity::from_units(10),
    ///     Money::from_cents(130), Quantity::from_units(5),
    /// );
    /// assert_eq!(avg.cents(), 110);
    /// ```
    pub fn weighted_average(
        current: Money,
        on_hand: Quantity,
        incoming: Money,
        received: Quantity,
    ) -> Money {
        let on_hand = on_hand.milli().max(0) as i128;
        let received = received.milli() as i128;
        let weight = on_hand + received;
        if weight <= 0 {
            return incoming;
        }
        Money::from_cents(saturate(round_div(
            current.0 as i128 * on_hand + incoming.0 as i128 * received,
            weight,
        )))
    }

    /// Checks equality within the one-cent rounding epsilon.
    #[inline]
    pub fn approx_eq(&self, other: Money) -> bool {
        (self.0 - other.0).abs() <= MONEY_EPSILON_CENTS
    }

    /// Converts to the local currency using a UZS-per-USD snapshot.
    ///
    /// ```rust
    /// use meridian_core::money::{CurrencyRate, Money};
    /// let rate = CurrencyRate::from_uzs_per_usd(12_700);
    /// assert_eq!(Money::from_dollars(10).to_uzs(rate), 127_000);
    /// ```
    pub fn to_uzs(&self, rate: CurrencyRate) -> i64 {
        saturate(round_div(self.0 as i128 * rate.uzs_per_usd() as i128, 100))
    }
}

/// Integer division rounding half away from zero.
fn round_div(numerator: i128, denominator: i128) -> i128 {
    let half = denominator.abs() / 2;
    let adjusted = if (numerator < 0) != (denominator < 0) {
        numerator.saturating_sub(half * denominator.signum())
    } else {
        numerator.saturating_add(half * denominator.signum())
    };
    adjusted / denominator
}

fn saturate(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display shows `$12.50` / `-$3.00`. Debugging only; clients format amounts.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(
            f,
            "{}${}.{:02}",
            sign,
            self.dollars().abs(),
            self.cents_part()
        )
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Currency Rate
// =============================================================================

/// Exchange-rate snapshot in whole UZS per one USD.
///
/// Stamped on every sale and debt payment so that historical amounts can be
/// shown in local currency at the rate that applied when they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type), sqlx(transparent))]
#[ts(export)]
pub struct CurrencyRate(i64);

impl CurrencyRate {
    #[inline]
    pub const fn from_uzs_per_usd(rate: i64) -> Self {
        CurrencyRate(rate)
    }

    #[inline]
    pub const fn uzs_per_usd(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "$10.99");
        assert_eq!(Money::from_cents(-1000).to_string(), "-$10.00");
        assert_eq!(Money::zero().to_string(), "$0.00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_dollars(10);
        let b = Money::from_dollars(4);
        assert_eq!((a - b).cents(), 600);
        assert_eq!((a + b).cents(), 1400);
        assert_eq!((-b).cents(), -400);
        let total: Money = vec![a, b, b].into_iter().sum();
        assert_eq!(total, Money::from_dollars(18));
    }

    #[test]
    fn test_multiply_quantity_rounds_half_away_from_zero() {
        // $0.05 × 0.5 = 2.5 cents → 3 cents
        let m = Money::from_cents(5);
        assert_eq!(m.multiply_quantity(Quantity::from_milli(500)).cents(), 3);
        // negative profit rounds the other way
        let loss = Money::from_cents(-5);
        assert_eq!(loss.multiply_quantity(Quantity::from_milli(500)).cents(), -3);
    }

    #[test]
    fn test_prorate() {
        // recorded profit $10.00 over 3 units, return 1 unit → $3.33
        let profit = Money::from_dollars(10);
        assert_eq!(profit.prorate(1, 3).cents(), 333);
        assert_eq!(profit.prorate(2, 3).cents(), 667);
        assert_eq!(profit.prorate(1, 0), Money::zero());
    }

    #[test]
    fn test_weighted_average_with_empty_shelf() {
        let avg = Money::weighted_average(
            Money::from_cents(500),
            Quantity::zero(),
            Money::from_cents(420),
            Quantity::from_milli(2500),
        );
        assert_eq!(avg.cents(), 420);
    }

    #[test]
    fn test_approx_eq_within_one_cent() {
        let a = Money::from_cents(10000);
        assert!(a.approx_eq(Money::from_cents(10001)));
        assert!(a.approx_eq(Money::from_cents(9999)));
        assert!(!a.approx_eq(Money::from_cents(10002)));
    }

    #[test]
    fn test_to_uzs() {
        let rate = CurrencyRate::from_uzs_per_usd(12_650);
        assert_eq!(Money::from_cents(150).to_uzs(rate), 18_975);
    }
}
