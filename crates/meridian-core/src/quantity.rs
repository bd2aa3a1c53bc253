//! # Quantity Module
//!
//! Stock quantities are decimals (goods sold by weight or length are common),
//! held as fixed-point thousandths so that stock arithmetic is exact.
//!
//! ```text
//!   JSON          Quantity         SQLite column
//!   1.5     ──►   milli = 1500 ──► INTEGER 1500
//!   2       ──►   milli = 2000 ──► INTEGER 2000
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use ts_rs::TS;

/// A stock quantity with three decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type), sqlx(transparent))]
#[ts(export)]
pub struct Quantity(i64);

impl Quantity {
    /// Fixed-point scale: one unit = 1000 milli-units.
    pub const SCALE: i64 = 1000;

    #[inline]
    pub const fn from_milli(milli: i64) -> Self {
        Quantity(milli)
    }

    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Quantity(units * Self::SCALE)
    }

    /// Parses a decimal, rounding to the nearest thousandth.
    ///
    /// Returns `None` for NaN, infinite, or out-of-range input instead of
    /// clamping it.
    pub fn from_decimal(value: f64) -> Option<Self> {
        let milli = (value * Self::SCALE as f64).round();
        // i64::MAX as f64 rounds up to 2^63, which is itself out of range
        if !milli.is_finite() || milli >= i64::MAX as f64 || milli < i64::MIN as f64 {
            return None;
        }
        Some(Quantity(milli as i64))
    }

    #[inline]
    pub const fn milli(&self) -> i64 {
        self.0
    }

    /// Decimal value, for display and JSON only.
    #[inline]
    pub fn as_decimal(&self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    #[inline]
    pub const fn zero() -> Self {
        Quantity(0)
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
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / Self::SCALE;
        let frac = abs % Self::SCALE;
        if frac == 0 {
            write!(f, "{}{}", sign, whole)
        } else {
            let digits = format!("{:03}", frac);
            write!(f, "{}{}.{}", sign, whole, digits.trim_end_matches('0'))
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 % Self::SCALE == 0 {
            serializer.serialize_i64(self.0 / Self::SCALE)
        } else {
            serializer.serialize_f64(self.as_decimal())
        }
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Quantity::from_decimal(value)
            .ok_or_else(|| serde::de::Error::custom("quantity must be a finite number in range"))
    }
}

impl Add for Quantity {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Quantity(self.0 + other.0)
    }
}

impl AddAssign for Quantity {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Quantity {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Quantity(self.0 - other.0)
    }
}

impl SubAssign for Quantity {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Quantity::from_units(5).to_string(), "5");
        assert_eq!(Quantity::from_milli(1500).to_string(), "1.5");
        assert_eq!(Quantity::from_milli(25).to_string(), "0.025");
        assert_eq!(Quantity::from_milli(-2250).to_string(), "-2.25");
    }

    #[test]
    fn test_json_round_trip_keeps_decimals() {
        let q: Quantity = serde_json::from_str("1.25").unwrap();
        assert_eq!(q.milli(), 1250);
        assert_eq!(serde_json::to_string(&q).unwrap(), "1.25");

        let whole: Quantity = serde_json::from_str("3").unwrap();
        assert_eq!(serde_json::to_string(&whole).unwrap(), "3");
    }

    #[test]
    fn test_from_decimal_rounds_to_thousandths() {
        assert_eq!(Quantity::from_decimal(0.1 + 0.2).unwrap().milli(), 300);
        assert!(Quantity::from_decimal(f64::NAN).is_none());
        assert!(Quantity::from_decimal(1e20).is_none());
        assert!(Quantity::from_decimal(-1e20).is_none());
    }
}
