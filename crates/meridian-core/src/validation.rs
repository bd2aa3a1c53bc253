//! # Validation Module
//!
//! Input checks run before any engine touches storage.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: axum extractors   ── JSON shape, types                        │
//! │  Layer 2: THIS MODULE       ── ranges, business rules (sell ≥ cost)     │
//! │  Layer 3: SQLite            ── CHECK(quantity >= 0), UNIQUE, FKs        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::{CurrencyRate, Money};
use crate::quantity::Quantity;
use crate::types::{NewCustomer, NewLocation, NewProduct};
use crate::{IDEMPOTENCY_KEY_MAX_LEN, MAX_AMOUNT_CENTS, MAX_QUANTITY_MILLI, MAX_SALE_ITEMS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a display name (product, customer, location).
///
/// ```rust
/// use meridian_core::validation::validate_name;
///
/// assert!(validate_name("name", "Green tea 100g").is_ok());
/// assert!(validate_name("name", "   ").is_err());
/// ```
pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if name.chars().count() > 200 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 200,
        });
    }
    Ok(())
}

/// Validates an optional barcode. Empty strings are normalized to `None`.
pub fn normalize_barcode(barcode: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(code) = barcode.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(None);
    };
    if code.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "barcode".to_string(),
            max: 64,
        });
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ValidationError::InvalidFormat {
            field: "barcode".to_string(),
            reason: "must contain only letters, digits, and hyphens".to_string(),
        });
    }
    Ok(Some(code.to_string()))
}

/// Validates a client-supplied idempotency key.
pub fn validate_idempotency_key(key: &str) -> ValidationResult<()> {
    if key.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "idempotency_key".to_string(),
        });
    }
    if key.len() > IDEMPOTENCY_KEY_MAX_LEN {
        return Err(ValidationError::TooLong {
            field: "idempotency_key".to_string(),
            max: IDEMPOTENCY_KEY_MAX_LEN,
        });
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

fn quantity_in_range(field: &str, qty: Quantity) -> ValidationResult<()> {
    if qty.milli() > MAX_QUANTITY_MILLI {
        return Err(ValidationError::TooLarge {
            field: field.to_string(),
            max: Quantity::from_milli(MAX_QUANTITY_MILLI).to_string(),
        });
    }
    Ok(())
}

/// Quantities moved, sold, or returned must be positive.
pub fn validate_quantity(field: &str, qty: Quantity) -> ValidationResult<()> {
    if !qty.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    quantity_in_range(field, qty)
}

/// Counted stock may be zero but never negative.
pub fn validate_counted_quantity(qty: Quantity) -> ValidationResult<()> {
    if qty.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "counted_quantity".to_string(),
        });
    }
    quantity_in_range("counted_quantity", qty)
}

/// Prices and tendered amounts: zero up to [`MAX_AMOUNT_CENTS`].
///
/// ```rust
/// use meridian_core::money::Money;
/// use meridian_core::validation::validate_price;
///
/// assert!(validate_price("cash_usd", Money::from_cents(0)).is_ok());
/// assert!(validate_price("cash_usd", Money::from_cents(i64::MAX)).is_err());
/// ```
pub fn validate_price(field: &str, price: Money) -> ValidationResult<()> {
    if price.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    if price.cents() > MAX_AMOUNT_CENTS {
        return Err(ValidationError::TooLarge {
            field: field.to_string(),
            max: Money::from_cents(MAX_AMOUNT_CENTS).to_string(),
        });
    }
    Ok(())
}

pub fn validate_currency_rate(rate: CurrencyRate) -> ValidationResult<()> {
    if !rate.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "currency_rate".to_string(),
        });
    }
    Ok(())
}

/// A sale needs at least one line and at most [`MAX_SALE_ITEMS`].
pub fn validate_line_count(field: &str, count: usize) -> ValidationResult<()> {
    if count == 0 {
        return Err(ValidationError::Empty {
            field: field.to_string(),
        });
    }
    if count > MAX_SALE_ITEMS {
        return Err(ValidationError::TooMany {
            field: field.to_string(),
            max: MAX_SALE_ITEMS,
        });
    }
    Ok(())
}

// =============================================================================
// Record Validators
// =============================================================================

/// Validates a product write. Rejects a sell price below cost.
///
/// ```rust
/// use meridian_core::money::Money;
/// use meridian_core::types::NewProduct;
/// use meridian_core::validation::validate_product;
///
/// let mut p = NewProduct {
///     name: "Rice 1kg".into(),
///     barcode: None,
///     cost_price: Money::from_cents(150),
///     sell_price: Money::from_cents(120),
///     unit_type: "pcs".into(),
/// };
/// assert!(validate_product(&p).is_err());
/// p.sell_price = Money::from_cents(200);
/// assert!(validate_product(&p).is_ok());
/// ```
pub fn validate_product(product: &NewProduct) -> ValidationResult<()> {
    validate_name("name", &product.name)?;
    validate_price("cost_price", product.cost_price)?;
    validate_price("sell_price", product.sell_price)?;
    if product.sell_price < product.cost_price {
        return Err(ValidationError::SellBelowCost {
            sell: product.sell_price,
            cost: product.cost_price,
        });
    }
    normalize_barcode(product.barcode.as_deref())?;
    Ok(())
}

pub fn validate_customer(customer: &NewCustomer) -> ValidationResult<()> {
    validate_name("name", &customer.name)?;
    if let Some(phone) = &customer.phone {
        if phone.len() > 32 {
            return Err(ValidationError::TooLong {
                field: "phone".to_string(),
                max: 32,
            });
        }
    }
    Ok(())
}

pub fn validate_location(location: &NewLocation) -> ValidationResult<()> {
    validate_name("name", &location.name)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_must_be_positive() {
        assert!(validate_quantity("quantity", Quantity::from_milli(1)).is_ok());
        assert!(validate_quantity("quantity", Quantity::zero()).is_err());
        assert!(validate_quantity("quantity", Quantity::from_units(-2)).is_err());
    }

    #[test]
    fn test_counted_quantity_allows_zero() {
        assert!(validate_counted_quantity(Quantity::zero()).is_ok());
        assert!(validate_counted_quantity(Quantity::from_milli(-1)).is_err());
    }

    #[test]
    fn test_barcode_normalization() {
        assert_eq!(normalize_barcode(Some("  ")).unwrap(), None);
        assert_eq!(
            normalize_barcode(Some(" 4780001234567 ")).unwrap(),
            Some("4780001234567".to_string())
        );
        assert!(normalize_barcode(Some("12 34")).is_err());
    }

    #[test]
    fn test_idempotency_key_length() {
        assert!(validate_idempotency_key("sale-2024-001").is_ok());
        assert!(validate_idempotency_key(&"k".repeat(IDEMPOTENCY_KEY_MAX_LEN + 1)).is_err());
        assert!(validate_idempotency_key("").is_err());
    }

    #[test]
    fn test_line_count_bounds() {
        assert!(validate_line_count("items", 0).is_err());
        assert!(validate_line_count("items", 1).is_ok());
        assert!(validate_line_count("items", MAX_SALE_ITEMS + 1).is_err());
    }

    #[test]
    fn test_currency_rate_positive() {
        assert!(validate_currency_rate(CurrencyRate::from_uzs_per_usd(0)).is_err());
        assert!(validate_currency_rate(CurrencyRate::from_uzs_per_usd(12_700)).is_ok());
    }
}
