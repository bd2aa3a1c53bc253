//! # Return Reversal
//!
//! Plans how returned lines shrink, and how the returned amount comes back
//! out of the sale's payment buckets.
//!
//! ## Bucket Priority
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sale buckets {debt $10, cash $20, click $10, terminal $0}, return $40  │
//! │                                                                         │
//! │  1. debt      $10 ──► $0        (positive debt goes first)     left $30 │
//! │  2. cash      $20 ──► $0        (first bucket holding money)   left $10 │
//! │  3. debt       $0 ──► -$10      (overflow: shop owes customer)  left $0 │
//! │                                                                         │
//! │  click and terminal are untouched.                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only one of cash/click/terminal is charged per return; whatever it cannot
//! absorb becomes negative debt.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::allocation::PaymentBuckets;
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::location::LocationRef;
use crate::money::Money;
use crate::quantity::Quantity;
use crate::types::{PaymentStatus, Sale, SaleItem};

// =============================================================================
// Line Reversal
// =============================================================================

/// The effect of returning part or all of one sale line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct LineReversal {
    pub sale_item_id: i64,
    pub product_id: Option<i64>,
    pub product_name: String,
    pub returned_quantity: Quantity,
    pub remaining_quantity: Quantity,
    pub amount: Money,
    pub cost: Money,
    pub profit: Money,
    /// Where the goods go back to.
    pub source: LocationRef,
}

impl LineReversal {
    #[inline]
    pub fn is_full(&self) -> bool {
        self.remaining_quantity.is_zero()
    }
}

/// Plans a return against one line.
///
/// The requested quantity is clamped to what remains on the line. Amount and
/// cost are unit values times the returned quantity; profit is the recorded
/// line profit prorated by quantity. A full return gives back the line's
/// exact recorded totals.
pub fn reverse_line(item: &SaleItem, requested: Quantity) -> CoreResult<LineReversal> {
    if !requested.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "return_quantity".to_string(),
        }
        .into());
    }

    let returned = requested.min(item.quantity);
    let remaining = item.quantity - returned;

    let (amount, cost, profit) = if remaining.is_zero() {
        (
            item.total_price,
            item.cost_price.multiply_quantity(item.quantity),
            item.profit,
        )
    } else {
        (
            item.unit_price.multiply_quantity(returned),
            item.cost_price.multiply_quantity(returned),
            item.profit.prorate(returned.milli(), item.quantity.milli()),
        )
    };

    Ok(LineReversal {
        sale_item_id: item.id,
        product_id: item.product_id,
        product_name: item.product_name.clone(),
        returned_quantity: returned,
        remaining_quantity: remaining,
        amount,
        cost,
        profit,
        source: item.source(),
    })
}

/// Rejects returns against a cancelled sale.
pub fn ensure_returnable(sale: &Sale) -> CoreResult<()> {
    if sale.payment_status == PaymentStatus::Cancelled {
        return Err(CoreError::InvalidSaleStatus {
            sale_id: sale.id,
            status: sale.payment_status.as_str().to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Bucket Refund
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Cash,
    Click,
    Terminal,
    Debt,
}

impl Bucket {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Bucket::Cash => "cash",
            Bucket::Click => "click",
            Bucket::Terminal => "terminal",
            Bucket::Debt => "debt",
        }
    }

    /// Current balance of this bucket.
    pub fn balance(self, buckets: &PaymentBuckets) -> Money {
        match self {
            Bucket::Cash => buckets.cash,
            Bucket::Click => buckets.click,
            Bucket::Terminal => buckets.terminal,
            Bucket::Debt => buckets.debt,
        }
    }

    fn slot(self, buckets: &mut PaymentBuckets) -> &mut Money {
        match self {
            Bucket::Cash => &mut buckets.cash,
            Bucket::Click => &mut buckets.click,
            Bucket::Terminal => &mut buckets.terminal,
            Bucket::Debt => &mut buckets.debt,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a refund, audited individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct BucketAdjustment {
    pub bucket: Bucket,
    pub before: Money,
    pub after: Money,
}

impl BucketAdjustment {
    pub fn delta(&self) -> Money {
        self.before - self.after
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct RefundPlan {
    pub buckets: PaymentBuckets,
    pub adjustments: Vec<BucketAdjustment>,
}

/// Takes `amount` back out of the buckets.
///
/// The resulting bucket total is always the original total minus `amount`.
pub fn apply_refund(buckets: PaymentBuckets, amount: Money) -> RefundPlan {
    let mut out = buckets;
    let mut adjustments = Vec::new();
    let mut left = amount;

    let mut charge = |bucket: Bucket, take: Money, out: &mut PaymentBuckets| {
        let slot = bucket.slot(out);
        let before = *slot;
        *slot -= take;
        adjustments.push(BucketAdjustment {
            bucket,
            before,
            after: *slot,
        });
    };

    if left.is_positive() && out.debt.is_positive() {
        let take = out.debt.min(left);
        charge(Bucket::Debt, take, &mut out);
        left -= take;
    }

    if left.is_positive() {
        let first_funded = [Bucket::Cash, Bucket::Click, Bucket::Terminal]
            .into_iter()
            .find(|b| b.balance(&out).is_positive());
        if let Some(bucket) = first_funded {
            let take = bucket.balance(&out).min(left);
            charge(bucket, take, &mut out);
            left -= take;
        }
    }

    if left.is_positive() {
        charge(Bucket::Debt, left, &mut out);
    }

    RefundPlan {
        buckets: out,
        adjustments,
    }
}

/// Status after a return: `cancelled` with no lines left, `paid` once debt
/// is at or below zero, otherwise unchanged.
pub fn status_after_return(
    current: PaymentStatus,
    remaining_items: usize,
    debt: Money,
) -> PaymentStatus {
    if remaining_items == 0 {
        PaymentStatus::Cancelled
    } else if !debt.is_positive() {
        PaymentStatus::Paid
    } else {
        current
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationKind;

    fn buckets(debt: i64, cash: i64, click: i64, terminal: i64) -> PaymentBuckets {
        PaymentBuckets {
            cash: Money::from_dollars(cash),
            click: Money::from_dollars(click),
            terminal: Money::from_dollars(terminal),
            debt: Money::from_dollars(debt),
        }
    }

    fn line(quantity: Quantity, unit_price: i64, cost_price: i64) -> SaleItem {
        let unit_price = Money::from_cents(unit_price);
        let cost_price = Money::from_cents(cost_price);
        let total_price = unit_price.multiply_quantity(quantity);
        SaleItem {
            id: 11,
            sale_id: 1,
            product_id: Some(7),
            product_name: "Tea".to_string(),
            quantity,
            unit_price,
            total_price,
            cost_price,
            profit: total_price - cost_price.multiply_quantity(quantity),
            source_kind: LocationKind::Store,
            source_id: 2,
        }
    }

    #[test]
    fn test_refund_priority_debt_then_first_funded_bucket() {
        let plan = apply_refund(buckets(10, 20, 10, 0), Money::from_dollars(40));
        assert_eq!(plan.buckets, buckets(-10, 0, 10, 0));
        assert_eq!(plan.buckets.total(), Money::zero());

        let steps: Vec<_> = plan.adjustments.iter().map(|a| a.bucket).collect();
        assert_eq!(steps, vec![Bucket::Debt, Bucket::Cash, Bucket::Debt]);
    }

    #[test]
    fn test_refund_skips_empty_cash() {
        let plan = apply_refund(buckets(0, 0, 30, 20), Money::from_dollars(25));
        assert_eq!(plan.buckets, buckets(0, 0, 5, 20));
        assert_eq!(plan.adjustments.len(), 1);
    }

    #[test]
    fn test_refund_only_reduces_positive_debt() {
        let plan = apply_refund(buckets(60, 40, 0, 0), Money::from_dollars(30));
        assert_eq!(plan.buckets, buckets(30, 40, 0, 0));
    }

    #[test]
    fn test_refund_with_no_funded_bucket_goes_negative() {
        let plan = apply_refund(buckets(-5, 0, 0, 0), Money::from_dollars(10));
        assert_eq!(plan.buckets.debt, Money::from_dollars(-15));
    }

    #[test]
    fn test_partial_line_return() {
        let item = line(Quantity::from_units(3), 1000, 700);
        let rev = reverse_line(&item, Quantity::from_units(1)).unwrap();
        assert_eq!(rev.amount, Money::from_dollars(10));
        assert_eq!(rev.cost, Money::from_dollars(7));
        assert_eq!(rev.profit, Money::from_dollars(3));
        assert_eq!(rev.remaining_quantity, Quantity::from_units(2));
        assert!(!rev.is_full());
    }

    #[test]
    fn test_return_quantity_is_clamped() {
        let item = line(Quantity::from_milli(1_500), 333, 100);
        let rev = reverse_line(&item, Quantity::from_units(5)).unwrap();
        assert!(rev.is_full());
        assert_eq!(rev.returned_quantity, Quantity::from_milli(1_500));
        assert_eq!(rev.amount, item.total_price);
        assert_eq!(rev.profit, item.profit);
    }

    #[test]
    fn test_non_positive_return_rejected() {
        let item = line(Quantity::from_units(1), 100, 50);
        assert!(reverse_line(&item, Quantity::zero()).is_err());
    }

    #[test]
    fn test_status_after_return() {
        use PaymentStatus::*;
        assert_eq!(status_after_return(Partial, 0, Money::from_dollars(5)), Cancelled);
        assert_eq!(status_after_return(Partial, 2, Money::from_dollars(-1)), Paid);
        assert_eq!(status_after_return(Partial, 2, Money::from_dollars(5)), Partial);
    }
}
