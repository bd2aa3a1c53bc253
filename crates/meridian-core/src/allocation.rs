//! # Payment Allocation
//!
//! Splits a sale total into payment-method buckets, and plans how an incoming
//! debt payment is spread across a customer's open sales.
//!
//! ## Sale Split
//! ```text
//!   total $100, instruction {cash $40, click $0, terminal $0}
//!        │
//!        ▼
//!   buckets {cash $40, click $0, terminal $0, debt $60}
//!            └──────────────┬─────────────────┘
//!                  sum == total (always)
//! ```
//!
//! ## Settlement (FIFO)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  open sales, oldest first:  S1 debt $50   S2 debt $30                   │
//! │  payment {cash $60}                                                     │
//! │                                                                         │
//! │  S1: cash  min($60, $50) = $50  ──► debt $0   paid                      │
//! │  S2: cash  min($10, $30) = $10  ──► debt $20  partial                   │
//! │                                                                         │
//! │  Within one sale, sub-amounts apply in order cash → click → terminal,   │
//! │  each moving into the sale's matching bucket.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::PaymentStatus;
use crate::validation::validate_price;

// =============================================================================
// Payment Instruction and Buckets
// =============================================================================

/// Amounts tendered per method. Any shortfall against a sale total is debt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentInstruction {
    #[serde(default, rename = "cash_usd", alias = "cash")]
    pub cash: Money,
    #[serde(default, rename = "click_usd", alias = "click")]
    pub click: Money,
    #[serde(default, rename = "terminal_usd", alias = "terminal")]
    pub terminal: Money,
}

impl PaymentInstruction {
    pub fn total(&self) -> Money {
        self.cash + self.click + self.terminal
    }

    /// Rejects negative or out-of-range sub-amounts. Run before [`total`],
    /// which relies on the bound.
    ///
    /// [`total`]: PaymentInstruction::total
    pub fn validate(&self) -> CoreResult<()> {
        validate_price("cash_usd", self.cash)?;
        validate_price("click_usd", self.click)?;
        validate_price("terminal_usd", self.terminal)?;
        Ok(())
    }
}

/// The four buckets a sale total is split into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentBuckets {
    pub cash: Money,
    pub click: Money,
    pub terminal: Money,
    pub debt: Money,
}

impl PaymentBuckets {
    pub fn total(&self) -> Money {
        self.cash + self.click + self.terminal + self.debt
    }
}

/// Splits a sale total into buckets.
///
/// ## Errors
/// - negative tendered amount → `ValidationError`
/// - tendered more than the total → [`CoreError::Overpayment`]
/// - a shortfall without a customer → [`CoreError::DebtWithoutCustomer`]
pub fn split_sale_payment(
    total: Money,
    payment: &PaymentInstruction,
    has_customer: bool,
) -> CoreResult<PaymentBuckets> {
    payment.validate()?;

    let paid = payment.total();
    if paid > total {
        return Err(CoreError::Overpayment { total, paid });
    }

    let debt = total - paid;
    if debt.is_positive() && !has_customer {
        return Err(CoreError::DebtWithoutCustomer { debt });
    }

    Ok(PaymentBuckets {
        cash: payment.cash,
        click: payment.click,
        terminal: payment.terminal,
        debt,
    })
}

// =============================================================================
// Debt Settlement
// =============================================================================

/// A sale with outstanding debt, as seen by the settlement planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenDebt {
    pub sale_id: i64,
    pub debt: Money,
    pub created_at: DateTime<Utc>,
}

/// What one sale receives from a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct SaleSettlement {
    pub sale_id: i64,
    pub cash: Money,
    pub click: Money,
    pub terminal: Money,
    pub debt_before: Money,
    pub debt_after: Money,
    pub status: PaymentStatus,
}

impl SaleSettlement {
    pub fn applied(&self) -> Money {
        self.cash + self.click + self.terminal
    }
}

/// The full settlement, computed before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct SettlementPlan {
    pub sales: Vec<SaleSettlement>,
    /// Amounts actually applied, per method.
    pub applied: PaymentInstruction,
    pub remaining_debt: Money,
}

impl SettlementPlan {
    pub fn paid_amount(&self) -> Money {
        self.applied.total()
    }

    pub fn updated_sale_ids(&self) -> Vec<i64> {
        self.sales.iter().map(|s| s.sale_id).collect()
    }
}

/// Plans a debt payment across open sales, oldest first (ties by id).
///
/// A payment larger than the total outstanding debt is rejected outright;
/// nothing is applied.
pub fn plan_settlement(
    open: &[OpenDebt],
    payment: &PaymentInstruction,
) -> CoreResult<SettlementPlan> {
    payment.validate()?;
    let payment_total = payment.total();
    if !payment_total.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "payment".to_string(),
        }
        .into());
    }

    let mut ordered: Vec<&OpenDebt> = open.iter().filter(|d| d.debt.is_positive()).collect();
    ordered.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then(a.sale_id.cmp(&b.sale_id))
    });

    let outstanding: Money = ordered.iter().map(|d| d.debt).sum();
    if payment_total > outstanding {
        return Err(CoreError::PaymentExceedsDebt {
            outstanding,
            payment: payment_total,
        });
    }

    let mut left = *payment;
    let mut sales = Vec::new();

    for open_debt in ordered {
        if left.total().is_zero() {
            break;
        }

        let mut owed = open_debt.debt;
        let mut take = |pool: &mut Money| -> Money {
            let amount = (*pool).min(owed);
            *pool -= amount;
            owed -= amount;
            amount
        };
        let cash = take(&mut left.cash);
        let click = take(&mut left.click);
        let terminal = take(&mut left.terminal);

        sales.push(SaleSettlement {
            sale_id: open_debt.sale_id,
            cash,
            click,
            terminal,
            debt_before: open_debt.debt,
            debt_after: owed,
            status: PaymentStatus::from_debt(owed),
        });
    }

    let applied = PaymentInstruction {
        cash: payment.cash - left.cash,
        click: payment.click - left.click,
        terminal: payment.terminal - left.terminal,
    };

    Ok(SettlementPlan {
        sales,
        remaining_debt: outstanding - applied.total(),
        applied,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cash(dollars: i64) -> PaymentInstruction {
        PaymentInstruction {
            cash: Money::from_dollars(dollars),
            ..Default::default()
        }
    }

    fn open(sale_id: i64, debt_dollars: i64, age_days: i64) -> OpenDebt {
        OpenDebt {
            sale_id,
            debt: Money::from_dollars(debt_dollars),
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    #[test]
    fn test_split_with_debt() {
        let buckets = split_sale_payment(Money::from_dollars(100), &cash(40), true).unwrap();
        assert_eq!(buckets.debt, Money::from_dollars(60));
        assert_eq!(buckets.total(), Money::from_dollars(100));
    }

    #[test]
    fn test_split_rejects_debt_without_customer() {
        let err = split_sale_payment(Money::from_dollars(100), &cash(40), false).unwrap_err();
        assert!(matches!(err, CoreError::DebtWithoutCustomer { .. }));
        assert!(split_sale_payment(Money::from_dollars(40), &cash(40), false).is_ok());
    }

    #[test]
    fn test_split_rejects_overpayment_and_negatives() {
        let err = split_sale_payment(Money::from_dollars(10), &cash(11), true).unwrap_err();
        assert!(matches!(err, CoreError::Overpayment { .. }));

        let negative = PaymentInstruction {
            click: Money::from_cents(-1),
            ..Default::default()
        };
        assert!(split_sale_payment(Money::from_dollars(10), &negative, true).is_err());
    }

    #[test]
    fn test_fifo_pays_oldest_first() {
        // S1 is older even though it has the higher id
        let debts = [open(2, 50, 10), open(1, 30, 2)];
        let plan = plan_settlement(&debts, &cash(60)).unwrap();

        assert_eq!(plan.updated_sale_ids(), vec![2, 1]);
        assert_eq!(plan.sales[0].debt_after, Money::zero());
        assert_eq!(plan.sales[0].status, PaymentStatus::Paid);
        assert_eq!(plan.sales[1].debt_after, Money::from_dollars(20));
        assert_eq!(plan.sales[1].status, PaymentStatus::Partial);
        assert_eq!(plan.paid_amount(), Money::from_dollars(60));
        assert_eq!(plan.remaining_debt, Money::from_dollars(20));
    }

    #[test]
    fn test_ties_broken_by_id() {
        let now = Utc::now();
        let debts = [
            OpenDebt { sale_id: 9, debt: Money::from_dollars(10), created_at: now },
            OpenDebt { sale_id: 4, debt: Money::from_dollars(10), created_at: now },
        ];
        let plan = plan_settlement(&debts, &cash(10)).unwrap();
        assert_eq!(plan.updated_sale_ids(), vec![4]);
    }

    #[test]
    fn test_sub_buckets_apply_cash_then_click_then_terminal() {
        let debts = [open(1, 50, 5), open(2, 30, 1)];
        let payment = PaymentInstruction {
            cash: Money::from_dollars(30),
            click: Money::from_dollars(40),
            terminal: Money::from_dollars(5),
        };
        let plan = plan_settlement(&debts, &payment).unwrap();

        let s1 = plan.sales[0];
        assert_eq!((s1.cash, s1.click, s1.terminal), (
            Money::from_dollars(30),
            Money::from_dollars(20),
            Money::zero()
        ));
        let s2 = plan.sales[1];
        assert_eq!((s2.cash, s2.click, s2.terminal), (
            Money::zero(),
            Money::from_dollars(20),
            Money::from_dollars(5)
        ));
        assert_eq!(s2.debt_after, Money::from_dollars(5));
    }

    #[test]
    fn test_overpayment_is_rejected() {
        let debts = [open(1, 50, 1)];
        let err = plan_settlement(&debts, &cash(51)).unwrap_err();
        assert!(matches!(err, CoreError::PaymentExceedsDebt { .. }));
    }

    #[test]
    fn test_zero_payment_is_rejected() {
        let debts = [open(1, 50, 1)];
        assert!(plan_settlement(&debts, &PaymentInstruction::default()).is_err());
    }

    #[test]
    fn test_out_of_range_tender_is_validation_error() {
        let pay = PaymentInstruction {
            cash: Money::from_cents(i64::MAX),
            click: Money::from_cents(1),
            terminal: Money::zero(),
        };
        let err = split_sale_payment(Money::from_dollars(10), &pay, true).unwrap_err();
        assert!(matches!(err, CoreError::Validation(ValidationError::TooLarge { .. })));

        let debts = [open(1, 50, 1)];
        let err = plan_settlement(&debts, &pay).unwrap_err();
        assert!(matches!(err, CoreError::Validation(ValidationError::TooLarge { .. })));
    }
}
