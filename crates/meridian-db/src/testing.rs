//! Fixtures shared by the database tests.

use meridian_core::allocation::PaymentInstruction;
use meridian_core::{
    CurrencyRate, LocationKind, LocationRef, Money, NewCustomer, NewLocation, NewProduct,
    Quantity, RequestContext,
};

use crate::engine::sale::{NewSale, NewSaleItem};
use crate::{Database, DbConfig};

pub(crate) async fn setup() -> (Database, RequestContext) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    (db, RequestContext::system())
}

pub(crate) fn product_input(name: &str, cost_cents: i64, sell_cents: i64) -> NewProduct {
    NewProduct {
        name: name.to_string(),
        barcode: None,
        cost_price: Money::from_cents(cost_cents),
        sell_price: Money::from_cents(sell_cents),
        unit_type: "pcs".to_string(),
    }
}

pub(crate) async fn seed_location(
    db: &Database,
    ctx: &RequestContext,
    kind: LocationKind,
    name: &str,
) -> LocationRef {
    let input = NewLocation {
        name: name.to_string(),
        address: None,
    };
    db.locations()
        .create(ctx, kind, &input)
        .await
        .unwrap()
        .location_ref()
}

pub(crate) async fn seed_product(
    db: &Database,
    ctx: &RequestContext,
    name: &str,
    cost_cents: i64,
    sell_cents: i64,
) -> i64 {
    db.products()
        .create(ctx, &product_input(name, cost_cents, sell_cents))
        .await
        .unwrap()
        .id
}

pub(crate) async fn seed_customer(db: &Database, ctx: &RequestContext, name: &str) -> i64 {
    let input = NewCustomer {
        name: name.to_string(),
        phone: None,
        home_location: None,
    };
    db.customers().create(ctx, &input).await.unwrap().id
}

pub(crate) async fn put_stock(
    db: &Database,
    ctx: &RequestContext,
    location: LocationRef,
    product_id: i64,
    units: i64,
) {
    db.stock()
        .increment(ctx, location, product_id, Quantity::from_units(units))
        .await
        .unwrap();
}

pub(crate) async fn stock_at(db: &Database, location: LocationRef, product_id: i64) -> Quantity {
    db.stock().get(location, product_id).await.unwrap()
}

/// A sale at `location` paid partly in cash. Lines are
/// `(product_id, units, unit_price_cents)`.
pub(crate) fn cart(
    location: LocationRef,
    customer_id: Option<i64>,
    lines: &[(i64, i64, i64)],
    cash_dollars: i64,
) -> NewSale {
    NewSale {
        customer_id,
        location_kind: location.kind,
        location_id: location.id,
        items: lines
            .iter()
            .map(|&(product_id, units, unit_cents)| NewSaleItem {
                product_id,
                quantity: Quantity::from_units(units),
                unit_price: Money::from_cents(unit_cents),
                source_kind: None,
                source_id: None,
            })
            .collect(),
        payment: PaymentInstruction {
            cash: Money::from_dollars(cash_dollars),
            click: Money::zero(),
            terminal: Money::zero(),
        },
        currency_rate: CurrencyRate::from_uzs_per_usd(12_650),
    }
}
