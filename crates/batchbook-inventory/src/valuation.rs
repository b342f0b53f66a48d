//! Derived read paths. Batches are the source of truth for valuation, the
//! stock ledger for movement history; `reconcile` checks they agree.

use rust_decimal::Decimal;
use uuid::Uuid;

use batchbook_core::{InventoryBatch, Reconciliation, StockLedgerEntry, Valuation};

pub fn valuation_of(batches: &[InventoryBatch]) -> Valuation {
    let mut quantity = Decimal::ZERO;
    let mut total_value = Decimal::ZERO;
    for batch in batches {
        quantity += batch.remaining_qty;
        total_value += batch.value();
    }
    Valuation {
        quantity,
        total_value,
    }
}

pub fn reconcile(
    variant_id: Uuid,
    warehouse_id: Uuid,
    ledger: &[StockLedgerEntry],
    batches: &[InventoryBatch],
) -> Reconciliation {
    let ledger_qty = ledger
        .iter()
        .filter(|entry| {
            entry.product_variant_id == variant_id && entry.warehouse_id == warehouse_id
        })
        .map(|entry| entry.qty_change)
        .sum();
    let batch_qty = batches
        .iter()
        .filter(|batch| {
            batch.product_variant_id == variant_id && batch.warehouse_id == warehouse_id
        })
        .map(|batch| batch.remaining_qty)
        .sum();

    Reconciliation {
        product_variant_id: variant_id,
        warehouse_id,
        ledger_qty,
        batch_qty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchbook_core::{MovementKind, Reference};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn batch(variant: Uuid, warehouse: Uuid, remaining: Decimal, cost: Decimal) -> InventoryBatch {
        InventoryBatch {
            id: Uuid::new_v4(),
            product_variant_id: variant,
            warehouse_id: warehouse,
            batch_no: "LOT-1".to_string(),
            cost_price: cost,
            initial_qty: remaining,
            remaining_qty: remaining,
            manufactured_on: None,
            expires_on: None,
            created_at: Utc::now(),
        }
    }

    fn movement(
        variant: Uuid,
        warehouse: Uuid,
        kind: MovementKind,
        qty_change: Decimal,
    ) -> StockLedgerEntry {
        StockLedgerEntry {
            id: Uuid::new_v4(),
            product_variant_id: variant,
            warehouse_id: warehouse,
            batch_id: None,
            kind,
            qty_change,
            reference: Reference::Manual(Uuid::new_v4()),
            moved_on: Utc::now().date_naive(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn valuation_sums_quantity_and_value() {
        let variant = Uuid::new_v4();
        let warehouse = Uuid::new_v4();
        let valuation = valuation_of(&[
            batch(variant, warehouse, dec!(3), dec!(10)),
            batch(variant, warehouse, dec!(4), dec!(12)),
        ]);

        assert_eq!(valuation.quantity, dec!(7));
        assert_eq!(valuation.total_value, dec!(78));
    }

    #[test]
    fn reconcile_agrees_when_ledger_matches_batches() {
        let variant = Uuid::new_v4();
        let warehouse = Uuid::new_v4();
        let other_warehouse = Uuid::new_v4();

        let ledger = vec![
            movement(variant, warehouse, MovementKind::PurchaseIn, dec!(10)),
            movement(variant, warehouse, MovementKind::SaleOut, dec!(-4)),
            // Foreign rows must not leak into the sums.
            movement(variant, other_warehouse, MovementKind::PurchaseIn, dec!(99)),
        ];
        let batches = vec![batch(variant, warehouse, dec!(6), dec!(10))];

        let report = reconcile(variant, warehouse, &ledger, &batches);
        assert!(report.is_balanced());
        assert_eq!(report.ledger_qty, dec!(6));
    }

    #[test]
    fn reconcile_flags_divergence() {
        let variant = Uuid::new_v4();
        let warehouse = Uuid::new_v4();
        let ledger = vec![movement(
            variant,
            warehouse,
            MovementKind::PurchaseIn,
            dec!(10),
        )];
        let batches = vec![batch(variant, warehouse, dec!(9), dec!(5))];

        let report = reconcile(variant, warehouse, &ledger, &batches);
        assert!(!report.is_balanced());
        assert!(report.verify().is_err());
    }
}
