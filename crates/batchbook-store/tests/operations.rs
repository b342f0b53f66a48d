use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use batchbook_core::{
    AdjustStock, AllocateForSale, ApportionBasis, CoreError, CostingStore, OpeningStock,
    Reference, ReturnIn, ShipmentHeader, ShipmentItem, TransferStock,
};
use batchbook_store::MemoryStore;

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn opening(variant: Uuid, warehouse: Uuid, qty: Decimal, cost: Decimal) -> OpeningStock {
    OpeningStock {
        product_variant_id: variant,
        warehouse_id: warehouse,
        batch_no: format!("OPEN-{qty}"),
        unit_cost: cost,
        qty,
        moved_on: today(),
    }
}

fn sale(variant: Uuid, warehouse: Uuid, qty: Decimal) -> AllocateForSale {
    AllocateForSale {
        product_variant_id: variant,
        warehouse_id: warehouse,
        qty,
        sales_order_item_id: Uuid::new_v4(),
        unit_sale_price: None,
        moved_on: today(),
    }
}

async fn assert_reconciled(store: &MemoryStore, variant: Uuid, warehouse: Uuid) {
    let report = store.check_reconciliation(variant, warehouse).await.unwrap();
    assert!(
        report.is_balanced(),
        "ledger {} != batches {}",
        report.ledger_qty,
        report.batch_qty
    );
}

async fn assert_journal_balances(store: &MemoryStore, reference: &Reference) {
    let posted = store.journal_entries_for(reference).await.unwrap();
    assert!(!posted.is_empty(), "no journal entries for {reference:?}");
    for entry in posted {
        let (debits, credits) = entry.totals();
        assert_eq!(debits, credits, "entry {} unbalanced", entry.entry.entry_number);
    }
}

#[tokio::test]
async fn fifo_allocation_walks_oldest_batches_first() {
    let store = MemoryStore::default();
    let variant = Uuid::new_v4();
    let warehouse = Uuid::new_v4();

    let b1 = store
        .seed_opening_stock(opening(variant, warehouse, dec!(3), dec!(10)))
        .await
        .unwrap();
    let b2 = store
        .seed_opening_stock(opening(variant, warehouse, dec!(4), dec!(12)))
        .await
        .unwrap();

    let request = sale(variant, warehouse, dec!(5));
    let order_item = request.sales_order_item_id;
    let result = store.allocate_for_sale(request).await.unwrap();

    assert_eq!(result.allocations.len(), 2);
    assert_eq!(result.allocations[0].batch_id, b1.id);
    assert_eq!(result.allocations[0].qty_deducted, dec!(3));
    assert_eq!(result.allocations[0].cost_per_unit, dec!(10));
    assert_eq!(result.allocations[1].batch_id, b2.id);
    assert_eq!(result.allocations[1].qty_deducted, dec!(2));
    assert_eq!(result.allocations[1].cost_per_unit, dec!(12));
    assert_eq!(result.total_cost, dec!(54));

    let remaining = store.allocatable_batches(variant, warehouse).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, b2.id);
    assert_eq!(remaining[0].remaining_qty, dec!(2));

    assert_reconciled(&store, variant, warehouse).await;
    assert_journal_balances(&store, &Reference::SalesOrderItem(order_item)).await;
}

#[tokio::test]
async fn allocation_is_all_or_nothing() {
    let store = MemoryStore::default();
    let variant = Uuid::new_v4();
    let warehouse = Uuid::new_v4();

    store
        .seed_opening_stock(opening(variant, warehouse, dec!(5), dec!(10)))
        .await
        .unwrap();
    store
        .seed_opening_stock(opening(variant, warehouse, dec!(5), dec!(11)))
        .await
        .unwrap();

    let err = store
        .allocate_for_sale(sale(variant, warehouse, dec!(11)))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InsufficientStock { .. }));

    // Nothing moved: both batches full, no sale rows in the ledger.
    let batches = store.allocatable_batches(variant, warehouse).await.unwrap();
    assert_eq!(batches.iter().map(|b| b.remaining_qty).sum::<Decimal>(), dec!(10));
    let ledger = store.ledger_entries(variant, warehouse).await.unwrap();
    assert!(ledger.iter().all(|entry| entry.qty_change > Decimal::ZERO));
    assert_reconciled(&store, variant, warehouse).await;
}

#[tokio::test]
async fn zero_quantity_demand_writes_nothing() {
    let store = MemoryStore::default();
    let variant = Uuid::new_v4();
    let warehouse = Uuid::new_v4();

    store
        .seed_opening_stock(opening(variant, warehouse, dec!(5), dec!(10)))
        .await
        .unwrap();

    let request = sale(variant, warehouse, Decimal::ZERO);
    let order_item = request.sales_order_item_id;
    let result = store.allocate_for_sale(request).await.unwrap();
    assert!(result.allocations.is_empty());
    assert_eq!(result.total_cost, Decimal::ZERO);
    assert!(
        store
            .journal_entries_for(&Reference::SalesOrderItem(order_item))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn priced_sale_posts_cost_and_revenue_entries() {
    let store = MemoryStore::default();
    let variant = Uuid::new_v4();
    let warehouse = Uuid::new_v4();

    store
        .seed_opening_stock(opening(variant, warehouse, dec!(10), dec!(6)))
        .await
        .unwrap();

    let mut request = sale(variant, warehouse, dec!(4));
    request.unit_sale_price = Some(dec!(15));
    let order_item = request.sales_order_item_id;
    store.allocate_for_sale(request).await.unwrap();

    let posted = store
        .journal_entries_for(&Reference::SalesOrderItem(order_item))
        .await
        .unwrap();
    assert_eq!(posted.len(), 2);
    for entry in &posted {
        let (debits, credits) = entry.totals();
        assert_eq!(debits, credits);
    }
    let totals: Vec<Decimal> = posted.iter().map(|entry| entry.totals().0).collect();
    assert!(totals.contains(&dec!(24))); // 4 x 6 cost
    assert!(totals.contains(&dec!(60))); // 4 x 15 revenue
}

#[tokio::test]
async fn shipment_receipt_creates_costed_batches_and_posts_assets() {
    let store = MemoryStore::default();
    let variant = Uuid::new_v4();
    let warehouse = Uuid::new_v4();
    let shipment_id = Uuid::new_v4();

    let header = ShipmentHeader {
        shipment_id,
        exchange_rate: dec!(1),
        basis: Some(ApportionBasis::Value),
        international_shipping: dec!(110),
        local_shipping: Decimal::ZERO,
        misc_cost: Decimal::ZERO,
        received_on: today(),
    };
    let item = ShipmentItem {
        id: Uuid::new_v4(),
        product_variant_id: variant,
        warehouse_id: warehouse,
        batch_no: "SHP-001".to_string(),
        unit_price: dec!(7),
        ordered_qty: dec!(100),
        received_qty: dec!(100),
        lost_qty: dec!(10),
        unit_weight_kg: None,
        extra_cost: Decimal::ZERO,
        manufactured_on: None,
        expires_on: None,
    };

    let receipt = store.receive_shipment(header, vec![item]).await.unwrap();
    assert_eq!(receipt.batches_created.len(), 1);
    let batch = &receipt.batches_created[0];
    assert_eq!(batch.initial_qty, dec!(90));
    assert_eq!(batch.remaining_qty, dec!(90));

    // The 10 lost units' freight share is carried by the 90 survivors.
    let expected = dec!(90) * dec!(7) + dec!(110);
    assert!((batch.initial_qty * batch.cost_price - expected).abs() <= dec!(0.05));
    assert_eq!(receipt.total_landed_cost, batch.initial_qty * batch.cost_price);

    assert_reconciled(&store, variant, warehouse).await;
    assert_journal_balances(&store, &Reference::Shipment(shipment_id)).await;

    let valuation = store.current_valuation(variant, Some(warehouse)).await.unwrap();
    assert_eq!(valuation.quantity, dec!(90));
    assert_eq!(valuation.total_value, receipt.total_landed_cost);
}

#[tokio::test]
async fn fully_lost_shipment_creates_no_batch_and_no_journal() {
    let store = MemoryStore::default();
    let shipment_id = Uuid::new_v4();
    let item_id = Uuid::new_v4();

    let header = ShipmentHeader {
        shipment_id,
        exchange_rate: dec!(1),
        basis: Some(ApportionBasis::Value),
        international_shipping: Decimal::ZERO,
        local_shipping: Decimal::ZERO,
        misc_cost: Decimal::ZERO,
        received_on: today(),
    };
    let item = ShipmentItem {
        id: item_id,
        product_variant_id: Uuid::new_v4(),
        warehouse_id: Uuid::new_v4(),
        batch_no: "SHP-002".to_string(),
        unit_price: dec!(5),
        ordered_qty: dec!(10),
        received_qty: dec!(10),
        lost_qty: dec!(10),
        unit_weight_kg: None,
        extra_cost: Decimal::ZERO,
        manufactured_on: None,
        expires_on: None,
    };

    let receipt = store.receive_shipment(header, vec![item]).await.unwrap();
    assert!(receipt.batches_created.is_empty());
    assert_eq!(receipt.skipped_lines, vec![item_id]);
    assert_eq!(receipt.total_landed_cost, Decimal::ZERO);
    assert!(
        store
            .journal_entries_for(&Reference::Shipment(shipment_id))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn adjustment_out_drains_fifo_and_posts_shrinkage() {
    let store = MemoryStore::default();
    let variant = Uuid::new_v4();
    let warehouse = Uuid::new_v4();
    let adjustment_id = Uuid::new_v4();

    store
        .seed_opening_stock(opening(variant, warehouse, dec!(3), dec!(10)))
        .await
        .unwrap();
    store
        .seed_opening_stock(opening(variant, warehouse, dec!(4), dec!(12)))
        .await
        .unwrap();

    let entries = store
        .adjust_stock(AdjustStock {
            product_variant_id: variant,
            warehouse_id: warehouse,
            batch_id: None,
            qty_delta: dec!(-4),
            unit_cost: None,
            batch_no: None,
            reason: "cycle count shortfall".to_string(),
            adjustment_id,
            moved_on: today(),
        })
        .await
        .unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].qty_change, dec!(-3));
    assert_eq!(entries[1].qty_change, dec!(-1));
    assert_reconciled(&store, variant, warehouse).await;
    assert_journal_balances(&store, &Reference::Adjustment(adjustment_id)).await;

    // 3 x 10 + 1 x 12 written down.
    let posted = store
        .journal_entries_for(&Reference::Adjustment(adjustment_id))
        .await
        .unwrap();
    assert_eq!(posted[0].totals().0, dec!(42));
}

#[tokio::test]
async fn adjustment_in_without_target_spawns_a_new_batch() {
    let store = MemoryStore::default();
    let variant = Uuid::new_v4();
    let warehouse = Uuid::new_v4();
    let adjustment_id = Uuid::new_v4();

    let entries = store
        .adjust_stock(AdjustStock {
            product_variant_id: variant,
            warehouse_id: warehouse,
            batch_id: None,
            qty_delta: dec!(5),
            unit_cost: Some(dec!(8)),
            batch_no: None,
            reason: "found stock".to_string(),
            adjustment_id,
            moved_on: today(),
        })
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].qty_change, dec!(5));
    let batches = store.allocatable_batches(variant, warehouse).await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].cost_price, dec!(8));
    assert_reconciled(&store, variant, warehouse).await;

    // Missing unit cost is rejected before anything is written.
    let err = store
        .adjust_stock(AdjustStock {
            product_variant_id: variant,
            warehouse_id: warehouse,
            batch_id: None,
            qty_delta: dec!(2),
            unit_cost: None,
            batch_no: None,
            reason: "found more".to_string(),
            adjustment_id: Uuid::new_v4(),
            moved_on: today(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn adjustment_in_cannot_exceed_batch_capacity() {
    let store = MemoryStore::default();
    let variant = Uuid::new_v4();
    let warehouse = Uuid::new_v4();

    let batch = store
        .seed_opening_stock(opening(variant, warehouse, dec!(10), dec!(5)))
        .await
        .unwrap();
    store
        .allocate_for_sale(sale(variant, warehouse, dec!(4)))
        .await
        .unwrap();

    // Back to 10 is fine, past 10 is not.
    store
        .adjust_stock(AdjustStock {
            product_variant_id: variant,
            warehouse_id: warehouse,
            batch_id: Some(batch.id),
            qty_delta: dec!(4),
            unit_cost: None,
            batch_no: None,
            reason: "recount".to_string(),
            adjustment_id: Uuid::new_v4(),
            moved_on: today(),
        })
        .await
        .unwrap();

    let err = store
        .adjust_stock(AdjustStock {
            product_variant_id: variant,
            warehouse_id: warehouse,
            batch_id: Some(batch.id),
            qty_delta: dec!(1),
            unit_cost: None,
            batch_no: None,
            reason: "recount again".to_string(),
            adjustment_id: Uuid::new_v4(),
            moved_on: today(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::OverCapacity { .. }));
    assert_reconciled(&store, variant, warehouse).await;
}

#[tokio::test]
async fn return_in_restocks_at_frozen_cost() {
    let store = MemoryStore::default();
    let variant = Uuid::new_v4();
    let warehouse = Uuid::new_v4();

    let batch = store
        .seed_opening_stock(opening(variant, warehouse, dec!(10), dec!(6)))
        .await
        .unwrap();
    let request = sale(variant, warehouse, dec!(4));
    let order_item = request.sales_order_item_id;
    store.allocate_for_sale(request).await.unwrap();

    let entry = store
        .record_return_in(ReturnIn {
            batch_id: batch.id,
            qty: dec!(2),
            sales_order_item_id: order_item,
            moved_on: today(),
        })
        .await
        .unwrap();
    assert_eq!(entry.qty_change, dec!(2));

    let batches = store.allocatable_batches(variant, warehouse).await.unwrap();
    assert_eq!(batches[0].remaining_qty, dec!(8));
    assert_reconciled(&store, variant, warehouse).await;

    // COGS entry, revenue-free sale, plus the inverse return entry.
    let posted = store
        .journal_entries_for(&Reference::SalesOrderItem(order_item))
        .await
        .unwrap();
    assert_eq!(posted.len(), 2);

    // A return can never push the batch past its original lot size.
    let err = store
        .record_return_in(ReturnIn {
            batch_id: batch.id,
            qty: dec!(5),
            sales_order_item_id: order_item,
            moved_on: today(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::OverCapacity { .. }));
}

#[tokio::test]
async fn transfer_recreates_equal_cost_batches_without_journal() {
    let store = MemoryStore::default();
    let variant = Uuid::new_v4();
    let source = Uuid::new_v4();
    let destination = Uuid::new_v4();
    let transfer_id = Uuid::new_v4();

    store
        .seed_opening_stock(opening(variant, source, dec!(3), dec!(10)))
        .await
        .unwrap();
    store
        .seed_opening_stock(opening(variant, source, dec!(4), dec!(12)))
        .await
        .unwrap();

    let entries = store
        .transfer_stock(TransferStock {
            product_variant_id: variant,
            from_warehouse_id: source,
            to_warehouse_id: destination,
            qty: dec!(5),
            transfer_id,
            moved_on: today(),
        })
        .await
        .unwrap();
    assert_eq!(entries.len(), 4); // out+in per touched batch

    let moved = store.allocatable_batches(variant, destination).await.unwrap();
    assert_eq!(moved.len(), 2);
    assert_eq!(moved[0].cost_price, dec!(10));
    assert_eq!(moved[0].remaining_qty, dec!(3));
    assert_eq!(moved[1].cost_price, dec!(12));
    assert_eq!(moved[1].remaining_qty, dec!(2));

    assert_reconciled(&store, variant, source).await;
    assert_reconciled(&store, variant, destination).await;
    assert!(
        store
            .journal_entries_for(&Reference::Transfer(transfer_id))
            .await
            .unwrap()
            .is_empty()
    );

    let source_valuation = store.current_valuation(variant, Some(source)).await.unwrap();
    let dest_valuation = store
        .current_valuation(variant, Some(destination))
        .await
        .unwrap();
    assert_eq!(source_valuation.total_value, dec!(24)); // 2 x 12 left behind
    assert_eq!(dest_valuation.total_value, dec!(54));
}

#[tokio::test]
async fn ledger_reconciles_after_a_mixed_movement_sequence() {
    let store = MemoryStore::default();
    let variant = Uuid::new_v4();
    let warehouse = Uuid::new_v4();

    let batch = store
        .seed_opening_stock(opening(variant, warehouse, dec!(20), dec!(3)))
        .await
        .unwrap();
    assert_reconciled(&store, variant, warehouse).await;

    store
        .allocate_for_sale(sale(variant, warehouse, dec!(7)))
        .await
        .unwrap();
    assert_reconciled(&store, variant, warehouse).await;

    store
        .record_return_in(ReturnIn {
            batch_id: batch.id,
            qty: dec!(1),
            sales_order_item_id: Uuid::new_v4(),
            moved_on: today(),
        })
        .await
        .unwrap();
    assert_reconciled(&store, variant, warehouse).await;

    store
        .adjust_stock(AdjustStock {
            product_variant_id: variant,
            warehouse_id: warehouse,
            batch_id: Some(batch.id),
            qty_delta: dec!(-2),
            unit_cost: None,
            batch_no: None,
            reason: "damage".to_string(),
            adjustment_id: Uuid::new_v4(),
            moved_on: today(),
        })
        .await
        .unwrap();
    assert_reconciled(&store, variant, warehouse).await;

    let ledger = store.ledger_entries(variant, warehouse).await.unwrap();
    let ledger_sum: Decimal = ledger.iter().map(|entry| entry.qty_change).sum();
    assert_eq!(ledger_sum, dec!(12)); // 20 - 7 + 1 - 2
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sales_never_overallocate_a_batch() {
    let store = Arc::new(MemoryStore::default());
    let variant = Uuid::new_v4();
    let warehouse = Uuid::new_v4();

    store
        .seed_opening_stock(opening(variant, warehouse, dec!(10), dec!(5)))
        .await
        .unwrap();

    let first = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.allocate_for_sale(sale(variant, warehouse, dec!(6))).await })
    };
    let second = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.allocate_for_sale(sale(variant, warehouse, dec!(5))).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let successes = results.iter().filter(|result| result.is_ok()).count();
    let shortfalls = results
        .iter()
        .filter(|result| matches!(result, Err(CoreError::InsufficientStock { .. })))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(shortfalls, 1);

    let allocated: Decimal = results
        .iter()
        .filter_map(|result| result.as_ref().ok())
        .flat_map(|sale| sale.allocations.iter().map(|line| line.qty_deducted))
        .sum();
    assert!(allocated <= dec!(10));
    assert_reconciled(&store, variant, warehouse).await;
}
