//! In-memory [`CostingStore`] for tests and embedding. One write guard over
//! the tables spans each mutating operation, so every operation is atomic
//! and the planning (which can fail) runs before the first mutation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use batchbook_core::{
    AccountsProfile, AdjustStock, AllocateForSale, AssumeExists, CoreError, CostingStore,
    ExistenceCheck, InventoryBatch, JournalEntry, JournalItem, MovementKind, OpeningStock,
    PostedEntry, Reconciliation, Reference, ReturnIn, SaleAllocation, SalesItemAllocation,
    ShipmentHeader, ShipmentItem, ShipmentReceipt, StandardProfile, StockLedgerEntry,
    TransferStock, Valuation,
};
use batchbook_finance::{JournalDraft, postings};
use batchbook_inventory::{AllocationPlan, PlanLine, fifo_order, plan_fifo, reconcile, valuation_of};

#[derive(Default)]
struct Tables {
    batches: Vec<InventoryBatch>,
    ledger: Vec<StockLedgerEntry>,
    allocations: Vec<SalesItemAllocation>,
    journal: Vec<PostedEntry>,
    entry_seq: i64,
    last_created_at: Option<DateTime<Utc>>,
}

impl Tables {
    // Strictly monotonic batch timestamps keep FIFO order equal to
    // insertion order even when two receipts land in the same clock tick.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_created_at {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_created_at = Some(now);
        now
    }

    fn candidates(&self, variant_id: Uuid, warehouse_id: Uuid) -> Vec<InventoryBatch> {
        let mut batches: Vec<InventoryBatch> = self
            .batches
            .iter()
            .filter(|batch| {
                batch.product_variant_id == variant_id
                    && batch.warehouse_id == warehouse_id
                    && batch.remaining_qty > Decimal::ZERO
            })
            .cloned()
            .collect();
        fifo_order(&mut batches);
        batches
    }

    fn batch(&self, batch_id: Uuid) -> Result<&InventoryBatch, CoreError> {
        self.batches
            .iter()
            .find(|batch| batch.id == batch_id)
            .ok_or(CoreError::NotFound("inventory batch", batch_id))
    }

    fn batch_mut(&mut self, batch_id: Uuid) -> Result<&mut InventoryBatch, CoreError> {
        self.batches
            .iter_mut()
            .find(|batch| batch.id == batch_id)
            .ok_or(CoreError::NotFound("inventory batch", batch_id))
    }

    fn decrement(&mut self, batch_id: Uuid, qty: Decimal) -> Result<(), CoreError> {
        let batch = self.batch_mut(batch_id)?;
        if qty > batch.remaining_qty {
            return Err(CoreError::InsufficientBatchQuantity {
                batch_id,
                requested: qty,
                remaining: batch.remaining_qty,
            });
        }
        batch.remaining_qty -= qty;
        Ok(())
    }

    fn increment(&mut self, batch_id: Uuid, qty: Decimal) -> Result<(), CoreError> {
        let batch = self.batch_mut(batch_id)?;
        if batch.remaining_qty + qty > batch.initial_qty {
            return Err(CoreError::OverCapacity {
                batch_id,
                requested: qty,
                capacity: batch.initial_qty,
            });
        }
        batch.remaining_qty += qty;
        Ok(())
    }

    fn push_movement(
        &mut self,
        variant_id: Uuid,
        warehouse_id: Uuid,
        batch_id: Option<Uuid>,
        kind: MovementKind,
        qty_change: Decimal,
        reference: Reference,
        moved_on: NaiveDate,
    ) -> StockLedgerEntry {
        let entry = StockLedgerEntry {
            id: Uuid::new_v4(),
            product_variant_id: variant_id,
            warehouse_id,
            batch_id,
            kind,
            qty_change,
            reference,
            moved_on,
            created_at: Utc::now(),
        };
        self.ledger.push(entry.clone());
        entry
    }

    fn post(&mut self, draft: &JournalDraft) -> Result<JournalEntry, CoreError> {
        draft.ensure_balanced()?;

        self.entry_seq += 1;
        let entry = JournalEntry {
            id: Uuid::new_v4(),
            entry_number: format!("JE-{:06}", self.entry_seq),
            entry_date: draft.entry_date,
            reference: draft.reference,
            memo: draft.memo.clone(),
            created_at: Utc::now(),
        };
        let items = draft
            .lines
            .iter()
            .map(|line| JournalItem {
                id: Uuid::new_v4(),
                journal_entry_id: entry.id,
                account_id: line.account_id,
                debit: line.debit,
                credit: line.credit,
            })
            .collect();
        self.journal.push(PostedEntry {
            entry: entry.clone(),
            items,
        });
        Ok(entry)
    }

    #[allow(clippy::too_many_arguments)]
    fn create_batch(
        &mut self,
        batch_id: Uuid,
        variant_id: Uuid,
        warehouse_id: Uuid,
        batch_no: String,
        cost_price: Decimal,
        qty: Decimal,
        manufactured_on: Option<NaiveDate>,
        expires_on: Option<NaiveDate>,
        kind: MovementKind,
        reference: Reference,
        moved_on: NaiveDate,
    ) -> Result<(InventoryBatch, StockLedgerEntry), CoreError> {
        if cost_price < Decimal::ZERO {
            return Err(CoreError::validation("cost_price must not be negative"));
        }
        if qty <= Decimal::ZERO {
            return Err(CoreError::validation("initial_qty must be positive"));
        }

        let batch = InventoryBatch {
            id: batch_id,
            product_variant_id: variant_id,
            warehouse_id,
            batch_no,
            cost_price,
            initial_qty: qty,
            remaining_qty: qty,
            manufactured_on,
            expires_on,
            created_at: self.next_created_at(),
        };
        self.batches.push(batch.clone());
        let movement = self.push_movement(
            variant_id,
            warehouse_id,
            Some(batch.id),
            kind,
            qty,
            reference,
            moved_on,
        );
        Ok((batch, movement))
    }
}

pub struct MemoryStore {
    profile: Arc<dyn AccountsProfile>,
    catalog: Arc<dyn ExistenceCheck>,
    tables: RwLock<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(StandardProfile::default()), Arc::new(AssumeExists))
    }
}

impl MemoryStore {
    pub fn new(profile: Arc<dyn AccountsProfile>, catalog: Arc<dyn ExistenceCheck>) -> Self {
        Self {
            profile,
            catalog,
            tables: RwLock::new(Tables::default()),
        }
    }

    async fn check_catalog(&self, variant_id: Uuid, warehouse_id: Uuid) -> Result<(), CoreError> {
        if !self.catalog.variant_exists(variant_id).await? {
            return Err(CoreError::NotFound("product variant", variant_id));
        }
        if !self.catalog.warehouse_exists(warehouse_id).await? {
            return Err(CoreError::NotFound("warehouse", warehouse_id));
        }
        Ok(())
    }
}

#[async_trait]
impl CostingStore for MemoryStore {
    async fn seed_opening_stock(&self, seed: OpeningStock) -> Result<InventoryBatch, CoreError> {
        if seed.qty <= Decimal::ZERO {
            return Err(CoreError::validation("opening qty must be positive"));
        }
        if seed.unit_cost < Decimal::ZERO {
            return Err(CoreError::validation("unit_cost must not be negative"));
        }
        self.check_catalog(seed.product_variant_id, seed.warehouse_id)
            .await?;

        let mut tables = self.tables.write().await;
        let batch_id = Uuid::new_v4();
        let reference = Reference::OpeningStock(batch_id);
        let value = seed.qty * seed.unit_cost;
        let draft = postings::opening_stock(self.profile.as_ref(), seed.moved_on, reference, value);
        draft.ensure_balanced()?;

        let (batch, _movement) = tables.create_batch(
            batch_id,
            seed.product_variant_id,
            seed.warehouse_id,
            seed.batch_no,
            seed.unit_cost,
            seed.qty,
            None,
            None,
            MovementKind::OpeningStock,
            reference,
            seed.moved_on,
        )?;
        tables.post(&draft)?;

        info!(batch_id = %batch_id, qty = %batch.initial_qty, "opening stock seeded");
        Ok(batch)
    }

    async fn allocate_for_sale(
        &self,
        request: AllocateForSale,
    ) -> Result<SaleAllocation, CoreError> {
        self.check_catalog(request.product_variant_id, request.warehouse_id)
            .await?;
        if request.qty < Decimal::ZERO {
            return Err(CoreError::validation("qty must not be negative"));
        }
        if request.qty.is_zero() {
            return Ok(SaleAllocation {
                allocations: Vec::new(),
                total_cost: Decimal::ZERO,
            });
        }

        let mut tables = self.tables.write().await;
        let candidates = tables.candidates(request.product_variant_id, request.warehouse_id);
        let plan = plan_fifo(&candidates, request.qty)?;

        let reference = Reference::SalesOrderItem(request.sales_order_item_id);
        let revenue = request
            .unit_sale_price
            .map(|price| (price * request.qty).round_dp(4));
        let drafts = postings::sale(
            self.profile.as_ref(),
            request.moved_on,
            reference,
            plan.total_cost,
            revenue,
        );
        for draft in &drafts {
            draft.ensure_balanced()?;
        }

        let mut allocations = Vec::with_capacity(plan.lines.len());
        for line in &plan.lines {
            tables.decrement(line.batch_id, line.qty)?;
            tables.push_movement(
                request.product_variant_id,
                request.warehouse_id,
                Some(line.batch_id),
                MovementKind::SaleOut,
                -line.qty,
                reference,
                request.moved_on,
            );
            let allocation = SalesItemAllocation {
                id: Uuid::new_v4(),
                sales_order_item_id: request.sales_order_item_id,
                batch_id: line.batch_id,
                qty_deducted: line.qty,
                cost_per_unit: line.cost_per_unit,
            };
            tables.allocations.push(allocation.clone());
            allocations.push(allocation);
        }
        for draft in &drafts {
            tables.post(draft)?;
        }

        info!(
            sales_order_item_id = %request.sales_order_item_id,
            qty = %request.qty,
            total_cost = %plan.total_cost,
            "sale allocated"
        );
        Ok(SaleAllocation {
            allocations,
            total_cost: plan.total_cost,
        })
    }

    async fn receive_shipment(
        &self,
        header: ShipmentHeader,
        items: Vec<ShipmentItem>,
    ) -> Result<ShipmentReceipt, CoreError> {
        for item in &items {
            self.check_catalog(item.product_variant_id, item.warehouse_id)
                .await?;
        }

        let costing = batchbook_costing::cost_shipment(&header, &items)?;
        let reference = Reference::Shipment(header.shipment_id);

        let mut tables = self.tables.write().await;
        let mut batches_created = Vec::with_capacity(costing.lines.len());
        for line in &costing.lines {
            let (batch, _movement) = tables.create_batch(
                Uuid::new_v4(),
                line.product_variant_id,
                line.warehouse_id,
                line.batch_no.clone(),
                line.unit_cost,
                line.qty,
                line.manufactured_on,
                line.expires_on,
                MovementKind::PurchaseIn,
                reference,
                header.received_on,
            )?;
            batches_created.push(batch);
        }
        if !costing.lines.is_empty() {
            let draft = postings::purchase_receipt(
                self.profile.as_ref(),
                header.received_on,
                reference,
                costing.total_landed_cost,
            );
            tables.post(&draft)?;
        }

        info!(
            shipment_id = %header.shipment_id,
            batches = batches_created.len(),
            total = %costing.total_landed_cost,
            "shipment received"
        );
        Ok(ShipmentReceipt {
            batches_created,
            total_landed_cost: costing.total_landed_cost,
            skipped_lines: costing.skipped_lines,
        })
    }

    async fn adjust_stock(
        &self,
        request: AdjustStock,
    ) -> Result<Vec<StockLedgerEntry>, CoreError> {
        self.check_catalog(request.product_variant_id, request.warehouse_id)
            .await?;
        if request.qty_delta.is_zero() {
            return Err(CoreError::validation("qty_delta must not be zero"));
        }

        let reference = Reference::Adjustment(request.adjustment_id);
        let mut tables = self.tables.write().await;
        let mut entries = Vec::new();

        if request.qty_delta > Decimal::ZERO {
            match request.batch_id {
                Some(batch_id) => {
                    let batch = tables.batch(batch_id)?;
                    if batch.product_variant_id != request.product_variant_id
                        || batch.warehouse_id != request.warehouse_id
                    {
                        return Err(CoreError::validation(
                            "batch does not belong to the requested variant and warehouse",
                        ));
                    }
                    let unit_cost = batch.cost_price;
                    tables.increment(batch_id, request.qty_delta)?;
                    entries.push(tables.push_movement(
                        request.product_variant_id,
                        request.warehouse_id,
                        Some(batch_id),
                        MovementKind::AdjustmentIn,
                        request.qty_delta,
                        reference,
                        request.moved_on,
                    ));
                    if let Some(draft) = postings::adjustment(
                        self.profile.as_ref(),
                        request.moved_on,
                        reference,
                        request.qty_delta * unit_cost,
                    ) {
                        tables.post(&draft)?;
                    }
                }
                None => {
                    // Cost-lot purity: an inflow with no target lot becomes
                    // its own batch at an explicit cost.
                    let unit_cost = request.unit_cost.ok_or_else(|| {
                        CoreError::validation(
                            "unit_cost is required when adjustment-in spawns a new batch",
                        )
                    })?;
                    let batch_no = request.batch_no.clone().unwrap_or_else(|| {
                        format!("ADJ-{}", &request.adjustment_id.simple().to_string()[..8])
                    });
                    let (batch, movement) = tables.create_batch(
                        Uuid::new_v4(),
                        request.product_variant_id,
                        request.warehouse_id,
                        batch_no,
                        unit_cost,
                        request.qty_delta,
                        None,
                        None,
                        MovementKind::AdjustmentIn,
                        reference,
                        request.moved_on,
                    )?;
                    entries.push(movement);
                    if let Some(draft) = postings::adjustment(
                        self.profile.as_ref(),
                        request.moved_on,
                        reference,
                        batch.initial_qty * unit_cost,
                    ) {
                        tables.post(&draft)?;
                    }
                }
            }
        } else {
            let demand = -request.qty_delta;
            let plan = match request.batch_id {
                Some(batch_id) => {
                    let batch = tables.batch(batch_id)?;
                    if batch.product_variant_id != request.product_variant_id
                        || batch.warehouse_id != request.warehouse_id
                    {
                        return Err(CoreError::validation(
                            "batch does not belong to the requested variant and warehouse",
                        ));
                    }
                    if demand > batch.remaining_qty {
                        return Err(CoreError::InsufficientBatchQuantity {
                            batch_id,
                            requested: demand,
                            remaining: batch.remaining_qty,
                        });
                    }
                    AllocationPlan {
                        lines: vec![PlanLine {
                            batch_id,
                            qty: demand,
                            cost_per_unit: batch.cost_price,
                        }],
                        total_cost: demand * batch.cost_price,
                    }
                }
                None => {
                    let candidates =
                        tables.candidates(request.product_variant_id, request.warehouse_id);
                    plan_fifo(&candidates, demand)?
                }
            };

            for line in &plan.lines {
                tables.decrement(line.batch_id, line.qty)?;
                entries.push(tables.push_movement(
                    request.product_variant_id,
                    request.warehouse_id,
                    Some(line.batch_id),
                    MovementKind::AdjustmentOut,
                    -line.qty,
                    reference,
                    request.moved_on,
                ));
            }
            if let Some(draft) = postings::adjustment(
                self.profile.as_ref(),
                request.moved_on,
                reference,
                -plan.total_cost,
            ) {
                tables.post(&draft)?;
            }
        }

        info!(
            adjustment_id = %request.adjustment_id,
            qty_delta = %request.qty_delta,
            reason = %request.reason,
            "stock adjusted"
        );
        Ok(entries)
    }

    async fn record_return_in(&self, request: ReturnIn) -> Result<StockLedgerEntry, CoreError> {
        if request.qty <= Decimal::ZERO {
            return Err(CoreError::validation("return qty must be positive"));
        }

        let mut tables = self.tables.write().await;
        let batch = tables.batch(request.batch_id)?.clone();
        let reference = Reference::SalesOrderItem(request.sales_order_item_id);
        let draft = postings::return_in(
            self.profile.as_ref(),
            request.moved_on,
            reference,
            request.qty * batch.cost_price,
        );
        draft.ensure_balanced()?;

        tables.increment(request.batch_id, request.qty)?;
        let entry = tables.push_movement(
            batch.product_variant_id,
            batch.warehouse_id,
            Some(request.batch_id),
            MovementKind::ReturnIn,
            request.qty,
            reference,
            request.moved_on,
        );
        tables.post(&draft)?;

        info!(
            batch_id = %request.batch_id,
            qty = %request.qty,
            "customer return restocked"
        );
        Ok(entry)
    }

    async fn transfer_stock(
        &self,
        request: TransferStock,
    ) -> Result<Vec<StockLedgerEntry>, CoreError> {
        self.check_catalog(request.product_variant_id, request.from_warehouse_id)
            .await?;
        if !self
            .catalog
            .warehouse_exists(request.to_warehouse_id)
            .await?
        {
            return Err(CoreError::NotFound("warehouse", request.to_warehouse_id));
        }
        if request.from_warehouse_id == request.to_warehouse_id {
            return Err(CoreError::validation(
                "transfer source and destination warehouses must differ",
            ));
        }
        if request.qty <= Decimal::ZERO {
            return Err(CoreError::validation("transfer qty must be positive"));
        }

        let mut tables = self.tables.write().await;
        let candidates = tables.candidates(request.product_variant_id, request.from_warehouse_id);
        let plan = plan_fifo(&candidates, request.qty)?;
        let reference = Reference::Transfer(request.transfer_id);

        // Transfers move no value, so there is no journal entry; the ledger
        // rows carry the full audit trail.
        let mut entries = Vec::with_capacity(plan.lines.len() * 2);
        for line in &plan.lines {
            let source = tables.batch(line.batch_id)?.clone();
            tables.decrement(line.batch_id, line.qty)?;
            entries.push(tables.push_movement(
                request.product_variant_id,
                request.from_warehouse_id,
                Some(line.batch_id),
                MovementKind::TransferOut,
                -line.qty,
                reference,
                request.moved_on,
            ));
            let (_batch, inbound) = tables.create_batch(
                Uuid::new_v4(),
                request.product_variant_id,
                request.to_warehouse_id,
                source.batch_no.clone(),
                source.cost_price,
                line.qty,
                source.manufactured_on,
                source.expires_on,
                MovementKind::TransferIn,
                reference,
                request.moved_on,
            )?;
            entries.push(inbound);
        }

        info!(
            transfer_id = %request.transfer_id,
            qty = %request.qty,
            "stock transferred"
        );
        Ok(entries)
    }

    async fn current_valuation(
        &self,
        variant_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> Result<Valuation, CoreError> {
        let tables = self.tables.read().await;
        let batches: Vec<InventoryBatch> = tables
            .batches
            .iter()
            .filter(|batch| {
                batch.product_variant_id == variant_id
                    && warehouse_id.is_none_or(|warehouse| batch.warehouse_id == warehouse)
            })
            .cloned()
            .collect();
        Ok(valuation_of(&batches))
    }

    async fn check_reconciliation(
        &self,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Reconciliation, CoreError> {
        let tables = self.tables.read().await;
        Ok(reconcile(
            variant_id,
            warehouse_id,
            &tables.ledger,
            &tables.batches,
        ))
    }

    async fn allocatable_batches(
        &self,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Vec<InventoryBatch>, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables.candidates(variant_id, warehouse_id))
    }

    async fn ledger_entries(
        &self,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Vec<StockLedgerEntry>, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .ledger
            .iter()
            .filter(|entry| {
                entry.product_variant_id == variant_id && entry.warehouse_id == warehouse_id
            })
            .cloned()
            .collect())
    }

    async fn journal_entries_for(
        &self,
        reference: &Reference,
    ) -> Result<Vec<PostedEntry>, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .journal
            .iter()
            .filter(|posted| posted.entry.reference == *reference)
            .cloned()
            .collect())
    }
}
