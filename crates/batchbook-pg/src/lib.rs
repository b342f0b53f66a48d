//! PostgreSQL [`CostingStore`]. Every mutating operation is one sqlx
//! transaction: candidate batches are read `FOR UPDATE` so planning happens
//! on locked rows, and decrements re-check the remaining quantity in the
//! UPDATE predicate rather than trusting what was read.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use batchbook_core::{
    AccountsProfile, AdjustStock, AllocateForSale, CoreError, CostingStore, ExistenceCheck,
    InventoryBatch, JournalEntry, JournalItem, MovementKind, OpeningStock, PostedEntry,
    Reconciliation, Reference, ReturnIn, SaleAllocation, SalesItemAllocation, ShipmentHeader,
    ShipmentItem, ShipmentReceipt, StockLedgerEntry, TransferStock, Valuation,
};
use batchbook_finance::{JournalDraft, postings};
use batchbook_inventory::{AllocationPlan, PlanLine, plan_fifo};

type PgTx<'a> = Transaction<'a, Postgres>;

pub struct PgStore {
    pool: PgPool,
    profile: Arc<dyn AccountsProfile>,
    catalog: Arc<dyn ExistenceCheck>,
}

fn storage(err: sqlx::Error) -> CoreError {
    CoreError::Storage(err.into())
}

fn batch_from_row(row: &PgRow) -> Result<InventoryBatch, CoreError> {
    Ok(InventoryBatch {
        id: row.try_get("id").map_err(storage)?,
        product_variant_id: row.try_get("product_variant_id").map_err(storage)?,
        warehouse_id: row.try_get("warehouse_id").map_err(storage)?,
        batch_no: row.try_get("batch_no").map_err(storage)?,
        cost_price: row.try_get("cost_price").map_err(storage)?,
        initial_qty: row.try_get("initial_qty").map_err(storage)?,
        remaining_qty: row.try_get("remaining_qty").map_err(storage)?,
        manufactured_on: row.try_get("manufactured_on").map_err(storage)?,
        expires_on: row.try_get("expires_on").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<StockLedgerEntry, CoreError> {
    let kind_raw: String = row.try_get("kind").map_err(storage)?;
    let reference_kind: String = row.try_get("reference_kind").map_err(storage)?;
    let reference_id: Uuid = row.try_get("reference_id").map_err(storage)?;
    Ok(StockLedgerEntry {
        id: row.try_get("id").map_err(storage)?,
        product_variant_id: row.try_get("product_variant_id").map_err(storage)?,
        warehouse_id: row.try_get("warehouse_id").map_err(storage)?,
        batch_id: row.try_get("batch_id").map_err(storage)?,
        kind: MovementKind::from_str(&kind_raw)?,
        qty_change: row.try_get("qty_change").map_err(storage)?,
        reference: Reference::from_parts(&reference_kind, reference_id)?,
        moved_on: row.try_get("moved_on").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
    })
}

async fn candidates_for_update(
    tx: &mut PgTx<'_>,
    variant_id: Uuid,
    warehouse_id: Uuid,
) -> Result<Vec<InventoryBatch>, CoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, product_variant_id, warehouse_id, batch_no, cost_price,
               initial_qty, remaining_qty, manufactured_on, expires_on, created_at
        FROM inventory_batches
        WHERE product_variant_id = $1 AND warehouse_id = $2 AND remaining_qty > 0
        ORDER BY created_at ASC, id ASC
        FOR UPDATE
        "#,
    )
    .bind(variant_id)
    .bind(warehouse_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(storage)?;

    rows.iter().map(batch_from_row).collect()
}

async fn batch_for_update(
    tx: &mut PgTx<'_>,
    batch_id: Uuid,
) -> Result<InventoryBatch, CoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, product_variant_id, warehouse_id, batch_no, cost_price,
               initial_qty, remaining_qty, manufactured_on, expires_on, created_at
        FROM inventory_batches
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(batch_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(storage)?
    .ok_or(CoreError::NotFound("inventory batch", batch_id))?;

    batch_from_row(&row)
}

/// Conditional compare-and-decrement: the guard lives in the UPDATE
/// predicate, never in application-side read-then-write.
async fn decrement_batch(
    tx: &mut PgTx<'_>,
    batch_id: Uuid,
    qty: Decimal,
) -> Result<(), CoreError> {
    let result = sqlx::query(
        "UPDATE inventory_batches SET remaining_qty = remaining_qty - $2 \
         WHERE id = $1 AND remaining_qty >= $2",
    )
    .bind(batch_id)
    .bind(qty)
    .execute(&mut **tx)
    .await
    .map_err(storage)?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let row = sqlx::query("SELECT remaining_qty FROM inventory_batches WHERE id = $1")
        .bind(batch_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage)?;
    match row {
        None => Err(CoreError::NotFound("inventory batch", batch_id)),
        Some(row) => {
            let remaining: Decimal = row.try_get("remaining_qty").map_err(storage)?;
            if remaining < qty {
                Err(CoreError::InsufficientBatchQuantity {
                    batch_id,
                    requested: qty,
                    remaining,
                })
            } else {
                Err(CoreError::Conflict(format!(
                    "batch {batch_id} changed under a concurrent writer"
                )))
            }
        }
    }
}

async fn increment_batch(
    tx: &mut PgTx<'_>,
    batch_id: Uuid,
    qty: Decimal,
) -> Result<(), CoreError> {
    let result = sqlx::query(
        "UPDATE inventory_batches SET remaining_qty = remaining_qty + $2 \
         WHERE id = $1 AND remaining_qty + $2 <= initial_qty",
    )
    .bind(batch_id)
    .bind(qty)
    .execute(&mut **tx)
    .await
    .map_err(storage)?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let row = sqlx::query("SELECT initial_qty FROM inventory_batches WHERE id = $1")
        .bind(batch_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage)?;
    match row {
        None => Err(CoreError::NotFound("inventory batch", batch_id)),
        Some(row) => Err(CoreError::OverCapacity {
            batch_id,
            requested: qty,
            capacity: row.try_get("initial_qty").map_err(storage)?,
        }),
    }
}

async fn insert_movement(
    tx: &mut PgTx<'_>,
    variant_id: Uuid,
    warehouse_id: Uuid,
    batch_id: Option<Uuid>,
    kind: MovementKind,
    qty_change: Decimal,
    reference: Reference,
    moved_on: chrono::NaiveDate,
) -> Result<StockLedgerEntry, CoreError> {
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
    sqlx::query(
        r#"
        INSERT INTO stock_ledger_entries (
            id, product_variant_id, warehouse_id, batch_id, kind, qty_change,
            reference_kind, reference_id, moved_on, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(entry.id)
    .bind(entry.product_variant_id)
    .bind(entry.warehouse_id)
    .bind(entry.batch_id)
    .bind(entry.kind.as_str())
    .bind(entry.qty_change)
    .bind(entry.reference.kind())
    .bind(entry.reference.target_id())
    .bind(entry.moved_on)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await
    .map_err(storage)?;

    Ok(entry)
}

/// Inserts a fresh batch together with its inbound ledger row.
async fn create_batch(
    tx: &mut PgTx<'_>,
    batch: &InventoryBatch,
    kind: MovementKind,
    reference: Reference,
    moved_on: chrono::NaiveDate,
) -> Result<StockLedgerEntry, CoreError> {
    if batch.cost_price < Decimal::ZERO {
        return Err(CoreError::validation("cost_price must not be negative"));
    }
    if batch.initial_qty <= Decimal::ZERO {
        return Err(CoreError::validation("initial_qty must be positive"));
    }

    sqlx::query(
        r#"
        INSERT INTO inventory_batches (
            id, product_variant_id, warehouse_id, batch_no, cost_price,
            initial_qty, remaining_qty, manufactured_on, expires_on, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(batch.id)
    .bind(batch.product_variant_id)
    .bind(batch.warehouse_id)
    .bind(&batch.batch_no)
    .bind(batch.cost_price)
    .bind(batch.initial_qty)
    .bind(batch.remaining_qty)
    .bind(batch.manufactured_on)
    .bind(batch.expires_on)
    .bind(batch.created_at)
    .execute(&mut **tx)
    .await
    .map_err(storage)?;

    insert_movement(
        tx,
        batch.product_variant_id,
        batch.warehouse_id,
        Some(batch.id),
        kind,
        batch.initial_qty,
        reference,
        moved_on,
    )
    .await
}

async fn insert_allocation(
    tx: &mut PgTx<'_>,
    allocation: &SalesItemAllocation,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO sales_item_allocations (
            id, sales_order_item_id, batch_id, qty_deducted, cost_per_unit
        )
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(allocation.id)
    .bind(allocation.sales_order_item_id)
    .bind(allocation.batch_id)
    .bind(allocation.qty_deducted)
    .bind(allocation.cost_per_unit)
    .execute(&mut **tx)
    .await
    .map_err(storage)?;
    Ok(())
}

/// Balance-checks the draft and writes the entry plus all its items. The
/// enclosing transaction makes the write all-or-nothing.
async fn post_draft(tx: &mut PgTx<'_>, draft: &JournalDraft) -> Result<JournalEntry, CoreError> {
    draft.ensure_balanced()?;

    let seq: i64 = sqlx::query("SELECT nextval('journal_entry_seq') AS seq")
        .fetch_one(&mut **tx)
        .await
        .map_err(storage)?
        .try_get("seq")
        .map_err(storage)?;

    let entry = JournalEntry {
        id: Uuid::new_v4(),
        entry_number: format!("JE-{seq:06}"),
        entry_date: draft.entry_date,
        reference: draft.reference,
        memo: draft.memo.clone(),
        created_at: Utc::now(),
    };
    sqlx::query(
        r#"
        INSERT INTO journal_entries (
            id, entry_number, entry_date, reference_kind, reference_id, memo, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry.id)
    .bind(&entry.entry_number)
    .bind(entry.entry_date)
    .bind(entry.reference.kind())
    .bind(entry.reference.target_id())
    .bind(&entry.memo)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await
    .map_err(storage)?;

    for line in &draft.lines {
        sqlx::query(
            r#"
            INSERT INTO journal_items (id, journal_entry_id, account_id, debit, credit)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.id)
        .bind(line.account_id)
        .bind(line.debit)
        .bind(line.credit)
        .execute(&mut **tx)
        .await
        .map_err(storage)?;
    }

    Ok(entry)
}

impl PgStore {
    pub fn new(
        pool: PgPool,
        profile: Arc<dyn AccountsProfile>,
        catalog: Arc<dyn ExistenceCheck>,
    ) -> Self {
        Self {
            pool,
            profile,
            catalog,
        }
    }

    /// Seeds the profile's chart of accounts; existing codes are left alone.
    pub async fn ensure_accounts(&self) -> Result<(), CoreError> {
        for account in self.profile.all() {
            sqlx::query(
                r#"
                INSERT INTO accounts (id, code, name, kind, is_active)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (code) DO NOTHING
                "#,
            )
            .bind(account.id)
            .bind(&account.code)
            .bind(&account.name)
            .bind(account.kind.as_str())
            .bind(account.is_active)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        }
        Ok(())
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
impl CostingStore for PgStore {
    async fn seed_opening_stock(&self, seed: OpeningStock) -> Result<InventoryBatch, CoreError> {
        if seed.qty <= Decimal::ZERO {
            return Err(CoreError::validation("opening qty must be positive"));
        }
        if seed.unit_cost < Decimal::ZERO {
            return Err(CoreError::validation("unit_cost must not be negative"));
        }
        self.check_catalog(seed.product_variant_id, seed.warehouse_id)
            .await?;

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let batch = InventoryBatch {
            id: Uuid::new_v4(),
            product_variant_id: seed.product_variant_id,
            warehouse_id: seed.warehouse_id,
            batch_no: seed.batch_no,
            cost_price: seed.unit_cost,
            initial_qty: seed.qty,
            remaining_qty: seed.qty,
            manufactured_on: None,
            expires_on: None,
            created_at: Utc::now(),
        };
        let reference = Reference::OpeningStock(batch.id);
        create_batch(
            &mut tx,
            &batch,
            MovementKind::OpeningStock,
            reference,
            seed.moved_on,
        )
        .await?;
        let draft = postings::opening_stock(
            self.profile.as_ref(),
            seed.moved_on,
            reference,
            batch.initial_qty * batch.cost_price,
        );
        post_draft(&mut tx, &draft).await?;
        tx.commit().await.map_err(storage)?;

        info!(batch_id = %batch.id, qty = %batch.initial_qty, "opening stock seeded");
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

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let candidates =
            candidates_for_update(&mut tx, request.product_variant_id, request.warehouse_id)
                .await?;
        let plan = plan_fifo(&candidates, request.qty)?;
        let reference = Reference::SalesOrderItem(request.sales_order_item_id);

        let mut allocations = Vec::with_capacity(plan.lines.len());
        for line in &plan.lines {
            decrement_batch(&mut tx, line.batch_id, line.qty).await?;
            insert_movement(
                &mut tx,
                request.product_variant_id,
                request.warehouse_id,
                Some(line.batch_id),
                MovementKind::SaleOut,
                -line.qty,
                reference,
                request.moved_on,
            )
            .await?;
            let allocation = SalesItemAllocation {
                id: Uuid::new_v4(),
                sales_order_item_id: request.sales_order_item_id,
                batch_id: line.batch_id,
                qty_deducted: line.qty,
                cost_per_unit: line.cost_per_unit,
            };
            insert_allocation(&mut tx, &allocation).await?;
            allocations.push(allocation);
        }

        let revenue = request
            .unit_sale_price
            .map(|price| (price * request.qty).round_dp(4));
        for draft in postings::sale(
            self.profile.as_ref(),
            request.moved_on,
            reference,
            plan.total_cost,
            revenue,
        ) {
            post_draft(&mut tx, &draft).await?;
        }
        tx.commit().await.map_err(storage)?;

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

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let mut batches_created = Vec::with_capacity(costing.lines.len());
        for line in &costing.lines {
            let batch = InventoryBatch {
                id: Uuid::new_v4(),
                product_variant_id: line.product_variant_id,
                warehouse_id: line.warehouse_id,
                batch_no: line.batch_no.clone(),
                cost_price: line.unit_cost,
                initial_qty: line.qty,
                remaining_qty: line.qty,
                manufactured_on: line.manufactured_on,
                expires_on: line.expires_on,
                created_at: Utc::now(),
            };
            create_batch(
                &mut tx,
                &batch,
                MovementKind::PurchaseIn,
                reference,
                header.received_on,
            )
            .await?;
            batches_created.push(batch);
        }
        if !costing.lines.is_empty() {
            let draft = postings::purchase_receipt(
                self.profile.as_ref(),
                header.received_on,
                reference,
                costing.total_landed_cost,
            );
            post_draft(&mut tx, &draft).await?;
        }
        tx.commit().await.map_err(storage)?;

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
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let mut entries = Vec::new();

        if request.qty_delta > Decimal::ZERO {
            match request.batch_id {
                Some(batch_id) => {
                    let batch = batch_for_update(&mut tx, batch_id).await?;
                    if batch.product_variant_id != request.product_variant_id
                        || batch.warehouse_id != request.warehouse_id
                    {
                        return Err(CoreError::validation(
                            "batch does not belong to the requested variant and warehouse",
                        ));
                    }
                    increment_batch(&mut tx, batch_id, request.qty_delta).await?;
                    entries.push(
                        insert_movement(
                            &mut tx,
                            request.product_variant_id,
                            request.warehouse_id,
                            Some(batch_id),
                            MovementKind::AdjustmentIn,
                            request.qty_delta,
                            reference,
                            request.moved_on,
                        )
                        .await?,
                    );
                    if let Some(draft) = postings::adjustment(
                        self.profile.as_ref(),
                        request.moved_on,
                        reference,
                        request.qty_delta * batch.cost_price,
                    ) {
                        post_draft(&mut tx, &draft).await?;
                    }
                }
                None => {
                    let unit_cost = request.unit_cost.ok_or_else(|| {
                        CoreError::validation(
                            "unit_cost is required when adjustment-in spawns a new batch",
                        )
                    })?;
                    let batch_no = request.batch_no.clone().unwrap_or_else(|| {
                        format!("ADJ-{}", &request.adjustment_id.simple().to_string()[..8])
                    });
                    let batch = InventoryBatch {
                        id: Uuid::new_v4(),
                        product_variant_id: request.product_variant_id,
                        warehouse_id: request.warehouse_id,
                        batch_no,
                        cost_price: unit_cost,
                        initial_qty: request.qty_delta,
                        remaining_qty: request.qty_delta,
                        manufactured_on: None,
                        expires_on: None,
                        created_at: Utc::now(),
                    };
                    entries.push(
                        create_batch(
                            &mut tx,
                            &batch,
                            MovementKind::AdjustmentIn,
                            reference,
                            request.moved_on,
                        )
                        .await?,
                    );
                    if let Some(draft) = postings::adjustment(
                        self.profile.as_ref(),
                        request.moved_on,
                        reference,
                        batch.initial_qty * unit_cost,
                    ) {
                        post_draft(&mut tx, &draft).await?;
                    }
                }
            }
        } else {
            let demand = -request.qty_delta;
            let plan = match request.batch_id {
                Some(batch_id) => {
                    let batch = batch_for_update(&mut tx, batch_id).await?;
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
                    let candidates = candidates_for_update(
                        &mut tx,
                        request.product_variant_id,
                        request.warehouse_id,
                    )
                    .await?;
                    plan_fifo(&candidates, demand)?
                }
            };

            for line in &plan.lines {
                decrement_batch(&mut tx, line.batch_id, line.qty).await?;
                entries.push(
                    insert_movement(
                        &mut tx,
                        request.product_variant_id,
                        request.warehouse_id,
                        Some(line.batch_id),
                        MovementKind::AdjustmentOut,
                        -line.qty,
                        reference,
                        request.moved_on,
                    )
                    .await?,
                );
            }
            if let Some(draft) = postings::adjustment(
                self.profile.as_ref(),
                request.moved_on,
                reference,
                -plan.total_cost,
            ) {
                post_draft(&mut tx, &draft).await?;
            }
        }
        tx.commit().await.map_err(storage)?;

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

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let batch = batch_for_update(&mut tx, request.batch_id).await?;
        increment_batch(&mut tx, request.batch_id, request.qty).await?;

        let reference = Reference::SalesOrderItem(request.sales_order_item_id);
        let entry = insert_movement(
            &mut tx,
            batch.product_variant_id,
            batch.warehouse_id,
            Some(request.batch_id),
            MovementKind::ReturnIn,
            request.qty,
            reference,
            request.moved_on,
        )
        .await?;
        let draft = postings::return_in(
            self.profile.as_ref(),
            request.moved_on,
            reference,
            request.qty * batch.cost_price,
        );
        post_draft(&mut tx, &draft).await?;
        tx.commit().await.map_err(storage)?;

        info!(batch_id = %request.batch_id, qty = %request.qty, "customer return restocked");
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

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let candidates = candidates_for_update(
            &mut tx,
            request.product_variant_id,
            request.from_warehouse_id,
        )
        .await?;
        let plan = plan_fifo(&candidates, request.qty)?;
        let reference = Reference::Transfer(request.transfer_id);

        // No journal entry: a transfer moves quantity, not value.
        let mut entries = Vec::with_capacity(plan.lines.len() * 2);
        for line in &plan.lines {
            let source = candidates
                .iter()
                .find(|batch| batch.id == line.batch_id)
                .ok_or(CoreError::NotFound("inventory batch", line.batch_id))?;
            decrement_batch(&mut tx, line.batch_id, line.qty).await?;
            entries.push(
                insert_movement(
                    &mut tx,
                    request.product_variant_id,
                    request.from_warehouse_id,
                    Some(line.batch_id),
                    MovementKind::TransferOut,
                    -line.qty,
                    reference,
                    request.moved_on,
                )
                .await?,
            );
            let inbound = InventoryBatch {
                id: Uuid::new_v4(),
                product_variant_id: request.product_variant_id,
                warehouse_id: request.to_warehouse_id,
                batch_no: source.batch_no.clone(),
                cost_price: source.cost_price,
                initial_qty: line.qty,
                remaining_qty: line.qty,
                manufactured_on: source.manufactured_on,
                expires_on: source.expires_on,
                created_at: Utc::now(),
            };
            entries.push(
                create_batch(
                    &mut tx,
                    &inbound,
                    MovementKind::TransferIn,
                    reference,
                    request.moved_on,
                )
                .await?,
            );
        }
        tx.commit().await.map_err(storage)?;

        info!(transfer_id = %request.transfer_id, qty = %request.qty, "stock transferred");
        Ok(entries)
    }

    async fn current_valuation(
        &self,
        variant_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> Result<Valuation, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(remaining_qty), 0) AS quantity,
                COALESCE(SUM(remaining_qty * cost_price), 0) AS total_value
            FROM inventory_batches
            WHERE product_variant_id = $1
              AND ($2::uuid IS NULL OR warehouse_id = $2)
            "#,
        )
        .bind(variant_id)
        .bind(warehouse_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        Ok(Valuation {
            quantity: row.try_get("quantity").map_err(storage)?,
            total_value: row.try_get("total_value").map_err(storage)?,
        })
    }

    async fn check_reconciliation(
        &self,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Reconciliation, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COALESCE(SUM(qty_change), 0)
                 FROM stock_ledger_entries
                 WHERE product_variant_id = $1 AND warehouse_id = $2) AS ledger_qty,
                (SELECT COALESCE(SUM(remaining_qty), 0)
                 FROM inventory_batches
                 WHERE product_variant_id = $1 AND warehouse_id = $2) AS batch_qty
            "#,
        )
        .bind(variant_id)
        .bind(warehouse_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        Ok(Reconciliation {
            product_variant_id: variant_id,
            warehouse_id,
            ledger_qty: row.try_get("ledger_qty").map_err(storage)?,
            batch_qty: row.try_get("batch_qty").map_err(storage)?,
        })
    }

    async fn allocatable_batches(
        &self,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Vec<InventoryBatch>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_variant_id, warehouse_id, batch_no, cost_price,
                   initial_qty, remaining_qty, manufactured_on, expires_on, created_at
            FROM inventory_batches
            WHERE product_variant_id = $1 AND warehouse_id = $2 AND remaining_qty > 0
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(variant_id)
        .bind(warehouse_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(batch_from_row).collect()
    }

    async fn ledger_entries(
        &self,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Vec<StockLedgerEntry>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_variant_id, warehouse_id, batch_id, kind, qty_change,
                   reference_kind, reference_id, moved_on, created_at
            FROM stock_ledger_entries
            WHERE product_variant_id = $1 AND warehouse_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(variant_id)
        .bind(warehouse_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(movement_from_row).collect()
    }

    async fn journal_entries_for(
        &self,
        reference: &Reference,
    ) -> Result<Vec<PostedEntry>, CoreError> {
        let entry_rows = sqlx::query(
            r#"
            SELECT id, entry_number, entry_date, reference_kind, reference_id, memo, created_at
            FROM journal_entries
            WHERE reference_kind = $1 AND reference_id = $2
            ORDER BY entry_number ASC
            "#,
        )
        .bind(reference.kind())
        .bind(reference.target_id())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut posted = Vec::with_capacity(entry_rows.len());
        for row in &entry_rows {
            let reference_kind: String = row.try_get("reference_kind").map_err(storage)?;
            let reference_id: Uuid = row.try_get("reference_id").map_err(storage)?;
            let entry = JournalEntry {
                id: row.try_get("id").map_err(storage)?,
                entry_number: row.try_get("entry_number").map_err(storage)?,
                entry_date: row.try_get("entry_date").map_err(storage)?,
                reference: Reference::from_parts(&reference_kind, reference_id)?,
                memo: row.try_get("memo").map_err(storage)?,
                created_at: row.try_get("created_at").map_err(storage)?,
            };

            let item_rows = sqlx::query(
                r#"
                SELECT id, journal_entry_id, account_id, debit, credit
                FROM journal_items
                WHERE journal_entry_id = $1
                "#,
            )
            .bind(entry.id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
            let items = item_rows
                .iter()
                .map(|item| {
                    Ok(JournalItem {
                        id: item.try_get("id").map_err(storage)?,
                        journal_entry_id: item.try_get("journal_entry_id").map_err(storage)?,
                        account_id: item.try_get("account_id").map_err(storage)?,
                        debit: item.try_get("debit").map_err(storage)?,
                        credit: item.try_get("credit").map_err(storage)?,
                    })
                })
                .collect::<Result<Vec<_>, CoreError>>()?;

            posted.push(PostedEntry { entry, items });
        }
        Ok(posted)
    }
}
