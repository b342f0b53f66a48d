use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{
    ApportionBasis, InventoryBatch, PostedEntry, Reconciliation, Reference, SalesItemAllocation,
    StockLedgerEntry, Valuation,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpeningStock {
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_no: String,
    pub unit_cost: Decimal,
    pub qty: Decimal,
    pub moved_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateForSale {
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub qty: Decimal,
    pub sales_order_item_id: Uuid,
    /// When present the revenue entry is posted alongside the COGS entry;
    /// when absent the caller owns revenue recognition.
    pub unit_sale_price: Option<Decimal>,
    pub moved_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleAllocation {
    pub allocations: Vec<SalesItemAllocation>,
    pub total_cost: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentHeader {
    pub shipment_id: Uuid,
    /// Source-currency to ledger-currency conversion rate.
    pub exchange_rate: Decimal,
    /// None picks Weight when every line carries a weight, else Value.
    pub basis: Option<ApportionBasis>,
    pub international_shipping: Decimal,
    pub local_shipping: Decimal,
    pub misc_cost: Decimal,
    pub received_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentItem {
    pub id: Uuid,
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_no: String,
    /// Unit purchase price in the source currency.
    pub unit_price: Decimal,
    pub ordered_qty: Decimal,
    pub received_qty: Decimal,
    pub lost_qty: Decimal,
    pub unit_weight_kg: Option<Decimal>,
    /// Item-specific charges already in ledger currency (extra freight etc.).
    pub extra_cost: Decimal,
    pub manufactured_on: Option<NaiveDate>,
    pub expires_on: Option<NaiveDate>,
}

impl ShipmentItem {
    pub fn surviving_qty(&self) -> Decimal {
        self.received_qty - self.lost_qty
    }
}

impl ApportionBasis {
    /// Weight when every line carries a weight, else value.
    pub fn default_for(items: &[ShipmentItem]) -> Self {
        if !items.is_empty() && items.iter().all(|item| item.unit_weight_kg.is_some()) {
            Self::Weight
        } else {
            Self::Value
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentReceipt {
    pub batches_created: Vec<InventoryBatch>,
    pub total_landed_cost: Decimal,
    /// Line item ids skipped because no quantity survived the loss.
    pub skipped_lines: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustStock {
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    /// Target batch. Adjustment-in without a target spawns a new batch
    /// (`unit_cost` required); adjustment-out without a target drains FIFO.
    pub batch_id: Option<Uuid>,
    pub qty_delta: Decimal,
    pub unit_cost: Option<Decimal>,
    pub batch_no: Option<String>,
    pub reason: String,
    pub adjustment_id: Uuid,
    pub moved_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnIn {
    pub batch_id: Uuid,
    pub qty: Decimal,
    pub sales_order_item_id: Uuid,
    pub moved_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferStock {
    pub product_variant_id: Uuid,
    pub from_warehouse_id: Uuid,
    pub to_warehouse_id: Uuid,
    pub qty: Decimal,
    pub transfer_id: Uuid,
    pub moved_on: NaiveDate,
}

/// Existence checks the core consumes from the surrounding catalog modules.
#[async_trait]
pub trait ExistenceCheck: Send + Sync {
    async fn variant_exists(&self, variant_id: Uuid) -> Result<bool, CoreError>;
    async fn warehouse_exists(&self, warehouse_id: Uuid) -> Result<bool, CoreError>;
}

/// Permissive default for embedding and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeExists;

#[async_trait]
impl ExistenceCheck for AssumeExists {
    async fn variant_exists(&self, _variant_id: Uuid) -> Result<bool, CoreError> {
        Ok(true)
    }

    async fn warehouse_exists(&self, _warehouse_id: Uuid) -> Result<bool, CoreError> {
        Ok(true)
    }
}

/// The costing-and-ledger operation surface. Every mutating operation runs
/// batch writes, ledger rows, allocation rows and journal entries as one
/// atomic unit; a failure leaves no partial state.
#[async_trait]
pub trait CostingStore: Send + Sync {
    async fn seed_opening_stock(&self, seed: OpeningStock) -> Result<InventoryBatch, CoreError>;

    async fn allocate_for_sale(&self, request: AllocateForSale)
    -> Result<SaleAllocation, CoreError>;

    async fn receive_shipment(
        &self,
        header: ShipmentHeader,
        items: Vec<ShipmentItem>,
    ) -> Result<ShipmentReceipt, CoreError>;

    async fn adjust_stock(&self, request: AdjustStock)
    -> Result<Vec<StockLedgerEntry>, CoreError>;

    async fn record_return_in(&self, request: ReturnIn) -> Result<StockLedgerEntry, CoreError>;

    async fn transfer_stock(
        &self,
        request: TransferStock,
    ) -> Result<Vec<StockLedgerEntry>, CoreError>;

    async fn current_valuation(
        &self,
        variant_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> Result<Valuation, CoreError>;

    async fn check_reconciliation(
        &self,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Reconciliation, CoreError>;

    /// Batches with remaining quantity, oldest first, id as tie-break.
    async fn allocatable_batches(
        &self,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Vec<InventoryBatch>, CoreError>;

    async fn ledger_entries(
        &self,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Vec<StockLedgerEntry>, CoreError>;

    async fn journal_entries_for(
        &self,
        reference: &Reference,
    ) -> Result<Vec<PostedEntry>, CoreError>;
}
