use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use batchbook_core::{ApportionBasis, Reconciliation};

/// Channel every committed stock movement is announced on.
pub const STOCK_MOVEMENTS_CHANNEL: &str = "stock.movements";
/// Channel reconciliation failures are raised on.
pub const STOCK_ALERTS_CHANNEL: &str = "stock.alerts";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpeningStockRequest {
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_no: String,
    pub unit_cost: Decimal,
    pub qty: Decimal,
    pub moved_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpeningStockResponse {
    pub batch_id: Uuid,
    pub qty: Decimal,
    pub unit_cost: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateRequest {
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub qty: Decimal,
    pub sales_order_item_id: Uuid,
    pub unit_sale_price: Option<Decimal>,
    pub moved_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationLine {
    pub batch_id: Uuid,
    pub qty: Decimal,
    pub cost_per_unit: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateResponse {
    pub sales_order_item_id: Uuid,
    pub allocations: Vec<AllocationLine>,
    pub total_cost: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveShipmentRequest {
    pub shipment_id: Uuid,
    pub exchange_rate: Decimal,
    pub basis: Option<ApportionBasis>,
    #[serde(default)]
    pub international_shipping: Decimal,
    #[serde(default)]
    pub local_shipping: Decimal,
    #[serde(default)]
    pub misc_cost: Decimal,
    pub received_on: NaiveDate,
    pub items: Vec<ShipmentItemRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentItemRequest {
    pub id: Uuid,
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_no: String,
    pub unit_price: Decimal,
    pub ordered_qty: Decimal,
    pub received_qty: Decimal,
    #[serde(default)]
    pub lost_qty: Decimal,
    pub unit_weight_kg: Option<Decimal>,
    #[serde(default)]
    pub extra_cost: Decimal,
    pub manufactured_on: Option<NaiveDate>,
    pub expires_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveShipmentResponse {
    pub shipment_id: Uuid,
    pub batches: Vec<ReceivedBatch>,
    pub total_landed_cost: Decimal,
    pub skipped_lines: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedBatch {
    pub batch_id: Uuid,
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_no: String,
    pub qty: Decimal,
    pub unit_cost: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustStockRequest {
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub qty_delta: Decimal,
    pub unit_cost: Option<Decimal>,
    pub batch_no: Option<String>,
    pub reason: String,
    pub adjustment_id: Uuid,
    pub moved_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnInRequest {
    pub batch_id: Uuid,
    pub qty: Decimal,
    pub sales_order_item_id: Uuid,
    pub moved_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub product_variant_id: Uuid,
    pub from_warehouse_id: Uuid,
    pub to_warehouse_id: Uuid,
    pub qty: Decimal,
    pub transfer_id: Uuid,
    pub moved_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementResponse {
    pub entries: Vec<MovementRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementRow {
    pub entry_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub kind: String,
    pub qty_change: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationResponse {
    pub product_variant_id: Uuid,
    pub warehouse_id: Option<Uuid>,
    pub quantity: Decimal,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResponse {
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub ledger_qty: Decimal,
    pub batch_qty: Decimal,
    pub balanced: bool,
}

impl From<Reconciliation> for ReconciliationResponse {
    fn from(report: Reconciliation) -> Self {
        let balanced = report.is_balanced();
        Self {
            product_variant_id: report.product_variant_id,
            warehouse_id: report.warehouse_id,
            ledger_qty: report.ledger_qty,
            batch_qty: report.batch_qty,
            balanced,
        }
    }
}

/// Published after every committed mutating operation. Carries enough for a
/// subscriber to re-check the touched variant and warehouse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovedEvent {
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub operation: String,
    pub reference_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationAlert {
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub ledger_qty: Decimal,
    pub batch_qty: Decimal,
    pub detected_at: DateTime<Utc>,
}
