use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// One cost-homogeneous lot of a product variant at a warehouse. `cost_price`
/// is the landed unit cost in the ledger currency and never changes after the
/// batch is created; allocations copy it out instead of referencing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryBatch {
    pub id: Uuid,
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_no: String,
    pub cost_price: Decimal,
    pub initial_qty: Decimal,
    pub remaining_qty: Decimal,
    pub manufactured_on: Option<NaiveDate>,
    pub expires_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl InventoryBatch {
    pub fn value(&self) -> Decimal {
        self.remaining_qty * self.cost_price
    }
}

/// Kind of a stock ledger row. Directional pairs carry the sign of the
/// movement so `qty_change` is always implied by the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    PurchaseIn,
    SaleOut,
    ReturnIn,
    ReturnOut,
    TransferIn,
    TransferOut,
    AdjustmentIn,
    AdjustmentOut,
    OpeningStock,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PurchaseIn => "purchase_in",
            Self::SaleOut => "sale_out",
            Self::ReturnIn => "return_in",
            Self::ReturnOut => "return_out",
            Self::TransferIn => "transfer_in",
            Self::TransferOut => "transfer_out",
            Self::AdjustmentIn => "adjustment_in",
            Self::AdjustmentOut => "adjustment_out",
            Self::OpeningStock => "opening_stock",
        }
    }

    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            Self::PurchaseIn
                | Self::ReturnIn
                | Self::TransferIn
                | Self::AdjustmentIn
                | Self::OpeningStock
        )
    }
}

impl FromStr for MovementKind {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "purchase_in" => Ok(Self::PurchaseIn),
            "sale_out" => Ok(Self::SaleOut),
            "return_in" => Ok(Self::ReturnIn),
            "return_out" => Ok(Self::ReturnOut),
            "transfer_in" => Ok(Self::TransferIn),
            "transfer_out" => Ok(Self::TransferOut),
            "adjustment_in" => Ok(Self::AdjustmentIn),
            "adjustment_out" => Ok(Self::AdjustmentOut),
            "opening_stock" => Ok(Self::OpeningStock),
            other => Err(CoreError::validation(format!(
                "unknown movement kind: {other}"
            ))),
        }
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pointer from a ledger or journal row back to the business event that
/// caused it. A closed union: callers resolve the target, the core never
/// inspects it beyond kind and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Reference {
    SalesOrderItem(Uuid),
    Shipment(Uuid),
    Adjustment(Uuid),
    Transfer(Uuid),
    OpeningStock(Uuid),
    Manual(Uuid),
}

impl Reference {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SalesOrderItem(_) => "sales_order_item",
            Self::Shipment(_) => "shipment",
            Self::Adjustment(_) => "adjustment",
            Self::Transfer(_) => "transfer",
            Self::OpeningStock(_) => "opening_stock",
            Self::Manual(_) => "manual",
        }
    }

    pub fn target_id(&self) -> Uuid {
        match self {
            Self::SalesOrderItem(id)
            | Self::Shipment(id)
            | Self::Adjustment(id)
            | Self::Transfer(id)
            | Self::OpeningStock(id)
            | Self::Manual(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: Uuid) -> Result<Self, CoreError> {
        match kind {
            "sales_order_item" => Ok(Self::SalesOrderItem(id)),
            "shipment" => Ok(Self::Shipment(id)),
            "adjustment" => Ok(Self::Adjustment(id)),
            "transfer" => Ok(Self::Transfer(id)),
            "opening_stock" => Ok(Self::OpeningStock(id)),
            "manual" => Ok(Self::Manual(id)),
            other => Err(CoreError::validation(format!(
                "unknown reference kind: {other}"
            ))),
        }
    }
}

/// Append-only movement record. Corrections are new offsetting rows, never
/// edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLedgerEntry {
    pub id: Uuid,
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub kind: MovementKind,
    pub qty_change: Decimal,
    pub reference: Reference,
    pub moved_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// One (sale line item, batch) pairing. `cost_per_unit` is frozen at
/// allocation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesItemAllocation {
    pub id: Uuid,
    pub sales_order_item_id: Uuid,
    pub batch_id: Uuid,
    pub qty_deducted: Decimal,
    pub cost_per_unit: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub entry_number: String,
    pub entry_date: NaiveDate,
    pub reference: Reference,
    pub memo: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalItem {
    pub id: Uuid,
    pub journal_entry_id: Uuid,
    pub account_id: Uuid,
    pub debit: Decimal,
    pub credit: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostedEntry {
    pub entry: JournalEntry,
    pub items: Vec<JournalItem>,
}

impl PostedEntry {
    pub fn totals(&self) -> (Decimal, Decimal) {
        self.items.iter().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(debits, credits), item| (debits + item.debit, credits + item.credit),
        )
    }
}

/// Basis for spreading shared shipment cost heads across line items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApportionBasis {
    /// received_qty x unit weight; requires a weight on every line.
    Weight,
    /// received_qty x converted unit price.
    Value,
}

impl ApportionBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weight => "weight",
            Self::Value => "value",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Valuation {
    pub quantity: Decimal,
    pub total_value: Decimal,
}

/// Result of comparing ledger-derived and batch-derived quantity for one
/// (variant, warehouse). Mismatches are reported, never auto-corrected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconciliation {
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub ledger_qty: Decimal,
    pub batch_qty: Decimal,
}

impl Reconciliation {
    pub fn is_balanced(&self) -> bool {
        self.ledger_qty == self.batch_qty
    }

    pub fn verify(&self) -> Result<(), CoreError> {
        if self.is_balanced() {
            Ok(())
        } else {
            Err(CoreError::ReconciliationMismatch {
                variant: self.product_variant_id,
                warehouse: self.warehouse_id,
                ledger_qty: self.ledger_qty,
                batch_qty: self.batch_qty,
            })
        }
    }
}
