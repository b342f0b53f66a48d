use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        requested: Decimal,
        available: Decimal,
    },

    #[error("batch {batch_id} holds {remaining}, cannot deduct {requested}")]
    InsufficientBatchQuantity {
        batch_id: Uuid,
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("batch {batch_id} capacity is {capacity}, increment of {requested} rejected")]
    OverCapacity {
        batch_id: Uuid,
        requested: Decimal,
        capacity: Decimal,
    },

    #[error("journal entry does not balance: debits {debits}, credits {credits}")]
    UnbalancedEntry { debits: Decimal, credits: Decimal },

    #[error(
        "ledger and batches disagree for variant {variant} at warehouse {warehouse}: ledger {ledger_qty}, batches {batch_qty}"
    )]
    ReconciliationMismatch {
        variant: Uuid,
        warehouse: Uuid,
        ledger_qty: Decimal,
        batch_qty: Decimal,
    },

    #[error("{0} not found: {1}")]
    NotFound(&'static str, Uuid),

    #[error("storage conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
