pub mod accounts;
pub mod error;
pub mod models;
pub mod store;

pub use accounts::{Account, AccountKind, AccountRole, AccountsProfile, StandardProfile};
pub use error::CoreError;
pub use models::{
    ApportionBasis, InventoryBatch, JournalEntry, JournalItem, MovementKind, PostedEntry,
    Reconciliation, Reference, SalesItemAllocation, StockLedgerEntry, Valuation,
};
pub use store::{
    AdjustStock, AllocateForSale, AssumeExists, CostingStore, ExistenceCheck, OpeningStock,
    ReturnIn, SaleAllocation, ShipmentHeader, ShipmentItem, ShipmentReceipt, TransferStock,
};
