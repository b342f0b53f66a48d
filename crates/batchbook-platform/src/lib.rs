pub mod config;
pub mod contracts;
pub mod db;
pub mod redis_bus;

pub use config::ServiceConfig;
pub use contracts::{
    AdjustStockRequest, AllocateRequest, AllocateResponse, AllocationLine, MovementResponse,
    MovementRow, OpeningStockRequest, OpeningStockResponse, ReceiveShipmentRequest,
    ReceiveShipmentResponse, ReceivedBatch, ReconciliationAlert, ReconciliationResponse,
    ReturnInRequest, STOCK_ALERTS_CHANNEL, STOCK_MOVEMENTS_CHANNEL, ShipmentItemRequest,
    StockMovedEvent, TransferRequest, ValuationResponse,
};
pub use db::{connect_database, run_migrations};
pub use redis_bus::RedisBus;
