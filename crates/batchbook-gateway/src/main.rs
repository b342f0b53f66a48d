use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use batchbook_core::{
    AdjustStock, AllocateForSale, AssumeExists, CoreError, CostingStore, OpeningStock, ReturnIn,
    ShipmentHeader, ShipmentItem, StandardProfile, TransferStock,
};
use batchbook_pg::PgStore;
use batchbook_platform::{
    AdjustStockRequest, AllocateRequest, AllocateResponse, AllocationLine, MovementResponse,
    MovementRow, OpeningStockRequest, OpeningStockResponse, ReceiveShipmentRequest,
    ReceiveShipmentResponse, ReceivedBatch, ReconciliationResponse, RedisBus, ReturnInRequest,
    ServiceConfig, ShipmentItemRequest, StockMovedEvent, TransferRequest, ValuationResponse,
    connect_database, run_migrations,
};

const ALLOCATE_RETRY_LIMIT: u32 = 3;

#[derive(Clone)]
struct AppState {
    store: Arc<PgStore>,
    redis: RedisBus,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "batchbook_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config).await?;
    run_migrations(&pool).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let store = Arc::new(PgStore::new(
        pool,
        Arc::new(StandardProfile::default()),
        Arc::new(AssumeExists),
    ));
    store.ensure_accounts().await?;

    let state = AppState { store, redis };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/opening-stock", post(seed_opening_stock))
        .route("/allocations", post(allocate))
        .route("/shipments/receipts", post(receive_shipment))
        .route("/adjustments", post(adjust_stock))
        .route("/returns", post(record_return))
        .route("/transfers", post(transfer_stock))
        .route("/valuation/{variant_id}", get(valuation))
        .route(
            "/reconciliation/{variant_id}/{warehouse_id}",
            get(reconciliation),
        )
        .route("/batches/{variant_id}/{warehouse_id}", get(batches))
        .route("/movements/{variant_id}/{warehouse_id}", get(movements))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

fn map_core_error(err: CoreError) -> (StatusCode, String) {
    let status = match &err {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound(..) => StatusCode::NOT_FOUND,
        CoreError::InsufficientStock { .. }
        | CoreError::InsufficientBatchQuantity { .. }
        | CoreError::OverCapacity { .. }
        | CoreError::Conflict(_) => StatusCode::CONFLICT,
        CoreError::UnbalancedEntry { .. }
        | CoreError::ReconciliationMismatch { .. }
        | CoreError::Storage(_) => {
            error!("request failed: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

/// Fire-and-log: a lost event never rolls back a committed operation.
async fn announce_movement(
    redis: &RedisBus,
    variant_id: Uuid,
    warehouse_id: Uuid,
    operation: &str,
    reference_id: Uuid,
) {
    let event = StockMovedEvent {
        product_variant_id: variant_id,
        warehouse_id,
        operation: operation.to_string(),
        reference_id,
        occurred_at: Utc::now(),
    };
    if let Err(err) = redis.publish_movement(&event).await {
        error!("failed to publish stock movement event: {err:#}");
    }
}

async fn seed_opening_stock(
    State(state): State<AppState>,
    Json(payload): Json<OpeningStockRequest>,
) -> Result<Json<OpeningStockResponse>, (StatusCode, String)> {
    let batch = state
        .store
        .seed_opening_stock(OpeningStock {
            product_variant_id: payload.product_variant_id,
            warehouse_id: payload.warehouse_id,
            batch_no: payload.batch_no,
            unit_cost: payload.unit_cost,
            qty: payload.qty,
            moved_on: payload.moved_on,
        })
        .await
        .map_err(map_core_error)?;

    announce_movement(
        &state.redis,
        batch.product_variant_id,
        batch.warehouse_id,
        "opening_stock",
        batch.id,
    )
    .await;

    Ok(Json(OpeningStockResponse {
        batch_id: batch.id,
        qty: batch.initial_qty,
        unit_cost: batch.cost_price,
    }))
}

async fn allocate(
    State(state): State<AppState>,
    Json(payload): Json<AllocateRequest>,
) -> Result<Json<AllocateResponse>, (StatusCode, String)> {
    let request = AllocateForSale {
        product_variant_id: payload.product_variant_id,
        warehouse_id: payload.warehouse_id,
        qty: payload.qty,
        sales_order_item_id: payload.sales_order_item_id,
        unit_sale_price: payload.unit_sale_price,
        moved_on: payload.moved_on,
    };

    // Contended rows surface as Conflict; retry before giving up.
    let mut attempt = 0;
    let allocation = loop {
        attempt += 1;
        match state.store.allocate_for_sale(request.clone()).await {
            Ok(allocation) => break allocation,
            Err(CoreError::Conflict(reason)) if attempt < ALLOCATE_RETRY_LIMIT => {
                warn!(
                    sales_order_item_id = %request.sales_order_item_id,
                    attempt,
                    "allocation conflict, retrying: {reason}"
                );
            }
            Err(err) => return Err(map_core_error(err)),
        }
    };

    announce_movement(
        &state.redis,
        request.product_variant_id,
        request.warehouse_id,
        "sale_out",
        request.sales_order_item_id,
    )
    .await;

    Ok(Json(AllocateResponse {
        sales_order_item_id: request.sales_order_item_id,
        allocations: allocation
            .allocations
            .iter()
            .map(|line| AllocationLine {
                batch_id: line.batch_id,
                qty: line.qty_deducted,
                cost_per_unit: line.cost_per_unit,
            })
            .collect(),
        total_cost: allocation.total_cost,
    }))
}

fn shipment_item(payload: ShipmentItemRequest) -> ShipmentItem {
    ShipmentItem {
        id: payload.id,
        product_variant_id: payload.product_variant_id,
        warehouse_id: payload.warehouse_id,
        batch_no: payload.batch_no,
        unit_price: payload.unit_price,
        ordered_qty: payload.ordered_qty,
        received_qty: payload.received_qty,
        lost_qty: payload.lost_qty,
        unit_weight_kg: payload.unit_weight_kg,
        extra_cost: payload.extra_cost,
        manufactured_on: payload.manufactured_on,
        expires_on: payload.expires_on,
    }
}

async fn receive_shipment(
    State(state): State<AppState>,
    Json(payload): Json<ReceiveShipmentRequest>,
) -> Result<Json<ReceiveShipmentResponse>, (StatusCode, String)> {
    let header = ShipmentHeader {
        shipment_id: payload.shipment_id,
        exchange_rate: payload.exchange_rate,
        basis: payload.basis,
        international_shipping: payload.international_shipping,
        local_shipping: payload.local_shipping,
        misc_cost: payload.misc_cost,
        received_on: payload.received_on,
    };
    let items: Vec<ShipmentItem> = payload.items.into_iter().map(shipment_item).collect();

    let receipt = state
        .store
        .receive_shipment(header, items)
        .await
        .map_err(map_core_error)?;

    for batch in &receipt.batches_created {
        announce_movement(
            &state.redis,
            batch.product_variant_id,
            batch.warehouse_id,
            "purchase_in",
            payload.shipment_id,
        )
        .await;
    }

    Ok(Json(ReceiveShipmentResponse {
        shipment_id: payload.shipment_id,
        batches: receipt
            .batches_created
            .iter()
            .map(|batch| ReceivedBatch {
                batch_id: batch.id,
                product_variant_id: batch.product_variant_id,
                warehouse_id: batch.warehouse_id,
                batch_no: batch.batch_no.clone(),
                qty: batch.initial_qty,
                unit_cost: batch.cost_price,
            })
            .collect(),
        total_landed_cost: receipt.total_landed_cost,
        skipped_lines: receipt.skipped_lines,
    }))
}

async fn adjust_stock(
    State(state): State<AppState>,
    Json(payload): Json<AdjustStockRequest>,
) -> Result<Json<MovementResponse>, (StatusCode, String)> {
    let entries = state
        .store
        .adjust_stock(AdjustStock {
            product_variant_id: payload.product_variant_id,
            warehouse_id: payload.warehouse_id,
            batch_id: payload.batch_id,
            qty_delta: payload.qty_delta,
            unit_cost: payload.unit_cost,
            batch_no: payload.batch_no,
            reason: payload.reason,
            adjustment_id: payload.adjustment_id,
            moved_on: payload.moved_on,
        })
        .await
        .map_err(map_core_error)?;

    announce_movement(
        &state.redis,
        payload.product_variant_id,
        payload.warehouse_id,
        "adjustment",
        payload.adjustment_id,
    )
    .await;

    Ok(Json(movement_response(&entries)))
}

async fn record_return(
    State(state): State<AppState>,
    Json(payload): Json<ReturnInRequest>,
) -> Result<Json<MovementResponse>, (StatusCode, String)> {
    let entry = state
        .store
        .record_return_in(ReturnIn {
            batch_id: payload.batch_id,
            qty: payload.qty,
            sales_order_item_id: payload.sales_order_item_id,
            moved_on: payload.moved_on,
        })
        .await
        .map_err(map_core_error)?;

    announce_movement(
        &state.redis,
        entry.product_variant_id,
        entry.warehouse_id,
        "return_in",
        payload.sales_order_item_id,
    )
    .await;

    Ok(Json(movement_response(std::slice::from_ref(&entry))))
}

async fn transfer_stock(
    State(state): State<AppState>,
    Json(payload): Json<TransferRequest>,
) -> Result<Json<MovementResponse>, (StatusCode, String)> {
    let entries = state
        .store
        .transfer_stock(TransferStock {
            product_variant_id: payload.product_variant_id,
            from_warehouse_id: payload.from_warehouse_id,
            to_warehouse_id: payload.to_warehouse_id,
            qty: payload.qty,
            transfer_id: payload.transfer_id,
            moved_on: payload.moved_on,
        })
        .await
        .map_err(map_core_error)?;

    for warehouse_id in [payload.from_warehouse_id, payload.to_warehouse_id] {
        announce_movement(
            &state.redis,
            payload.product_variant_id,
            warehouse_id,
            "transfer",
            payload.transfer_id,
        )
        .await;
    }

    Ok(Json(movement_response(&entries)))
}

fn movement_response(entries: &[batchbook_core::StockLedgerEntry]) -> MovementResponse {
    MovementResponse {
        entries: entries
            .iter()
            .map(|entry| MovementRow {
                entry_id: entry.id,
                batch_id: entry.batch_id,
                kind: entry.kind.as_str().to_string(),
                qty_change: entry.qty_change,
            })
            .collect(),
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ValuationQuery {
    warehouse_id: Option<Uuid>,
}

async fn valuation(
    State(state): State<AppState>,
    Path(variant_id): Path<Uuid>,
    Query(query): Query<ValuationQuery>,
) -> Result<Json<ValuationResponse>, (StatusCode, String)> {
    let valuation = state
        .store
        .current_valuation(variant_id, query.warehouse_id)
        .await
        .map_err(map_core_error)?;

    Ok(Json(ValuationResponse {
        product_variant_id: variant_id,
        warehouse_id: query.warehouse_id,
        quantity: valuation.quantity,
        total_value: valuation.total_value,
    }))
}

async fn reconciliation(
    State(state): State<AppState>,
    Path((variant_id, warehouse_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ReconciliationResponse>, (StatusCode, String)> {
    let report = state
        .store
        .check_reconciliation(variant_id, warehouse_id)
        .await
        .map_err(map_core_error)?;

    Ok(Json(ReconciliationResponse::from(report)))
}

async fn batches(
    State(state): State<AppState>,
    Path((variant_id, warehouse_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<batchbook_core::InventoryBatch>>, (StatusCode, String)> {
    let batches = state
        .store
        .allocatable_batches(variant_id, warehouse_id)
        .await
        .map_err(map_core_error)?;
    Ok(Json(batches))
}

async fn movements(
    State(state): State<AppState>,
    Path((variant_id, warehouse_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<batchbook_core::StockLedgerEntry>>, (StatusCode, String)> {
    let entries = state
        .store
        .ledger_entries(variant_id, warehouse_id)
        .await
        .map_err(map_core_error)?;
    Ok(Json(entries))
}
