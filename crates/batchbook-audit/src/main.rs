//! Reconciliation watchdog. Listens for committed stock movements and
//! re-checks the ledger-versus-batches invariant for the touched variant and
//! warehouse; a mismatch is raised as an alert, never silently dropped.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use redis::Msg;
use tracing::{error, info};

use batchbook_core::{AssumeExists, CostingStore, StandardProfile};
use batchbook_pg::PgStore;
use batchbook_platform::{
    ReconciliationAlert, RedisBus, STOCK_MOVEMENTS_CHANNEL, ServiceConfig, StockMovedEvent,
    connect_database,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "batchbook_audit=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let pool = connect_database(&config).await?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let store = PgStore::new(
        pool,
        Arc::new(StandardProfile::default()),
        Arc::new(AssumeExists),
    );

    let mut pubsub = redis.client().get_async_pubsub().await?;
    pubsub.subscribe(STOCK_MOVEMENTS_CHANNEL).await?;
    let mut messages = pubsub.on_message();

    info!("audit worker subscribed to {STOCK_MOVEMENTS_CHANNEL}");

    loop {
        let msg = messages
            .next()
            .await
            .context("stock movement stream ended unexpectedly")?;
        if let Err(err) = handle_message(&store, &redis, msg).await {
            error!("failed to process message: {err:#}");
        }
    }
}

async fn handle_message(store: &PgStore, redis: &RedisBus, msg: Msg) -> Result<()> {
    let payload: String = msg.get_payload()?;
    let event: StockMovedEvent = serde_json::from_str(&payload)?;

    let report = store
        .check_reconciliation(event.product_variant_id, event.warehouse_id)
        .await?;
    if report.is_balanced() {
        info!(
            variant = %event.product_variant_id,
            warehouse = %event.warehouse_id,
            operation = %event.operation,
            "reconciliation holds"
        );
        return Ok(());
    }

    error!(
        variant = %event.product_variant_id,
        warehouse = %event.warehouse_id,
        ledger_qty = %report.ledger_qty,
        batch_qty = %report.batch_qty,
        "reconciliation mismatch detected"
    );
    let alert = ReconciliationAlert {
        product_variant_id: event.product_variant_id,
        warehouse_id: event.warehouse_id,
        ledger_qty: report.ledger_qty,
        batch_qty: report.batch_qty,
        detected_at: Utc::now(),
    };
    redis.publish_alert(&alert).await?;

    Ok(())
}
