use anyhow::Result;
use redis::{AsyncCommands, Client};
use serde::Serialize;

use crate::contracts::{
    ReconciliationAlert, STOCK_ALERTS_CHANNEL, STOCK_MOVEMENTS_CHANNEL, StockMovedEvent,
};

/// The stock event bus. Publishing goes through the typed helpers so every
/// producer agrees on channel and payload shape; subscribers take the raw
/// client and the channel constants.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn publish_movement(&self, event: &StockMovedEvent) -> Result<()> {
        self.publish_json(STOCK_MOVEMENTS_CHANNEL, event).await
    }

    pub async fn publish_alert(&self, alert: &ReconciliationAlert) -> Result<()> {
        self.publish_json(STOCK_ALERTS_CHANNEL, alert).await
    }

    async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let _: i64 = connection.publish(channel, serialized).await?;
        Ok(())
    }
}
