//! Redis Metrics Store
//!
//! Appends each metric record as JSON to a Redis list and publishes it on a
//! pub/sub channel for live dashboards.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info};

use super::{average_fee, FeeKind, MetricRecord, MetricsError, MetricsStore, MAX_FEE_SAMPLES};

/// Default Redis list holding every record
pub const DEFAULT_LIST_KEY: &str = "tx_firewall:metrics";

/// Default pub/sub channel for live records
pub const DEFAULT_CHANNEL: &str = "tx_firewall_metrics";

/// How many of the newest records are scanned for fee averages
const AVERAGE_WINDOW: isize = (MAX_FEE_SAMPLES * 10) as isize;

/// Redis-backed metrics store
pub struct RedisMetricsStore {
    connection: MultiplexedConnection,
    list_key: String,
    channel: String,
}

impl RedisMetricsStore {
    /// Create a store on an established connection
    ///
    /// # Arguments
    /// * `connection` - An established Redis multiplexed connection
    /// * `list_key` - List the records are appended to
    /// * `channel` - The pub/sub channel name to publish to
    pub fn new(
        connection: MultiplexedConnection,
        list_key: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            list_key: list_key.into(),
            channel: channel.into(),
        }
    }

    /// Connect to `url` and use the default key and channel
    pub async fn connect(url: &str) -> Result<Self, MetricsError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(connection, DEFAULT_LIST_KEY, DEFAULT_CHANNEL))
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn list_key(&self) -> &str {
        &self.list_key
    }

    async fn recent_records(&self) -> Result<Vec<MetricRecord>, MetricsError> {
        let mut connection = self.connection.clone();
        let raw: Vec<String> = connection
            .lrange(&self.list_key, -AVERAGE_WINDOW, -1)
            .await?;
        // skip entries written by other producers
        Ok(raw
            .iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect())
    }
}

#[async_trait]
impl MetricsStore for RedisMetricsStore {
    async fn init(&self) -> Result<(), MetricsError> {
        let mut connection = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        info!(list = %self.list_key, channel = %self.channel, "Connected to Redis metrics backend");
        Ok(())
    }

    async fn save(&self, batch: Vec<MetricRecord>) -> Result<(), MetricsError> {
        if batch.is_empty() {
            return Ok(());
        }
        let payloads = batch
            .iter()
            .map(MetricRecord::to_json)
            .collect::<Result<Vec<_>, _>>()?;

        let mut pipe = redis::pipe();
        pipe.rpush(&self.list_key, &payloads).ignore();
        for payload in &payloads {
            pipe.publish(&self.channel, payload).ignore();
        }

        let mut connection = self.connection.clone();
        let _: () = pipe.query_async(&mut connection).await?;
        debug!(count = payloads.len(), "Saved metrics to Redis");
        Ok(())
    }

    async fn avg_gas_price(&self) -> Result<Option<f64>, MetricsError> {
        let records = self.recent_records().await?;
        Ok(average_fee(records.iter(), FeeKind::GasPrice))
    }

    async fn avg_fee_per_gas(&self) -> Result<Option<f64>, MetricsError> {
        let records = self.recent_records().await?;
        Ok(average_fee(records.iter(), FeeKind::FeePerGas))
    }

    async fn close(&self) -> Result<(), MetricsError> {
        Ok(())
    }
}
