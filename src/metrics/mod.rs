//! Metrics Collection
//!
//! Non-blocking collection of per-call outcomes. Records are queued in memory
//! and a background timer hands them to a persistence backend one batch per
//! tick.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::transaction::TransactionPayload;

pub use memory::InMemoryMetricsStore;
pub use redis_store::RedisMetricsStore;

/// Default flush interval
pub const DEFAULT_INTERVAL_MS: u64 = 10_000;

/// Default number of records saved per tick
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Fewest samples an average is reported for
pub const MIN_FEE_SAMPLES: usize = 5;

/// Most recent samples an average is computed over
pub const MAX_FEE_SAMPLES: usize = 30;

/// Errors that can occur while persisting metrics
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What happened to a JSON-RPC call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricOutcome {
    Forwarded,
    Accepted,
    Rejected,
    Error,
    Unknown,
}

/// One collected metric
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub json_rpc_id: Option<Value>,
    pub json_rpc_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionPayload>,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    pub outcome: MetricOutcome,
    /// Validator message of a rejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MetricRecord {
    pub fn new(
        json_rpc_id: Option<Value>,
        json_rpc_method: impl Into<String>,
        transaction: Option<TransactionPayload>,
        outcome: MetricOutcome,
    ) -> Self {
        Self {
            json_rpc_id,
            json_rpc_method: json_rpc_method.into(),
            transaction,
            timestamp: current_timestamp_millis(),
            outcome,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Serialize the record to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Which fee field an average is taken over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeKind {
    /// `gasPrice` of legacy-priced transactions
    GasPrice,
    /// `maxFeePerGas` of transactions without `gasPrice`
    FeePerGas,
}

impl FeeKind {
    fn sample(&self, tx: &TransactionPayload) -> Option<f64> {
        let raw = match self {
            FeeKind::GasPrice => tx.gas_price.as_deref(),
            FeeKind::FeePerGas if tx.gas_price.is_none() => tx.max_fee_per_gas.as_deref(),
            FeeKind::FeePerGas => None,
        }?;
        raw.parse::<f64>().ok()
    }
}

/// Average fee over the most recent matching records
///
/// # Arguments
/// * `records` - Records in insertion order, oldest first
/// * `kind` - Fee field to average
///
/// # Returns
/// `None` when fewer than `MIN_FEE_SAMPLES` records carry the field
pub fn average_fee<'a, I>(records: I, kind: FeeKind) -> Option<f64>
where
    I: DoubleEndedIterator<Item = &'a MetricRecord>,
{
    let samples: Vec<f64> = records
        .rev()
        .filter_map(|record| record.transaction.as_ref())
        .filter_map(|tx| kind.sample(tx))
        .take(MAX_FEE_SAMPLES)
        .collect();

    if samples.len() < MIN_FEE_SAMPLES {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// Persistence backend for collected metrics
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn init(&self) -> Result<(), MetricsError>;

    async fn save(&self, batch: Vec<MetricRecord>) -> Result<(), MetricsError>;

    async fn avg_gas_price(&self) -> Result<Option<f64>, MetricsError>;

    async fn avg_fee_per_gas(&self) -> Result<Option<f64>, MetricsError>;

    async fn close(&self) -> Result<(), MetricsError>;
}

/// Configuration for the flush timer
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub interval: Duration,
    pub batch_size: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Queue in front of a metrics store
pub struct MetricsCollector {
    store: Arc<dyn MetricsStore>,
    queue: Arc<Mutex<VecDeque<MetricRecord>>>,
    config: CollectorConfig,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl MetricsCollector {
    pub fn new(store: Arc<dyn MetricsStore>, config: CollectorConfig) -> Self {
        Self {
            store,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            config,
            timer: Mutex::new(None),
        }
    }

    /// Enqueue a record; never waits on the backend
    pub fn collect(&self, record: MetricRecord) {
        self.queue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(record);
    }

    /// Number of records waiting to be saved
    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Initialize the backend and start the flush timer
    pub async fn init(&self) -> Result<(), MetricsError> {
        self.store.init().await?;

        let store = Arc::clone(&self.store);
        let queue = Arc::clone(&self.queue);
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.interval);
            // first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = flush_batch(&queue, store.as_ref(), config.batch_size).await {
                    error!(error = %e, "Failed to save metrics batch");
                }
            }
        });

        if let Some(previous) = self.timer.lock().unwrap_or_else(|p| p.into_inner()).replace(handle) {
            previous.abort();
        }
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Metrics collector started"
        );
        Ok(())
    }

    /// Save at most one batch now
    ///
    /// # Returns
    /// The number of records handed to the backend
    pub async fn flush_once(&self) -> Result<usize, MetricsError> {
        flush_batch(&self.queue, self.store.as_ref(), self.config.batch_size).await
    }

    /// Stop the timer and save whatever is still queued
    pub async fn close(&self) -> Result<(), MetricsError> {
        if let Some(handle) = self.timer.lock().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
        }

        loop {
            match self.flush_once().await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, dropped = self.queued(), "Final metrics flush failed");
                    self.queue.lock().unwrap_or_else(|p| p.into_inner()).clear();
                    break;
                }
            }
        }

        self.store.close().await
    }

    /// Average `gasPrice` of recent legacy transactions
    pub async fn avg_gas_price(&self) -> Option<f64> {
        self.store.avg_gas_price().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read average gas price");
            None
        })
    }

    /// Average `maxFeePerGas` of recent EIP-1559 transactions
    pub async fn avg_fee_per_gas(&self) -> Option<f64> {
        self.store.avg_fee_per_gas().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read average fee per gas");
            None
        })
    }
}

async fn flush_batch(
    queue: &Mutex<VecDeque<MetricRecord>>,
    store: &dyn MetricsStore,
    batch_size: usize,
) -> Result<usize, MetricsError> {
    let batch: Vec<MetricRecord> = {
        let mut queue = queue.lock().unwrap_or_else(|p| p.into_inner());
        let count = batch_size.min(queue.len());
        queue.drain(..count).collect()
    };
    if batch.is_empty() {
        return Ok(0);
    }

    let count = batch.len();
    store.save(batch).await?;
    debug!(count, "Saved metrics batch");
    Ok(count)
}
