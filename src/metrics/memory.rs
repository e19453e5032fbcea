//! In-memory metrics store with a periodic summary log line.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use super::{average_fee, FeeKind, MetricOutcome, MetricRecord, MetricsError, MetricsStore};

/// Default summary interval
pub const DEFAULT_SUMMARY_INTERVAL_MS: u64 = 60_000;

/// Counts reported by the periodic summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub forwarded: usize,
    pub errors: usize,
    pub total: usize,
    pub avg_gas_price: Option<f64>,
    pub avg_fee_per_gas: Option<f64>,
}

/// Keeps every saved record for the lifetime of the process
pub struct InMemoryMetricsStore {
    records: Arc<Mutex<Vec<MetricRecord>>>,
    summary_interval: Duration,
    summary_task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for InMemoryMetricsStore {
    fn default() -> Self {
        Self::with_summary_interval(Duration::from_millis(DEFAULT_SUMMARY_INTERVAL_MS))
    }
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_summary_interval(summary_interval: Duration) -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            summary_interval,
            summary_task: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every saved record
    pub fn records(&self) -> Vec<MetricRecord> {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Outcome counts for one UTC day plus overall totals
    pub fn summary(&self, day: NaiveDate) -> MetricsSummary {
        summarize(&self.records.lock().unwrap_or_else(|p| p.into_inner()), day)
    }
}

fn record_day(record: &MetricRecord) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(record.timestamp as i64).map(|dt| dt.date_naive())
}

fn summarize(records: &[MetricRecord], day: NaiveDate) -> MetricsSummary {
    let mut summary = MetricsSummary {
        total: records.len(),
        avg_gas_price: average_fee(records.iter(), FeeKind::GasPrice),
        avg_fee_per_gas: average_fee(records.iter(), FeeKind::FeePerGas),
        ..Default::default()
    };

    for record in records.iter().filter(|r| record_day(r) == Some(day)) {
        match record.outcome {
            MetricOutcome::Accepted => summary.accepted += 1,
            MetricOutcome::Rejected => summary.rejected += 1,
            MetricOutcome::Forwarded => summary.forwarded += 1,
            MetricOutcome::Error => summary.errors += 1,
            MetricOutcome::Unknown => {}
        }
    }
    summary
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn init(&self) -> Result<(), MetricsError> {
        let records = Arc::clone(&self.records);
        let period = self.summary_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let summary = {
                    let records = records.lock().unwrap_or_else(|p| p.into_inner());
                    summarize(&records, Utc::now().date_naive())
                };
                info!(
                    accepted = summary.accepted,
                    rejected = summary.rejected,
                    forwarded = summary.forwarded,
                    errors = summary.errors,
                    all = summary.total,
                    avg_gas_price = ?summary.avg_gas_price,
                    avg_fee_per_gas = ?summary.avg_fee_per_gas,
                    "Transaction processing daily summary"
                );
            }
        });

        if let Some(previous) = self
            .summary_task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(handle)
        {
            previous.abort();
        }
        Ok(())
    }

    async fn save(&self, batch: Vec<MetricRecord>) -> Result<(), MetricsError> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(batch);
        Ok(())
    }

    async fn avg_gas_price(&self) -> Result<Option<f64>, MetricsError> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(average_fee(records.iter(), FeeKind::GasPrice))
    }

    async fn avg_fee_per_gas(&self) -> Result<Option<f64>, MetricsError> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(average_fee(records.iter(), FeeKind::FeePerGas))
    }

    async fn close(&self) -> Result<(), MetricsError> {
        if let Some(handle) = self
            .summary_task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
        Ok(())
    }
}
