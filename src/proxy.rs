//! Validating Proxy
//!
//! HTTP front end for the JSON-RPC node. Every `eth_sendRawTransaction` in a
//! request (single or batch) is decoded, enriched and validated before the
//! original body is forwarded; the first rejection answers the whole request
//! with a synthetic error envelope.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::address_book::ConfigError;
use crate::builder::TransactionBuilder;
use crate::jsonrpc::{
    as_request, element_id, element_method, rejection_envelope, RpcBody, SEND_RAW_TRANSACTION,
};
use crate::metrics::{MetricOutcome, MetricRecord, MetricsCollector};
use crate::transaction::{EnrichedTransaction, FeeStatistics, TransactionPayload};
use crate::upstream::Upstream;
use crate::validator::{TransactionValidator, ValidatorError};

/// Default proxy listening port
pub const DEFAULT_PROXY_PORT: u16 = 18545;

/// Default multiple of the average fee flagged as high
pub const DEFAULT_HIGH_FEE_FACTOR: f64 = 2.0;

/// Method name recorded for elements that carry none
const UNKNOWN_METHOD: &str = "unknown";

/// Errors raised by a configuration reload
#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("Address book reload failed: {0}")]
    AddressBook(#[from] ConfigError),

    #[error("Validator reload failed: {0}")]
    Validator(#[from] ValidatorError),
}

/// What to do with an inspected request body
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Send the original body upstream
    Forward {
        transactions: usize,
        /// Indices of elements forwarded without a transaction
        passthrough: Vec<usize>,
    },
    /// Answer with this envelope and forward nothing
    Reject(Value),
}

/// A request element carrying a transaction
struct Extracted {
    index: usize,
    method: String,
    tx: EnrichedTransaction,
}

/// The firewall proxy
pub struct ValidatingProxy {
    builder: TransactionBuilder,
    validator: Arc<dyn TransactionValidator>,
    collector: Option<Arc<MetricsCollector>>,
    upstream: Upstream,
    high_fee_factor: f64,
}

impl ValidatingProxy {
    pub fn new(
        builder: TransactionBuilder,
        validator: Arc<dyn TransactionValidator>,
        upstream: Upstream,
    ) -> Self {
        Self {
            builder,
            validator,
            collector: None,
            upstream,
            high_fee_factor: DEFAULT_HIGH_FEE_FACTOR,
        }
    }

    /// Record outcomes and attach fee statistics through `collector`
    pub fn with_metrics(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn with_high_fee_factor(mut self, factor: f64) -> Self {
        self.high_fee_factor = factor;
        self
    }

    pub fn validator(&self) -> &Arc<dyn TransactionValidator> {
        &self.validator
    }

    /// Router answering every path and method through the pipeline
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(proxy_handler).with_state(self)
    }

    /// Serve on `listener` until `shutdown` resolves
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(%addr, upstream = %self.upstream.endpoint(), "Validating proxy listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }

    /// Bind `0.0.0.0:port` and serve until `shutdown` resolves
    pub async fn listen<F>(self: Arc<Self>, port: u16, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
        self.serve(listener, shutdown).await
    }

    /// Re-read the address book and the validator's own configuration
    ///
    /// On failure the previous snapshots stay in effect.
    pub async fn reload_config(&self) -> Result<(), ReloadError> {
        let book = self.builder.prepare_reload()?;
        let staged = self.validator.prepare_reload().await?;

        self.builder.commit_reload(book);
        self.validator.commit_reload(staged);
        info!(mode = %self.validator.mode(), "Configuration reloaded");
        Ok(())
    }

    /// Handle one inbound HTTP request
    pub async fn handle(&self, method: Method, headers: HeaderMap, body: Bytes) -> Response {
        if method == Method::OPTIONS || body.is_empty() {
            return self.forward(method, &headers, body, &[], &[]).await;
        }

        let parsed = match RpcBody::parse(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Request body is not valid JSON");
                self.record(None, UNKNOWN_METHOD, None, MetricOutcome::Error);
                return Json(rejection_envelope(None, None)).into_response();
            }
        };

        match self.inspect(&parsed).await {
            Verdict::Reject(envelope) => Json(envelope).into_response(),
            Verdict::Forward {
                transactions,
                passthrough,
            } => {
                debug!(transactions, elements = parsed.elements().len(), "Forwarding request");
                self.forward(method, &headers, body, parsed.elements(), &passthrough)
                    .await
            }
        }
    }

    /// Run extraction and validation over a parsed body
    ///
    /// Records `accepted`, `rejected` and `error` metrics along the way.
    /// Elements without a transaction are recorded once the upstream answers.
    pub async fn inspect(&self, body: &RpcBody) -> Verdict {
        let elements = body.elements();

        let mut extracted = Vec::new();
        for (index, element) in elements.iter().enumerate() {
            if element_method(element).as_deref() != Some(SEND_RAW_TRANSACTION) {
                continue;
            }
            let Some(request) = as_request(element) else {
                let id = element_id(element);
                warn!(?id, "Malformed eth_sendRawTransaction call");
                self.record(id.clone(), SEND_RAW_TRANSACTION, None, MetricOutcome::Error);
                return Verdict::Reject(rejection_envelope(id.as_ref(), None));
            };
            match self.builder.from_json_rpc_request(&request) {
                Ok(Some(tx)) => extracted.push(Extracted {
                    index,
                    method: request.method,
                    tx,
                }),
                Ok(None) => {}
                Err(e) => {
                    error!(method = %request.method, error = %e, "Failed to build transaction");
                    self.record(request.id.clone(), &request.method, None, MetricOutcome::Error);
                    return Verdict::Reject(rejection_envelope(request.id.as_ref(), None));
                }
            }
        }

        for entry in extracted.iter_mut() {
            let method = &entry.method;
            let tx = &mut entry.tx;
            self.attach_fee_stats(tx).await;
            let payload = Some(tx.payload());
            let tx_id = tx.id();

            match self.validator.validate(tx).await {
                Ok(()) => {
                    debug!(%tx_id, "Transaction accepted");
                    self.record(tx.json_rpc_id.clone(), method, payload, MetricOutcome::Accepted);
                }
                Err(ValidatorError::Rejected(rejection)) => {
                    info!(%tx_id, reason = %rejection.reason, "Transaction rejected");
                    self.collect(
                        MetricRecord::new(tx.json_rpc_id.clone(), method, payload, MetricOutcome::Rejected)
                            .with_reason(rejection.reason.as_str()),
                    );
                    return Verdict::Reject(rejection_envelope(
                        tx.json_rpc_id.as_ref(),
                        Some(&rejection.reason),
                    ));
                }
                Err(e) => {
                    error!(%tx_id, error = %e, "Transaction validation failed");
                    self.record(tx.json_rpc_id.clone(), method, payload, MetricOutcome::Error);
                    return Verdict::Reject(rejection_envelope(tx.json_rpc_id.as_ref(), None));
                }
            }
        }

        let passthrough = (0..elements.len())
            .filter(|index| !extracted.iter().any(|e| e.index == *index))
            .collect();
        Verdict::Forward {
            transactions: extracted.len(),
            passthrough,
        }
    }

    async fn attach_fee_stats(&self, tx: &mut EnrichedTransaction) {
        let Some(collector) = &self.collector else {
            return;
        };
        let avg_gas_price = collector.avg_gas_price().await;
        let avg_fee_per_gas = collector.avg_fee_per_gas().await;
        let stats = FeeStatistics::evaluate(
            &tx.decoded.pricing,
            avg_gas_price,
            avg_fee_per_gas,
            self.high_fee_factor,
        );
        if stats.high_fee {
            warn!(tx_id = %tx.id(), ?avg_gas_price, ?avg_fee_per_gas, "Transaction fee is abnormally high");
        }
        tx.fee_stats = Some(stats);
    }

    /// Send the body upstream and record the non-transaction elements
    ///
    /// On upstream failure every element is recorded as `error`.
    async fn forward(
        &self,
        method: Method,
        headers: &HeaderMap,
        body: Bytes,
        elements: &[Value],
        passthrough: &[usize],
    ) -> Response {
        match self.upstream.forward(method, headers, body).await {
            Ok(response) => {
                for element in passthrough.iter().filter_map(|&index| elements.get(index)) {
                    self.record_element(element, MetricOutcome::Forwarded);
                }
                response
            }
            Err(e) => {
                for element in elements {
                    self.record_element(element, MetricOutcome::Error);
                }
                e.into_response()
            }
        }
    }

    fn record_element(&self, element: &Value, outcome: MetricOutcome) {
        let method = element_method(element).unwrap_or_else(|| UNKNOWN_METHOD.to_string());
        self.record(element_id(element), &method, None, outcome);
    }

    fn record(
        &self,
        id: Option<Value>,
        method: &str,
        transaction: Option<TransactionPayload>,
        outcome: MetricOutcome,
    ) {
        self.collect(MetricRecord::new(id, method, transaction, outcome));
    }

    fn collect(&self, record: MetricRecord) {
        if let Some(collector) = &self.collector {
            collector.collect(record);
        }
    }
}

async fn proxy_handler(
    State(proxy): State<Arc<ValidatingProxy>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy.handle(method, headers, body).await
}
