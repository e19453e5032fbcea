//! Interactive Validator
//!
//! Sends each transaction to the connected reviewer and waits for a verdict.
//! Fails open: without a reviewer, while busy, on timeout or transport
//! failure the transaction is accepted.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::reviewer::{self, Dispatch, ProtocolError, ReviewerChannel};
use super::{StagedConfig, TransactionValidator, ValidationError, ValidatorError, ValidatorMode};
use crate::transaction::EnrichedTransaction;

/// Default reviewer WebSocket port
pub const DEFAULT_WSS_PORT: u16 = 8546;

/// Default reviewer deadline in seconds
pub const DEFAULT_REVIEW_TIMEOUT_SECS: u64 = 60;

/// Configuration for the interactive validator
#[derive(Debug, Clone)]
pub struct InteractiveConfig {
    /// Port of the reviewer WebSocket server
    pub wss_port: u16,
    /// Deadline for one reviewer round-trip
    pub timeout: Duration,
}

impl Default for InteractiveConfig {
    fn default() -> Self {
        Self {
            wss_port: DEFAULT_WSS_PORT,
            timeout: Duration::from_secs(DEFAULT_REVIEW_TIMEOUT_SECS),
        }
    }
}

impl InteractiveConfig {
    pub fn with_port(wss_port: u16) -> Self {
        Self {
            wss_port,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct ServerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Validator backed by a single human reviewer
#[derive(Debug)]
pub struct InteractiveValidator {
    config: InteractiveConfig,
    channel: Arc<ReviewerChannel>,
    server: Mutex<Option<ServerHandle>>,
}

impl InteractiveValidator {
    pub fn new(config: InteractiveConfig) -> Self {
        Self::with_channel(config, ReviewerChannel::new())
    }

    /// Use an existing channel, e.g. one already attached in tests
    pub fn with_channel(config: InteractiveConfig, channel: Arc<ReviewerChannel>) -> Self {
        Self {
            config,
            channel,
            server: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &Arc<ReviewerChannel> {
        &self.channel
    }

    /// Serve the reviewer socket on an already-bound listener
    pub fn serve(&self, listener: TcpListener) -> Result<SocketAddr, ValidatorError> {
        let addr = listener
            .local_addr()
            .map_err(|e| ValidatorError::Server(e.to_string()))?;
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = reviewer::router(Arc::clone(&self.channel));

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "Reviewer server stopped");
            }
        });

        let previous = self
            .server
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(ServerHandle { shutdown, task });
        if let Some(previous) = previous {
            let _ = previous.shutdown.send(());
        }

        info!(%addr, "Reviewer WebSocket server listening");
        Ok(addr)
    }
}

#[async_trait]
impl TransactionValidator for InteractiveValidator {
    async fn init(&self) -> Result<(), ValidatorError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.wss_port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ValidatorError::Server(format!("bind {addr}: {e}")))?;
        self.serve(listener)?;
        Ok(())
    }

    async fn validate(&self, tx: &EnrichedTransaction) -> Result<(), ValidatorError> {
        let tx_id = tx.id();
        let message = match tx.payload().to_json() {
            Ok(message) => message,
            Err(e) => {
                error!(tx_id = %tx_id, error = %e, "Failed to serialize transaction -> ACCEPTING");
                return Ok(());
            }
        };

        let ticket = match self.channel.dispatch(message) {
            Dispatch::Disconnected => {
                warn!(tx_id = %tx_id, "Reviewer not connected -> ACCEPTING current transaction");
                return Ok(());
            }
            Dispatch::Busy => {
                warn!(tx_id = %tx_id, "Reviewer is busy with a query -> ACCEPTING current transaction");
                return Ok(());
            }
            Dispatch::Sent(ticket) => ticket,
        };

        let response = match ticket.wait(self.config.timeout).await {
            Ok(response) => response,
            Err(e) => {
                error!(tx_id = %tx_id, error = %e, "Unable to validate transaction by reviewer -> ACCEPTING");
                return Ok(());
            }
        };

        if !response.id.eq_ignore_ascii_case(&tx_id) {
            return Err(ProtocolError {
                expected: tx_id,
                received: response.id,
            }
            .into());
        }

        if !response.result {
            let reason = format!(
                "Transaction validation failed. {}",
                response.message.unwrap_or_default()
            );
            return Err(ValidationError::new(reason.trim_end(), tx).into());
        }

        info!(tx_id = %tx_id, "Transaction approved by reviewer");
        Ok(())
    }

    async fn close(&self) -> Result<(), ValidatorError> {
        self.channel.close();
        let handle = self.server.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(());
            let _ = handle.task.await;
        }
        Ok(())
    }

    async fn prepare_reload(&self) -> Result<StagedConfig, ValidatorError> {
        Ok(StagedConfig::Unchanged)
    }

    fn commit_reload(&self, _staged: StagedConfig) {}

    fn mode(&self) -> ValidatorMode {
        ValidatorMode::Interactive
    }
}
