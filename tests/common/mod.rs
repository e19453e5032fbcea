//! Shared helpers for integration tests: transaction signing, a fake
//! upstream node and stub validators.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use axum::body::Bytes as BodyBytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use tx_firewall::transaction::EnrichedTransaction;
use tx_firewall::validator::{
    StagedConfig, TransactionValidator, ValidationError, ValidatorError, ValidatorMode,
};

/// Anvil account #0
pub const TEST_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub fn signer() -> PrivateKeySigner {
    TEST_PRIVATE_KEY.parse().unwrap()
}

pub fn sender() -> Address {
    signer().address()
}

/// Signed legacy transaction as 0x-prefixed hex
pub fn legacy_hex(to: Address, value: u64, gas_price: u128, input: Vec<u8>) -> String {
    let mut tx = TxLegacy {
        chain_id: Some(1),
        nonce: 0,
        gas_price,
        gas_limit: 100_000,
        to: TxKind::Call(to),
        value: U256::from(value),
        input: Bytes::from(input),
    };
    let signature = signer().sign_transaction_sync(&mut tx).unwrap();
    let envelope: TxEnvelope = tx.into_signed(signature).into();
    format!("0x{}", hex::encode(envelope.encoded_2718()))
}

/// Signed EIP-1559 transaction as 0x-prefixed hex
pub fn eip1559_hex(to: Address, value: u64, input: Vec<u8>) -> String {
    let mut tx = TxEip1559 {
        chain_id: 1,
        nonce: 1,
        gas_limit: 100_000,
        max_fee_per_gas: 30_000_000_000,
        max_priority_fee_per_gas: 1_000_000_000,
        to: TxKind::Call(to),
        value: U256::from(value),
        input: Bytes::from(input),
        ..Default::default()
    };
    let signature = signer().sign_transaction_sync(&mut tx).unwrap();
    let envelope: TxEnvelope = tx.into_signed(signature).into();
    format!("0x{}", hex::encode(envelope.encoded_2718()))
}

pub fn send_raw(id: u64, raw_hex: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": "eth_sendRawTransaction", "params": [raw_hex]})
}

pub fn block_number(id: u64) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": "eth_blockNumber", "params": []})
}

// ==================== Fake upstream ====================

/// Node stand-in that records every body it receives
#[derive(Clone, Default)]
pub struct FakeUpstream {
    pub received: Arc<Mutex<Vec<(HeaderMap, BodyBytes)>>>,
    /// Held before answering each request
    pub delay: Duration,
}

impl FakeUpstream {
    /// A node that answers only after `delay`
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn bodies(&self) -> Vec<BodyBytes> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub async fn spawn(&self) -> SocketAddr {
        async fn record(
            State(upstream): State<FakeUpstream>,
            headers: HeaderMap,
            body: BodyBytes,
        ) -> impl IntoResponse {
            upstream.received.lock().unwrap().push((headers, body));
            tokio::time::sleep(upstream.delay).await;
            (
                [("x-upstream", "fake-node")],
                axum::Json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"})),
            )
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new().fallback(record).with_state(self.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }
}

// ==================== Stub validators ====================

/// Accepts everything and remembers what it saw
#[derive(Default)]
pub struct AcceptAll {
    pub seen: Mutex<Vec<EnrichedTransaction>>,
}

#[async_trait]
impl TransactionValidator for AcceptAll {
    async fn init(&self) -> Result<(), ValidatorError> {
        Ok(())
    }

    async fn validate(&self, tx: &EnrichedTransaction) -> Result<(), ValidatorError> {
        self.seen.lock().unwrap().push(tx.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), ValidatorError> {
        Ok(())
    }

    async fn prepare_reload(&self) -> Result<StagedConfig, ValidatorError> {
        Ok(StagedConfig::Unchanged)
    }

    fn commit_reload(&self, _staged: StagedConfig) {}

    fn mode(&self) -> ValidatorMode {
        ValidatorMode::Rules
    }
}

/// Rejects transactions sent to one address
pub struct RejectRecipient(pub Address);

#[async_trait]
impl TransactionValidator for RejectRecipient {
    async fn init(&self) -> Result<(), ValidatorError> {
        Ok(())
    }

    async fn validate(&self, tx: &EnrichedTransaction) -> Result<(), ValidatorError> {
        if tx.decoded.to == Some(self.0) {
            return Err(ValidationError::new("Transaction denied: blocked recipient", tx).into());
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ValidatorError> {
        Ok(())
    }

    async fn prepare_reload(&self) -> Result<StagedConfig, ValidatorError> {
        Ok(StagedConfig::Unchanged)
    }

    fn commit_reload(&self, _staged: StagedConfig) {}

    fn mode(&self) -> ValidatorMode {
        ValidatorMode::Rules
    }
}
