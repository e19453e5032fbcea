//! Transaction Builder
//!
//! Turns an `eth_sendRawTransaction` call into an `EnrichedTransaction`:
//! decode, classify, label, parse the contract call.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::address_book::{AddressBook, AddressBookStore, ConfigError};
use crate::decoder::{decode_raw_hex, DecodeError};
use crate::jsonrpc::JsonRpcRequest;
use crate::parser::{ContractParser, ParseError};
use crate::transaction::{classify, EnrichedTransaction};

/// Errors that can occur while building a transaction from a request
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Failed to decode transaction: {0}")]
    Decode(#[from] DecodeError),

    #[error("Failed to parse contract call: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid params for {method}: expected a raw transaction string")]
    InvalidParams { method: String },
}

/// Builds enriched transactions against the current address book
#[derive(Debug)]
pub struct TransactionBuilder {
    book: Arc<AddressBookStore>,
    parser: ContractParser,
}

impl TransactionBuilder {
    pub fn new(book: Arc<AddressBookStore>) -> Self {
        Self {
            book,
            parser: ContractParser::new(),
        }
    }

    /// Extract the transaction carried by a JSON-RPC call
    ///
    /// # Returns
    /// `Ok(None)` for calls other than `eth_sendRawTransaction` or without a first param
    pub fn from_json_rpc_request(
        &self,
        request: &JsonRpcRequest,
    ) -> Result<Option<EnrichedTransaction>, BuildError> {
        if !request.is_send_raw_transaction() {
            return Ok(None);
        }

        let first = match request.params.as_ref() {
            Some(Value::Array(items)) => items.first(),
            _ => None,
        };
        let raw_hex = match first {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(raw)) => raw,
            Some(_) => {
                return Err(BuildError::InvalidParams {
                    method: request.method.clone(),
                })
            }
        };

        self.from_raw_hex(raw_hex, request.id.clone()).map(Some)
    }

    /// Decode and enrich a hex-encoded raw transaction
    pub fn from_raw_hex(
        &self,
        raw_hex: &str,
        json_rpc_id: Option<Value>,
    ) -> Result<EnrichedTransaction, BuildError> {
        let decoded = decode_raw_hex(raw_hex)?;
        let classification = classify(&decoded);
        let book = self.book.snapshot();

        let contract_info = self.parser.contract_info(&decoded, classification, &book)?;

        let tx = EnrichedTransaction {
            label_from: book.sender_label(&decoded.from),
            label_to: book.recipient_label(decoded.to.as_ref()),
            classification,
            contract_info,
            json_rpc_id,
            fee_stats: None,
            decoded,
        };

        debug!(
            tx_id = %tx.id(),
            classification = %tx.classification,
            label_from = %tx.label_from,
            label_to = %tx.label_to,
            "Transaction built"
        );
        Ok(tx)
    }

    /// Read the address book files without publishing them
    pub fn prepare_reload(&self) -> Result<Option<AddressBook>, ConfigError> {
        self.book.prepare_reload()
    }

    /// Publish a prepared book and drop cached selector resolutions
    pub fn commit_reload(&self, book: Option<AddressBook>) {
        if let Some(book) = book {
            self.book.commit(book);
        }
        self.parser.clear_cache();
    }

    /// Reload the address book and drop cached selector resolutions
    pub fn reload_config(&self) -> Result<(), ConfigError> {
        let book = self.prepare_reload()?;
        self.commit_reload(book);
        Ok(())
    }
}
