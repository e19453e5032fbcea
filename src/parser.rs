//! Contract-Call Parser
//!
//! Resolves the 4-byte selector of a contract call against the recipient's
//! configured ABI, falling back to the standard ABI library, and decodes the
//! arguments into labelled, human-readable values.

use alloy::dyn_abi::{DynSolValue, JsonAbiExt};
use alloy::json_abi::Function;
use alloy::primitives::Address;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::address_book::AddressBook;
use crate::decoder::DecodedTransaction;
use crate::standard_abis::{find_function, find_standard_function};
use crate::transaction::{ContractArg, ContractInfo, TransactionClassification};

/// Function name reported when a configured ABI has no matching selector
pub const UNKNOWN_FUNCTION: &str = "unknown";

/// Errors that can occur while decoding contract-call arguments
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to decode arguments of {function}: {reason}")]
    Arguments { function: String, reason: String },
}

/// Outcome of looking up one selector for one contract
#[derive(Debug, Clone)]
enum Resolution {
    Matched {
        function: Function,
        standard: Option<&'static str>,
    },
    /// The contract has a configured ABI but no function with this selector
    UnknownFunction,
    NoMatch,
}

#[derive(Debug, Default)]
struct SelectorCache {
    generation: u64,
    entries: HashMap<Address, HashMap<[u8; 4], Resolution>>,
}

/// Builds `ContractInfo` for contract calls
#[derive(Debug, Default)]
pub struct ContractParser {
    cache: Mutex<SelectorCache>,
}

impl ContractParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the contract call carried by a transaction
    ///
    /// # Arguments
    /// * `tx` - The decoded transaction
    /// * `classification` - Its classification; only contract calls are parsed
    /// * `book` - Address book snapshot supplying ABIs and labels
    ///
    /// # Returns
    /// `Ok(None)` when no ABI knows the selector, `Err` when a matched function's
    /// arguments do not decode
    pub fn contract_info(
        &self,
        tx: &DecodedTransaction,
        classification: TransactionClassification,
        book: &AddressBook,
    ) -> Result<Option<ContractInfo>, ParseError> {
        if classification != TransactionClassification::ContractCall {
            return Ok(None);
        }
        let (Some(target), Some(selector)) = (tx.to, tx.method_id()) else {
            return Ok(None);
        };

        let label_address = book.contract(&target).map(|c| c.label.clone());

        match self.resolve(book, target, selector) {
            Resolution::NoMatch => {
                debug!(contract = %target, selector = %hex::encode(selector), "No ABI matches selector");
                Ok(None)
            }
            Resolution::UnknownFunction => Ok(Some(ContractInfo {
                address: target,
                label_address,
                function_name: UNKNOWN_FUNCTION.to_string(),
                args: Vec::new(),
                standard: None,
            })),
            Resolution::Matched { function, standard } => {
                let values = function
                    .abi_decode_input(&tx.input[4..], true)
                    .map_err(|e| ParseError::Arguments {
                        function: function.signature(),
                        reason: e.to_string(),
                    })?;

                let args = function
                    .inputs
                    .iter()
                    .zip(values.iter())
                    .map(|(param, value)| ContractArg {
                        name: param.name.clone(),
                        ty: param.selector_type().into_owned(),
                        value: format_value(value),
                        label: match value {
                            DynSolValue::Address(address) => {
                                book.authorized_label(address).map(str::to_string)
                            }
                            _ => None,
                        },
                    })
                    .collect();

                Ok(Some(ContractInfo {
                    address: target,
                    label_address,
                    function_name: function.name.clone(),
                    args,
                    standard: standard.map(str::to_string),
                }))
            }
        }
    }

    /// Drop every cached selector resolution
    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.entries.clear();
    }

    /// Number of contracts with cached resolutions
    pub fn cached_contracts(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entries
            .len()
    }

    fn resolve(&self, book: &AddressBook, target: Address, selector: [u8; 4]) -> Resolution {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        if cache.generation != book.generation() {
            cache.entries.clear();
            cache.generation = book.generation();
        }

        cache
            .entries
            .entry(target)
            .or_default()
            .entry(selector)
            .or_insert_with(|| Self::lookup(book, &target, &selector))
            .clone()
    }

    fn lookup(book: &AddressBook, target: &Address, selector: &[u8; 4]) -> Resolution {
        // a configured ABI is used exclusively
        if let Some(abi) = book.contract(target).and_then(|c| c.abi.as_ref()) {
            return match find_function(abi, selector) {
                Some(function) => Resolution::Matched {
                    function: function.clone(),
                    standard: None,
                },
                None => Resolution::UnknownFunction,
            };
        }

        match find_standard_function(selector) {
            Some((standard, function)) => Resolution::Matched {
                function: function.clone(),
                standard: Some(standard.name),
            },
            None => Resolution::NoMatch,
        }
    }
}

/// Render a decoded ABI value as a display string
pub fn format_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Address(address) => address.to_checksum(None),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::FixedBytes(word, size) => format!("0x{}", hex::encode(&word[..*size])),
        DynSolValue::Bytes(bytes) => format!("0x{}", hex::encode(bytes)),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", inner.join(","))
        }
        DynSolValue::Tuple(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("({})", inner.join(","))
        }
        other => format!("{other:?}"),
    }
}
