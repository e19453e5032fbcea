//! Enriched Transaction Model
//!
//! Classification of decoded transactions, decoded contract-call info and the
//! JSON payload handed to reviewers and metrics backends.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decoder::{DecodedTransaction, GasPricing, TxFormat};

/// Label used when an address is not present in any table
pub const UNKNOWN_LABEL: &str = "unknown";

/// What a transaction does, judged from its recipient and input data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionClassification {
    Transfer,
    ContractCreation,
    ContractCall,
    Unknown,
}

impl TransactionClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionClassification::Transfer => "transfer",
            TransactionClassification::ContractCreation => "contract-creation",
            TransactionClassification::ContractCall => "contract-call",
            TransactionClassification::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TransactionClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a decoded transaction
///
/// A zero-address recipient counts as no recipient. Rules are evaluated in order:
/// 1. no recipient and a non-zero payload: contract creation
/// 2. recipient and empty payload: transfer
/// 3. recipient and non-zero payload: contract call
/// 4. anything else (e.g. an all-zero payload): unknown
pub fn classify(tx: &DecodedTransaction) -> TransactionClassification {
    let has_payload = tx.input.iter().any(|byte| *byte != 0);
    let to = tx.to.filter(|address| !address.is_zero());

    match (to, tx.input.is_empty(), has_payload) {
        (None, _, true) => TransactionClassification::ContractCreation,
        (Some(_), true, _) => TransactionClassification::Transfer,
        (Some(_), false, true) => TransactionClassification::ContractCall,
        _ => TransactionClassification::Unknown,
    }
}

/// A single decoded contract-call argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractArg {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Decoded view of a contract call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    pub address: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_address: Option<String>,
    pub function_name: String,
    pub args: Vec<ContractArg>,
    /// Name of the standard ABI that matched, None for user-configured ABIs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard: Option<String>,
}

impl ContractInfo {
    /// Look up an argument by name
    pub fn arg(&self, name: &str) -> Option<&ContractArg> {
        self.args.iter().find(|arg| arg.name == name)
    }
}

/// Running fee averages attached before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeStatistics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_gas_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_fee_per_gas: Option<f64>,
    pub high_fee: bool,
}

impl FeeStatistics {
    /// Compare the transaction's own fee against the matching average
    ///
    /// # Arguments
    /// * `pricing` - Fee fields of the transaction
    /// * `avg_gas_price` - Average `gasPrice` of recent legacy transactions
    /// * `avg_fee_per_gas` - Average `maxFeePerGas` of recent EIP-1559 transactions
    /// * `factor` - How many times the average counts as abnormally high
    pub fn evaluate(
        pricing: &GasPricing,
        avg_gas_price: Option<f64>,
        avg_fee_per_gas: Option<f64>,
        factor: f64,
    ) -> Self {
        let high_fee = match pricing {
            GasPricing::Legacy { gas_price } => {
                avg_gas_price.is_some_and(|avg| *gas_price as f64 > avg * factor)
            }
            GasPricing::Dynamic {
                max_fee_per_gas, ..
            } => avg_fee_per_gas.is_some_and(|avg| *max_fee_per_gas as f64 > avg * factor),
            GasPricing::Unspecified => false,
        };

        FeeStatistics {
            avg_gas_price,
            avg_fee_per_gas,
            high_fee,
        }
    }
}

/// Decoded transaction plus everything the firewall learned about it
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedTransaction {
    pub decoded: DecodedTransaction,
    pub classification: TransactionClassification,
    pub label_from: String,
    pub label_to: String,
    pub contract_info: Option<ContractInfo>,
    pub json_rpc_id: Option<Value>,
    pub fee_stats: Option<FeeStatistics>,
}

impl EnrichedTransaction {
    /// Correlation id: the transaction hash with 0x prefix
    pub fn id(&self) -> String {
        format!("{:#x}", self.decoded.hash)
    }

    /// Serializable view sent to reviewers and metrics backends
    pub fn payload(&self) -> TransactionPayload {
        let tx = &self.decoded;
        TransactionPayload {
            id: self.id(),
            from: format!("{:#x}", tx.from),
            to: tx.to.map(|a| format!("{:#x}", a)),
            value: tx.value.to_string(),
            data: format!("0x{}", hex::encode(&tx.input)),
            nonce: tx.nonce,
            gas_limit: tx.gas_limit,
            gas_price: tx.pricing.gas_price().map(|v| v.to_string()),
            max_fee_per_gas: tx.pricing.max_fee_per_gas().map(|v| v.to_string()),
            max_priority_fee_per_gas: tx.pricing.max_priority_fee_per_gas().map(|v| v.to_string()),
            chain_id: tx.chain_id,
            tx_format: tx.format,
            tx_type: self.classification,
            label_from: self.label_from.clone(),
            label_to: self.label_to.clone(),
            contract_info: self.contract_info.clone(),
            fee_stats: self.fee_stats.clone(),
        }
    }
}

/// JSON structure of a transaction as seen by reviewers and metrics backends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    /// Transaction hash with 0x prefix
    pub id: String,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Value in wei as decimal string
    pub value: String,
    pub data: String,
    pub nonce: u64,
    pub gas_limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    pub tx_format: TxFormat,
    pub tx_type: TransactionClassification,
    pub label_from: String,
    pub label_to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_info: Option<ContractInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_stats: Option<FeeStatistics>,
}

impl TransactionPayload {
    /// Serialize the payload to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use alloy::primitives::{Bytes, TxHash, U256};

    /// Build an enriched transaction without going through signing
    pub fn enriched(
        from: Address,
        to: Option<Address>,
        value: u64,
        pricing: GasPricing,
    ) -> EnrichedTransaction {
        let decoded = DecodedTransaction {
            hash: TxHash::with_last_byte(value as u8),
            from,
            to,
            value: U256::from(value),
            input: Bytes::new(),
            nonce: 0,
            gas_limit: 21_000,
            pricing,
            chain_id: Some(1),
            format: TxFormat::Legacy,
        };
        EnrichedTransaction {
            classification: classify(&decoded),
            decoded,
            label_from: UNKNOWN_LABEL.to_string(),
            label_to: UNKNOWN_LABEL.to_string(),
            contract_info: None,
            json_rpc_id: Some(Value::from(1)),
            fee_stats: None,
        }
    }
}
