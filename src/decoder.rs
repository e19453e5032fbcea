//! Transaction Decoder
//!
//! Decodes signed raw transactions (the `params[0]` of `eth_sendRawTransaction`)
//! from their EIP-2718 encoding and recovers the sender from the signature.
//! Supports legacy (type 0), EIP-2930 (type 1), EIP-1559 (type 2), EIP-4844 (type 3)
//! and EIP-7702 (type 4) envelopes.

use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during transaction decoding
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Empty raw transaction")]
    EmptyInput,

    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("Failed to decode transaction envelope: {0}")]
    Envelope(String),

    #[error("Failed to recover sender: {0}")]
    Signature(String),
}

/// Envelope type of a decoded transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxFormat {
    Legacy,
    Eip2930,
    Eip1559,
    Eip4844,
    Eip7702,
}

impl TxFormat {
    /// Returns the EIP-2718 type byte
    pub fn type_byte(&self) -> u8 {
        match self {
            TxFormat::Legacy => 0,
            TxFormat::Eip2930 => 1,
            TxFormat::Eip1559 => 2,
            TxFormat::Eip4844 => 3,
            TxFormat::Eip7702 => 4,
        }
    }
}

/// Fee fields of a transaction.
///
/// `gasPrice` and `maxFeePerGas`/`maxPriorityFeePerGas` never coexist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPricing {
    Legacy {
        gas_price: u128,
    },
    Dynamic {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
    /// Envelope without any recognizable fee field
    Unspecified,
}

impl GasPricing {
    pub fn gas_price(&self) -> Option<u128> {
        match self {
            GasPricing::Legacy { gas_price } => Some(*gas_price),
            _ => None,
        }
    }

    pub fn max_fee_per_gas(&self) -> Option<u128> {
        match self {
            GasPricing::Dynamic { max_fee_per_gas, .. } => Some(*max_fee_per_gas),
            _ => None,
        }
    }

    pub fn max_priority_fee_per_gas(&self) -> Option<u128> {
        match self {
            GasPricing::Dynamic {
                max_priority_fee_per_gas,
                ..
            } => Some(*max_priority_fee_per_gas),
            _ => None,
        }
    }

    /// `gasPrice` if present, else `maxFeePerGas`
    pub fn effective_gas_price(&self) -> Option<u128> {
        self.gas_price().or_else(|| self.max_fee_per_gas())
    }
}

/// Decoded transaction with extracted fields
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTransaction {
    /// Hash of the signed payload, used as correlation id
    pub hash: TxHash,
    /// Sender address recovered from the signature
    pub from: Address,
    /// Recipient address (None for contract creation)
    pub to: Option<Address>,
    /// Transaction value in wei
    pub value: U256,
    /// Transaction input data (calldata or init code)
    pub input: Bytes,
    /// Transaction nonce
    pub nonce: u64,
    /// Gas limit
    pub gas_limit: u64,
    /// Fee fields
    pub pricing: GasPricing,
    /// Chain id (None for pre-EIP-155 legacy transactions)
    pub chain_id: Option<u64>,
    /// Envelope type
    pub format: TxFormat,
}

impl DecodedTransaction {
    /// Get the function selector (first 4 bytes of input), if present
    pub fn method_id(&self) -> Option<[u8; 4]> {
        extract_method_id(&self.input)
    }

    /// Get the method ID as a hex string with 0x prefix
    pub fn method_id_hex(&self) -> Option<String> {
        self.method_id().map(|id| format!("0x{}", hex::encode(id)))
    }
}

/// Fields shared by every envelope variant
struct EnvelopeFields {
    input: Bytes,
    to: Option<Address>,
    value: U256,
    nonce: u64,
    gas_limit: u64,
    pricing: GasPricing,
    chain_id: Option<u64>,
    format: TxFormat,
}

/// Extract transaction fields from a TxEnvelope
fn extract_tx_fields(tx_envelope: &TxEnvelope) -> EnvelopeFields {
    match tx_envelope {
        TxEnvelope::Legacy(signed) => {
            let tx = signed.tx();
            EnvelopeFields {
                input: tx.input.clone(),
                to: tx.to.to().copied(),
                value: tx.value,
                nonce: tx.nonce,
                gas_limit: tx.gas_limit,
                pricing: GasPricing::Legacy {
                    gas_price: tx.gas_price,
                },
                chain_id: tx.chain_id,
                format: TxFormat::Legacy,
            }
        }
        TxEnvelope::Eip2930(signed) => {
            let tx = signed.tx();
            EnvelopeFields {
                input: tx.input.clone(),
                to: tx.to.to().copied(),
                value: tx.value,
                nonce: tx.nonce,
                gas_limit: tx.gas_limit,
                pricing: GasPricing::Legacy {
                    gas_price: tx.gas_price,
                },
                chain_id: Some(tx.chain_id),
                format: TxFormat::Eip2930,
            }
        }
        TxEnvelope::Eip1559(signed) => {
            let tx = signed.tx();
            EnvelopeFields {
                input: tx.input.clone(),
                to: tx.to.to().copied(),
                value: tx.value,
                nonce: tx.nonce,
                gas_limit: tx.gas_limit,
                pricing: GasPricing::Dynamic {
                    max_fee_per_gas: tx.max_fee_per_gas,
                    max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
                },
                chain_id: Some(tx.chain_id),
                format: TxFormat::Eip1559,
            }
        }
        TxEnvelope::Eip4844(signed) => {
            let tx = signed.tx().tx();
            EnvelopeFields {
                input: tx.input.clone(),
                to: Some(tx.to),
                value: tx.value,
                nonce: tx.nonce,
                gas_limit: tx.gas_limit,
                pricing: GasPricing::Dynamic {
                    max_fee_per_gas: tx.max_fee_per_gas,
                    max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
                },
                chain_id: Some(tx.chain_id),
                format: TxFormat::Eip4844,
            }
        }
        TxEnvelope::Eip7702(signed) => {
            let tx = signed.tx();
            EnvelopeFields {
                input: tx.input.clone(),
                to: Some(tx.to),
                value: tx.value,
                nonce: tx.nonce,
                gas_limit: tx.gas_limit,
                pricing: GasPricing::Dynamic {
                    max_fee_per_gas: tx.max_fee_per_gas,
                    max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
                },
                chain_id: Some(tx.chain_id),
                format: TxFormat::Eip7702,
            }
        }
        #[allow(unreachable_patterns)]
        _ => EnvelopeFields {
            input: Bytes::new(),
            to: None,
            value: U256::ZERO,
            nonce: 0,
            gas_limit: 0,
            pricing: GasPricing::Unspecified,
            chain_id: None,
            format: TxFormat::Legacy,
        },
    }
}

/// Decode a signed transaction from its EIP-2718 encoding
///
/// # Arguments
/// * `raw` - The raw transaction bytes as sent to `eth_sendRawTransaction`
///
/// # Returns
/// A `DecodedTransaction` with the sender recovered from the signature
pub fn decode_transaction(raw: &[u8]) -> Result<DecodedTransaction, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::EmptyInput);
    }

    let tx_envelope = TxEnvelope::decode_2718(&mut &raw[..])
        .map_err(|e| DecodeError::Envelope(e.to_string()))?;

    let from = tx_envelope
        .recover_signer()
        .map_err(|e| DecodeError::Signature(e.to_string()))?;

    let fields = extract_tx_fields(&tx_envelope);

    Ok(DecodedTransaction {
        hash: *tx_envelope.tx_hash(),
        from,
        to: fields.to,
        value: fields.value,
        input: fields.input,
        nonce: fields.nonce,
        gas_limit: fields.gas_limit,
        pricing: fields.pricing,
        chain_id: fields.chain_id,
        format: fields.format,
    })
}

/// Decode a hex-encoded raw transaction (with or without 0x prefix)
pub fn decode_raw_hex(raw_hex: &str) -> Result<DecodedTransaction, DecodeError> {
    let raw = hex_to_bytes(raw_hex)?;
    decode_transaction(&raw)
}

/// Extract method ID from transaction input data
///
/// # Arguments
/// * `input` - The transaction input/calldata
///
/// # Returns
/// `Some([u8; 4])` if input has at least 4 bytes, `None` otherwise
pub fn extract_method_id(input: &[u8]) -> Option<[u8; 4]> {
    if input.len() < 4 {
        return None;
    }
    let mut method_id = [0u8; 4];
    method_id.copy_from_slice(&input[..4]);
    Some(method_id)
}

/// Parse a hex string to bytes (with or without 0x prefix)
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>, DecodeError> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str).map_err(|e| DecodeError::InvalidHex(e.to_string()))
}


#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use alloy::primitives::address;

    const SENDER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    const RECIPIENT: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");

    // ==================== extract_method_id tests ====================

    #[test]
    fn test_extract_method_id_from_valid_input() {
        let input = vec![0xa9, 0x05, 0x9c, 0xbb, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(extract_method_id(&input), Some([0xa9, 0x05, 0x9c, 0xbb]));
    }

    #[test]
    fn test_extract_method_id_from_exact_4_bytes() {
        let input = vec![0xa9, 0x05, 0x9c, 0xbb];
        assert_eq!(extract_method_id(&input), Some([0xa9, 0x05, 0x9c, 0xbb]));
    }

    #[test]
    fn test_extract_method_id_from_short_input() {
        assert_eq!(extract_method_id(&[0xa9, 0x05, 0x9c]), None);
        assert_eq!(extract_method_id(&[]), None);
    }

    // ==================== hex_to_bytes tests ====================

    #[test]
    fn test_hex_to_bytes_with_and_without_prefix() {
        assert_eq!(hex_to_bytes("0xa9059cbb").unwrap(), vec![0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(hex_to_bytes("a9059cbb").unwrap(), vec![0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_hex_to_bytes_invalid() {
        assert!(matches!(hex_to_bytes("0xGGGG"), Err(DecodeError::InvalidHex(_))));
    }

    // ==================== GasPricing tests ====================

    #[test]
    fn test_effective_gas_price_prefers_gas_price() {
        let legacy = GasPricing::Legacy { gas_price: 20 };
        assert_eq!(legacy.effective_gas_price(), Some(20));
        assert_eq!(legacy.max_fee_per_gas(), None);

        let dynamic = GasPricing::Dynamic {
            max_fee_per_gas: 30,
            max_priority_fee_per_gas: 2,
        };
        assert_eq!(dynamic.effective_gas_price(), Some(30));
        assert_eq!(dynamic.gas_price(), None);

        assert_eq!(GasPricing::Unspecified.effective_gas_price(), None);
    }

    // ==================== decode_transaction tests ====================

    #[test]
    fn test_decode_empty_input_returns_error() {
        assert!(matches!(decode_transaction(&[]), Err(DecodeError::EmptyInput)));
    }

    #[test]
    fn test_decode_invalid_envelope_returns_error() {
        let invalid = vec![0xff, 0xff, 0xff, 0xff];
        assert!(matches!(decode_transaction(&invalid), Err(DecodeError::Envelope(_))));
    }

    #[test]
    fn test_decode_legacy_transfer_recovers_sender() {
        let raw = signed_legacy(Some(RECIPIENT), 7, vec![]);
        let tx = decode_transaction(&raw).unwrap();

        assert_eq!(tx.from, SENDER);
        assert_eq!(tx.to, Some(RECIPIENT));
        assert_eq!(tx.value, U256::from(7));
        assert!(tx.input.is_empty());
        assert_eq!(tx.format, TxFormat::Legacy);
        assert_eq!(tx.pricing, GasPricing::Legacy { gas_price: 1_000_000_000 });
        assert_eq!(tx.chain_id, Some(1));
        assert_eq!(tx.method_id(), None);
    }

    #[test]
    fn test_decode_eip1559_fee_fields() {
        let raw = signed_eip1559(RECIPIENT, 0, vec![0xa9, 0x05, 0x9c, 0xbb]);
        let tx = decode_transaction(&raw).unwrap();

        assert_eq!(tx.from, SENDER);
        assert_eq!(tx.format, TxFormat::Eip1559);
        assert_eq!(tx.nonce, 3);
        assert_eq!(tx.pricing.gas_price(), None);
        assert_eq!(tx.pricing.max_fee_per_gas(), Some(30_000_000_000));
        assert_eq!(tx.pricing.max_priority_fee_per_gas(), Some(1_000_000_000));
        assert_eq!(tx.method_id_hex(), Some("0xa9059cbb".to_string()));
    }

    #[test]
    fn test_decode_contract_creation_has_no_recipient() {
        let raw = signed_legacy(None, 0, vec![0x60, 0x80, 0x60, 0x40]);
        let tx = decode_transaction(&raw).unwrap();
        assert_eq!(tx.to, None);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let raw = signed_legacy(Some(RECIPIENT), 7, vec![]);
        let first = decode_transaction(&raw).unwrap();
        let second = decode_raw_hex(&format!("0x{}", hex::encode(&raw))).unwrap();
        assert_eq!(first.hash, second.hash);
    }

    #[test]
    fn test_decode_truncated_transaction_fails() {
        let raw = signed_legacy(Some(RECIPIENT), 7, vec![]);
        let truncated = &raw[..raw.len() - 10];
        assert!(decode_transaction(truncated).is_err());
    }
}
