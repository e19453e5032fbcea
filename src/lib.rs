//! Transaction Firewall Library
//!
//! This crate provides a JSON-RPC reverse proxy that decodes every
//! `eth_sendRawTransaction`, enriches it with address labels and decoded
//! contract calls, and lets an interactive reviewer or a rule engine decide
//! whether it reaches the node.

pub mod address_book;
pub mod admin;
pub mod builder;
pub mod config;
pub mod decoder;
pub mod jsonrpc;
pub mod metrics;
pub mod parser;
pub mod proxy;
pub mod standard_abis;
pub mod transaction;
pub mod upstream;
pub mod validator;

// Re-export commonly used types
pub use address_book::{AddressBook, AddressBookPaths, AddressBookStore, ConfigError};
pub use builder::{BuildError, TransactionBuilder};
pub use decoder::{decode_raw_hex, decode_transaction, DecodedTransaction};
pub use metrics::{MetricOutcome, MetricRecord, MetricsCollector, MetricsStore};
pub use proxy::{ValidatingProxy, Verdict};
pub use transaction::{EnrichedTransaction, TransactionClassification, TransactionPayload};
pub use upstream::{Upstream, UpstreamConfig, UpstreamError};
pub use validator::{create_validator, TransactionValidator, ValidationError, ValidatorError, ValidatorMode};
