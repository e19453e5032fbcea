//! Rules Validator
//!
//! Offline policy made of three ordered rule tables (address, value,
//! contract). Every table must approve the transaction.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use super::{StagedConfig, TransactionValidator, ValidationError, ValidatorError, ValidatorMode};
use crate::address_book::{read_json, ConfigError};
use crate::transaction::{ContractInfo, EnrichedTransaction};

const NO_COMMENT: &str = "no comment";

/// Rule verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
}

/// `*` or a concrete address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMatcher {
    Any,
    Exact(Address),
}

impl AddressMatcher {
    pub fn matches(&self, address: Option<&Address>) -> bool {
        match self {
            AddressMatcher::Any => true,
            AddressMatcher::Exact(expected) => address == Some(expected),
        }
    }
}

impl<'de> Deserialize<'de> for AddressMatcher {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.trim() == "*" {
            return Ok(AddressMatcher::Any);
        }
        Address::from_str(raw.trim())
            .map(AddressMatcher::Exact)
            .map_err(|_| serde::de::Error::custom(format!("invalid address '{raw}'")))
    }
}

/// Numeric bound given as a JSON number or a decimal string; `null` means unbounded
fn deserialize_bound<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<U256>, D::Error> {
    use serde::de::Error;

    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => match n.as_u64() {
            Some(v) => Ok(Some(U256::from(v))),
            None => match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 => Ok(Some(U256::from(f as u128))),
                _ => Err(D::Error::custom(format!("invalid bound {n}"))),
            },
        },
        Some(serde_json::Value::String(s)) => U256::from_str(s.trim())
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid bound '{s}'"))),
        Some(other) => Err(D::Error::custom(format!("invalid bound {other}"))),
    }
}

/// `{action, from, to, comment?}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddressRule {
    pub action: RuleAction,
    pub from: AddressMatcher,
    pub to: AddressMatcher,
    #[serde(default)]
    pub comment: Option<String>,
}

/// `{minValue, maxValue, minGasPrice, maxGasPrice, comment?}`; absent bounds are open
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRule {
    #[serde(default, deserialize_with = "deserialize_bound")]
    pub min_value: Option<U256>,
    #[serde(default, deserialize_with = "deserialize_bound")]
    pub max_value: Option<U256>,
    #[serde(default, deserialize_with = "deserialize_bound")]
    pub min_gas_price: Option<U256>,
    #[serde(default, deserialize_with = "deserialize_bound")]
    pub max_gas_price: Option<U256>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl ValueRule {
    fn covers(&self, value: U256, gas_price: U256) -> bool {
        let within = |v: U256, min: Option<U256>, max: Option<U256>| {
            min.map_or(true, |min| v >= min) && max.map_or(true, |max| v <= max)
        };
        within(value, self.min_value, self.max_value)
            && within(gas_price, self.min_gas_price, self.max_gas_price)
    }
}

/// `{action, functionName, args?, comment?}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRule {
    pub action: RuleAction,
    pub function_name: String,
    /// Required argument values; empty matches on the function name alone
    #[serde(default)]
    pub args: HashMap<String, String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl ContractRule {
    fn matches(&self, info: &ContractInfo) -> bool {
        self.function_name == info.function_name
            && self.args.iter().all(|(name, expected)| {
                info.arg(name)
                    .is_some_and(|arg| arg.value.eq_ignore_ascii_case(expected.trim()))
            })
    }
}

/// All three rule tables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    pub address: Vec<AddressRule>,
    pub value: Vec<ValueRule>,
    pub contract: Vec<ContractRule>,
}

/// File locations of the rule tables
#[derive(Debug, Clone)]
pub struct RulesPaths {
    pub address_rules: PathBuf,
    pub value_rules: PathBuf,
    pub contract_rules: PathBuf,
}

impl RuleSet {
    /// Load all three tables; nothing is returned unless every file parses
    pub fn load(paths: &RulesPaths) -> Result<Self, ConfigError> {
        Ok(Self {
            address: read_json(&paths.address_rules)?,
            value: read_json(&paths.value_rules)?,
            contract: read_json(&paths.contract_rules)?,
        })
    }

    /// Evaluate a transaction against every table
    pub fn evaluate(&self, tx: &EnrichedTransaction) -> Result<(), ValidationError> {
        let address_match = self.check_address(tx)?;
        let value_match = self.check_value(tx);
        let contract_match = self.check_contract(tx)?;

        if !address_match {
            return Err(ValidationError::new(
                "Transaction denied: No matching address rule found",
                tx,
            ));
        }
        if !value_match {
            return Err(ValidationError::new(
                "Transaction denied: No matching value rule found",
                tx,
            ));
        }
        if !contract_match {
            return Err(ValidationError::new(
                "Transaction denied: No matching contract rule found",
                tx,
            ));
        }
        Ok(())
    }

    fn check_address(&self, tx: &EnrichedTransaction) -> Result<bool, ValidationError> {
        let from = tx.decoded.from;
        let to = tx.decoded.to;

        for rule in &self.address {
            if rule.from.matches(Some(&from)) && rule.to.matches(to.as_ref()) {
                if rule.action == RuleAction::Deny {
                    return Err(ValidationError::new(
                        format!(
                            "Transaction denied by address rule: {}",
                            rule.comment.as_deref().unwrap_or(NO_COMMENT)
                        ),
                        tx,
                    ));
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn check_value(&self, tx: &EnrichedTransaction) -> bool {
        let Some(gas_price) = tx.decoded.pricing.effective_gas_price() else {
            warn!(tx_id = %tx.id(), "Transaction does not contain gasPrice or maxFeePerGas");
            return false;
        };
        let gas_price = U256::from(gas_price);

        self.value
            .iter()
            .any(|rule| rule.covers(tx.decoded.value, gas_price))
    }

    fn check_contract(&self, tx: &EnrichedTransaction) -> Result<bool, ValidationError> {
        let Some(info) = tx.contract_info.as_ref() else {
            return Ok(true);
        };

        for rule in &self.contract {
            if rule.matches(info) {
                if rule.action == RuleAction::Deny {
                    return Err(ValidationError::new(
                        format!(
                            "Transaction denied by contract rule: {}",
                            rule.comment.as_deref().unwrap_or(NO_COMMENT)
                        ),
                        tx,
                    ));
                }
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Validator evaluating the rule tables
#[derive(Debug)]
pub struct RulesValidator {
    paths: Option<RulesPaths>,
    rules: RwLock<Arc<RuleSet>>,
}

impl RulesValidator {
    /// Rule tables are read from `paths` on `init`
    pub fn new(paths: RulesPaths) -> Self {
        Self {
            paths: Some(paths),
            rules: RwLock::new(Arc::new(RuleSet::default())),
        }
    }

    /// Fixed, in-memory rule tables
    pub fn from_rules(rules: RuleSet) -> Self {
        Self {
            paths: None,
            rules: RwLock::new(Arc::new(rules)),
        }
    }

    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl TransactionValidator for RulesValidator {
    async fn init(&self) -> Result<(), ValidatorError> {
        self.reload().await
    }

    async fn validate(&self, tx: &EnrichedTransaction) -> Result<(), ValidatorError> {
        self.rules().evaluate(tx).map_err(ValidatorError::from)
    }

    async fn close(&self) -> Result<(), ValidatorError> {
        Ok(())
    }

    async fn prepare_reload(&self) -> Result<StagedConfig, ValidatorError> {
        let Some(paths) = &self.paths else {
            return Ok(StagedConfig::Unchanged);
        };
        let rules = RuleSet::load(paths).inspect_err(|e| {
            warn!(error = %e, "Failed to load rules configuration");
        })?;
        Ok(StagedConfig::Rules(rules))
    }

    fn commit_reload(&self, staged: StagedConfig) {
        let StagedConfig::Rules(rules) = staged else {
            return;
        };
        info!(
            address_rules = rules.address.len(),
            value_rules = rules.value.len(),
            contract_rules = rules.contract.len(),
            "Rules configuration loaded"
        );
        *self.rules.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(rules);
    }

    fn mode(&self) -> ValidatorMode {
        ValidatorMode::Rules
    }
}
