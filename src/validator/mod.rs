//! Transaction Validators
//!
//! One capability interface with two policies: an interactive reviewer and an
//! offline rule engine. The policy is chosen once at startup.

pub mod interactive;
pub mod reviewer;
pub mod rules;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::address_book::ConfigError;
use crate::transaction::{EnrichedTransaction, TransactionPayload};

pub use interactive::{InteractiveConfig, InteractiveValidator};
pub use reviewer::{ProtocolError, ReviewerChannel, ReviewerError, ReviewerResponse};
pub use rules::{RuleSet, RulesPaths, RulesValidator};

/// A policy decision to refuse the transaction
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason}")]
pub struct ValidationError {
    pub reason: String,
    pub transaction: TransactionPayload,
    pub json_rpc_id: Option<Value>,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>, tx: &EnrichedTransaction) -> Self {
        Self {
            reason: reason.into(),
            transaction: tx.payload(),
            json_rpc_id: tx.json_rpc_id.clone(),
        }
    }
}

/// Errors returned by validators
#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error(transparent)]
    Rejected(#[from] ValidationError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Failed to load validator configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Reviewer server error: {0}")]
    Server(String),
}

impl ValidatorError {
    /// Whether this is a policy rejection rather than a failure
    pub fn is_rejection(&self) -> bool {
        matches!(self, ValidatorError::Rejected(_))
    }
}

/// Which validation policy is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorMode {
    Interactive,
    Rules,
}

impl ValidatorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidatorMode::Interactive => "interactive",
            ValidatorMode::Rules => "rules",
        }
    }
}

impl FromStr for ValidatorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interactive" => Ok(ValidatorMode::Interactive),
            "rules" => Ok(ValidatorMode::Rules),
            other => Err(format!("unknown validator mode '{other}'")),
        }
    }
}

impl std::fmt::Display for ValidatorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration read by `prepare_reload` and not yet published
#[derive(Debug)]
pub enum StagedConfig {
    /// The policy owns no reloadable configuration
    Unchanged,
    Rules(RuleSet),
}

/// Validation policy applied to every extracted transaction
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionValidator: Send + Sync {
    /// Acquire resources (bind servers, load rule tables)
    async fn init(&self) -> Result<(), ValidatorError>;

    /// Accept with `Ok(())`, refuse with `ValidatorError::Rejected`
    async fn validate(&self, tx: &EnrichedTransaction) -> Result<(), ValidatorError>;

    async fn close(&self) -> Result<(), ValidatorError>;

    /// Read any configuration the policy owns without applying it
    async fn prepare_reload(&self) -> Result<StagedConfig, ValidatorError>;

    /// Publish configuration returned by `prepare_reload`
    fn commit_reload(&self, staged: StagedConfig);

    /// Re-read and apply configuration in one step
    async fn reload(&self) -> Result<(), ValidatorError> {
        let staged = self.prepare_reload().await?;
        self.commit_reload(staged);
        Ok(())
    }

    fn mode(&self) -> ValidatorMode;
}

/// Build the validator for the configured mode
pub fn create_validator(
    mode: ValidatorMode,
    interactive: InteractiveConfig,
    rules: RulesPaths,
) -> Arc<dyn TransactionValidator> {
    match mode {
        ValidatorMode::Interactive => Arc::new(InteractiveValidator::new(interactive)),
        ValidatorMode::Rules => Arc::new(RulesValidator::new(rules)),
    }
}
