//! Address Book
//!
//! Authorized-address labels and known contracts (label plus optional ABI),
//! loaded from flat JSON documents and swapped atomically on reload.

use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, warn};

use crate::transaction::UNKNOWN_LABEL;

/// Errors that can occur while loading configuration files
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid address '{address}' in {path}")]
    InvalidAddress { path: String, address: String },
}

/// Read and deserialize a JSON configuration file
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
        path: path.display().to_string(),
        source,
    })
}

fn parse_address(path: &Path, raw: &str) -> Result<Address, ConfigError> {
    Address::from_str(raw.trim()).map_err(|_| ConfigError::InvalidAddress {
        path: path.display().to_string(),
        address: raw.to_string(),
    })
}

/// A contract the operator has named
#[derive(Debug, Clone, PartialEq)]
pub struct KnownContract {
    pub label: String,
    /// User-supplied ABI, takes precedence over the standard library
    pub abi: Option<JsonAbi>,
}

/// Either `"0x..": "Label"` or `"0x..": {"name": "Label", "abi": [...]}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KnownContractEntry {
    Label(String),
    Detailed {
        #[serde(alias = "label")]
        name: String,
        #[serde(default)]
        abi: Option<JsonAbi>,
    },
}

impl From<KnownContractEntry> for KnownContract {
    fn from(entry: KnownContractEntry) -> Self {
        match entry {
            KnownContractEntry::Label(label) => KnownContract { label, abi: None },
            KnownContractEntry::Detailed { name, abi } => KnownContract { label: name, abi },
        }
    }
}

/// File locations of the address tables
#[derive(Debug, Clone)]
pub struct AddressBookPaths {
    pub authorized_addresses: PathBuf,
    pub known_contracts: PathBuf,
}

/// Immutable snapshot of the address tables
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    authorized: HashMap<Address, String>,
    contracts: HashMap<Address, KnownContract>,
    generation: u64,
}

impl AddressBook {
    /// Build a snapshot from already-parsed tables
    pub fn new(
        authorized: HashMap<Address, String>,
        contracts: HashMap<Address, KnownContract>,
    ) -> Self {
        Self {
            authorized,
            contracts,
            generation: 0,
        }
    }

    /// Load both tables from disk
    ///
    /// Nothing is returned unless both files parse completely.
    pub fn load(paths: &AddressBookPaths) -> Result<Self, ConfigError> {
        let raw_authorized: HashMap<String, String> = read_json(&paths.authorized_addresses)?;
        let mut authorized = HashMap::with_capacity(raw_authorized.len());
        for (address, label) in raw_authorized {
            authorized.insert(parse_address(&paths.authorized_addresses, &address)?, label);
        }

        let raw_contracts: HashMap<String, KnownContractEntry> = read_json(&paths.known_contracts)?;
        let mut contracts = HashMap::with_capacity(raw_contracts.len());
        for (address, entry) in raw_contracts {
            contracts.insert(
                parse_address(&paths.known_contracts, &address)?,
                KnownContract::from(entry),
            );
        }

        Ok(Self::new(authorized, contracts))
    }

    /// Reload counter of the snapshot, used to invalidate derived caches
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Label of an authorized address
    pub fn authorized_label(&self, address: &Address) -> Option<&str> {
        self.authorized.get(address).map(String::as_str)
    }

    pub fn contract(&self, address: &Address) -> Option<&KnownContract> {
        self.contracts.get(address)
    }

    /// Sender label, `"unknown"` when the address is not authorized
    pub fn sender_label(&self, address: &Address) -> String {
        self.authorized_label(address)
            .unwrap_or(UNKNOWN_LABEL)
            .to_string()
    }

    /// Recipient label: authorized table, then known contracts, then `"unknown"`
    pub fn recipient_label(&self, address: Option<&Address>) -> String {
        address
            .and_then(|a| {
                self.authorized_label(a)
                    .or_else(|| self.contract(a).map(|c| c.label.as_str()))
            })
            .unwrap_or(UNKNOWN_LABEL)
            .to_string()
    }

    pub fn authorized_count(&self) -> usize {
        self.authorized.len()
    }

    pub fn contract_count(&self) -> usize {
        self.contracts.len()
    }
}

/// Shared, reloadable holder of the current address book
#[derive(Debug)]
pub struct AddressBookStore {
    paths: Option<AddressBookPaths>,
    current: RwLock<Arc<AddressBook>>,
    generation: AtomicU64,
}

impl AddressBookStore {
    /// Load the initial snapshot from disk
    pub fn load(paths: AddressBookPaths) -> Result<Self, ConfigError> {
        let book = AddressBook::load(&paths)?;
        info!(
            authorized = book.authorized_count(),
            contracts = book.contract_count(),
            "Address book loaded"
        );
        Ok(Self {
            paths: Some(paths),
            current: RwLock::new(Arc::new(book)),
            generation: AtomicU64::new(0),
        })
    }

    /// Wrap a fixed snapshot that cannot be reloaded from disk
    pub fn from_book(book: AddressBook) -> Self {
        Self {
            paths: None,
            current: RwLock::new(Arc::new(book)),
            generation: AtomicU64::new(0),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<AddressBook> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-read both tables without publishing them
    ///
    /// # Returns
    /// `None` when the store has no backing files
    pub fn prepare_reload(&self) -> Result<Option<AddressBook>, ConfigError> {
        let Some(paths) = &self.paths else {
            warn!("Address book has no backing files, reload skipped");
            return Ok(None);
        };
        AddressBook::load(paths).map(Some)
    }

    /// Publish a book returned by `prepare_reload`
    pub fn commit(&self, mut book: AddressBook) {
        book.generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        info!(
            authorized = book.authorized_count(),
            contracts = book.contract_count(),
            generation = book.generation,
            "Address book reloaded"
        );
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(book);
    }

    /// Re-read both tables and swap them in
    ///
    /// On failure the previous snapshot stays in place.
    pub fn reload(&self) -> Result<(), ConfigError> {
        if let Some(book) = self.prepare_reload()? {
            self.commit(book);
        }
        Ok(())
    }
}
