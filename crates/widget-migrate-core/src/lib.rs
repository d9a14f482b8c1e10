//! One-time, flag-gated data migrations for persisted widget configuration.
//!
//! A [`MigrationRegistry`] holds named steps in shipped order. [`run_all`] applies
//! every step whose completion flag is unset to every known record and then marks
//! the step applied, so no step ever runs twice for an installation.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

mod domain;
mod runner;
mod store;
mod transforms;

pub use domain::{
    Coin, ConfigRecord, Currency, Exchange, RecordId, KEY_COIN, KEY_COIN_CUSTOM, KEY_CURRENCY,
    KEY_CURRENCY_CUSTOM, KEY_EXCHANGE, RECORD_KEYS,
};
pub use runner::{
    pending, run_all, MigrationRegistry, MigrationStep, RecordOutcome, RecordReport, RunOptions,
    RunReport, StepReport, StepStatus, Transform,
};
pub use store::{FlagStore, MemoryFlagStore, MemoryRecordStore, RecordStore};
pub use transforms::{
    bittrex_to_bch, coinmarketcap_v2, exchange_override, gdax_to_coinbasepro, quoine_spelling,
    BITTREX_TO_BCH, COINMARKETCAP, EXCHANGE_OVERRIDE, GDAX_TO_COINBASEPRO, QUOINE,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum MigrationError {
    #[error("registry error: {0}")]
    Registry(String),
    #[error("flag store error for migration `{name}`: {source}")]
    Flags { name: String, source: StoreError },
    #[error("record enumeration failed for migration `{name}`: {source}")]
    Enumerate { name: String, source: StoreError },
}

/// Failure reported by a host-provided record or flag store.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Why a record was left untouched by a step. Skips never abort a run.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// A stored identifier no longer maps to a known exchange, coin or currency.
    Unresolved { key: String, value: Option<String> },
    /// The record store failed while reading or writing this record.
    Storage { message: String },
}

impl SkipReason {
    #[must_use]
    pub fn unresolved(key: &str, value: Option<&str>) -> Self {
        Self::Unresolved { key: key.to_string(), value: value.map(str::to_string) }
    }
}

impl From<StoreError> for SkipReason {
    fn from(err: StoreError) -> Self {
        Self::Storage { message: err.message }
    }
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unresolved { key, value: Some(value) } => {
                write!(f, "unknown {key} `{value}`")
            }
            Self::Unresolved { key, value: None } => write!(f, "missing {key}"),
            Self::Storage { message } => write!(f, "storage failure: {message}"),
        }
    }
}

/// A single key assignment produced by a transform.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RecordWrite {
    pub key: String,
    pub value: String,
}

impl RecordWrite {
    pub fn new(key: &str, value: impl Into<String>) -> Self {
        Self { key: key.to_string(), value: value.into() }
    }
}
