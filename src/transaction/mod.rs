//! Chaincode invocation and event confirmation
//!
//! - `client` - query/execute with retry and the execute-then-confirm cycle
//! - `events` - event filters, scoped registrations and event streams

pub mod client;
pub mod events;

pub use client::{Confirmation, TransactionClient, TxState};
pub use events::{ChaincodeEvent, EventFilter, EventStream, Registration};

use serde::{Deserialize, Serialize};

/// Whether a request may mutate the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Query,
    Execute,
}

/// A chaincode invocation: target chaincode, function and ordered byte-string arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub chaincode_id: String,
    pub function: String,
    #[serde(with = "crate::types::base64_byte_list")]
    pub args: Vec<Vec<u8>>,
}

impl TransactionRequest {
    pub fn new(chaincode_id: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            chaincode_id: chaincode_id.into(),
            function: function.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Vec<u8>>) -> Self {
        self.args = args;
        self
    }

    /// Arguments rendered as text, for logs.
    pub fn display_args(&self) -> String {
        self.args
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
