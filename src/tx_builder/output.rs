//! Hand-off formats
//!
//! `SerializedTransaction` is what leaves the builder: the wire bytes of a
//! partially signed transaction, base64 encoded, together with the signer
//! slots that are still open. `OperationResult` is the JSON envelope the
//! surrounding service returns to its callers.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use solana_sdk::{packet::PACKET_DATA_SIZE, pubkey::Pubkey, signature::Signature, transaction::Transaction};
use tracing::warn;

use super::errors::CustodyTxError;

/// A partially signed transaction ready for the owner's wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedTransaction {
    /// Base64 (standard alphabet) of the bincode wire format
    pub base64: String,

    /// Wire size in bytes
    pub size: usize,

    /// Serialized size exceeds what fits in a single network packet
    pub oversize: bool,

    /// Signers whose slot is still empty, in message order
    #[serde(with = "pubkey_list")]
    pub pending_signers: Vec<Pubkey>,
}

impl SerializedTransaction {
    /// Serialize a (possibly partially signed) transaction
    ///
    /// Refuses transactions with no blockhash or no fee payer.
    pub fn from_transaction(transaction: &Transaction) -> Result<Self, CustodyTxError> {
        if transaction.message.recent_blockhash == Default::default() {
            return Err(CustodyTxError::assembly_failed(
                "refusing to serialize a transaction without a blockhash",
            ));
        }
        if transaction.message.account_keys.is_empty()
            || transaction.message.header.num_required_signatures == 0
        {
            return Err(CustodyTxError::assembly_failed(
                "refusing to serialize a transaction without a fee payer",
            ));
        }

        let bytes = bincode::serialize(transaction)
            .map_err(|e| CustodyTxError::assembly_failed(format!("serialization failed: {}", e)))?;

        let size = bytes.len();
        let oversize = size > PACKET_DATA_SIZE;
        if oversize {
            warn!(
                size,
                limit = PACKET_DATA_SIZE,
                "Serialized transaction exceeds packet size"
            );
        }

        Ok(Self {
            base64: STANDARD.encode(&bytes),
            size,
            oversize,
            pending_signers: pending_signers(transaction),
        })
    }

    /// Decode back into a transaction (for inspection and tests)
    pub fn decode(&self) -> Result<Transaction, CustodyTxError> {
        let bytes = STANDARD
            .decode(&self.base64)
            .map_err(|e| CustodyTxError::assembly_failed(format!("invalid base64: {}", e)))?;
        bincode::deserialize(&bytes)
            .map_err(|e| CustodyTxError::assembly_failed(format!("invalid transaction bytes: {}", e)))
    }
}

/// Required signers whose signature slot is still the default
pub fn pending_signers(transaction: &Transaction) -> Vec<Pubkey> {
    let required = transaction.message.header.num_required_signatures as usize;
    transaction
        .message
        .account_keys
        .iter()
        .take(required)
        .zip(transaction.signatures.iter())
        .filter(|(_, sig)| **sig == Signature::default())
        .map(|(key, _)| *key)
        .collect()
}

/// JSON envelope returned to callers
///
/// Exactly one of `transactions` or `message` is meaningful: success
/// carries the base64 transactions, failure carries the message and, when a
/// simulation rejected the transaction, its raw log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<Vec<String>>,
    pub transactions: Option<Vec<String>>,
}

impl OperationResult {
    pub fn success(transactions: &[SerializedTransaction]) -> Self {
        Self {
            error: false,
            message: None,
            log: None,
            transactions: Some(transactions.iter().map(|t| t.base64.clone()).collect()),
        }
    }

    pub fn failure(err: &CustodyTxError) -> Self {
        let message = match err {
            CustodyTxError::SimulationRejected { signature, .. } => signature.clone(),
            other => other.to_string(),
        };
        Self {
            error: true,
            message: Some(message),
            log: err.simulation_logs().map(<[String]>::to_vec),
            transactions: None,
        }
    }

    pub fn to_json(&self) -> Result<String, CustodyTxError> {
        serde_json::to_string(self)
            .map_err(|e| CustodyTxError::assembly_failed(format!("result encoding failed: {}", e)))
    }
}

impl From<Result<Vec<SerializedTransaction>, CustodyTxError>> for OperationResult {
    fn from(result: Result<Vec<SerializedTransaction>, CustodyTxError>) -> Self {
        match result {
            Ok(transactions) => Self::success(&transactions),
            Err(e) => Self::failure(&e),
        }
    }
}

impl From<Result<SerializedTransaction, CustodyTxError>> for OperationResult {
    fn from(result: Result<SerializedTransaction, CustodyTxError>) -> Self {
        result.map(|t| vec![t]).into()
    }
}

mod pubkey_list {
    use serde::{Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(keys: &[Pubkey], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(keys.iter().map(|k| k.to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Pubkey>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| Pubkey::from_str(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
