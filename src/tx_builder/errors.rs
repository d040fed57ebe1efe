//! Error types for the custody transaction builder
//!
//! Every public operation returns either a usable transaction artifact or
//! one of these values. Nothing is swallowed: collaborator failures are
//! classified into the kind the caller can act on.
//!
//! - `AnchorUnavailable`: blockhash acquisition exhausted its retry budget
//! - `SourceAccountMissing`: the debit side has no token account
//! - `AssetLookupFailed`: registry could not describe an asset (aborts batches)
//! - `SimulationRejected`: dry-run matched a failure signature
//! - `AssemblyFailed`: anything unexpected from a collaborator

use crate::ledger::LedgerError;
use crate::types::CustodyState;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Error taxonomy for all custody transaction operations
#[derive(Error, Debug)]
pub enum CustodyTxError {
    /// Blockhash acquisition exhausted its bounded retries or timed out
    #[error("Anchor unavailable: {0}")]
    AnchorUnavailable(String),

    /// Cannot debit from a token account that does not exist
    #[error("Source account missing (mint={mint}, owner={owner})")]
    SourceAccountMissing {
        /// Asset being debited
        mint: Pubkey,
        /// Wallet that was expected to hold it
        owner: Pubkey,
    },

    /// The asset registry failed to describe an asset
    ///
    /// In batched operations this aborts the entire batch.
    #[error("Asset lookup failed (mint={mint}): {reason}")]
    AssetLookupFailed {
        /// Asset that could not be resolved
        mint: Pubkey,
        /// Detailed reason for the failure
        reason: String,
    },

    /// Pre-flight simulation matched a failure signature
    #[error("Simulation rejected: {signature}")]
    SimulationRejected {
        /// The failure signature that matched
        signature: String,
        /// Full simulation log, in order
        logs: Vec<String>,
    },

    /// Custody state machine was driven through an illegal transition
    #[error("Invalid custody transition: cannot {action} from {from:?}")]
    InvalidTransition {
        /// State the asset was in
        from: CustodyState,
        /// Transition that was attempted
        action: &'static str,
    },

    /// Caller supplied an unusable intent (bad amount, empty input, ...)
    #[error("Invalid intent: {0}")]
    InvalidIntent(String),

    /// Configuration or validation error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unexpected collaborator or assembly failure
    #[error("Assembly failed: {0}")]
    AssemblyFailed(String),
}

impl CustodyTxError {
    /// Check if this error is potentially retryable by the caller
    ///
    /// The builder itself never retries anything except anchor acquisition.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AnchorUnavailable(_) => true,
            Self::AssemblyFailed(_) => true,
            Self::AssetLookupFailed { .. } => true,

            Self::SourceAccountMissing { .. } => false,
            Self::SimulationRejected { .. } => false,
            Self::InvalidTransition { .. } => false,
            Self::InvalidIntent(_) => false,
            Self::Configuration(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::AnchorUnavailable(_) => "anchor",
            Self::SourceAccountMissing { .. } => "source_account",
            Self::AssetLookupFailed { .. } => "asset_lookup",
            Self::SimulationRejected { .. } => "simulation",
            Self::InvalidTransition { .. } => "custody",
            Self::InvalidIntent(_) => "intent",
            Self::Configuration(_) => "config",
            Self::AssemblyFailed(_) => "assembly",
        }
    }

    /// Raw simulation logs, when the error came from a rejected simulation
    pub fn simulation_logs(&self) -> Option<&[String]> {
        match self {
            Self::SimulationRejected { logs, .. } => Some(logs),
            _ => None,
        }
    }
}

// Convenience constructors
impl CustodyTxError {
    pub fn anchor_unavailable(reason: impl Into<String>) -> Self {
        Self::AnchorUnavailable(reason.into())
    }

    pub fn lookup_failed(mint: Pubkey, reason: impl Into<String>) -> Self {
        Self::AssetLookupFailed {
            mint,
            reason: reason.into(),
        }
    }

    pub fn assembly_failed(reason: impl Into<String>) -> Self {
        Self::AssemblyFailed(reason.into())
    }

    pub fn invalid_intent(reason: impl Into<String>) -> Self {
        Self::InvalidIntent(reason.into())
    }
}

impl From<LedgerError> for CustodyTxError {
    fn from(err: LedgerError) -> Self {
        Self::AssemblyFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CustodyTxError::AnchorUnavailable("exhausted".to_string());
        assert_eq!(err.to_string(), "Anchor unavailable: exhausted");

        let err = CustodyTxError::SimulationRejected {
            signature: "Token is locked".to_string(),
            logs: vec![],
        };
        assert_eq!(err.to_string(), "Simulation rejected: Token is locked");

        let err = CustodyTxError::InvalidTransition {
            from: CustodyState::Unlocked,
            action: "lock",
        };
        assert_eq!(
            err.to_string(),
            "Invalid custody transition: cannot lock from Unlocked"
        );
    }

    #[test]
    fn test_error_retryability() {
        assert!(CustodyTxError::anchor_unavailable("x").is_retryable());
        assert!(CustodyTxError::assembly_failed("x").is_retryable());

        assert!(!CustodyTxError::invalid_intent("x").is_retryable());
        assert!(!CustodyTxError::SimulationRejected {
            signature: "failed".to_string(),
            logs: vec![],
        }
        .is_retryable());
    }

    #[test]
    fn test_ledger_error_becomes_assembly_failure() {
        let err: CustodyTxError = LedgerError::Timeout {
            operation: "simulate".to_string(),
            timeout_ms: 500,
        }
        .into();
        assert_eq!(err.category(), "assembly");
        assert!(err.to_string().contains("simulate"));
    }

    #[test]
    fn test_simulation_logs_accessor() {
        let err = CustodyTxError::SimulationRejected {
            signature: "Error".to_string(),
            logs: vec!["Program log: Error".to_string()],
        };
        assert_eq!(err.simulation_logs().map(|l| l.len()), Some(1));
        assert!(CustodyTxError::invalid_intent("x").simulation_logs().is_none());
    }
}
