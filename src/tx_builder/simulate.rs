//! Pre-flight simulation
//!
//! Dry-runs an assembled (partially signed) transaction and scans the
//! returned logs for known failure signatures. Signatures are checked in a
//! fixed precedence order: the first signature (not the first log line)
//! that matches anywhere in the log wins. A transaction-level execution
//! error with no matching log line still rejects, with the generic `Error`
//! signature.

use std::sync::Arc;

use solana_sdk::transaction::Transaction;
use tracing::{debug, warn};

use super::errors::CustodyTxError;
use crate::ledger::LedgerClient;
use crate::metrics;

/// Failure signatures in precedence order
pub const FAILURE_SIGNATURES: [&str; 6] = [
    "InstructionError",
    "AccountNotFound",
    "InvalidProgramId",
    "Error",
    "failed",
    "Token is locked",
];

/// Signature reported when execution failed without a recognizable log line
const GENERIC_FAILURE: &str = "Error";

/// Result of a dry run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationVerdict {
    pub ok: bool,
    pub matched_error_signature: Option<String>,
    /// First log line containing the matched signature
    pub offending_log: Option<String>,
    pub raw_logs: Vec<String>,
}

impl SimulationVerdict {
    /// Classify a log stream and optional execution error
    pub fn from_logs(logs: Vec<String>, execution_err: Option<&str>) -> Self {
        for signature in FAILURE_SIGNATURES {
            if let Some(line) = logs.iter().find(|line| line.contains(signature)) {
                return Self {
                    ok: false,
                    matched_error_signature: Some(signature.to_string()),
                    offending_log: Some(line.clone()),
                    raw_logs: logs,
                };
            }
        }

        if execution_err.is_some() {
            return Self {
                ok: false,
                matched_error_signature: Some(GENERIC_FAILURE.to_string()),
                offending_log: None,
                raw_logs: logs,
            };
        }

        Self {
            ok: true,
            matched_error_signature: None,
            offending_log: None,
            raw_logs: logs,
        }
    }

    /// Convert a rejection into `SimulationRejected`
    pub fn into_result(self) -> Result<Vec<String>, CustodyTxError> {
        if self.ok {
            return Ok(self.raw_logs);
        }
        Err(CustodyTxError::SimulationRejected {
            signature: self
                .matched_error_signature
                .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
            logs: self.raw_logs,
        })
    }
}

/// Runs dry runs through the ledger client
#[derive(Clone)]
pub struct SimulationValidator {
    client: Arc<dyn LedgerClient>,
}

impl SimulationValidator {
    pub fn new(client: Arc<dyn LedgerClient>) -> Self {
        Self { client }
    }

    /// Simulate without signature verification and classify the outcome
    ///
    /// Transport failures surface as `AssemblyFailed`; they are not verdicts.
    pub async fn simulate(&self, transaction: &Transaction) -> Result<SimulationVerdict, CustodyTxError> {
        let outcome = self.client.simulate(transaction).await?;
        let verdict = SimulationVerdict::from_logs(outcome.logs, outcome.err.as_deref());

        if verdict.ok {
            debug!(
                log_lines = verdict.raw_logs.len(),
                units_consumed = ?outcome.units_consumed,
                "Simulation passed"
            );
        } else {
            let signature = verdict.matched_error_signature.as_deref().unwrap_or(GENERIC_FAILURE);
            metrics::record_simulation_rejected(signature);
            warn!(
                signature,
                offending_log = ?verdict.offending_log,
                execution_error = ?outcome.err,
                "Simulation rejected transaction"
            );
        }

        Ok(verdict)
    }

    /// Simulate and fail with `SimulationRejected` on any matched signature
    pub async fn validate(&self, transaction: &Transaction) -> Result<Vec<String>, CustodyTxError> {
        self.simulate(transaction).await?.into_result()
    }
}
