//! JSON-RPC implementation of `LedgerClient`

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_account_decoder::UiAccountData;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::RpcSimulateTransactionConfig;
use solana_rpc_client_api::request::TokenAccountsFilter;
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey, transaction::Transaction,
};
use spl_token::solana_program::program_pack::Pack;
use tracing::{debug, warn};

use super::{LedgerClient, LedgerError, LedgerResult, SimulationOutcome};
use crate::config::RpcConfig;

/// `LedgerClient` over a single Solana JSON-RPC endpoint
///
/// Each call is bounded by `request_timeout` on top of the HTTP client's
/// own timeout so a stalled endpoint can never hang the pipeline.
#[derive(Clone)]
pub struct RpcLedgerClient {
    rpc: Arc<RpcClient>,
    endpoint: String,
    commitment: CommitmentConfig,
    request_timeout: Duration,
}

impl RpcLedgerClient {
    pub fn new(endpoint: impl Into<String>, commitment: CommitmentConfig, timeout: Duration) -> Self {
        let endpoint = endpoint.into();
        let rpc = RpcClient::new_with_timeout_and_commitment(endpoint.clone(), timeout, commitment);
        Self {
            rpc: Arc::new(rpc),
            endpoint,
            commitment,
            request_timeout: timeout,
        }
    }

    pub fn from_config(config: &RpcConfig) -> Result<Self, LedgerError> {
        let commitment = CommitmentConfig::from_str(&config.commitment).map_err(|e| {
            LedgerError::RpcResponse {
                operation: "configure".to_string(),
                message: format!("invalid commitment '{}': {}", config.commitment, e),
            }
        })?;
        Ok(Self::new(
            config.endpoint.clone(),
            commitment,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T, F>(&self, operation: &str, fut: F) -> LedgerResult<T>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                debug!(endpoint = %self.endpoint, operation, error = %e, "RPC call failed");
                Err(map_client_error(operation, e))
            }
            Err(_) => Err(LedgerError::Timeout {
                operation: operation.to_string(),
                timeout_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }
}

fn map_client_error(operation: &str, err: ClientError) -> LedgerError {
    match err.kind() {
        ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => LedgerError::Transport {
            operation: operation.to_string(),
            message: err.to_string(),
        },
        _ => LedgerError::RpcResponse {
            operation: operation.to_string(),
            message: err.to_string(),
        },
    }
}

/// Mint of a jsonParsed token account whose balance is zero
fn empty_token_account_mint(parsed: &serde_json::Value) -> Option<Pubkey> {
    let info = parsed.get("info")?;
    let amount = info.get("tokenAmount")?.get("amount")?.as_str()?;
    if amount != "0" {
        return None;
    }
    Pubkey::from_str(info.get("mint")?.as_str()?).ok()
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn fetch_latest_anchor(&self) -> LedgerResult<(Hash, u64)> {
        self.call(
            "getLatestBlockhash",
            self.rpc.get_latest_blockhash_with_commitment(self.commitment),
        )
        .await
    }

    async fn fetch_block_height(&self) -> LedgerResult<u64> {
        self.call("getBlockHeight", self.rpc.get_block_height()).await
    }

    async fn account_exists(&self, address: &Pubkey) -> LedgerResult<bool> {
        Ok(self.account_data(address).await?.is_some())
    }

    async fn account_data(&self, address: &Pubkey) -> LedgerResult<Option<Vec<u8>>> {
        let response = self
            .call(
                "getAccountInfo",
                self.rpc.get_account_with_commitment(address, self.commitment),
            )
            .await?;
        Ok(response.value.map(|account| account.data))
    }

    async fn simulate(&self, transaction: &Transaction) -> LedgerResult<SimulationOutcome> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: false,
            commitment: Some(self.commitment),
            ..Default::default()
        };
        let response = self
            .call(
                "simulateTransaction",
                self.rpc.simulate_transaction_with_config(transaction, config),
            )
            .await?;

        let value = response.value;
        Ok(SimulationOutcome {
            logs: value.logs.unwrap_or_default(),
            err: value.err.map(|e| format!("{:?}", e)),
            units_consumed: value.units_consumed,
        })
    }

    async fn find_empty_token_accounts(&self, owner: &Pubkey) -> LedgerResult<Vec<Pubkey>> {
        let accounts = self
            .call(
                "getTokenAccountsByOwner",
                self.rpc
                    .get_token_accounts_by_owner(owner, TokenAccountsFilter::ProgramId(spl_token::id())),
            )
            .await?;

        let mut mints = Vec::new();
        for keyed in accounts {
            match &keyed.account.data {
                UiAccountData::Json(parsed) => {
                    if let Some(mint) = empty_token_account_mint(&parsed.parsed) {
                        mints.push(mint);
                    }
                }
                _ => warn!(account = %keyed.pubkey, "Token account returned without parsed data"),
            }
        }
        Ok(mints)
    }

    async fn find_owner_by_mint(&self, mint: &Pubkey) -> LedgerResult<Option<Pubkey>> {
        let balances = self
            .call(
                "getTokenLargestAccounts",
                self.rpc.get_token_largest_accounts(mint),
            )
            .await?;

        let Some(holder) = balances.iter().find(|b| b.amount.amount == "1") else {
            return Ok(None);
        };
        let address = Pubkey::from_str(&holder.address).map_err(|e| LedgerError::RpcResponse {
            operation: "getTokenLargestAccounts".to_string(),
            message: format!("invalid holder address '{}': {}", holder.address, e),
        })?;

        let Some(data) = self.account_data(&address).await? else {
            return Ok(None);
        };
        let account = spl_token::state::Account::unpack(&data).map_err(|e| LedgerError::Decode {
            account: address,
            reason: e.to_string(),
        })?;
        Ok(Some(account.owner))
    }
}
