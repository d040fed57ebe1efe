//! Ledger collaborator seams
//!
//! The transaction builder never talks to the network directly. It goes
//! through these two traits, which the surrounding infrastructure
//! implements (see `RpcLedgerClient` and `RpcAssetRegistry` for the
//! JSON-RPC backed versions).

use async_trait::async_trait;
use solana_sdk::{hash::Hash, pubkey::Pubkey, transaction::Transaction};
use thiserror::Error;

use crate::types::{AssetDescriptor, CustodyState};

pub mod account_data;
pub mod registry;
pub mod rpc_client;

pub use registry::RpcAssetRegistry;
pub use rpc_client::RpcLedgerClient;

/// Errors reported by ledger collaborators
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Transport-level errors (network, connection)
    #[error("Transport error during {operation}: {message}")]
    Transport { operation: String, message: String },

    /// Call did not complete within its deadline
    #[error("Timeout after {timeout_ms}ms during {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// RPC response errors (from the RPC server)
    #[error("RPC response error during {operation}: {message}")]
    RpcResponse { operation: String, message: String },

    #[error("Account not found: {0}")]
    AccountNotFound(Pubkey),

    /// Account exists but its data does not match the expected layout
    #[error("Failed to decode {account}: {reason}")]
    Decode { account: Pubkey, reason: String },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Outcome of a dry run, as reported by the network
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationOutcome {
    /// Program log lines, in emission order
    pub logs: Vec<String>,
    /// Transaction-level error rendered as text, if execution failed
    pub err: Option<String>,
    pub units_consumed: Option<u64>,
}

/// Network client the builder needs
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Latest blockhash and the last block height at which it is valid
    async fn fetch_latest_anchor(&self) -> LedgerResult<(Hash, u64)>;

    /// Current block height, used to decide whether an anchor expired
    async fn fetch_block_height(&self) -> LedgerResult<u64>;

    async fn account_exists(&self, address: &Pubkey) -> LedgerResult<bool>;

    /// Raw account data, `None` when the account does not exist
    async fn account_data(&self, address: &Pubkey) -> LedgerResult<Option<Vec<u8>>>;

    /// Dry-run a (partially signed) transaction without signature checks
    async fn simulate(&self, transaction: &Transaction) -> LedgerResult<SimulationOutcome>;

    /// Mints whose token account owned by `owner` holds a zero balance
    async fn find_empty_token_accounts(&self, owner: &Pubkey) -> LedgerResult<Vec<Pubkey>>;

    /// Wallet holding the single unit of a non-fungible asset, if any
    async fn find_owner_by_mint(&self, mint: &Pubkey) -> LedgerResult<Option<Pubkey>>;
}

/// Metadata registry lookups
#[async_trait]
pub trait AssetRegistry: Send + Sync {
    /// Class, decimals and authorization rules of an asset
    async fn lookup_asset(&self, mint: &Pubkey) -> LedgerResult<AssetDescriptor>;

    /// Custody state of `mint` held by `owner`, from its authority records
    async fn custody_state(&self, mint: &Pubkey, owner: &Pubkey) -> LedgerResult<CustodyState>;
}
