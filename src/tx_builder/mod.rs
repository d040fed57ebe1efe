//! Custody transaction builder supercomponent
//!
//! Assembles unsigned, multi-instruction Solana transactions for two
//! custodial workflows:
//!
//! - batched asset transfers that also reclaim the emptied token accounts
//! - the delegate/lock and unlock/revoke custody cycle for programmable NFTs
//!
//! ## Architecture
//!
//! - **anchor**: bounded blockhash acquisition and expiry tracking
//! - **instructions**: per-asset instruction synthesis and ordering checks
//! - **metadata_ix**: Token Metadata program instructions and PDAs
//! - **batch**: order-preserving partitioning into transaction-sized groups
//! - **assembler**: drafts, close-account instructions, co-signing
//! - **simulate**: dry runs classified against known failure signatures
//! - **custody**: the custody state machine
//! - **builder**: `CustodyTxBuilder`, the public operations
//! - **output**: serialized hand-off formats
//! - **errors**: error taxonomy
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use custody_tx::config::CustodyConfig;
//! use custody_tx::ledger::{RpcAssetRegistry, RpcLedgerClient};
//! use custody_tx::tx_builder::{CustodyTxBuilder, OperationResult};
//! use custody_tx::wallet::CustodyKeys;
//! # use solana_sdk::pubkey::Pubkey;
//!
//! # async fn example(owner: Pubkey, mint: Pubkey) -> anyhow::Result<()> {
//! let config = CustodyConfig::from_file_with_env("custody.toml")?;
//! let client = Arc::new(RpcLedgerClient::from_config(&config.rpc)?);
//! let registry = Arc::new(RpcAssetRegistry::new(client.clone()));
//! let keys = CustodyKeys::from_config(&config.keys)?;
//!
//! let builder = CustodyTxBuilder::from_keys(&config, client, registry, keys)?;
//! let result: OperationResult = builder
//!     .build_delegate_and_lock(&owner, &mint)
//!     .await
//!     .into();
//! println!("{}", result.to_json()?);
//! # Ok(())
//! # }
//! ```

pub mod anchor;
pub mod assembler;
pub mod batch;
mod builder;
pub mod custody;
pub mod errors;
pub mod instructions;
pub mod metadata_ix;
pub mod output;
pub mod simulate;

pub use anchor::{AnchorPolicy, BlockhashAnchor, BlockhashProvider};
pub use assembler::{close_empty_accounts, AssembledTransaction, TransactionAssembler, TransactionDraft};
pub use batch::partition;
pub use builder::CustodyTxBuilder;
pub use custody::{CustodyAction, CustodyPlan, CustodyStateMachine};
pub use errors::CustodyTxError;
pub use instructions::{sanity_check_ix_order, InstructionBuilder, InstructionPlan};
pub use output::{OperationResult, SerializedTransaction};
pub use simulate::{SimulationValidator, SimulationVerdict, FAILURE_SIGNATURES};
