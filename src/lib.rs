//! Custodial Solana transaction assembly
//!
//! Builds partially signed, base64-encoded transactions for batched asset
//! transfers and for the programmable-NFT custody cycle (delegate + lock,
//! unlock + revoke). Nothing here broadcasts: the owner's wallet completes
//! the signature and submits.

pub mod config;
pub mod ledger;
pub mod metrics;
pub mod observability;
pub mod signer;
pub mod structured_logging;
pub mod tx_builder;
pub mod types;
pub mod wallet;

pub mod test_utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
pub use tx_builder::{CustodyTxBuilder, CustodyTxError, OperationResult, SerializedTransaction};
pub use types::{AssetClass, AssetDescriptor, CustodyState, TransferIntent, TransferRequest};
