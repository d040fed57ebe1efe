//! Shared fixtures for the pipeline scenario tests

use std::sync::Arc;

use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};

use crate::config::CustodyConfig;
use crate::signer::LocalCoSigner;
use crate::test_utils::{MockAssetRegistry, MockLedgerClient};
use crate::tx_builder::metadata_ix::TOKEN_METADATA_PROGRAM_ID;
use crate::tx_builder::CustodyTxBuilder;

pub const LAST_VALID_BLOCK_HEIGHT: u64 = 1_000;

/// Builder wired to in-memory collaborators
pub struct Harness {
    pub client: Arc<MockLedgerClient>,
    pub registry: Arc<MockAssetRegistry>,
    pub custody: Keypair,
    pub delegate: Keypair,
    pub blockhash: Hash,
    pub builder: CustodyTxBuilder,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CustodyConfig::default())
    }

    pub fn with_config(config: CustodyConfig) -> Self {
        let blockhash = Hash::new_unique();
        let client = Arc::new(MockLedgerClient::with_anchor(blockhash, LAST_VALID_BLOCK_HEIGHT));
        let registry = Arc::new(MockAssetRegistry::new());
        let custody = Keypair::new();
        let delegate = Keypair::new();

        let builder = CustodyTxBuilder::new(
            &config,
            client.clone(),
            registry.clone(),
            Arc::new(LocalCoSigner::new(custody.insecure_clone())),
            Arc::new(LocalCoSigner::new(delegate.insecure_clone())),
        )
        .unwrap();

        Self {
            client,
            registry,
            custody,
            delegate,
            blockhash,
            builder,
        }
    }
}

/// Program ids of the compiled instructions, in order
pub fn program_ids(tx: &Transaction) -> Vec<Pubkey> {
    tx.message
        .instructions
        .iter()
        .map(|ix| *ix.program_id(&tx.message.account_keys))
        .collect()
}

/// Discriminants of the metadata program instructions, in order
pub fn metadata_sequence(tx: &Transaction) -> Vec<u8> {
    tx.message
        .instructions
        .iter()
        .filter(|ix| *ix.program_id(&tx.message.account_keys) == TOKEN_METADATA_PROGRAM_ID)
        .filter_map(|ix| ix.data.first().copied())
        .collect()
}

/// Whether `key` has already signed `tx`
pub fn has_signed(tx: &Transaction, key: &Pubkey) -> bool {
    tx.message
        .account_keys
        .iter()
        .position(|k| k == key)
        .and_then(|i| tx.signatures.get(i))
        .is_some_and(|sig| *sig != Signature::default())
}

pub fn fee_payer(tx: &Transaction) -> Pubkey {
    tx.message.account_keys[0]
}

pub fn pubkey_of(keypair: &Keypair) -> Pubkey {
    keypair.pubkey()
}
