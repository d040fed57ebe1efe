//! Co-signature abstraction
//!
//! The builder only ever applies *partial* signatures: a custodial key signs
//! its own slot and every other slot (the owner's) is left for the caller's
//! wallet to fill in.

use async_trait::async_trait;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::Transaction,
};

use crate::tx_builder::CustodyTxError;

/// Async partial signer
#[async_trait]
pub trait CoSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    /// Sign this signer's slot, leaving all other signatures untouched
    async fn sign_partial(&self, transaction: &mut Transaction) -> Result<(), CustodyTxError>;
}

/// Local keypair co-signer
pub struct LocalCoSigner {
    keypair: Keypair,
}

impl LocalCoSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }
}

#[async_trait]
impl CoSigner for LocalCoSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign_partial(&self, transaction: &mut Transaction) -> Result<(), CustodyTxError> {
        let blockhash = transaction.message.recent_blockhash;
        transaction
            .try_partial_sign(&[&self.keypair], blockhash)
            .map_err(|e| {
                CustodyTxError::assembly_failed(format!(
                    "co-signature by {} failed: {}",
                    self.keypair.pubkey(),
                    e
                ))
            })
    }
}
