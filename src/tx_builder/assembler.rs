//! Transaction assembly
//!
//! Merges instructions, fee payer and anchor into a legacy transaction and
//! applies the custodial co-signature. The owner's slot is never touched:
//! what comes out is partially signed and meant to be completed by the
//! owner's wallet.

use solana_sdk::{
    instruction::Instruction, message::Message, pubkey::Pubkey, transaction::Transaction,
};
use spl_associated_token_account::get_associated_token_address;
use tracing::debug;

use super::anchor::{BlockhashAnchor, BlockhashProvider};
use super::errors::CustodyTxError;
use super::instructions::sanity_check_ix_order;
use super::output::SerializedTransaction;
use crate::signer::CoSigner;

/// Close `wallet`'s associated token account for each mint, rent back to `wallet`
pub fn close_empty_accounts(
    mints: &[Pubkey],
    wallet: &Pubkey,
) -> Result<Vec<Instruction>, CustodyTxError> {
    mints
        .iter()
        .map(|mint| {
            let account = get_associated_token_address(wallet, mint);
            spl_token::instruction::close_account(&spl_token::id(), &account, wallet, wallet, &[])
                .map_err(|e| {
                    CustodyTxError::assembly_failed(format!(
                        "close_account for {} failed: {}",
                        mint, e
                    ))
                })
        })
        .collect()
}

/// Transaction under construction
///
/// Can only become a `Transaction` once both fee payer and anchor are set.
#[derive(Debug, Clone, Default)]
pub struct TransactionDraft {
    fee_payer: Option<Pubkey>,
    anchor: Option<BlockhashAnchor>,
    instructions: Vec<Instruction>,
}

impl TransactionDraft {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            ..Default::default()
        }
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn extend(&mut self, instructions: impl IntoIterator<Item = Instruction>) {
        self.instructions.extend(instructions);
    }

    pub fn set_fee_payer(&mut self, fee_payer: Pubkey) {
        self.fee_payer = Some(fee_payer);
    }

    pub fn set_anchor(&mut self, anchor: BlockhashAnchor) {
        self.anchor = Some(anchor);
    }

    pub fn fee_payer(&self) -> Option<&Pubkey> {
        self.fee_payer.as_ref()
    }

    pub fn anchor(&self) -> Option<&BlockhashAnchor> {
        self.anchor.as_ref()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Compile into an unsigned transaction
    pub fn finalize(&self) -> Result<Transaction, CustodyTxError> {
        let fee_payer = self
            .fee_payer
            .ok_or_else(|| CustodyTxError::assembly_failed("fee payer not set"))?;
        let anchor = self
            .anchor
            .ok_or_else(|| CustodyTxError::assembly_failed("anchor not set"))?;
        if self.instructions.is_empty() {
            return Err(CustodyTxError::assembly_failed("no instructions to assemble"));
        }
        sanity_check_ix_order(&self.instructions)?;

        let message =
            Message::new_with_blockhash(&self.instructions, Some(&fee_payer), &anchor.blockhash);
        Ok(Transaction::new_unsigned(message))
    }
}

/// An assembled, possibly co-signed transaction and the anchor it is pinned to
#[derive(Debug, Clone)]
pub struct AssembledTransaction {
    pub transaction: Transaction,
    pub anchor: BlockhashAnchor,
}

impl AssembledTransaction {
    pub fn serialize(&self) -> Result<SerializedTransaction, CustodyTxError> {
        SerializedTransaction::from_transaction(&self.transaction)
    }
}

/// Composes drafts into co-signed transactions
#[derive(Clone)]
pub struct TransactionAssembler {
    anchors: BlockhashProvider,
}

impl TransactionAssembler {
    pub fn new(anchors: BlockhashProvider) -> Self {
        Self { anchors }
    }

    /// Acquire a fresh anchor, then assemble and co-sign
    pub async fn assemble(
        &self,
        instructions: Vec<Instruction>,
        fee_payer: &Pubkey,
        co_signer: Option<&dyn CoSigner>,
    ) -> Result<AssembledTransaction, CustodyTxError> {
        let anchor = self.anchors.acquire_anchor().await?;
        self.assemble_with_anchor(instructions, fee_payer, anchor, co_signer)
            .await
    }

    /// Assemble against a caller-supplied anchor
    pub async fn assemble_with_anchor(
        &self,
        instructions: Vec<Instruction>,
        fee_payer: &Pubkey,
        anchor: BlockhashAnchor,
        co_signer: Option<&dyn CoSigner>,
    ) -> Result<AssembledTransaction, CustodyTxError> {
        let mut draft = TransactionDraft::new(instructions);
        draft.set_fee_payer(*fee_payer);
        draft.set_anchor(anchor);

        let mut transaction = draft.finalize()?;

        if let Some(signer) = co_signer {
            signer.sign_partial(&mut transaction).await?;
            debug!(
                co_signer = %signer.pubkey(),
                fee_payer = %fee_payer,
                "Co-signature applied"
            );
        }

        debug!(
            instruction_count = transaction.message.instructions.len(),
            required_signatures = transaction.message.header.num_required_signatures,
            blockhash = %anchor.blockhash,
            "Transaction assembled"
        );

        Ok(AssembledTransaction {
            transaction,
            anchor,
        })
    }
}
