//! Per-asset instruction synthesis and ordering validation
//!
//! Given a resolved transfer intent and the transaction payer, produce the
//! ordered instruction list for one asset:
//! 1. create the destination associated token account (only if missing)
//! 2. the transfer itself
//!
//! Fungible tokens use SPL `TransferChecked` (amount plus decimals, so the
//! token program rejects precision mismatches). Programmable NFTs go through
//! the metadata program's `Transfer`, never a raw token transfer.
//!
//! Output is deterministic for identical inputs and identical on-chain
//! account existence.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account,
};
use tracing::debug;

use super::errors::CustodyTxError;
use super::metadata_ix::{self, AssetAccounts};
use crate::ledger::{AssetRegistry, LedgerClient};
use crate::types::{AssetClass, TransferIntent, TransferRequest};

/// SPL token `TransferChecked` instruction tag
#[cfg_attr(not(debug_assertions), allow(dead_code))]
const SPL_TRANSFER_CHECKED: u8 = 12;

/// Ordered instructions for one asset (or a merged batch)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstructionPlan {
    pub instructions: Vec<Instruction>,
}

impl InstructionPlan {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Append another plan, preserving both orders
    pub fn append(&mut self, other: InstructionPlan) {
        self.instructions.extend(other.instructions);
    }

    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }

    /// Concatenate per-asset plans that share one transaction
    ///
    /// Each plan checked account existence on its own, so two transfers of
    /// the same mint into a missing account both ask to create it. Only the
    /// first creation of a given associated account is kept.
    pub fn merge_group(plans: Vec<InstructionPlan>) -> InstructionPlan {
        let mut created = HashSet::new();
        let instructions = plans
            .into_iter()
            .flat_map(InstructionPlan::into_instructions)
            .filter(|ix| match created_account(ix) {
                Some(account) => created.insert(account),
                None => true,
            })
            .collect();
        InstructionPlan::new(instructions)
    }
}

/// Associated account an ATA-program instruction creates
fn created_account(ix: &Instruction) -> Option<Pubkey> {
    if ix.program_id != spl_associated_token_account::id() {
        return None;
    }
    ix.accounts.get(1).map(|meta| meta.pubkey)
}

/// Builds transfer instructions, checking account existence per call
#[derive(Clone)]
pub struct InstructionBuilder {
    client: Arc<dyn LedgerClient>,
    registry: Arc<dyn AssetRegistry>,
}

impl InstructionBuilder {
    pub fn new(client: Arc<dyn LedgerClient>, registry: Arc<dyn AssetRegistry>) -> Self {
        Self { client, registry }
    }

    /// Resolve a caller request into an intent via the asset registry
    pub async fn resolve(
        &self,
        request: &TransferRequest,
        default_destination: &Pubkey,
    ) -> Result<TransferIntent, CustodyTxError> {
        let asset = self
            .registry
            .lookup_asset(&request.mint)
            .await
            .map_err(|e| CustodyTxError::lookup_failed(request.mint, e.to_string()))?;

        Ok(TransferIntent {
            asset,
            amount: request.amount,
            source: request.source,
            destination: request.destination.unwrap_or(*default_destination),
        })
    }

    /// Build the ordered instructions for one transfer intent
    pub async fn build(
        &self,
        intent: &TransferIntent,
        payer: &Pubkey,
    ) -> Result<InstructionPlan, CustodyTxError> {
        let mint = intent.asset.mint;
        let amount = intent.base_units()?;

        let source_token = get_associated_token_address(&intent.source, &mint);
        if !self.client.account_exists(&source_token).await? {
            return Err(CustodyTxError::SourceAccountMissing {
                mint,
                owner: intent.source,
            });
        }

        let plan = match intent.asset.class {
            AssetClass::Fungible => {
                let destination_token = get_associated_token_address(&intent.destination, &mint);
                let mut instructions = Vec::with_capacity(2);

                if !self.client.account_exists(&destination_token).await? {
                    debug!(
                        mint = %mint,
                        destination = %intent.destination,
                        funder = %payer,
                        "Destination token account missing, prepending creation"
                    );
                    instructions.push(create_associated_token_account(
                        payer,
                        &intent.destination,
                        &mint,
                        &spl_token::id(),
                    ));
                }

                let transfer = spl_token::instruction::transfer_checked(
                    &spl_token::id(),
                    &source_token,
                    &mint,
                    &destination_token,
                    &intent.source,
                    &[],
                    amount,
                    intent.asset.decimals,
                )
                .map_err(|e| {
                    CustodyTxError::assembly_failed(format!(
                        "transfer_checked for {} failed: {}",
                        mint, e
                    ))
                })?;
                instructions.push(transfer);
                InstructionPlan::new(instructions)
            }
            AssetClass::ProgrammableNonFungible { rule_set } => {
                let accounts = AssetAccounts::derive(&mint, &intent.source, rule_set);
                InstructionPlan::new(vec![metadata_ix::transfer(
                    &accounts,
                    &intent.destination,
                    payer,
                    amount,
                )?])
            }
        };

        debug!(
            mint = %mint,
            amount,
            instruction_count = plan.len(),
            programmable = intent.asset.class.is_programmable(),
            "Transfer instructions built"
        );
        Ok(plan)
    }

    /// Build every intent of one transaction and merge them in input order
    pub async fn build_group(
        &self,
        intents: &[TransferIntent],
        payer: &Pubkey,
    ) -> Result<InstructionPlan, CustodyTxError> {
        let plans = try_join_all(intents.iter().map(|intent| self.build(intent, payer))).await?;
        Ok(InstructionPlan::merge_group(plans))
    }
}

/// Validate instruction ordering (debug/test only)
///
/// Rejects plans where, for the same account:
/// - an associated-account creation follows a transfer into it
/// - a lock precedes the delegation that authorizes it
/// - a revoke precedes the unlock that needs the delegate's authority
#[cfg(debug_assertions)]
pub fn sanity_check_ix_order(instructions: &[Instruction]) -> Result<(), CustodyTxError> {
    use super::metadata_ix::{IX_DELEGATE, IX_LOCK, IX_REVOKE, IX_UNLOCK};

    if instructions.is_empty() {
        return Err(CustodyTxError::assembly_failed("instruction list is empty"));
    }

    let mut funded: HashSet<Pubkey> = HashSet::new();
    let mut locked: HashSet<Pubkey> = HashSet::new();
    let mut revoked: HashSet<Pubkey> = HashSet::new();

    for (idx, ix) in instructions.iter().enumerate() {
        if let Some(ata) = created_account(ix) {
            if funded.contains(&ata) {
                return Err(CustodyTxError::assembly_failed(format!(
                    "account creation for {} at position {} follows a transfer into it",
                    ata, idx
                )));
            }
            continue;
        }

        if ix.program_id == spl_token::id() && ix.data.first() == Some(&SPL_TRANSFER_CHECKED) {
            if let Some(destination) = ix.accounts.get(2) {
                funded.insert(destination.pubkey);
            }
            continue;
        }

        match metadata_ix::metadata_discriminant(ix) {
            Some(IX_DELEGATE) => {
                let record = ix.accounts.get(4).map(|m| m.pubkey);
                if record.is_some_and(|r| locked.contains(&r)) {
                    return Err(CustodyTxError::assembly_failed(format!(
                        "delegate at position {} follows the lock it authorizes",
                        idx
                    )));
                }
            }
            Some(IX_LOCK) => {
                if let Some(record) = ix.accounts.get(6) {
                    locked.insert(record.pubkey);
                }
            }
            Some(IX_REVOKE) => {
                if let Some(record) = ix.accounts.get(4) {
                    revoked.insert(record.pubkey);
                }
            }
            Some(IX_UNLOCK) => {
                let record = ix.accounts.get(6).map(|m| m.pubkey);
                if record.is_some_and(|r| revoked.contains(&r)) {
                    return Err(CustodyTxError::assembly_failed(format!(
                        "unlock at position {} follows the revoke of its delegate",
                        idx
                    )));
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// No-op version of sanity_check_ix_order for release builds
#[cfg(not(debug_assertions))]
#[inline]
pub fn sanity_check_ix_order(_instructions: &[Instruction]) -> Result<(), CustodyTxError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockAssetRegistry, MockLedgerClient};
    use crate::types::AssetDescriptor;
    use solana_sdk::instruction::AccountMeta;

    fn builder(client: &Arc<MockLedgerClient>) -> InstructionBuilder {
        InstructionBuilder::new(client.clone(), Arc::new(MockAssetRegistry::new()))
    }

    fn intent(asset: AssetDescriptor, amount: f64, source: Pubkey, destination: Pubkey) -> TransferIntent {
        TransferIntent {
            asset,
            amount,
            source,
            destination,
        }
    }

    #[tokio::test]
    async fn test_existing_destination_emits_only_transfer() {
        let client = Arc::new(MockLedgerClient::new());
        let (w1, w2, mint) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        client.add_account(get_associated_token_address(&w1, &mint));
        client.add_account(get_associated_token_address(&w2, &mint));

        let plan = builder(&client)
            .build(&intent(AssetDescriptor::fungible(mint, 2), 2.5, w1, w2), &w1)
            .await
            .unwrap();

        assert_eq!(plan.len(), 1);
        let ix = &plan.instructions[0];
        assert_eq!(ix.program_id, spl_token::id());
        assert_eq!(ix.data[0], SPL_TRANSFER_CHECKED);
        assert_eq!(&ix.data[1..9], &250u64.to_le_bytes());
        assert_eq!(ix.data[9], 2);
    }

    #[tokio::test]
    async fn test_missing_destination_prepends_creation_funded_by_payer() {
        let client = Arc::new(MockLedgerClient::new());
        let (w1, w2, mint) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        client.add_account(get_associated_token_address(&w1, &mint));

        let plan = builder(&client)
            .build(&intent(AssetDescriptor::fungible(mint, 2), 2.5, w1, w2), &w1)
            .await
            .unwrap();

        assert_eq!(plan.len(), 2);
        let create = &plan.instructions[0];
        assert_eq!(create.program_id, spl_associated_token_account::id());
        assert_eq!(create.accounts[0].pubkey, w1);
        assert_eq!(
            create.accounts[1].pubkey,
            get_associated_token_address(&w2, &mint)
        );
        assert_eq!(plan.instructions[1].program_id, spl_token::id());
        assert!(sanity_check_ix_order(&plan.instructions).is_ok());
    }

    #[tokio::test]
    async fn test_missing_source_account_fails() {
        let client = Arc::new(MockLedgerClient::new());
        let (w1, w2, mint) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());

        let err = builder(&client)
            .build(&intent(AssetDescriptor::fungible(mint, 0), 1.0, w1, w2), &w1)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CustodyTxError::SourceAccountMissing { mint: m, owner } if m == mint && owner == w1
        ));
    }

    #[tokio::test]
    async fn test_programmable_asset_uses_metadata_transfer() {
        let client = Arc::new(MockLedgerClient::new());
        let (w1, w2, mint) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        client.add_account(get_associated_token_address(&w1, &mint));

        let plan = builder(&client)
            .build(&intent(AssetDescriptor::programmable(mint, None), 1.0, w1, w2), &w1)
            .await
            .unwrap();

        assert_eq!(plan.len(), 1);
        assert!(plan
            .instructions
            .iter()
            .all(|ix| ix.program_id != spl_token::id()));
        assert_eq!(
            metadata_ix::metadata_discriminant(&plan.instructions[0]),
            Some(metadata_ix::IX_TRANSFER)
        );
    }

    #[tokio::test]
    async fn test_resolve_defaults_destination() {
        let client = Arc::new(MockLedgerClient::new());
        let registry = Arc::new(MockAssetRegistry::new());
        let mint = Pubkey::new_unique();
        registry.insert(AssetDescriptor::fungible(mint, 6));
        let builder = InstructionBuilder::new(client, registry);

        let custody = Pubkey::new_unique();
        let request = TransferRequest {
            mint,
            amount: 1.0,
            source: Pubkey::new_unique(),
            destination: None,
        };
        let intent = builder.resolve(&request, &custody).await.unwrap();
        assert_eq!(intent.destination, custody);
        assert_eq!(intent.asset.decimals, 6);

        let unknown = TransferRequest {
            mint: Pubkey::new_unique(),
            ..request
        };
        assert!(matches!(
            builder.resolve(&unknown, &custody).await,
            Err(CustodyTxError::AssetLookupFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_same_mint_twice_creates_destination_once() {
        let client = Arc::new(MockLedgerClient::new());
        let (w1, custody, mint) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        client.add_account(get_associated_token_address(&w1, &mint));
        let asset = AssetDescriptor::fungible(mint, 0);

        let plan = builder(&client)
            .build_group(
                &[
                    intent(asset, 1.0, w1, custody),
                    intent(asset, 2.0, w1, custody),
                ],
                &custody,
            )
            .await
            .unwrap();

        let programs: Vec<Pubkey> = plan.instructions.iter().map(|ix| ix.program_id).collect();
        assert_eq!(
            programs,
            vec![spl_associated_token_account::id(), spl_token::id(), spl_token::id()]
        );
        assert_eq!(&plan.instructions[1].data[1..9], &1u64.to_le_bytes());
        assert_eq!(&plan.instructions[2].data[1..9], &2u64.to_le_bytes());
        assert!(sanity_check_ix_order(&plan.instructions).is_ok());
    }

    #[test]
    fn test_merge_group_keeps_distinct_creations() {
        let (payer, w2, w3, mint) = (
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
        );
        let to_w2 = create_associated_token_account(&payer, &w2, &mint, &spl_token::id());
        let to_w3 = create_associated_token_account(&payer, &w3, &mint, &spl_token::id());

        let merged = InstructionPlan::merge_group(vec![
            InstructionPlan::new(vec![to_w2.clone()]),
            InstructionPlan::new(vec![to_w3.clone(), to_w2.clone()]),
        ]);
        assert_eq!(merged.instructions, vec![to_w2, to_w3]);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_sanity_check_rejects_creation_after_transfer() {
        let (w1, w2, mint) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        let dest = get_associated_token_address(&w2, &mint);
        let transfer = spl_token::instruction::transfer_checked(
            &spl_token::id(),
            &get_associated_token_address(&w1, &mint),
            &mint,
            &dest,
            &w1,
            &[],
            1,
            0,
        )
        .unwrap();
        let create = create_associated_token_account(&w1, &w2, &mint, &spl_token::id());

        assert!(sanity_check_ix_order(&[create.clone(), transfer.clone()]).is_ok());
        assert!(sanity_check_ix_order(&[transfer, create]).is_err());
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_sanity_check_rejects_revoke_before_unlock() {
        let accounts = AssetAccounts::derive(&Pubkey::new_unique(), &Pubkey::new_unique(), None);
        let delegate = Pubkey::new_unique();
        let unlock = metadata_ix::unlock(&accounts, &delegate).unwrap();
        let revoke = metadata_ix::revoke_staking(&accounts, &delegate).unwrap();

        assert!(sanity_check_ix_order(&[unlock.clone(), revoke.clone()]).is_ok());
        assert!(sanity_check_ix_order(&[revoke, unlock]).is_err());
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_sanity_check_rejects_lock_before_delegate() {
        let accounts = AssetAccounts::derive(&Pubkey::new_unique(), &Pubkey::new_unique(), None);
        let delegate = Pubkey::new_unique();
        let lock = metadata_ix::lock(&accounts, &delegate).unwrap();
        let grant = metadata_ix::delegate_staking(&accounts, &delegate, 1).unwrap();

        assert!(sanity_check_ix_order(&[grant.clone(), lock.clone()]).is_ok());
        assert!(sanity_check_ix_order(&[lock, grant]).is_err());
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_sanity_check_empty_list() {
        assert!(sanity_check_ix_order(&[]).is_err());
        let other = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[1],
            vec![AccountMeta::new(Pubkey::new_unique(), false)],
        );
        assert!(sanity_check_ix_order(&[other]).is_ok());
    }
}
