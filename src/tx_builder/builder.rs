//! Core CustodyTxBuilder implementation
//!
//! Orchestrates the pipeline for every public operation:
//!
//! ```text
//! requests -> partition -> per-asset instructions -> assemble (anchor + co-sign)
//!          -> simulate -> serialize
//! ```
//!
//! Every operation is all-or-nothing: one failing asset or group fails the
//! whole call and no transaction is returned. Collaborators and keys are
//! injected once at construction; nothing is shared between calls.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use solana_sdk::pubkey::Pubkey;

use super::anchor::{AnchorPolicy, BlockhashProvider};
use super::assembler::{close_empty_accounts, AssembledTransaction, TransactionAssembler};
use super::batch::partition;
use super::custody::{CustodyAction, CustodyStateMachine};
use super::errors::CustodyTxError;
use super::instructions::InstructionBuilder;
use super::output::SerializedTransaction;
use super::simulate::SimulationValidator;
use crate::config::{BatchingConfig, CustodyConfig, SimulationConfig};
use crate::ledger::{AssetRegistry, LedgerClient};
use crate::metrics::{self, Timer};
use crate::observability::TraceContext;
use crate::signer::{CoSigner, LocalCoSigner};
use crate::structured_logging::PipelineLogger;
use crate::types::{AssetClass, CustodyState, TransferIntent, TransferRequest};
use crate::wallet::CustodyKeys;

/// Builds partially signed transactions for the custodial workflows
#[derive(Clone)]
pub struct CustodyTxBuilder {
    client: Arc<dyn LedgerClient>,
    instructions: InstructionBuilder,
    assembler: TransactionAssembler,
    simulator: SimulationValidator,
    custody: CustodyStateMachine,
    custody_signer: Arc<dyn CoSigner>,
    delegate_signer: Arc<dyn CoSigner>,
    batching: BatchingConfig,
    simulation: SimulationConfig,
}

impl CustodyTxBuilder {
    /// Wire all components from configuration and injected collaborators
    ///
    /// `custody_signer` is the default transfer destination and pays for
    /// transfers into itself; `delegate_signer` is the utility delegate that
    /// co-signs every custody operation.
    pub fn new(
        config: &CustodyConfig,
        client: Arc<dyn LedgerClient>,
        registry: Arc<dyn AssetRegistry>,
        custody_signer: Arc<dyn CoSigner>,
        delegate_signer: Arc<dyn CoSigner>,
    ) -> Result<Self, CustodyTxError> {
        config.validate()?;
        let rule_set = config.rule_set()?;

        let anchors = BlockhashProvider::new(client.clone(), AnchorPolicy::from_config(&config.anchor));

        Ok(Self {
            instructions: InstructionBuilder::new(client.clone(), registry.clone()),
            assembler: TransactionAssembler::new(anchors),
            simulator: SimulationValidator::new(client.clone()),
            custody: CustodyStateMachine::new(registry, delegate_signer.pubkey(), rule_set),
            client,
            custody_signer,
            delegate_signer,
            batching: config.batching.clone(),
            simulation: config.simulation.clone(),
        })
    }

    /// Same as `new`, with local keypairs as co-signers
    pub fn from_keys(
        config: &CustodyConfig,
        client: Arc<dyn LedgerClient>,
        registry: Arc<dyn AssetRegistry>,
        keys: CustodyKeys,
    ) -> Result<Self, CustodyTxError> {
        Self::new(
            config,
            client,
            registry,
            Arc::new(LocalCoSigner::new(keys.custody)),
            Arc::new(LocalCoSigner::new(keys.utility_delegate)),
        )
    }

    pub fn custody_wallet(&self) -> Pubkey {
        self.custody_signer.pubkey()
    }

    pub fn utility_delegate(&self) -> Pubkey {
        self.delegate_signer.pubkey()
    }

    /// Transfer a list of assets out of `wallet`, one transaction per group
    ///
    /// Requests without a destination go to the custody wallet. A group in
    /// which every request targets the custody wallet is paid for and
    /// co-signed by it; any other group is paid for by `wallet`. Each group
    /// also closes `wallet`'s token accounts for the fungible mints it moved.
    pub async fn build_transfer_transactions(
        &self,
        wallet: &Pubkey,
        requests: &[TransferRequest],
    ) -> Result<Vec<SerializedTransaction>, CustodyTxError> {
        let ctx = TraceContext::new("build_transfer_transactions");
        let logger = PipelineLogger::new(&ctx);
        let timer = Timer::new();

        let result = self.transfer_pipeline(wallet, requests, &logger).await;
        self.finish(&logger, timer, "transfer", result)
    }

    async fn transfer_pipeline(
        &self,
        wallet: &Pubkey,
        requests: &[TransferRequest],
        logger: &PipelineLogger,
    ) -> Result<Vec<SerializedTransaction>, CustodyTxError> {
        if requests.is_empty() {
            return Err(CustodyTxError::invalid_intent("no transfers requested"));
        }

        let custody_wallet = self.custody_wallet();
        let intents = try_join_all(
            requests
                .iter()
                .map(|request| self.instructions.resolve(request, &custody_wallet)),
        )
        .await?;

        let group_size = self.batching.transfer_group_size;
        let groups = partition(&intents, group_size)?;
        logger.log_batch_planned(intents.len(), groups.len(), group_size);

        let mut transactions = Vec::with_capacity(groups.len());
        for (index, group) in groups.iter().enumerate() {
            let group_logger = logger.group(index);
            group_logger.log_group_started(&mint_labels(group.iter().map(|i| &i.asset.mint)));

            let custody_pays = group.iter().all(|intent| intent.destination == custody_wallet);
            let fee_payer = if custody_pays { custody_wallet } else { *wallet };

            let mut instructions = self
                .instructions
                .build_group(group, &fee_payer)
                .await?
                .into_instructions();
            instructions.extend(close_empty_accounts(&closable_mints(group, wallet), wallet)?);

            let co_signer = custody_pays.then(|| self.custody_signer.as_ref());
            let assembled = self
                .assembler
                .assemble(instructions, &fee_payer, co_signer)
                .await?;

            if self.simulation.enabled {
                self.simulator.validate(&assembled.transaction).await?;
            }

            transactions.push(self.serialize(&group_logger, &assembled)?);
        }

        Ok(transactions)
    }

    /// Delegate `mint` to the utility key and lock it, in one transaction
    pub async fn build_delegate_and_lock(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<SerializedTransaction, CustodyTxError> {
        let mut transactions = self
            .run_custody("build_delegate_and_lock", CustodyAction::Engage, owner, &[*mint], 1)
            .await?;
        transactions
            .pop()
            .ok_or_else(|| CustodyTxError::assembly_failed("no transaction produced"))
    }

    /// Unlock `mint` and revoke the utility delegation, in one transaction
    pub async fn build_unlock_and_revoke(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<SerializedTransaction, CustodyTxError> {
        let mut transactions = self
            .run_custody("build_unlock_and_revoke", CustodyAction::Release, owner, &[*mint], 1)
            .await?;
        transactions
            .pop()
            .ok_or_else(|| CustodyTxError::assembly_failed("no transaction produced"))
    }

    /// Delegate and lock many assets, `lock_group_size` per transaction
    pub async fn build_multiple_delegate_and_lock(
        &self,
        owner: &Pubkey,
        mints: &[Pubkey],
    ) -> Result<Vec<SerializedTransaction>, CustodyTxError> {
        self.run_custody(
            "build_multiple_delegate_and_lock",
            CustodyAction::Engage,
            owner,
            mints,
            self.batching.lock_group_size,
        )
        .await
    }

    /// Unlock and revoke many assets, `unlock_group_size` per transaction
    pub async fn build_multiple_unlock_and_revoke(
        &self,
        owner: &Pubkey,
        mints: &[Pubkey],
    ) -> Result<Vec<SerializedTransaction>, CustodyTxError> {
        self.run_custody(
            "build_multiple_unlock_and_revoke",
            CustodyAction::Release,
            owner,
            mints,
            self.batching.unlock_group_size,
        )
        .await
    }

    async fn run_custody(
        &self,
        operation: &'static str,
        action: CustodyAction,
        owner: &Pubkey,
        mints: &[Pubkey],
        group_size: usize,
    ) -> Result<Vec<SerializedTransaction>, CustodyTxError> {
        let ctx = TraceContext::new(operation);
        let logger = PipelineLogger::new(&ctx);
        let timer = Timer::new();

        let result = self
            .custody_pipeline(action, owner, mints, group_size, &logger)
            .await;
        self.finish(&logger, timer, action.as_str(), result)
    }

    async fn custody_pipeline(
        &self,
        action: CustodyAction,
        owner: &Pubkey,
        mints: &[Pubkey],
        group_size: usize,
        logger: &PipelineLogger,
    ) -> Result<Vec<SerializedTransaction>, CustodyTxError> {
        if mints.is_empty() {
            return Err(CustodyTxError::invalid_intent("no assets supplied"));
        }
        let mut seen = HashSet::with_capacity(mints.len());
        if let Some(duplicate) = mints.iter().find(|mint| !seen.insert(**mint)) {
            return Err(CustodyTxError::invalid_intent(format!(
                "asset {} listed more than once",
                duplicate
            )));
        }

        let groups = partition(mints, group_size)?;
        logger.log_batch_planned(mints.len(), groups.len(), group_size);

        // Plan every asset before assembling anything
        let mut planned = Vec::with_capacity(groups.len());
        for group in &groups {
            let per_asset = try_join_all(
                group
                    .iter()
                    .map(|mint| self.custody.plan(action, owner, mint)),
            )
            .await?;
            planned.push(per_asset.concat());
        }

        let mut transactions = Vec::with_capacity(planned.len());
        for (index, (group, instructions)) in groups.iter().zip(planned).enumerate() {
            let group_logger = logger.group(index);
            group_logger.log_group_started(&mint_labels(group.iter()));

            let assembled = self
                .assembler
                .assemble(instructions, owner, Some(self.delegate_signer.as_ref()))
                .await?;

            if self.simulation.enabled && self.simulation.simulate_custody {
                self.simulator.validate(&assembled.transaction).await?;
            }

            transactions.push(self.serialize(&group_logger, &assembled)?);
        }

        Ok(transactions)
    }

    /// Close `wallet`'s token accounts for `mints`, rent back to `wallet`
    ///
    /// The result is unsigned; `wallet` pays and must sign.
    pub async fn build_close_accounts_transaction(
        &self,
        mints: &[Pubkey],
        wallet: &Pubkey,
    ) -> Result<SerializedTransaction, CustodyTxError> {
        let ctx = TraceContext::new("build_close_accounts_transaction");
        let logger = PipelineLogger::new(&ctx);
        let timer = Timer::new();

        let result: Result<Vec<SerializedTransaction>, CustodyTxError> = async {
            if mints.is_empty() {
                return Err(CustodyTxError::invalid_intent("no accounts to close"));
            }
            let instructions = close_empty_accounts(mints, wallet)?;
            let assembled = self.assembler.assemble(instructions, wallet, None).await?;
            Ok(vec![self.serialize(&logger, &assembled)?])
        }
        .await;

        let mut transactions = self.finish(&logger, timer, "close_accounts", result)?;
        transactions
            .pop()
            .ok_or_else(|| CustodyTxError::assembly_failed("no transaction produced"))
    }

    /// Current custody state of `owner`'s holding of `mint`
    pub async fn custody_state(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<CustodyState, CustodyTxError> {
        self.custody.current_state(owner, mint).await
    }

    /// Mints for which `owner` holds an empty token account
    pub async fn find_empty_token_accounts(
        &self,
        owner: &Pubkey,
    ) -> Result<Vec<Pubkey>, CustodyTxError> {
        Ok(self.client.find_empty_token_accounts(owner).await?)
    }

    /// Wallet currently holding a non-fungible `mint`
    pub async fn find_owner_by_mint(&self, mint: &Pubkey) -> Result<Option<Pubkey>, CustodyTxError> {
        Ok(self.client.find_owner_by_mint(mint).await?)
    }

    fn serialize(
        &self,
        logger: &PipelineLogger,
        assembled: &AssembledTransaction,
    ) -> Result<SerializedTransaction, CustodyTxError> {
        let serialized = assembled.serialize()?;
        logger.log_transaction_ready(serialized.size, serialized.pending_signers.len());
        Ok(serialized)
    }

    fn finish(
        &self,
        logger: &PipelineLogger,
        timer: Timer,
        operation: &str,
        result: Result<Vec<SerializedTransaction>, CustodyTxError>,
    ) -> Result<Vec<SerializedTransaction>, CustodyTxError> {
        let latency_ms = timer.finish();
        match &result {
            Ok(transactions) => {
                for _ in transactions {
                    metrics::record_transaction_assembled(operation);
                }
                logger.log_operation_complete(transactions.len(), latency_ms);
            }
            Err(e) => {
                if matches!(e, CustodyTxError::AssetLookupFailed { .. }) {
                    metrics::record_asset_lookup_failure();
                }
                logger.log_operation_failed(e.category(), &e.to_string(), latency_ms);
            }
        }
        result
    }
}

/// Fungible mints moved out of `wallet` in this group, first occurrence order
fn closable_mints(group: &[TransferIntent], wallet: &Pubkey) -> Vec<Pubkey> {
    let mut seen = HashSet::new();
    group
        .iter()
        .filter(|intent| intent.source == *wallet)
        .filter(|intent| matches!(intent.asset.class, AssetClass::Fungible))
        .map(|intent| intent.asset.mint)
        .filter(|mint| seen.insert(*mint))
        .collect()
}

fn mint_labels<'a>(mints: impl Iterator<Item = &'a Pubkey>) -> Vec<String> {
    mints.map(|m| m.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssetDescriptor;

    fn intent(asset: AssetDescriptor, source: Pubkey) -> TransferIntent {
        TransferIntent {
            asset,
            amount: 1.0,
            source,
            destination: Pubkey::new_unique(),
        }
    }

    #[test]
    fn test_closable_mints_skips_programmable_and_foreign_sources() {
        let wallet = Pubkey::new_unique();
        let (a, b, c) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        let group = vec![
            intent(AssetDescriptor::fungible(a, 2), wallet),
            intent(AssetDescriptor::programmable(b, None), wallet),
            intent(AssetDescriptor::fungible(c, 0), Pubkey::new_unique()),
            intent(AssetDescriptor::fungible(a, 2), wallet),
        ];

        assert_eq!(closable_mints(&group, &wallet), vec![a]);
    }
}
