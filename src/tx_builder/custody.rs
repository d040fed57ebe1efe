//! Custody state machine for programmable assets
//!
//! ```text
//!   Unlocked --delegate--> Delegated --lock--> Locked
//!   Unlocked <--revoke---- Delegated <--unlock-- Locked
//! ```
//!
//! A `CustodyPlan` starts from the asset's current on-chain state and only
//! emits an instruction when the transition is legal from the state it is
//! tracking. The public workflows always pair transitions: delegate+lock on
//! the way in, unlock+revoke on the way out (unlock first, because revoke
//! removes the authority that performs the unlock).

use std::sync::Arc;

use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use tracing::debug;

use super::errors::CustodyTxError;
use super::metadata_ix::{self, AssetAccounts};
use crate::ledger::AssetRegistry;
use crate::types::CustodyState;

/// Delegated amount for a staking delegate over a non-fungible asset
const STAKING_DELEGATE_AMOUNT: u64 = 1;

/// Instructions for one asset, built alongside its tracked state
#[derive(Debug, Clone)]
pub struct CustodyPlan {
    accounts: AssetAccounts,
    delegate: Pubkey,
    state: CustodyState,
    instructions: Vec<Instruction>,
}

impl CustodyPlan {
    pub fn new(accounts: AssetAccounts, delegate: Pubkey, initial: CustodyState) -> Self {
        Self {
            accounts,
            delegate,
            state: initial,
            instructions: Vec::new(),
        }
    }

    pub fn state(&self) -> CustodyState {
        self.state
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }

    /// Grant the utility key a staking delegation (`Unlocked -> Delegated`)
    pub fn delegate(&mut self) -> Result<&mut Self, CustodyTxError> {
        self.transition("delegate", CustodyState::Unlocked, CustodyState::Delegated)?;
        self.instructions.push(metadata_ix::delegate_staking(
            &self.accounts,
            &self.delegate,
            STAKING_DELEGATE_AMOUNT,
        )?);
        Ok(self)
    }

    /// Freeze the asset through the delegate (`Delegated -> Locked`)
    pub fn lock(&mut self) -> Result<&mut Self, CustodyTxError> {
        self.transition("lock", CustodyState::Delegated, CustodyState::Locked)?;
        self.instructions
            .push(metadata_ix::lock(&self.accounts, &self.delegate)?);
        Ok(self)
    }

    /// Thaw the asset through the delegate (`Locked -> Delegated`)
    pub fn unlock(&mut self) -> Result<&mut Self, CustodyTxError> {
        self.transition("unlock", CustodyState::Locked, CustodyState::Delegated)?;
        self.instructions
            .push(metadata_ix::unlock(&self.accounts, &self.delegate)?);
        Ok(self)
    }

    /// Remove the delegation (`Delegated -> Unlocked`)
    pub fn revoke(&mut self) -> Result<&mut Self, CustodyTxError> {
        self.transition("revoke", CustodyState::Delegated, CustodyState::Unlocked)?;
        self.instructions
            .push(metadata_ix::revoke_staking(&self.accounts, &self.delegate)?);
        Ok(self)
    }

    fn transition(
        &mut self,
        action: &'static str,
        from: CustodyState,
        to: CustodyState,
    ) -> Result<(), CustodyTxError> {
        if self.state != from {
            return Err(CustodyTxError::InvalidTransition {
                from: self.state,
                action,
            });
        }
        self.state = to;
        Ok(())
    }
}

/// Which compound operation to plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustodyAction {
    /// delegate then lock
    Engage,
    /// unlock then revoke
    Release,
}

impl CustodyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Engage => "delegate_and_lock",
            Self::Release => "unlock_and_revoke",
        }
    }
}

/// Plans compound custody operations from on-chain state
#[derive(Clone)]
pub struct CustodyStateMachine {
    registry: Arc<dyn AssetRegistry>,
    utility_delegate: Pubkey,
    fallback_rule_set: Option<Pubkey>,
}

impl CustodyStateMachine {
    pub fn new(
        registry: Arc<dyn AssetRegistry>,
        utility_delegate: Pubkey,
        fallback_rule_set: Option<Pubkey>,
    ) -> Self {
        Self {
            registry,
            utility_delegate,
            fallback_rule_set,
        }
    }

    pub fn utility_delegate(&self) -> &Pubkey {
        &self.utility_delegate
    }

    /// Current custody state of `owner`'s holding of `mint`
    pub async fn current_state(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<CustodyState, CustodyTxError> {
        self.registry
            .custody_state(mint, owner)
            .await
            .map_err(|e| CustodyTxError::lookup_failed(*mint, e.to_string()))
    }

    /// Resolve the asset and its state, then emit the compound instructions
    pub async fn plan(
        &self,
        action: CustodyAction,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<Vec<Instruction>, CustodyTxError> {
        let asset = self
            .registry
            .lookup_asset(mint)
            .await
            .map_err(|e| CustodyTxError::lookup_failed(*mint, e.to_string()))?;
        if !asset.class.is_programmable() {
            return Err(CustodyTxError::invalid_intent(format!(
                "{} is not a programmable asset and cannot be placed in custody",
                mint
            )));
        }

        let state = self.current_state(owner, mint).await?;
        let rule_set = asset.class.rule_set().or(self.fallback_rule_set);
        let accounts = AssetAccounts::derive(mint, owner, rule_set);

        let mut plan = CustodyPlan::new(accounts, self.utility_delegate, state);
        match action {
            CustodyAction::Engage => {
                plan.delegate()?.lock()?;
            }
            CustodyAction::Release => {
                plan.unlock()?.revoke()?;
            }
        }

        debug!(
            mint = %mint,
            owner = %owner,
            action = action.as_str(),
            from = %state,
            to = %plan.state(),
            "Custody instructions planned"
        );
        Ok(plan.into_instructions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockAssetRegistry;
    use crate::tx_builder::metadata_ix::{metadata_discriminant, IX_DELEGATE, IX_LOCK, IX_REVOKE, IX_UNLOCK};
    use crate::types::AssetDescriptor;

    fn accounts() -> AssetAccounts {
        AssetAccounts::derive(&Pubkey::new_unique(), &Pubkey::new_unique(), None)
    }

    fn discriminants(ixs: &[Instruction]) -> Vec<u8> {
        ixs.iter().filter_map(metadata_discriminant).collect()
    }

    #[test]
    fn test_forward_path() {
        let mut plan = CustodyPlan::new(accounts(), Pubkey::new_unique(), CustodyState::Unlocked);
        plan.delegate().unwrap().lock().unwrap();
        assert_eq!(plan.state(), CustodyState::Locked);
        assert_eq!(discriminants(plan.instructions()), vec![IX_DELEGATE, IX_LOCK]);
    }

    #[test]
    fn test_reverse_path_unlocks_before_revoking() {
        let mut plan = CustodyPlan::new(accounts(), Pubkey::new_unique(), CustodyState::Locked);
        plan.unlock().unwrap().revoke().unwrap();
        assert_eq!(plan.state(), CustodyState::Unlocked);
        assert_eq!(discriminants(plan.instructions()), vec![IX_UNLOCK, IX_REVOKE]);
    }

    #[test]
    fn test_lock_without_delegation_fails() {
        let mut plan = CustodyPlan::new(accounts(), Pubkey::new_unique(), CustodyState::Unlocked);
        let err = plan.lock().unwrap_err();
        assert!(matches!(
            err,
            CustodyTxError::InvalidTransition {
                from: CustodyState::Unlocked,
                action: "lock"
            }
        ));
        assert!(plan.instructions().is_empty());
        assert_eq!(plan.state(), CustodyState::Unlocked);
    }

    #[test]
    fn test_revoke_while_locked_fails() {
        let mut plan = CustodyPlan::new(accounts(), Pubkey::new_unique(), CustodyState::Locked);
        assert!(plan.revoke().is_err());
    }

    #[tokio::test]
    async fn test_plan_reads_state_from_registry() {
        let registry = Arc::new(MockAssetRegistry::new());
        let (owner, mint) = (Pubkey::new_unique(), Pubkey::new_unique());
        registry.insert(AssetDescriptor::programmable(mint, None));
        registry.set_custody_state(mint, owner, CustodyState::Locked);

        let machine = CustodyStateMachine::new(registry, Pubkey::new_unique(), None);

        let err = machine
            .plan(CustodyAction::Engage, &owner, &mint)
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyTxError::InvalidTransition { from: CustodyState::Locked, .. }));

        let ixs = machine.plan(CustodyAction::Release, &owner, &mint).await.unwrap();
        assert_eq!(discriminants(&ixs), vec![IX_UNLOCK, IX_REVOKE]);
    }

    #[tokio::test]
    async fn test_plan_uses_fallback_rule_set() {
        let registry = Arc::new(MockAssetRegistry::new());
        let (owner, mint, rules) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        registry.insert(AssetDescriptor::programmable(mint, None));

        let machine = CustodyStateMachine::new(registry, Pubkey::new_unique(), Some(rules));
        let ixs = machine.plan(CustodyAction::Engage, &owner, &mint).await.unwrap();

        assert!(ixs[0].accounts.iter().any(|m| m.pubkey == rules));
    }

    #[tokio::test]
    async fn test_plan_rejects_fungible_assets() {
        let registry = Arc::new(MockAssetRegistry::new());
        let mint = Pubkey::new_unique();
        registry.insert(AssetDescriptor::fungible(mint, 6));

        let machine = CustodyStateMachine::new(registry, Pubkey::new_unique(), None);
        let err = machine
            .plan(CustodyAction::Engage, &Pubkey::new_unique(), &mint)
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyTxError::InvalidIntent(_)));
    }
}
