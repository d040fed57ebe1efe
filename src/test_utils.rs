//! Test Utilities Module
//!
//! Deterministic in-memory collaborators for the ledger seams. No network,
//! no clocks: every answer is scripted by the test.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{hash::Hash, pubkey::Pubkey, transaction::Transaction};

use crate::ledger::{
    AssetRegistry, LedgerClient, LedgerError, LedgerResult, SimulationOutcome,
};
use crate::types::{AssetDescriptor, CustodyState};

#[derive(Default)]
struct LedgerState {
    anchors: VecDeque<LedgerResult<(Hash, u64)>>,
    default_anchor: Option<(Hash, u64)>,
    anchor_calls: usize,
    block_height: u64,
    accounts: HashSet<Pubkey>,
    account_data: HashMap<Pubkey, Vec<u8>>,
    simulation: SimulationOutcome,
    simulated: Vec<Transaction>,
    empty_accounts: HashMap<Pubkey, Vec<Pubkey>>,
    owners: HashMap<Pubkey, Pubkey>,
}

/// Scripted `LedgerClient`
///
/// Anchors are served from a queue first, then from the default anchor if
/// one is set; with neither, `fetch_latest_anchor` fails with a transport
/// error. Every simulated transaction is recorded.
#[derive(Default)]
pub struct MockLedgerClient {
    state: Mutex<LedgerState>,
}

impl MockLedgerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client that always serves the same valid anchor
    pub fn with_anchor(blockhash: Hash, last_valid_block_height: u64) -> Self {
        let client = Self::new();
        client.set_default_anchor(blockhash, last_valid_block_height);
        client
    }

    pub fn set_default_anchor(&self, blockhash: Hash, last_valid_block_height: u64) {
        self.state.lock().default_anchor = Some((blockhash, last_valid_block_height));
    }

    /// Queue one response for `fetch_latest_anchor`
    pub fn push_anchor(&self, response: LedgerResult<(Hash, u64)>) {
        self.state.lock().anchors.push_back(response);
    }

    pub fn anchor_calls(&self) -> usize {
        self.state.lock().anchor_calls
    }

    pub fn set_block_height(&self, height: u64) {
        self.state.lock().block_height = height;
    }

    /// Mark an account as existing (with no data)
    pub fn add_account(&self, address: Pubkey) {
        self.state.lock().accounts.insert(address);
    }

    /// Mark an account as existing with the given data
    pub fn set_account_data(&self, address: Pubkey, data: Vec<u8>) {
        let mut state = self.state.lock();
        state.accounts.insert(address);
        state.account_data.insert(address, data);
    }

    /// Logs returned by every subsequent simulation
    pub fn set_simulation_logs(&self, logs: Vec<String>) {
        self.state.lock().simulation = SimulationOutcome {
            logs,
            err: None,
            units_consumed: Some(5_000),
        };
    }

    pub fn set_simulation_outcome(&self, outcome: SimulationOutcome) {
        self.state.lock().simulation = outcome;
    }

    /// Transactions passed to `simulate`, in call order
    pub fn simulated(&self) -> Vec<Transaction> {
        self.state.lock().simulated.clone()
    }

    pub fn set_empty_token_accounts(&self, owner: Pubkey, mints: Vec<Pubkey>) {
        self.state.lock().empty_accounts.insert(owner, mints);
    }

    pub fn set_owner(&self, mint: Pubkey, owner: Pubkey) {
        self.state.lock().owners.insert(mint, owner);
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn fetch_latest_anchor(&self) -> LedgerResult<(Hash, u64)> {
        let mut state = self.state.lock();
        state.anchor_calls += 1;
        if let Some(response) = state.anchors.pop_front() {
            return response;
        }
        state.default_anchor.ok_or_else(|| LedgerError::Transport {
            operation: "getLatestBlockhash".to_string(),
            message: "no anchor scripted".to_string(),
        })
    }

    async fn fetch_block_height(&self) -> LedgerResult<u64> {
        Ok(self.state.lock().block_height)
    }

    async fn account_exists(&self, address: &Pubkey) -> LedgerResult<bool> {
        Ok(self.state.lock().accounts.contains(address))
    }

    async fn account_data(&self, address: &Pubkey) -> LedgerResult<Option<Vec<u8>>> {
        Ok(self.state.lock().account_data.get(address).cloned())
    }

    async fn simulate(&self, transaction: &Transaction) -> LedgerResult<SimulationOutcome> {
        let mut state = self.state.lock();
        state.simulated.push(transaction.clone());
        Ok(state.simulation.clone())
    }

    async fn find_empty_token_accounts(&self, owner: &Pubkey) -> LedgerResult<Vec<Pubkey>> {
        Ok(self.state.lock()
            .empty_accounts
            .get(owner)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_owner_by_mint(&self, mint: &Pubkey) -> LedgerResult<Option<Pubkey>> {
        Ok(self.state.lock().owners.get(mint).copied())
    }
}

#[derive(Default)]
struct RegistryState {
    assets: HashMap<Pubkey, AssetDescriptor>,
    failures: HashMap<Pubkey, String>,
    custody: HashMap<(Pubkey, Pubkey), CustodyState>,
    lookups: usize,
}

/// Scripted `AssetRegistry`
///
/// Unknown mints fail with `AccountNotFound`; unknown (mint, owner) pairs
/// are `Unlocked`.
#[derive(Default)]
pub struct MockAssetRegistry {
    state: Mutex<RegistryState>,
}

impl MockAssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, asset: AssetDescriptor) {
        self.state.lock().assets.insert(asset.mint, asset);
    }

    /// Make lookups of `mint` fail with a transport error
    pub fn fail_lookup(&self, mint: Pubkey, reason: &str) {
        self.state.lock().failures.insert(mint, reason.to_string());
    }

    pub fn set_custody_state(&self, mint: Pubkey, owner: Pubkey, state: CustodyState) {
        self.state.lock().custody.insert((mint, owner), state);
    }

    pub fn lookups(&self) -> usize {
        self.state.lock().lookups
    }
}

#[async_trait]
impl AssetRegistry for MockAssetRegistry {
    async fn lookup_asset(&self, mint: &Pubkey) -> LedgerResult<AssetDescriptor> {
        let mut state = self.state.lock();
        state.lookups += 1;
        if let Some(reason) = state.failures.get(mint) {
            return Err(LedgerError::Transport {
                operation: "lookup_asset".to_string(),
                message: reason.clone(),
            });
        }
        state
            .assets
            .get(mint)
            .copied()
            .ok_or(LedgerError::AccountNotFound(*mint))
    }

    async fn custody_state(&self, mint: &Pubkey, owner: &Pubkey) -> LedgerResult<CustodyState> {
        let state = self.state.lock();
        if let Some(reason) = state.failures.get(mint) {
            return Err(LedgerError::Transport {
                operation: "custody_state".to_string(),
                message: reason.clone(),
            });
        }
        Ok(state
            .custody
            .get(&(*mint, *owner))
            .copied()
            .unwrap_or(CustodyState::Unlocked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_anchor_queue_then_default() {
        let client = MockLedgerClient::new();
        assert!(client.fetch_latest_anchor().await.is_err());

        let queued = Hash::new_unique();
        let default = Hash::new_unique();
        client.push_anchor(Ok((queued, 1)));
        client.set_default_anchor(default, 2);

        assert_eq!(client.fetch_latest_anchor().await.unwrap(), (queued, 1));
        assert_eq!(client.fetch_latest_anchor().await.unwrap(), (default, 2));
        assert_eq!(client.anchor_calls(), 3);
    }

    #[tokio::test]
    async fn test_registry_defaults_and_failures() {
        let registry = MockAssetRegistry::new();
        let (mint, owner) = (Pubkey::new_unique(), Pubkey::new_unique());

        assert!(matches!(
            registry.lookup_asset(&mint).await,
            Err(LedgerError::AccountNotFound(_))
        ));
        assert_eq!(
            registry.custody_state(&mint, &owner).await.unwrap(),
            CustodyState::Unlocked
        );

        registry.fail_lookup(mint, "registry down");
        assert!(registry.custody_state(&mint, &owner).await.is_err());
        assert_eq!(registry.lookups(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_simulations_all_recorded() {
        use solana_sdk::message::Message;

        let client = std::sync::Arc::new(MockLedgerClient::new());
        let tx = Transaction::new_unsigned(Message::new(&[], Some(&Pubkey::new_unique())));

        let calls = (0..16).map(|_| {
            let client = client.clone();
            let tx = tx.clone();
            tokio::spawn(async move { client.simulate(&tx).await })
        });
        for handle in futures::future::join_all(calls).await {
            assert!(handle.unwrap().is_ok());
        }
        assert_eq!(client.simulated().len(), 16);
    }
}
