//! Asset registry backed by on-chain mint, metadata and token-record accounts

use std::sync::Arc;

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;
use spl_token::solana_program::program_pack::Pack;
use spl_token::state::Mint;
use tracing::debug;

use super::account_data::{decode_metadata, decode_token_record};
use super::{AssetRegistry, LedgerClient, LedgerError, LedgerResult};
use crate::tx_builder::metadata_ix::{find_metadata_pda, find_token_record_pda};
use crate::types::{AssetClass, AssetDescriptor, CustodyState};

/// Registry that reads everything it needs through a `LedgerClient`
///
/// Nothing is cached: every lookup reflects current ledger state.
pub struct RpcAssetRegistry {
    client: Arc<dyn LedgerClient>,
}

impl RpcAssetRegistry {
    pub fn new(client: Arc<dyn LedgerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetRegistry for RpcAssetRegistry {
    async fn lookup_asset(&self, mint: &Pubkey) -> LedgerResult<AssetDescriptor> {
        let mint_data = self
            .client
            .account_data(mint)
            .await?
            .ok_or(LedgerError::AccountNotFound(*mint))?;
        let mint_state = Mint::unpack(&mint_data).map_err(|e| LedgerError::Decode {
            account: *mint,
            reason: e.to_string(),
        })?;

        // No metadata account means a bare SPL token
        let metadata_address = find_metadata_pda(mint);
        let class = match self.client.account_data(&metadata_address).await? {
            Some(data) => {
                let summary = decode_metadata(&data).map_err(|reason| LedgerError::Decode {
                    account: metadata_address,
                    reason,
                })?;
                AssetClass::from_token_standard(summary.token_standard, summary.rule_set)
            }
            None => AssetClass::Fungible,
        };

        debug!(
            mint = %mint,
            decimals = mint_state.decimals,
            class = ?class,
            "Asset resolved"
        );

        Ok(AssetDescriptor {
            mint: *mint,
            class,
            decimals: mint_state.decimals,
        })
    }

    async fn custody_state(&self, mint: &Pubkey, owner: &Pubkey) -> LedgerResult<CustodyState> {
        let token = get_associated_token_address(owner, mint);
        let record_address = find_token_record_pda(mint, &token);

        match self.client.account_data(&record_address).await? {
            Some(data) => decode_token_record(&data)
                .map(|record| record.custody_state())
                .map_err(|reason| LedgerError::Decode {
                    account: record_address,
                    reason,
                }),
            None => Ok(CustodyState::Unlocked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockLedgerClient;

    fn mint_bytes(decimals: u8) -> Vec<u8> {
        let mint = Mint {
            mint_authority: Default::default(),
            supply: 1,
            decimals,
            is_initialized: true,
            freeze_authority: Default::default(),
        };
        let mut data = vec![0u8; Mint::LEN];
        Mint::pack(mint, &mut data).unwrap();
        data
    }

    #[tokio::test]
    async fn test_lookup_plain_token_without_metadata() {
        let client = Arc::new(MockLedgerClient::new());
        let mint = Pubkey::new_unique();
        client.set_account_data(mint, mint_bytes(6));

        let registry = RpcAssetRegistry::new(client);
        let asset = registry.lookup_asset(&mint).await.unwrap();

        assert_eq!(asset, AssetDescriptor::fungible(mint, 6));
    }

    #[tokio::test]
    async fn test_lookup_missing_mint_fails() {
        let client = Arc::new(MockLedgerClient::new());
        let registry = RpcAssetRegistry::new(client);
        let mint = Pubkey::new_unique();

        let err = registry.lookup_asset(&mint).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(m) if m == mint));
    }

    #[tokio::test]
    async fn test_custody_state_defaults_to_unlocked() {
        let client = Arc::new(MockLedgerClient::new());
        let registry = RpcAssetRegistry::new(client);

        let state = registry
            .custody_state(&Pubkey::new_unique(), &Pubkey::new_unique())
            .await
            .unwrap();
        assert_eq!(state, CustodyState::Unlocked);
    }

    #[tokio::test]
    async fn test_custody_state_reads_token_record() {
        let client = Arc::new(MockLedgerClient::new());
        let mint = Pubkey::new_unique();
        let owner = Pubkey::new_unique();
        let token = get_associated_token_address(&owner, &mint);

        let mut record = vec![11u8, 255, 1, 0, 1];
        record.extend_from_slice(Pubkey::new_unique().as_ref());
        record.extend_from_slice(&[1, 3]);
        client.set_account_data(find_token_record_pda(&mint, &token), record);

        let registry = RpcAssetRegistry::new(client);
        let state = registry.custody_state(&mint, &owner).await.unwrap();
        assert_eq!(state, CustodyState::Locked);
    }
}
