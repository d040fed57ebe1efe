//! Token Metadata program instructions for programmable NFTs
//!
//! Programmable assets cannot be moved or frozen with raw SPL token
//! instructions; every action goes through the metadata program, which
//! checks the token record and the asset's authorization rule set.
//!
//! Instruction data is the one-byte instruction discriminant followed by
//! the Borsh-encoded, versioned argument enum. Optional accounts that are
//! not supplied are passed as the metadata program id itself.

use std::collections::BTreeMap;

use borsh::BorshSerialize;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey,
    pubkey::Pubkey,
    system_program, sysvar,
};
use spl_associated_token_account::get_associated_token_address;

use super::errors::CustodyTxError;

/// Token Metadata program
pub const TOKEN_METADATA_PROGRAM_ID: Pubkey = pubkey!("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s");

/// Token Authorization Rules program
pub const TOKEN_AUTH_RULES_PROGRAM_ID: Pubkey = pubkey!("auth9SigNpDKz4sJJ1DfCTuZrZNSAgh9sFD3rboVmgg");

// Instruction discriminants
pub const IX_DELEGATE: u8 = 44;
pub const IX_REVOKE: u8 = 45;
pub const IX_LOCK: u8 = 46;
pub const IX_UNLOCK: u8 = 47;
pub const IX_TRANSFER: u8 = 49;

const PREFIX: &[u8] = b"metadata";
const EDITION: &[u8] = b"edition";
const TOKEN_RECORD: &[u8] = b"token_record";

pub fn find_metadata_pda(mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[PREFIX, TOKEN_METADATA_PROGRAM_ID.as_ref(), mint.as_ref()],
        &TOKEN_METADATA_PROGRAM_ID,
    )
    .0
}

pub fn find_master_edition_pda(mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[PREFIX, TOKEN_METADATA_PROGRAM_ID.as_ref(), mint.as_ref(), EDITION],
        &TOKEN_METADATA_PROGRAM_ID,
    )
    .0
}

pub fn find_token_record_pda(mint: &Pubkey, token: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[
            PREFIX,
            TOKEN_METADATA_PROGRAM_ID.as_ref(),
            mint.as_ref(),
            TOKEN_RECORD,
            token.as_ref(),
        ],
        &TOKEN_METADATA_PROGRAM_ID,
    )
    .0
}

/// Accounts every instruction on a given (asset, holder) pair shares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetAccounts {
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub token: Pubkey,
    pub metadata: Pubkey,
    pub edition: Pubkey,
    pub token_record: Pubkey,
    pub rule_set: Option<Pubkey>,
}

impl AssetAccounts {
    /// Derive all accounts for `owner`'s holding of `mint`
    pub fn derive(mint: &Pubkey, owner: &Pubkey, rule_set: Option<Pubkey>) -> Self {
        let token = get_associated_token_address(owner, mint);
        Self {
            mint: *mint,
            owner: *owner,
            token,
            metadata: find_metadata_pda(mint),
            edition: find_master_edition_pda(mint),
            token_record: find_token_record_pda(mint, &token),
            rule_set,
        }
    }

    fn rules_program_meta(&self) -> AccountMeta {
        match self.rule_set {
            Some(_) => AccountMeta::new_readonly(TOKEN_AUTH_RULES_PROGRAM_ID, false),
            None => absent(),
        }
    }

    fn rules_meta(&self) -> AccountMeta {
        match self.rule_set {
            Some(rules) => AccountMeta::new_readonly(rules, false),
            None => absent(),
        }
    }
}

/// Placeholder for an optional account that is not supplied
fn absent() -> AccountMeta {
    AccountMeta::new_readonly(TOKEN_METADATA_PROGRAM_ID, false)
}

/// Payload handed to the asset's rule set
///
/// Always `None` here: staking delegation, lock and transfer pass the
/// default rule-set checks without extra payload.
#[derive(BorshSerialize, Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationData {
    pub payload: BTreeMap<String, PayloadType>,
}

#[derive(BorshSerialize, Debug, Clone, PartialEq, Eq)]
pub enum PayloadType {
    Pubkey([u8; 32]),
    Seeds(Vec<Vec<u8>>),
    MerkleProof(Vec<[u8; 32]>),
    Number(u64),
}

// Variant order is the wire tag; only `StakingV1` is built here.
#[allow(dead_code)]
#[derive(BorshSerialize)]
enum DelegateArgs {
    CollectionV1 { authorization_data: Option<AuthorizationData> },
    SaleV1 { amount: u64, authorization_data: Option<AuthorizationData> },
    TransferV1 { amount: u64, authorization_data: Option<AuthorizationData> },
    DataV1 { authorization_data: Option<AuthorizationData> },
    UtilityV1 { amount: u64, authorization_data: Option<AuthorizationData> },
    StakingV1 { amount: u64, authorization_data: Option<AuthorizationData> },
}

#[allow(dead_code)]
#[derive(BorshSerialize)]
enum RevokeArgs {
    CollectionV1,
    SaleV1,
    TransferV1,
    DataV1,
    UtilityV1,
    StakingV1,
}

#[derive(BorshSerialize)]
enum LockArgs {
    V1 { authorization_data: Option<AuthorizationData> },
}

#[derive(BorshSerialize)]
enum UnlockArgs {
    V1 { authorization_data: Option<AuthorizationData> },
}

#[derive(BorshSerialize)]
enum TransferArgs {
    V1 { amount: u64, authorization_data: Option<AuthorizationData> },
}

fn instruction_data<A: BorshSerialize>(discriminant: u8, args: &A) -> Result<Vec<u8>, CustodyTxError> {
    let mut data = vec![discriminant];
    args.serialize(&mut data).map_err(|e| {
        CustodyTxError::assembly_failed(format!(
            "metadata instruction {} encoding failed: {}",
            discriminant, e
        ))
    })?;
    Ok(data)
}

/// Assign a staking delegate over the owner's token
///
/// Signed by the owner, who is both authority and payer.
pub fn delegate_staking(
    accounts: &AssetAccounts,
    delegate: &Pubkey,
    amount: u64,
) -> Result<Instruction, CustodyTxError> {
    let args = DelegateArgs::StakingV1 {
        amount,
        authorization_data: None,
    };
    Ok(Instruction {
        program_id: TOKEN_METADATA_PROGRAM_ID,
        accounts: delegate_accounts(accounts, delegate),
        data: instruction_data(IX_DELEGATE, &args)?,
    })
}

/// Remove the staking delegate; mirror image of [`delegate_staking`]
pub fn revoke_staking(accounts: &AssetAccounts, delegate: &Pubkey) -> Result<Instruction, CustodyTxError> {
    Ok(Instruction {
        program_id: TOKEN_METADATA_PROGRAM_ID,
        accounts: delegate_accounts(accounts, delegate),
        data: instruction_data(IX_REVOKE, &RevokeArgs::StakingV1)?,
    })
}

fn delegate_accounts(accounts: &AssetAccounts, delegate: &Pubkey) -> Vec<AccountMeta> {
    vec![
        absent(), // delegate_record: token delegates live in the token record
        AccountMeta::new_readonly(*delegate, false),
        AccountMeta::new(accounts.metadata, false),
        AccountMeta::new_readonly(accounts.edition, false),
        AccountMeta::new(accounts.token_record, false),
        AccountMeta::new_readonly(accounts.mint, false),
        AccountMeta::new(accounts.token, false),
        AccountMeta::new_readonly(accounts.owner, true),
        AccountMeta::new(accounts.owner, true),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new_readonly(sysvar::instructions::id(), false),
        AccountMeta::new_readonly(spl_token::id(), false),
        accounts.rules_program_meta(),
        accounts.rules_meta(),
    ]
}

/// Freeze the owner's token; signed by the token delegate
pub fn lock(accounts: &AssetAccounts, delegate: &Pubkey) -> Result<Instruction, CustodyTxError> {
    let args = LockArgs::V1 {
        authorization_data: None,
    };
    Ok(Instruction {
        program_id: TOKEN_METADATA_PROGRAM_ID,
        accounts: lock_accounts(accounts, delegate),
        data: instruction_data(IX_LOCK, &args)?,
    })
}

/// Thaw the owner's token; signed by the token delegate
pub fn unlock(accounts: &AssetAccounts, delegate: &Pubkey) -> Result<Instruction, CustodyTxError> {
    let args = UnlockArgs::V1 {
        authorization_data: None,
    };
    Ok(Instruction {
        program_id: TOKEN_METADATA_PROGRAM_ID,
        accounts: lock_accounts(accounts, delegate),
        data: instruction_data(IX_UNLOCK, &args)?,
    })
}

fn lock_accounts(accounts: &AssetAccounts, delegate: &Pubkey) -> Vec<AccountMeta> {
    vec![
        AccountMeta::new_readonly(*delegate, true),
        AccountMeta::new_readonly(accounts.owner, false),
        AccountMeta::new(accounts.token, false),
        AccountMeta::new_readonly(accounts.mint, false),
        AccountMeta::new(accounts.metadata, false),
        AccountMeta::new_readonly(accounts.edition, false),
        AccountMeta::new(accounts.token_record, false),
        AccountMeta::new(*delegate, true),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new_readonly(sysvar::instructions::id(), false),
        AccountMeta::new_readonly(spl_token::id(), false),
        accounts.rules_program_meta(),
        accounts.rules_meta(),
    ]
}

/// Move a programmable asset between owners
///
/// The program creates the destination token account itself, so no
/// separate account-creation instruction is needed.
pub fn transfer(
    source: &AssetAccounts,
    destination_owner: &Pubkey,
    payer: &Pubkey,
    amount: u64,
) -> Result<Instruction, CustodyTxError> {
    let destination_token = get_associated_token_address(destination_owner, &source.mint);
    let destination_token_record = find_token_record_pda(&source.mint, &destination_token);

    let args = TransferArgs::V1 {
        amount,
        authorization_data: None,
    };
    let data = instruction_data(IX_TRANSFER, &args)?;

    Ok(Instruction {
        program_id: TOKEN_METADATA_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(source.token, false),
            AccountMeta::new_readonly(source.owner, false),
            AccountMeta::new(destination_token, false),
            AccountMeta::new_readonly(*destination_owner, false),
            AccountMeta::new_readonly(source.mint, false),
            AccountMeta::new(source.metadata, false),
            AccountMeta::new_readonly(source.edition, false),
            AccountMeta::new(source.token_record, false),
            AccountMeta::new(destination_token_record, false),
            AccountMeta::new_readonly(source.owner, true),
            AccountMeta::new(*payer, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(sysvar::instructions::id(), false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(spl_associated_token_account::id(), false),
            source.rules_program_meta(),
            source.rules_meta(),
        ],
        data,
    })
}

/// Discriminant of a metadata program instruction, `None` for other programs
pub fn metadata_discriminant(ix: &Instruction) -> Option<u8> {
    if ix.program_id != TOKEN_METADATA_PROGRAM_ID {
        return None;
    }
    ix.data.first().copied()
}
