//! Decoding of Token Metadata program accounts
//!
//! Only the fields the builder needs are surfaced: the token standard and
//! rule set of a `Metadata` account, and the lock/delegate state of a
//! `TokenRecord`. Both are Borsh layouts read from the front of the account;
//! trailing bytes are ignored.
//!
//! Older metadata accounts stop before the trailing optional fields (or pad
//! them with zeros). Running out of data before an optional field is
//! therefore treated as `None` rather than an error.

use borsh::BorshDeserialize;
use solana_sdk::pubkey::Pubkey;

use crate::types::CustodyState;

/// Account discriminator of `MetadataV1`
const KEY_METADATA_V1: u8 = 4;

/// Account discriminator of `TokenRecord`
const KEY_TOKEN_RECORD: u8 = 11;

#[derive(BorshDeserialize)]
struct Creator {
    _address: [u8; 32],
    _verified: bool,
    _share: u8,
}

/// Fixed part of a metadata account, present in every version
#[derive(BorshDeserialize)]
struct MetadataHead {
    key: u8,
    _update_authority: [u8; 32],
    _mint: [u8; 32],
    _name: String,
    _symbol: String,
    _uri: String,
    _seller_fee_basis_points: u16,
    _creators: Option<Vec<Creator>>,
    _primary_sale_happened: bool,
    _is_mutable: bool,
}

#[derive(BorshDeserialize)]
struct Collection {
    _verified: bool,
    _key: [u8; 32],
}

#[derive(BorshDeserialize)]
struct Uses {
    _use_method: u8,
    _remaining: u64,
    _total: u64,
}

#[allow(dead_code)]
#[derive(BorshDeserialize)]
enum CollectionDetails {
    V1 { size: u64 },
    V2 { padding: [u8; 8] },
}

#[derive(BorshDeserialize)]
enum ProgrammableConfig {
    V1 { rule_set: Option<[u8; 32]> },
}

/// Read an optional trailing field; end of data counts as `None`
fn optional_tail<T: BorshDeserialize>(buf: &mut &[u8]) -> Result<Option<T>, String> {
    if buf.is_empty() {
        return Ok(None);
    }
    Option::<T>::deserialize(buf).map_err(|e| e.to_string())
}

/// Fields of a metadata account the builder cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetadataSummary {
    pub token_standard: Option<u8>,
    pub rule_set: Option<Pubkey>,
}

/// Decode the token standard and programmable rule set of a metadata account
pub fn decode_metadata(data: &[u8]) -> Result<MetadataSummary, String> {
    let mut buf = data;
    let head = MetadataHead::deserialize(&mut buf).map_err(|e| e.to_string())?;
    if head.key != KEY_METADATA_V1 {
        return Err(format!("not a metadata account (key={})", head.key));
    }

    let _edition_nonce: Option<u8> = optional_tail(&mut buf)?;
    let token_standard: Option<u8> = optional_tail(&mut buf)?;
    let _collection: Option<Collection> = optional_tail(&mut buf)?;
    let _uses: Option<Uses> = optional_tail(&mut buf)?;
    let _details: Option<CollectionDetails> = optional_tail(&mut buf)?;
    let programmable: Option<ProgrammableConfig> = optional_tail(&mut buf)?;

    Ok(MetadataSummary {
        token_standard,
        rule_set: programmable.and_then(|ProgrammableConfig::V1 { rule_set }| {
            rule_set.map(Pubkey::new_from_array)
        }),
    })
}

#[allow(dead_code)]
#[derive(BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
enum TokenState {
    Unlocked,
    Locked,
    Listed,
}

/// Leading fields of a token record; `locked_transfer` and later are unused
#[derive(BorshDeserialize)]
struct TokenRecordHead {
    key: u8,
    _bump: u8,
    state: TokenState,
    _rule_set_revision: Option<u64>,
    delegate: Option<[u8; 32]>,
    delegate_role: Option<u8>,
}

/// Fields of a token record the custody state is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRecordSummary {
    pub locked: bool,
    pub delegate: Option<Pubkey>,
    pub delegate_role: Option<u8>,
}

impl TokenRecordSummary {
    pub fn custody_state(&self) -> CustodyState {
        if self.locked {
            CustodyState::Locked
        } else if self.delegate.is_some() {
            CustodyState::Delegated
        } else {
            CustodyState::Unlocked
        }
    }
}

pub fn decode_token_record(data: &[u8]) -> Result<TokenRecordSummary, String> {
    let mut buf = data;
    let head = TokenRecordHead::deserialize(&mut buf).map_err(|e| e.to_string())?;
    if head.key != KEY_TOKEN_RECORD {
        return Err(format!("not a token record account (key={})", head.key));
    }

    Ok(TokenRecordSummary {
        locked: head.state == TokenState::Locked,
        delegate: head.delegate.map(Pubkey::new_from_array),
        delegate_role: head.delegate_role,
    })
}
