//! Core data model shared by the transaction builder and its collaborators

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::tx_builder::CustodyTxError;

/// Token standard value the metadata program uses for programmable NFTs
pub const TOKEN_STANDARD_PROGRAMMABLE_NON_FUNGIBLE: u8 = 4;

/// Token standard value for programmable NFT editions
pub const TOKEN_STANDARD_PROGRAMMABLE_NON_FUNGIBLE_EDITION: u8 = 5;

/// Asset class, dispatched on by the instruction builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetClass {
    /// Plain SPL token (also covers non-programmable NFTs)
    Fungible,
    /// Programmable NFT enforcing rule-set authorization on transfer
    ProgrammableNonFungible {
        /// Authorization rule set attached to the asset, if any
        rule_set: Option<Pubkey>,
    },
}

impl AssetClass {
    /// Map a metadata token standard (and rule set) onto an asset class
    pub fn from_token_standard(token_standard: Option<u8>, rule_set: Option<Pubkey>) -> Self {
        match token_standard {
            Some(TOKEN_STANDARD_PROGRAMMABLE_NON_FUNGIBLE)
            | Some(TOKEN_STANDARD_PROGRAMMABLE_NON_FUNGIBLE_EDITION) => {
                Self::ProgrammableNonFungible { rule_set }
            }
            _ => Self::Fungible,
        }
    }

    pub fn is_programmable(&self) -> bool {
        matches!(self, Self::ProgrammableNonFungible { .. })
    }

    pub fn rule_set(&self) -> Option<Pubkey> {
        match self {
            Self::ProgrammableNonFungible { rule_set } => *rule_set,
            Self::Fungible => None,
        }
    }
}

/// Immutable description of a ledger asset, fetched per operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub mint: Pubkey,
    pub class: AssetClass,
    pub decimals: u8,
}

impl AssetDescriptor {
    pub fn fungible(mint: Pubkey, decimals: u8) -> Self {
        Self {
            mint,
            class: AssetClass::Fungible,
            decimals,
        }
    }

    pub fn programmable(mint: Pubkey, rule_set: Option<Pubkey>) -> Self {
        Self {
            mint,
            class: AssetClass::ProgrammableNonFungible { rule_set },
            decimals: 0,
        }
    }
}

/// One transfer request as supplied by the caller
///
/// `destination` is optional; when absent the configured custody wallet
/// receives the asset and pays the fees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub mint: Pubkey,
    pub amount: f64,
    pub source: Pubkey,
    #[serde(default)]
    pub destination: Option<Pubkey>,
}

/// A transfer request resolved against the asset registry
#[derive(Debug, Clone, PartialEq)]
pub struct TransferIntent {
    pub asset: AssetDescriptor,
    pub amount: f64,
    pub source: Pubkey,
    pub destination: Pubkey,
}

impl TransferIntent {
    /// Exact integer amount in base units: `amount * 10^decimals`, floored
    pub fn base_units(&self) -> Result<u64, CustodyTxError> {
        ui_amount_to_base_units(self.amount, self.asset.decimals)
    }
}

/// Convert a decimal quantity into base units, flooring extra precision
///
/// Works on the shortest decimal rendering of the float, so values such as
/// `0.29` with 2 decimals become exactly `29` instead of `28`.
pub fn ui_amount_to_base_units(amount: f64, decimals: u8) -> Result<u64, CustodyTxError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(CustodyTxError::invalid_intent(format!(
            "amount must be a finite non-negative number, got {}",
            amount
        )));
    }

    // -0.0 passes the sign check but would render as "-0"
    let amount = if amount == 0.0 { 0.0 } else { amount };
    let rendered = format!("{}", amount);
    let (whole, fraction) = rendered.split_once('.').unwrap_or((rendered.as_str(), ""));

    let mut digits = String::with_capacity(whole.len() + decimals as usize);
    digits.push_str(whole);
    let fraction = fraction.as_bytes();
    for i in 0..decimals as usize {
        digits.push(fraction.get(i).map(|b| *b as char).unwrap_or('0'));
    }

    digits.parse::<u64>().map_err(|_| {
        CustodyTxError::invalid_intent(format!(
            "amount {} with {} decimals overflows u64 base units",
            amount, decimals
        ))
    })
}

/// Logical custody state of an (asset, owner) pair
///
/// Never persisted; derived from the on-chain token record on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CustodyState {
    Unlocked,
    Delegated,
    Locked,
}

impl std::fmt::Display for CustodyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unlocked => "unlocked",
            Self::Delegated => "delegated",
            Self::Locked => "locked",
        };
        f.write_str(s)
    }
}
