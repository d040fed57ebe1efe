//! Keypair loading for the custodial keys

use anyhow::{Context, Result};
use solana_sdk::signature::Keypair;

use crate::config::KeysConfig;

/// Load a keypair from disk
///
/// Accepts both the Solana CLI JSON array format and raw 64-byte files.
pub fn load_keypair(path: &str) -> Result<Keypair> {
    let keypair_bytes =
        std::fs::read(path).with_context(|| format!("Failed to read keypair file: {}", path))?;

    let bytes = if keypair_bytes.len() == 64 {
        keypair_bytes
    } else {
        serde_json::from_slice::<Vec<u8>>(&keypair_bytes)
            .context("Failed to parse keypair JSON")?
    };

    keypair_from_bytes(&bytes)
}

/// Decode a base58 secret key, the format wallets export
pub fn keypair_from_base58(secret: &str) -> Result<Keypair> {
    let bytes = bs58::decode(secret.trim())
        .into_vec()
        .context("Invalid base58 secret key")?;
    keypair_from_bytes(&bytes)
}

fn keypair_from_bytes(bytes: &[u8]) -> Result<Keypair> {
    if bytes.len() != 64 {
        anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", bytes.len());
    }
    if bytes.iter().all(|&b| b == 0) {
        anyhow::bail!("Invalid keypair: all-zero key rejected");
    }
    Keypair::try_from(bytes).context("Invalid keypair bytes")
}

/// The two custodial keys, loaded once at startup
pub struct CustodyKeys {
    /// Default transfer destination; pays and co-signs those transfers
    pub custody: Keypair,
    /// Utility delegate that locks/unlocks custodied assets
    pub utility_delegate: Keypair,
}

impl CustodyKeys {
    pub fn from_config(config: &KeysConfig) -> Result<Self> {
        let custody = load_keypair(&config.custody_keypair_path)
            .context("Failed to load custody keypair")?;
        let utility_delegate = load_keypair(&config.utility_delegate_keypair_path)
            .context("Failed to load utility delegate keypair")?;
        Ok(Self {
            custody,
            utility_delegate,
        })
    }
}
