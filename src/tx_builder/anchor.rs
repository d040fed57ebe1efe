//! Blockhash anchors
//!
//! Every assembled transaction is pinned to a recent blockhash plus the
//! block height after which the network refuses it. Acquisition is retried
//! with exponential backoff inside an overall deadline; when the budget is
//! spent the caller gets `AnchorUnavailable` and no transaction is built.

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::hash::Hash;
use tracing::{debug, warn};

use super::errors::CustodyTxError;
use crate::config::AnchorConfig;
use crate::ledger::LedgerClient;
use crate::metrics;

/// Recent blockhash and its validity horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockhashAnchor {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

impl BlockhashAnchor {
    pub fn new(blockhash: Hash, last_valid_block_height: u64) -> Self {
        Self {
            blockhash,
            last_valid_block_height,
        }
    }

    /// True once the chain has moved past the validity horizon
    pub fn is_expired(&self, current_block_height: u64) -> bool {
        current_block_height > self.last_valid_block_height
    }
}

/// Bounded retry policy for anchor acquisition
#[derive(Debug, Clone)]
pub struct AnchorPolicy {
    pub max_attempts: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Deadline for the whole acquisition, retries included
    pub timeout: Duration,
}

impl Default for AnchorPolicy {
    fn default() -> Self {
        Self::from_config(&AnchorConfig::default())
    }
}

impl AnchorPolicy {
    pub fn from_config(config: &AnchorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay_ms: config.initial_delay_ms,
            max_delay_ms: config.max_delay_ms,
            backoff_multiplier: config.backoff_multiplier,
            timeout: config.timeout(),
        }
    }

    /// Calculate delay for given attempt
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let delay_ms =
            (self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32)) as u64;
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Supplies fresh anchors from the ledger
#[derive(Clone)]
pub struct BlockhashProvider {
    client: Arc<dyn LedgerClient>,
    policy: AnchorPolicy,
}

impl BlockhashProvider {
    pub fn new(client: Arc<dyn LedgerClient>, policy: AnchorPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &AnchorPolicy {
        &self.policy
    }

    /// Fetch a fresh anchor, retrying transient failures
    ///
    /// An all-zero blockhash is treated as "no anchor" and retried like any
    /// other failure. The builder never invents a blockhash.
    pub async fn acquire_anchor(&self) -> Result<BlockhashAnchor, CustodyTxError> {
        let deadline = self.policy.timeout;
        match tokio::time::timeout(deadline, self.acquire_with_retries()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = deadline.as_millis() as u64,
                    "Anchor acquisition timed out"
                );
                Err(CustodyTxError::anchor_unavailable(format!(
                    "no blockhash within {}ms",
                    deadline.as_millis()
                )))
            }
        }
    }

    /// Return `current` unchanged while it is still valid, otherwise a fresh one
    pub async fn refresh_if_expired(
        &self,
        current: Option<BlockhashAnchor>,
    ) -> Result<BlockhashAnchor, CustodyTxError> {
        let Some(anchor) = current else {
            return self.acquire_anchor().await;
        };

        let height = self.client.fetch_block_height().await?;
        if anchor.is_expired(height) {
            debug!(
                block_height = height,
                last_valid_block_height = anchor.last_valid_block_height,
                "Anchor expired, acquiring a new one"
            );
            self.acquire_anchor().await
        } else {
            Ok(anchor)
        }
    }

    async fn acquire_with_retries(&self) -> Result<BlockhashAnchor, CustodyTxError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_err = String::new();

        for attempt in 0..max_attempts {
            if attempt > 0 {
                metrics::record_anchor_retry();
                tokio::time::sleep(self.policy.delay_for_attempt(attempt - 1)).await;
            }

            match self.client.fetch_latest_anchor().await {
                Ok((blockhash, _)) if blockhash == Hash::default() => {
                    last_err = "ledger returned an all-zero blockhash".to_string();
                    debug!(attempt, "Empty blockhash, retrying");
                }
                Ok((blockhash, last_valid_block_height)) => {
                    debug!(
                        attempt,
                        blockhash = %blockhash,
                        last_valid_block_height,
                        "Anchor acquired"
                    );
                    return Ok(BlockhashAnchor::new(blockhash, last_valid_block_height));
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Anchor fetch failed");
                    last_err = e.to_string();
                }
            }
        }

        warn!(
            attempts = max_attempts,
            last_error = %last_err,
            "Anchor acquisition exhausted retries"
        );
        Err(CustodyTxError::anchor_unavailable(format!(
            "{} attempts failed, last error: {}",
            max_attempts, last_err
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerError;
    use crate::test_utils::MockLedgerClient;

    fn policy(max_attempts: usize) -> AnchorPolicy {
        AnchorPolicy {
            max_attempts,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            timeout: Duration::from_secs(30),
        }
    }

    fn transport_error() -> LedgerError {
        LedgerError::Transport {
            operation: "getLatestBlockhash".to_string(),
            message: "connection reset".to_string(),
        }
    }

    #[test]
    fn test_delay_for_attempt_is_capped() {
        let p = policy(5);
        assert_eq!(p.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(p.delay_for_attempt(4), Duration::from_millis(1_000));
    }

    #[test]
    fn test_anchor_expiry() {
        let anchor = BlockhashAnchor::new(Hash::new_unique(), 100);
        assert!(!anchor.is_expired(100));
        assert!(anchor.is_expired(101));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_retries_transient_failures() {
        let client = Arc::new(MockLedgerClient::new());
        let hash = Hash::new_unique();
        client.push_anchor(Err(transport_error()));
        client.push_anchor(Ok((Hash::default(), 10)));
        client.push_anchor(Ok((hash, 150)));

        let provider = BlockhashProvider::new(client.clone(), policy(5));
        let anchor = provider.acquire_anchor().await.unwrap();

        assert_eq!(anchor, BlockhashAnchor::new(hash, 150));
        assert_eq!(client.anchor_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_exhausts_budget() {
        let client = Arc::new(MockLedgerClient::new());
        for _ in 0..3 {
            client.push_anchor(Err(transport_error()));
        }

        let provider = BlockhashProvider::new(client.clone(), policy(3));
        let err = provider.acquire_anchor().await.unwrap_err();

        assert!(matches!(err, CustodyTxError::AnchorUnavailable(_)));
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(client.anchor_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_respects_deadline() {
        let client = Arc::new(MockLedgerClient::new());
        for _ in 0..10 {
            client.push_anchor(Err(transport_error()));
        }

        let mut p = policy(10);
        p.initial_delay_ms = 5_000;
        p.max_delay_ms = 5_000;
        p.timeout = Duration::from_secs(7);

        let provider = BlockhashProvider::new(client.clone(), p);
        let err = provider.acquire_anchor().await.unwrap_err();

        assert!(err.to_string().contains("no blockhash within 7000ms"));
        assert_eq!(client.anchor_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_keeps_valid_anchor() {
        let client = Arc::new(MockLedgerClient::new());
        client.set_block_height(90);
        let current = BlockhashAnchor::new(Hash::new_unique(), 100);

        let provider = BlockhashProvider::new(client.clone(), policy(3));
        let refreshed = provider.refresh_if_expired(Some(current)).await.unwrap();

        assert_eq!(refreshed, current);
        assert_eq!(client.anchor_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_replaces_expired_anchor() {
        let client = Arc::new(MockLedgerClient::new());
        client.set_block_height(250);
        let fresh = Hash::new_unique();
        client.push_anchor(Ok((fresh, 400)));

        let provider = BlockhashProvider::new(client.clone(), policy(3));
        let stale = BlockhashAnchor::new(Hash::new_unique(), 100);
        let refreshed = provider.refresh_if_expired(Some(stale)).await.unwrap();

        assert_eq!(refreshed.blockhash, fresh);
        assert_eq!(refreshed.last_valid_block_height, 400);
    }
}
