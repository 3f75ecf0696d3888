//! C10 — token intake: the single entry point an external mint feed calls.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use solana_sdk::pubkey::Pubkey;

use crate::error::{PulseWatchError, Result};
use crate::repository::TokenRepository;
use crate::types::{TokenId, TokenStatus};

/// True when `mint` decodes as a well-formed Base58 Solana public key.
/// Intake's only validation step — everything else about the token is
/// discovered later by the scheduler.
pub fn is_valid_mint(mint: &str) -> bool {
    Pubkey::from_str(mint).is_ok()
}

/// Registers a newly observed mint. Idempotent: if the token already
/// exists, this is a no-op that returns the existing id.
pub async fn register_mint(
    repository: &dyn TokenRepository,
    mint: &str,
    source_created_at: Option<DateTime<Utc>>,
) -> Result<TokenId> {
    if !is_valid_mint(mint) {
        return Err(PulseWatchError::Validation {
            key: "mint".to_string(),
            reason: "not a valid Base58 public key".to_string(),
        });
    }

    if let Some(existing) = repository.get_token(mint).await? {
        return Ok(existing.id);
    }

    repository
        .upsert_token(
            mint,
            TokenStatus::Monitoring,
            source_created_at.unwrap_or_else(Utc::now),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryTokenRepository;

    fn sample_mint() -> String {
        Pubkey::new_unique().to_string()
    }

    #[tokio::test]
    async fn registering_twice_is_idempotent() {
        let repo = InMemoryTokenRepository::new();
        let mint = sample_mint();
        let first = register_mint(&repo, &mint, None).await.unwrap();
        let second = register_mint(&repo, &mint, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn new_mint_starts_in_monitoring() {
        let repo = InMemoryTokenRepository::new();
        let id = register_mint(&repo, &sample_mint(), None).await.unwrap();
        let token = repo.get_token_by_id(id).await.unwrap().unwrap();
        assert_eq!(token.status, TokenStatus::Monitoring);
    }

    #[tokio::test]
    async fn malformed_mint_is_rejected() {
        let repo = InMemoryTokenRepository::new();
        let result = register_mint(&repo, "not-a-pubkey", None).await;
        assert!(result.is_err());
    }
}
