use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE};
use time::OffsetDateTime;

use crate::store::{RefreshToken, RefreshTokenStore, StoreError, StoreResult};

const GENERATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshCheck {
    Valid(RefreshToken),
    Expired(RefreshToken),
    Unknown,
}

/// Opaque long-lived tokens that can be exchanged for session tokens.
#[derive(Clone)]
pub struct RefreshTokens {
    repo: RefreshTokenStore,
    ttl: Duration,
}

impl RefreshTokens {
    pub fn new(repo: RefreshTokenStore, ttl: Duration) -> Self {
        Self { repo, ttl }
    }

    pub fn repo(&self) -> &RefreshTokenStore {
        &self.repo
    }

    pub async fn generate(&self, user_id: &str) -> StoreResult<RefreshToken> {
        let mut attempt = 0;
        loop {
            let token = RefreshToken {
                token: URL_SAFE.encode(rand::random::<[u8; 32]>()),
                user_id: user_id.to_owned(),
                expiry: OffsetDateTime::now_utc() + self.ttl,
            };
            match self.repo.create(&token).await {
                Ok(()) => return Ok(token),
                Err(StoreError::TokenAlreadyExists) if attempt + 1 < GENERATE_ATTEMPTS => {
                    attempt += 1;
                    tracing::warn!(user_id, attempt, "refresh token collision");
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn validate(&self, token: &str) -> StoreResult<RefreshCheck> {
        Ok(match self.repo.get_token(token).await? {
            Some(found) if found.is_valid() => RefreshCheck::Valid(found),
            Some(found) => RefreshCheck::Expired(found),
            None => RefreshCheck::Unknown,
        })
    }

    pub async fn revoke(&self, token: &str) -> StoreResult<()> {
        self.repo.remove(token).await
    }
}
