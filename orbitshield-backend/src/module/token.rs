//! Short-lived access tokens gating the position stream

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use tokio::sync::Mutex;
use tracing::debug;

const TOKEN_BYTES: usize = 32;

/// Longest accepted token lifetime
pub const MAX_TOKEN_TTL: std::time::Duration = std::time::Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenRejection {
    #[error("token not found")]
    NotFound,

    #[error("token expired")]
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("token ttl must be between 1s and {max:?}, got {0:?}", max = MAX_TOKEN_TTL)]
pub struct InvalidTtl(pub std::time::Duration);

/// Issues and validates opaque stream tokens.
///
/// Tokens are single use: `redeem` removes a token once it has opened a
/// connection.
pub struct TokenAuthority {
    ttl: Duration,
    tokens: Mutex<HashMap<String, DateTime<Utc>>>,
}

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl TokenAuthority {
    pub fn new(ttl: std::time::Duration) -> Result<Self, InvalidTtl> {
        if ttl < std::time::Duration::from_secs(1) || ttl > MAX_TOKEN_TTL {
            return Err(InvalidTtl(ttl));
        }
        let ttl = Duration::from_std(ttl).map_err(|_| InvalidTtl(ttl))?;
        Ok(Self {
            ttl,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    pub async fn issue(&self) -> AccessToken {
        self.issue_at(Utc::now()).await
    }

    pub async fn issue_at(&self, now: DateTime<Utc>) -> AccessToken {
        let token = AccessToken {
            value: random_token(),
            expires_at: now
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.tokens
            .lock()
            .await
            .insert(token.value.clone(), token.expires_at);
        debug!(expires_at = %token.expires_at, "Issued stream token");
        token
    }

    /// Check a token without consuming it
    pub async fn validate(&self, value: &str) -> Result<AccessToken, TokenRejection> {
        self.validate_at(value, Utc::now()).await
    }

    pub async fn validate_at(
        &self,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessToken, TokenRejection> {
        let mut tokens = self.tokens.lock().await;
        Self::check(&mut tokens, value, now)
    }

    /// Validate and consume a token
    pub async fn redeem(&self, value: &str) -> Result<AccessToken, TokenRejection> {
        self.redeem_at(value, Utc::now()).await
    }

    pub async fn redeem_at(
        &self,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessToken, TokenRejection> {
        let mut tokens = self.tokens.lock().await;
        let token = Self::check(&mut tokens, value, now)?;
        tokens.remove(value);
        Ok(token)
    }

    /// Drop every expired token, returning how many were removed
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut tokens = self.tokens.lock().await;
        let before = tokens.len();
        tokens.retain(|_, expires_at| now < *expires_at);
        before - tokens.len()
    }

    pub async fn len(&self) -> usize {
        self.tokens.lock().await.len()
    }

    fn check(
        tokens: &mut HashMap<String, DateTime<Utc>>,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessToken, TokenRejection> {
        let expires_at = *tokens.get(value).ok_or(TokenRejection::NotFound)?;
        if now >= expires_at {
            tokens.remove(value);
            return Err(TokenRejection::Expired);
        }
        Ok(AccessToken {
            value: value.to_string(),
            expires_at,
        })
    }
}
