/*
[INPUT]:  Session tokens and expiration timestamps
[OUTPUT]: Token retrieval and expiration status
[POS]:    Auth layer - token lifecycle management
[UPDATE]: When adding token refresh or changing storage strategy
*/

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, PoisonError, RwLock};

use super::TokenSource;

/// Stored token data with metadata
#[derive(Debug, Clone)]
pub struct TokenData {
    pub token: String,
    /// `None` means the token never expires locally
    pub expires_at: Option<DateTime<Utc>>,
    pub account: String,
}

/// Thread-safe session token store
#[derive(Debug, Clone)]
pub struct SessionTokenStore {
    data: Arc<RwLock<Option<TokenData>>>,
}

impl SessionTokenStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(None)),
        }
    }

    /// Store a new token with expiration; lifetimes past the calendar range clamp to its end
    pub fn set_token(&self, token: String, expires_seconds: u64, account: String) {
        let expires_at = expiry_after(expires_seconds).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.store(token, Some(expires_at), account);
    }

    /// Store a token that stays valid until replaced or cleared
    pub fn set_token_without_expiry(&self, token: String, account: String) {
        self.store(token, None, account);
    }

    fn store(&self, token: String, expires_at: Option<DateTime<Utc>>, account: String) {
        let token_data = TokenData {
            token,
            expires_at,
            account,
        };

        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(token_data);
    }

    /// Get the current token if available, expired or not
    pub fn get_token(&self) -> Option<String> {
        let guard = self.data.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|data| data.token.clone())
    }

    /// Check if token is expired
    pub fn is_expired(&self) -> bool {
        let guard = self.data.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(data) => data
                .expires_at
                .is_some_and(|expires_at| Utc::now() >= expires_at),
            None => true,
        }
    }

    /// Get token data if available
    pub fn token_data(&self) -> Option<TokenData> {
        let guard = self.data.read().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Clear the stored token
    pub fn clear(&self) {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }
}

impl Default for SessionTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSource for SessionTokenStore {
    fn session_token(&self) -> Option<String> {
        if self.is_expired() {
            return None;
        }
        self.get_token()
    }
}

/// Instant `expires_seconds` from now, or `None` when that is not representable.
pub fn expiry_after(expires_seconds: u64) -> Option<DateTime<Utc>> {
    let seconds = i64::try_from(expires_seconds).ok()?;
    Utc::now().checked_add_signed(TimeDelta::try_seconds(seconds)?)
}

/// A token that never expires; handy for service accounts and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn session_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}
