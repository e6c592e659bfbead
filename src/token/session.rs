use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Credentials handed over by a successful login or refresh.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of `access_token` in seconds, relative to receipt.
    pub expires_in: u64,
}

impl TokenGrant {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: u64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_in,
        }
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.expires_in)
    }
}

/// Body of `POST /api/v1/auth/refresh`, as received.
///
/// Every field is optional so that a structurally incomplete body surfaces as
/// [`Error::MalformedGrant`] instead of a decode error.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
}

impl TryFrom<RefreshResponse> for TokenGrant {
    type Error = Error;

    fn try_from(resp: RefreshResponse) -> Result<Self, Self::Error> {
        let access_token = resp
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::MalformedGrant("missing access_token".into()))?;
        let refresh_token = resp
            .refresh_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::MalformedGrant("missing refresh_token".into()))?;
        let expires_in = resp
            .expires_in
            .ok_or_else(|| Error::MalformedGrant("missing expires_in".into()))?;
        let expires_in = u64::try_from(expires_in)
            .map_err(|_| Error::MalformedGrant(format!("negative expires_in {expires_in}")))?;
        Ok(TokenGrant {
            access_token,
            refresh_token,
            expires_in,
        })
    }
}

/// The persisted session, minus the activity timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch milliseconds at which `access_token` stops being valid.
    pub expires_at: i64,
}

impl StoredSession {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }

    /// Time left before expiry, or `None` once expired.
    pub fn remaining(&self, now_ms: i64) -> Option<Duration> {
        let left = self.expires_at.checked_sub(now_ms)?;
        if left <= 0 {
            return None;
        }
        u64::try_from(left).ok().map(Duration::from_millis)
    }
}
