use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{StoredSession, TokenGrant};
use crate::clock::{Clock, SystemClock};
use crate::errors::Result;
use crate::storage::{KeyValueStore, MemoryStore};

pub const ACCESS_TOKEN_KEY: &str = "@auth_access_token";
pub const REFRESH_TOKEN_KEY: &str = "@auth_refresh_token";
pub const TOKEN_EXPIRY_KEY: &str = "@auth_token_expiry";
pub const LAST_ACTIVITY_KEY: &str = "@auth_last_activity";

const SESSION_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    TOKEN_EXPIRY_KEY,
    LAST_ACTIVITY_KEY,
];

/// Durable record of the current session.
///
/// Reads never fail: a backend error is logged and reported as "absent", so
/// callers fall back to treating the user as logged out. Writes propagate.
#[derive(Clone)]
pub struct TokenStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Persists a grant, stamping `expires_at` and the activity time from the current clock.
    pub async fn save_tokens(&self, grant: &TokenGrant) -> Result<()> {
        let now = self.now_ms();
        let lifetime_ms = i64::try_from(grant.expires_in.saturating_mul(1_000)).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(lifetime_ms);
        self.kv
            .multi_set(&[
                (ACCESS_TOKEN_KEY, grant.access_token.clone()),
                (REFRESH_TOKEN_KEY, grant.refresh_token.clone()),
                (TOKEN_EXPIRY_KEY, expires_at.to_string()),
                (LAST_ACTIVITY_KEY, now.to_string()),
            ])
            .await?;
        debug!(expires_at, "session saved");
        Ok(())
    }

    pub async fn get_tokens(&self) -> Option<StoredSession> {
        let values = match self
            .kv
            .multi_get(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, TOKEN_EXPIRY_KEY])
            .await
        {
            Ok(values) => values,
            Err(err) => {
                warn!(error = %err, "failed to read session; treating as absent");
                return None;
            }
        };
        let mut values = values.into_iter();
        let access_token = values.next().flatten()?;
        let refresh_token = values.next().flatten()?;
        let expires_at = parse_millis(TOKEN_EXPIRY_KEY, values.next().flatten()?)?;
        Some(StoredSession {
            access_token,
            refresh_token,
            expires_at,
        })
    }

    pub async fn get_access_token(&self) -> Option<String> {
        self.read(ACCESS_TOKEN_KEY).await
    }

    pub async fn get_refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY).await
    }

    pub async fn update_last_activity(&self) -> Result<()> {
        self.kv
            .set(LAST_ACTIVITY_KEY, &self.now_ms().to_string())
            .await
    }

    pub async fn get_last_activity(&self) -> Option<i64> {
        let raw = self.read(LAST_ACTIVITY_KEY).await?;
        parse_millis(LAST_ACTIVITY_KEY, raw)
    }

    pub async fn is_token_expired(&self) -> bool {
        match self.get_tokens().await {
            Some(session) => session.is_expired(self.now_ms()),
            None => true,
        }
    }

    /// Time until the stored access token expires; `None` when absent or already expired.
    pub async fn time_to_expiry(&self) -> Option<Duration> {
        self.get_tokens().await?.remaining(self.now_ms())
    }

    pub async fn has_session(&self) -> bool {
        self.get_tokens().await.is_some()
    }

    pub async fn clear_tokens(&self) -> Result<()> {
        self.kv.multi_remove(&SESSION_KEYS).await?;
        debug!("session cleared");
        Ok(())
    }

    async fn read(&self, key: &str) -> Option<String> {
        match self.kv.get(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "failed to read from token store");
                None
            }
        }
    }
}

fn parse_millis(key: &str, raw: String) -> Option<i64> {
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "stored timestamp is not a number");
            None
        }
    }
}
