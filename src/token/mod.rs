mod manager;
mod policy;
mod session;
mod store;

pub use manager::{LogoutCallback, TokenManager};
pub use policy::{
    ACTIVITY_INTERVAL, ActivityDecision, INACTIVITY_TIMEOUT, LogoutReason, MIN_REFRESH_DELAY,
    PROACTIVE_THRESHOLD, REFRESH_LEAD, RefreshPolicy,
};
pub use session::{RefreshResponse, StoredSession, TokenGrant};
pub use store::{
    ACCESS_TOKEN_KEY, LAST_ACTIVITY_KEY, REFRESH_TOKEN_KEY, TOKEN_EXPIRY_KEY, TokenStore,
};
