pub mod api;
pub mod clock;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod storage;
pub mod telemetry;
pub mod token;
pub mod transport;

pub use api::AuthorizedClient;
pub use config::Config;
pub use errors::{Error, Result};
pub use lifecycle::{AppLifecycle, AppState};
pub use token::{TokenGrant, TokenManager, TokenStore};
pub use transport::{HttpRefreshClient, RefreshTransport};
