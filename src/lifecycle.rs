//! Foreground/background signal consumed by the token manager.

use std::fmt;
use std::str::FromStr;

use tokio::sync::watch;

use crate::errors::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppState {
    Active,
    Background,
}

impl AppState {
    pub fn is_foreground(self) -> bool {
        matches!(self, AppState::Active)
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppState::Active => write!(f, "active"),
            AppState::Background => write!(f, "background"),
        }
    }
}

impl FromStr for AppState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" | "foreground" => Ok(AppState::Active),
            "background" | "inactive" => Ok(AppState::Background),
            other => Err(Error::Config(format!(
                "Unknown app state '{}'; expected 'active' or 'background'",
                other
            ))),
        }
    }
}

/// Publishes app state transitions to any number of subscribers.
///
/// Subscribers are only woken when the state actually changes.
#[derive(Debug)]
pub struct AppLifecycle {
    tx: watch::Sender<AppState>,
}

impl AppLifecycle {
    pub fn new(initial: AppState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Records `state`; returns whether it differed from the previous one.
    pub fn set(&self, state: AppState) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        })
    }

    pub fn current(&self) -> AppState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }
}

impl Default for AppLifecycle {
    fn default() -> Self {
        Self::new(AppState::Active)
    }
}
