use std::fmt;
use std::time::Duration;

use crate::errors::Error;

/// How long without recorded activity before a session is no longer kept alive.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);
/// How far ahead of expiry the scheduled refresh fires.
pub const REFRESH_LEAD: Duration = Duration::from_secs(30);
/// Lower bound on the scheduled refresh delay.
pub const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);
/// On-demand checks refresh when less than this is left.
pub const PROACTIVE_THRESHOLD: Duration = Duration::from_secs(60);
/// Period of the foreground activity tick.
pub const ACTIVITY_INTERVAL: Duration = Duration::from_secs(60);

/// Why a session was ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogoutReason {
    UserRequested,
    NoActivityRecorded,
    Idle(Duration),
    Backgrounded,
    NoRefreshToken,
    RefreshFailed,
    SaveFailed,
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogoutReason::UserRequested => write!(f, "user requested"),
            LogoutReason::NoActivityRecorded => write!(f, "no activity recorded"),
            LogoutReason::Idle(idle) => write!(f, "idle for {}s", idle.as_secs()),
            LogoutReason::Backgrounded => write!(f, "app in background"),
            LogoutReason::NoRefreshToken => write!(f, "no refresh token"),
            LogoutReason::RefreshFailed => write!(f, "refresh failed"),
            LogoutReason::SaveFailed => write!(f, "session could not be saved"),
        }
    }
}

/// Outcome of the activity gate applied when a refresh or expiry timer fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityDecision {
    Refresh,
    Logout(LogoutReason),
}

/// Timing rules for keeping a session alive.
#[derive(Clone, Debug)]
pub struct RefreshPolicy {
    pub inactivity_timeout: Duration,
    pub refresh_lead: Duration,
    pub min_refresh_delay: Duration,
    pub proactive_threshold: Duration,
    pub activity_interval: Duration,
}

impl RefreshPolicy {
    pub fn new(
        inactivity_timeout: Duration,
        refresh_lead: Duration,
        min_refresh_delay: Duration,
        proactive_threshold: Duration,
        activity_interval: Duration,
    ) -> Result<Self, Error> {
        if inactivity_timeout.is_zero() {
            return Err(Error::Config("Inactivity timeout must be > 0".into()));
        }
        if min_refresh_delay.is_zero() {
            return Err(Error::Config("Minimum refresh delay must be > 0".into()));
        }
        if activity_interval.is_zero() {
            return Err(Error::Config("Activity interval must be > 0".into()));
        }
        if activity_interval >= inactivity_timeout {
            return Err(Error::Config(
                "Activity interval must be shorter than the inactivity timeout".into(),
            ));
        }
        Ok(Self {
            inactivity_timeout,
            refresh_lead,
            min_refresh_delay,
            proactive_threshold,
            activity_interval,
        })
    }

    /// Delay from arming until the scheduled refresh, for a token living `lifetime`.
    ///
    /// Fires `refresh_lead` before expiry, never sooner than `min_refresh_delay`.
    pub fn refresh_delay(&self, lifetime: Duration) -> Duration {
        lifetime
            .saturating_sub(self.refresh_lead)
            .max(self.min_refresh_delay)
    }

    /// Delay from arming until the expiry check.
    pub fn expiry_delay(&self, lifetime: Duration) -> Duration {
        lifetime
    }

    /// Whether an on-demand check should refresh a token that is not yet expired.
    pub fn should_refresh_proactively(&self, remaining: Duration) -> bool {
        remaining < self.proactive_threshold
    }

    /// Keep the session only while there is evidence of a present user.
    pub fn decide(
        &self,
        last_activity_ms: Option<i64>,
        now_ms: i64,
        foregrounded: bool,
    ) -> ActivityDecision {
        let Some(last_activity_ms) = last_activity_ms else {
            return ActivityDecision::Logout(LogoutReason::NoActivityRecorded);
        };
        let inactive_ms = now_ms.saturating_sub(last_activity_ms).max(0);
        let idle = Duration::from_millis(u64::try_from(inactive_ms).unwrap_or(u64::MAX));
        if idle >= self.inactivity_timeout {
            return ActivityDecision::Logout(LogoutReason::Idle(idle));
        }
        if !foregrounded {
            return ActivityDecision::Logout(LogoutReason::Backgrounded);
        }
        ActivityDecision::Refresh
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            inactivity_timeout: INACTIVITY_TIMEOUT,
            refresh_lead: REFRESH_LEAD,
            min_refresh_delay: MIN_REFRESH_DELAY,
            proactive_threshold: PROACTIVE_THRESHOLD,
            activity_interval: ACTIVITY_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_lived_token_refreshes_thirty_seconds_early() {
        let policy = RefreshPolicy::default();
        assert_eq!(
            policy.refresh_delay(Duration::from_secs(45)),
            Duration::from_secs(15)
        );
        assert_eq!(
            policy.refresh_delay(Duration::from_secs(3_600)),
            Duration::from_secs(3_570)
        );
    }

    #[test]
    fn refresh_delay_is_floored() {
        let policy = RefreshPolicy::default();
        assert_eq!(policy.refresh_delay(Duration::from_secs(20)), MIN_REFRESH_DELAY);
        assert_eq!(policy.refresh_delay(Duration::ZERO), MIN_REFRESH_DELAY);
    }

    #[test]
    fn expiry_check_fires_at_lifetime() {
        let policy = RefreshPolicy::default();
        assert_eq!(
            policy.expiry_delay(Duration::from_secs(45)),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn decide_requires_recorded_activity() {
        let policy = RefreshPolicy::default();
        assert_eq!(
            policy.decide(None, 1_000, true),
            ActivityDecision::Logout(LogoutReason::NoActivityRecorded)
        );
    }

    #[test]
    fn decide_refreshes_recent_foreground_user() {
        let policy = RefreshPolicy::default();
        assert_eq!(policy.decide(Some(0), 15_000, true), ActivityDecision::Refresh);
        assert_eq!(
            policy.decide(Some(0), 299_999, true),
            ActivityDecision::Refresh
        );
    }

    #[test]
    fn decide_logs_out_idle_or_backgrounded_user() {
        let policy = RefreshPolicy::default();
        assert_eq!(
            policy.decide(Some(0), 300_000, true),
            ActivityDecision::Logout(LogoutReason::Idle(Duration::from_secs(300)))
        );
        assert_eq!(
            policy.decide(Some(0), 15_000, false),
            ActivityDecision::Logout(LogoutReason::Backgrounded)
        );
    }

    #[test]
    fn clock_moving_backwards_counts_as_active() {
        let policy = RefreshPolicy::default();
        assert_eq!(
            policy.decide(Some(10_000), 5_000, true),
            ActivityDecision::Refresh
        );
    }

    #[test]
    fn policy_rejects_zero_and_inverted_intervals() {
        let err = RefreshPolicy::new(
            Duration::ZERO,
            REFRESH_LEAD,
            MIN_REFRESH_DELAY,
            PROACTIVE_THRESHOLD,
            ACTIVITY_INTERVAL,
        )
        .expect_err("zero timeout");
        assert!(matches!(err, Error::Config(_)));

        let err = RefreshPolicy::new(
            Duration::from_secs(60),
            REFRESH_LEAD,
            MIN_REFRESH_DELAY,
            PROACTIVE_THRESHOLD,
            Duration::from_secs(60),
        )
        .expect_err("tick not shorter than timeout");
        assert!(matches!(err, Error::Config(_)));
    }
}
