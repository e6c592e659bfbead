use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{ActivityDecision, LogoutReason, RefreshPolicy, TokenGrant, TokenStore};
use crate::clock::SystemClock;
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::lifecycle::AppState;
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::telemetry::refresh::{RefreshTelemetry, emit_logout};
use crate::transport::{HttpRefreshClient, RefreshTransport};

/// Invoked every time a session ends.
pub type LogoutCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Timer {
    Refresh,
    Expiry,
}

impl Timer {
    fn context(self) -> &'static str {
        match self {
            Timer::Refresh => "timer.refresh",
            Timer::Expiry => "timer.expiry",
        }
    }
}

#[derive(Default)]
struct Timers {
    refresh: Option<JoinHandle<()>>,
    expiry: Option<JoinHandle<()>>,
    activity: Option<JoinHandle<()>>,
}

impl Timers {
    fn abort_all(&mut self) {
        for handle in [self.refresh.take(), self.expiry.take(), self.activity.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }

    fn is_armed(&self) -> bool {
        self.refresh.is_some() || self.expiry.is_some()
    }
}

struct Inner {
    store: TokenStore,
    transport: Arc<dyn RefreshTransport>,
    policy: RefreshPolicy,
    /// Advanced on every arm, logout and destroy; scheduled work from an older value is stale.
    generation: AtomicU64,
    foregrounded: AtomicBool,
    timers: Mutex<Timers>,
    lifecycle: Mutex<Option<JoinHandle<()>>>,
    on_logout: Mutex<Option<LogoutCallback>>,
    // Only one refresh call at a time.
    refresh_lock: AsyncMutex<()>,
    // Serializes store commits: initialize, refresh commit, logout wipe.
    session_lock: AsyncMutex<()>,
}

/// Keeps a login session alive with silent refreshes while the user looks
/// present, and ends it otherwise.
///
/// Cloning yields another handle to the same manager. Timer tasks only hold
/// weak references, so dropping every handle stops all scheduled work.
/// Methods that arm timers must run inside a tokio runtime.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    pub fn new(
        store: TokenStore,
        transport: Arc<dyn RefreshTransport>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                policy,
                generation: AtomicU64::new(0),
                foregrounded: AtomicBool::new(true),
                timers: Mutex::new(Timers::default()),
                lifecycle: Mutex::new(None),
                on_logout: Mutex::new(None),
                refresh_lock: AsyncMutex::new(()),
                session_lock: AsyncMutex::new(()),
            }),
        }
    }

    /// Builds the production stack: HTTP refresh, file-backed store when configured, system clock.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let policy = config.policy()?;
        let http = config.http_client()?;
        let transport = HttpRefreshClient::with_client(http, &config.api_url)?;
        let kv: Arc<dyn KeyValueStore> = match config.token_store_path.as_ref() {
            Some(path) => Arc::new(FileStore::open(path).await?),
            None => Arc::new(MemoryStore::new()),
        };
        let store = TokenStore::new(kv, Arc::new(SystemClock));
        Ok(Self::new(store, Arc::new(transport), policy))
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.inner.policy
    }

    pub fn generation(&self) -> u64 {
        self.inner.current_generation()
    }

    pub fn is_foregrounded(&self) -> bool {
        self.inner.is_foregrounded()
    }

    /// Whether refresh/expiry timers are pending for the current session.
    pub fn is_armed(&self) -> bool {
        self.inner.lock_timers().is_armed()
    }

    /// Current bearer credential for outgoing requests.
    pub async fn access_token(&self) -> Option<String> {
        self.inner.store.get_access_token().await
    }

    pub async fn has_session(&self) -> bool {
        self.inner.store.has_session().await
    }

    pub async fn is_session_expired(&self) -> bool {
        self.inner.store.is_token_expired().await
    }

    /// Persists a freshly issued grant and arms the refresh and expiry timers.
    ///
    /// No network call is made. A persistence failure is returned after
    /// ending whatever session the store still held, so nothing is left
    /// stored without timers.
    pub async fn initialize_tokens(&self, grant: TokenGrant) -> Result<()> {
        self.inner.initialize(grant).await
    }

    /// Exchanges the stored refresh token for a new grant and re-arms.
    ///
    /// Any failure ends the session before the error is returned, except
    /// [`Error::Superseded`], which means the session had already been ended
    /// or replaced and the outcome was discarded.
    pub async fn refresh_token(&self) -> Result<()> {
        let generation = self.inner.current_generation();
        self.inner.refresh_from(generation, "manual").await
    }

    pub async fn refresh_token_ok(&self) -> bool {
        self.refresh_token().await.is_ok()
    }

    /// Refreshes when the token is expired or about to expire; otherwise does nothing.
    pub async fn check_and_refresh_token(&self) -> Result<()> {
        self.inner.check_and_refresh("manual").await
    }

    /// Ends the session: clears timers, wipes the store, notifies the logout callback.
    pub async fn logout(&self) {
        self.inner.end_session(None, LogoutReason::UserRequested).await;
    }

    /// Replaces the logout callback; only the most recent registration is kept.
    pub fn set_logout_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.inner.on_logout) = Some(Arc::new(callback));
    }

    /// Follows app state transitions from `rx`, replacing any earlier subscription.
    pub fn attach_lifecycle(&self, mut rx: watch::Receiver<AppState>) {
        let initial = *rx.borrow_and_update();
        self.inner
            .foregrounded
            .store(initial.is_foreground(), Ordering::SeqCst);
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut last = initial;
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                if state == last {
                    continue;
                }
                last = state;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.on_app_state(state);
            }
            debug!("app lifecycle subscription ended");
        });
        if let Some(previous) = lock(&self.inner.lifecycle).replace(handle) {
            previous.abort();
        }
    }

    /// Applies one app state transition and waits for the foreground check to finish.
    pub async fn handle_app_state(&self, state: AppState) -> Result<()> {
        self.inner.set_foregrounded(state);
        match state {
            AppState::Active => self.inner.check_and_refresh("foreground").await,
            AppState::Background => Ok(()),
        }
    }

    /// Stops the lifecycle subscription and all timers without touching the store.
    pub fn destroy(&self) {
        if let Some(handle) = lock(&self.inner.lifecycle).take() {
            handle.abort();
        }
        let generation = self.inner.advance_generation();
        self.inner.clear_timers();
        debug!(generation, "token manager destroyed");
    }
}

impl Inner {
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_foregrounded(&self) -> bool {
        self.foregrounded.load(Ordering::SeqCst)
    }

    fn set_foregrounded(&self, state: AppState) {
        self.foregrounded
            .store(state.is_foreground(), Ordering::SeqCst);
        debug!(state = %state, "app state changed");
    }

    fn lock_timers(&self) -> MutexGuard<'_, Timers> {
        lock(&self.timers)
    }

    fn clear_timers(&self) {
        self.lock_timers().abort_all();
    }

    fn logout_callback(&self) -> Option<LogoutCallback> {
        lock(&self.on_logout).clone()
    }

    async fn initialize(self: &Arc<Self>, grant: TokenGrant) -> Result<()> {
        let session_guard = self.session_lock.lock().await;
        let generation = self.advance_generation();
        self.clear_timers();
        if let Err(err) = self.store.save_tokens(&grant).await {
            // Whatever the store still holds has lost its timers.
            drop(session_guard);
            error!(generation, error = %err, "failed to save new session");
            self.end_session(Some(generation), LogoutReason::SaveFailed).await;
            return Err(err);
        }
        self.arm(generation, grant.lifetime());
        drop(session_guard);
        info!(generation, expires_in = grant.expires_in, "session initialized");
        Ok(())
    }

    /// Schedules refresh, expiry and activity work for `generation`, replacing earlier timers.
    fn arm(self: &Arc<Self>, generation: u64, lifetime: Duration) {
        let refresh_delay = self.policy.refresh_delay(lifetime);
        let expiry_delay = self.policy.expiry_delay(lifetime);
        let refresh = self.schedule(generation, refresh_delay, Timer::Refresh);
        let expiry = self.schedule(generation, expiry_delay, Timer::Expiry);
        let activity = self.spawn_activity_tick(generation);

        let mut timers = self.lock_timers();
        timers.abort_all();
        timers.refresh = Some(refresh);
        timers.expiry = Some(expiry);
        timers.activity = Some(activity);
        drop(timers);

        debug!(
            generation,
            refresh_in_ms = u64::try_from(refresh_delay.as_millis()).unwrap_or(u64::MAX),
            expiry_in_ms = u64::try_from(expiry_delay.as_millis()).unwrap_or(u64::MAX),
            "session armed"
        );
    }

    fn schedule(self: &Arc<Self>, generation: u64, delay: Duration, timer: Timer) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.current_generation() != generation {
                return;
            }
            // Detached so that clearing this timer from inside the handler cannot cancel it.
            tokio::spawn(async move {
                match inner.on_timer(timer, generation).await {
                    Ok(()) => {}
                    Err(Error::Inactive(reason)) => {
                        info!(generation, reason = %reason, "session ended by {}", timer.context());
                    }
                    Err(err) => {
                        debug!(generation, error = %err, "scheduled refresh did not keep the session");
                    }
                }
            });
        })
    }

    fn spawn_activity_tick(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.policy.activity_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.current_generation() != generation {
                    break;
                }
                if !inner.is_foregrounded() {
                    continue;
                }
                if let Err(err) = inner.store.update_last_activity().await {
                    warn!(error = %err, "failed to record activity");
                }
            }
        })
    }

    /// Runs a fired timer for `generation`.
    ///
    /// An activity-gated logout comes back as [`Error::Inactive`].
    async fn on_timer(self: &Arc<Self>, timer: Timer, generation: u64) -> Result<()> {
        if self.current_generation() != generation {
            return Err(Error::Superseded);
        }
        if timer == Timer::Expiry && !self.store.is_token_expired().await {
            debug!(generation, "expiry check found token still valid");
            return Ok(());
        }

        let last_activity = self.store.get_last_activity().await;
        let now = self.store.now_ms();
        match self.policy.decide(last_activity, now, self.is_foregrounded()) {
            ActivityDecision::Refresh => self.refresh_from(generation, timer.context()).await,
            ActivityDecision::Logout(reason) => {
                if self.end_session(Some(generation), reason).await {
                    Err(Error::Inactive(reason))
                } else {
                    Err(Error::Superseded)
                }
            }
        }
    }

    fn on_app_state(self: &Arc<Self>, state: AppState) {
        self.set_foregrounded(state);
        if !state.is_foreground() {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = inner.check_and_refresh("foreground").await {
                debug!(error = %err, "foreground check did not keep the session");
            }
        });
    }

    async fn check_and_refresh(self: &Arc<Self>, context: &str) -> Result<()> {
        let generation = self.current_generation();
        let now = self.store.now_ms();
        let remaining = self
            .store
            .get_tokens()
            .await
            .and_then(|session| session.remaining(now));
        match remaining {
            Some(left) if !self.policy.should_refresh_proactively(left) => Ok(()),
            _ => self.refresh_from(generation, context).await,
        }
    }

    async fn refresh_from(self: &Arc<Self>, generation: u64, context: &str) -> Result<()> {
        let telemetry = RefreshTelemetry::new(context, generation);
        let refresh_guard = self.refresh_lock.lock().await;

        if self.current_generation() != generation {
            // Another refresh, a logout or a new login finished while we waited.
            if self.store.time_to_expiry().await.is_some() {
                return Ok(());
            }
            telemetry.emit_superseded();
            return Err(Error::Superseded);
        }

        let Some(refresh_token) = self.store.get_refresh_token().await else {
            let err = Error::NoRefreshToken;
            telemetry.emit_failure(&err);
            return Err(self
                .abandon(generation, &telemetry, LogoutReason::NoRefreshToken, err)
                .await);
        };

        telemetry.emit_start();
        let grant = match self
            .transport
            .refresh(&refresh_token)
            .await
            .and_then(TokenGrant::try_from)
        {
            Ok(grant) => grant,
            Err(err) => {
                telemetry.emit_failure(&err);
                return Err(self
                    .abandon(generation, &telemetry, LogoutReason::RefreshFailed, err)
                    .await);
            }
        };

        let session_guard = self.session_lock.lock().await;
        if self.current_generation() != generation {
            telemetry.emit_superseded();
            return Err(Error::Superseded);
        }
        let next = self.advance_generation();
        self.clear_timers();
        if let Err(err) = self.store.save_tokens(&grant).await {
            drop(session_guard);
            telemetry.emit_failure(&err);
            return Err(self
                .abandon(next, &telemetry, LogoutReason::RefreshFailed, err)
                .await);
        }
        self.arm(next, grant.lifetime());
        drop(session_guard);
        drop(refresh_guard);

        telemetry.emit_success(grant.expires_in);
        Ok(())
    }

    /// Ends the session for a failed refresh, unless it was already ended or replaced.
    async fn abandon(
        self: &Arc<Self>,
        generation: u64,
        telemetry: &RefreshTelemetry,
        reason: LogoutReason,
        err: Error,
    ) -> Error {
        if self.end_session(Some(generation), reason).await {
            err
        } else {
            telemetry.emit_superseded();
            Error::Superseded
        }
    }

    /// Tears the session down. With `expected`, only if it is still that generation.
    ///
    /// Returns whether a logout was performed.
    async fn end_session(&self, expected: Option<u64>, reason: LogoutReason) -> bool {
        let session_guard = self.session_lock.lock().await;
        if let Some(expected) = expected
            && self.current_generation() != expected
        {
            return false;
        }
        let generation = self.advance_generation();
        self.clear_timers();
        if let Err(err) = self.store.clear_tokens().await {
            error!(error = %err, "failed to clear session on logout");
        }
        drop(session_guard);

        emit_logout(reason, generation);
        if let Some(callback) = self.logout_callback() {
            callback();
        }
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
