#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gatepass_session::clock::TokioClock;
use gatepass_session::storage::{KeyValueStore, MemoryStore};
use gatepass_session::token::{RefreshPolicy, RefreshResponse};
use gatepass_session::{Error, Result, TokenGrant, TokenManager, TokenStore};
use reqwest::StatusCode;
use tracing::subscriber::{DefaultGuard, set_default};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Registry, fmt};

pub fn grant(access: &str, refresh: &str, expires_in: u64) -> TokenGrant {
    TokenGrant::new(access, refresh, expires_in)
}

pub enum Reply {
    Grant(TokenGrant),
    Status(u16),
    Malformed,
}

/// In-process refresh endpoint answering from a script.
#[derive(Default)]
pub struct FakeTransport {
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<Reply>>,
    delay: Mutex<Duration>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_tokens(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl gatepass_session::RefreshTransport for FakeTransport {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(refresh_token.to_string());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Grant(grant)) => Ok(RefreshResponse {
                access_token: Some(grant.access_token),
                refresh_token: Some(grant.refresh_token),
                token_type: Some("Bearer".into()),
                expires_in: Some(grant.expires_in as i64),
            }),
            Some(Reply::Malformed) => Ok(RefreshResponse {
                access_token: None,
                refresh_token: Some("r-only".into()),
                token_type: Some("Bearer".into()),
                expires_in: Some(60),
            }),
            Some(Reply::Status(code)) => Err(Error::RefreshRejected(
                StatusCode::from_u16(code).unwrap(),
                "scripted".into(),
            )),
            None => Err(Error::RefreshRejected(
                StatusCode::SERVICE_UNAVAILABLE,
                "no scripted reply".into(),
            )),
        }
    }
}

/// Backend whose every operation fails.
pub struct BrokenStore;

#[async_trait]
impl KeyValueStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(Error::Storage("disk unavailable".into()))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(Error::Storage("disk unavailable".into()))
    }

    async fn multi_get(&self, _keys: &[&str]) -> Result<Vec<Option<String>>> {
        Err(Error::Storage("disk unavailable".into()))
    }

    async fn multi_set(&self, _entries: &[(&str, String)]) -> Result<()> {
        Err(Error::Storage("disk unavailable".into()))
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Err(Error::Storage("disk unavailable".into()))
    }

    async fn multi_remove(&self, _keys: &[&str]) -> Result<()> {
        Err(Error::Storage("disk unavailable".into()))
    }
}

/// Memory backend whose batch writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.is_empty().await
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(key, value).await
    }

    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        self.inner.multi_get(keys).await
    }

    async fn multi_set(&self, entries: &[(&str, String)]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("disk full".into()));
        }
        self.inner.multi_set(entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }

    async fn multi_remove(&self, keys: &[&str]) -> Result<()> {
        self.inner.multi_remove(keys).await
    }
}

pub struct Harness {
    pub manager: TokenManager,
    pub kv: Arc<MemoryStore>,
    pub transport: Arc<FakeTransport>,
    pub logouts: Arc<AtomicUsize>,
}

impl Harness {
    /// Manager over a memory store and a clock that follows tokio time.
    pub fn new() -> Self {
        let kv = Arc::new(MemoryStore::new());
        let transport = FakeTransport::new();
        let store = TokenStore::new(kv.clone(), Arc::new(TokioClock::new()));
        let manager = TokenManager::new(store, transport.clone(), RefreshPolicy::default());
        let logouts = Arc::new(AtomicUsize::new(0));
        let counter = logouts.clone();
        manager.set_logout_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        Self {
            manager,
            kv,
            transport,
            logouts,
        }
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }
}

/// Lets every ready task run to completion on a paused runtime.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Sleeps on tokio time, then lets fired timers finish their work.
pub async fn run_for(duration: Duration) {
    tokio::time::sleep(duration).await;
    settle().await;
}

struct VecWriter {
    lines: Arc<Mutex<Vec<String>>>,
}

impl std::io::Write for VecWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.lines.lock().unwrap();
        guard.push(String::from_utf8_lossy(buf).into_owned());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn capture_logs() -> (Arc<Mutex<Vec<String>>>, DefaultGuard) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let writer_lines = lines.clone();
    let subscriber = Registry::default().with(
        fmt::Layer::default()
            .with_writer(move || VecWriter {
                lines: writer_lines.clone(),
            })
            .with_target(false)
            .with_level(true)
            .with_ansi(false),
    );
    let guard = set_default(subscriber);
    (lines, guard)
}
