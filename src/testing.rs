//! Test doubles and helpers shared by the actor tests

use std::{
    collections::{HashSet, VecDeque},
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering}
    },
    time::Duration
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    adapter::{bus::InMemoryTopicBus, message_bus::InMemoryMessageBus, state::InMemoryStateStore},
    config::Settings,
    context::AppContext,
    domain::error::OrchestratorError,
    port::{
        http::{HttpClient, HttpRequest, HttpResponse},
        message_bus::{MessageBusClient, MessageCallback},
        state::{DurableState, SaveOutcome, VersionedBlob}
    }
};

/// Settings with millisecond-scale delays
pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.retry.backoff_base_ms = 2;
    settings.retry.backoff_cap_ms = 20;
    settings.timing.liveness_interval_ms = 50;
    settings.timing.continuation_delay_ms = 20;
    settings.timing.work_delay_ms = 5;
    settings.timing.call_timeout_ms = 5_000;
    settings
}

pub fn test_context(settings: Settings) -> AppContext {
    AppContext {
        settings: Arc::new(settings),
        store:    Arc::new(InMemoryStateStore::new()),
        topics:   Arc::new(InMemoryTopicBus::new()),
        messages: Arc::new(InMemoryMessageBus::new()),
        http:     Arc::new(ScriptedHttpClient::default())
    }
}

/// Poll `check` until it yields a value; panics after five seconds
pub async fn eventually<T, F, Fut>(what: &str, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(value) = check().await {
            return value;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Message bus whose first `failures` publishes fail (all of them when `None`)
pub struct FlakyMessageBus {
    inner:    InMemoryMessageBus,
    failures: Option<u32>,
    attempts: AtomicU32
}

impl FlakyMessageBus {
    pub fn failing_first(failures: u32) -> Self {
        Self { inner: InMemoryMessageBus::new(), failures: Some(failures), attempts: AtomicU32::new(0) }
    }

    pub fn always_failing() -> Self {
        Self { inner: InMemoryMessageBus::new(), failures: None, attempts: AtomicU32::new(0) }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBusClient for FlakyMessageBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), OrchestratorError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failures.is_none_or(|failures| attempt <= failures) {
            return Err(OrchestratorError::Network(format!("broker unavailable (attempt {})", attempt)));
        }
        self.inner.publish(topic, payload).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
        callback: MessageCallback
    ) -> Result<(), OrchestratorError> {
        self.inner.subscribe(topic, subscriber_id, callback).await
    }

    async fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> Result<(), OrchestratorError> {
        self.inner.unsubscribe(topic, subscriber_id).await
    }
}

/// HTTP client answering from a queue of status codes, then 200
#[derive(Default)]
pub struct ScriptedHttpClient {
    statuses: Mutex<VecDeque<u16>>,
    requests: Mutex<Vec<HttpRequest>>
}

impl ScriptedHttpClient {
    pub fn with_statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self { statuses: Mutex::new(statuses.into_iter().collect()), requests: Mutex::new(Vec::new()) }
    }

    pub async fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, OrchestratorError> {
        self.requests.lock().await.push(request);
        let status = self.statuses.lock().await.pop_front().unwrap_or(200);
        Ok(HttpResponse::new(status, String::new()))
    }
}

/// State store that rejects writes to chosen keys
#[derive(Default)]
pub struct FlakyStateStore {
    inner:   InMemoryStateStore,
    failing: Mutex<HashSet<String>>
}

impl FlakyStateStore {
    pub async fn fail_saves_for(&self, key: &str) {
        self.failing.lock().await.insert(key.to_string());
    }
}

#[async_trait]
impl DurableState for FlakyStateStore {
    async fn load(&self, key: &str) -> Result<Option<VersionedBlob>, OrchestratorError> {
        self.inner.load(key).await
    }

    async fn save(
        &self,
        key: &str,
        data: Vec<u8>,
        expected_version: Option<u64>
    ) -> Result<SaveOutcome, OrchestratorError> {
        if self.failing.lock().await.contains(key) {
            return Err(OrchestratorError::Storage(format!("disk full while writing {}", key)));
        }
        self.inner.save(key, data, expected_version).await
    }

    async fn delete(&self, key: &str) -> Result<(), OrchestratorError> {
        self.inner.delete(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, OrchestratorError> {
        self.inner.keys(prefix).await
    }
}
