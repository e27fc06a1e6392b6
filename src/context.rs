//! Shared services handed to every actor

use std::sync::Arc;

use crate::{
    adapter::{
        bus::InMemoryTopicBus,
        http::ReqwestHttpClient,
        message_bus::InMemoryMessageBus,
        state::{StateStoreFactory, StateStoreType}
    },
    config::Settings,
    domain::error::OrchestratorError,
    port::{bus::TopicBus, http::HttpClient, message_bus::MessageBusClient, state::DurableState}
};

#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub store:    Arc<dyn DurableState>,
    pub topics:   Arc<dyn TopicBus>,
    pub messages: Arc<dyn MessageBusClient>,
    pub http:     Arc<dyn HttpClient>
}

impl AppContext {
    /// Build the default service set for `settings`
    pub fn init(settings: Settings) -> Result<Self, OrchestratorError> {
        let path = match settings.storage.backend {
            StateStoreType::InMemory => None,
            StateStoreType::RocksDb => {
                Some(settings.storage_path().map_err(|e| OrchestratorError::Configuration(e.to_string()))?)
            }
        };
        let store = StateStoreFactory::create(settings.storage.backend, path.as_deref())?;
        let http = Arc::new(ReqwestHttpClient::with_timeout(settings.timing.call_timeout()));

        Ok(Self {
            settings: Arc::new(settings),
            store,
            topics: Arc::new(InMemoryTopicBus::new()),
            messages: Arc::new(InMemoryMessageBus::new()),
            http
        })
    }

    pub fn with_store(mut self, store: Arc<dyn DurableState>) -> Self {
        self.store = store;
        self
    }

    pub fn with_topics(mut self, topics: Arc<dyn TopicBus>) -> Self {
        self.topics = topics;
        self
    }

    pub fn with_messages(mut self, messages: Arc<dyn MessageBusClient>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = http;
        self
    }
}
