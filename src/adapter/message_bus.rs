//! In-process message broker standing in for an MQTT connection
//!
//! Subscriptions use MQTT topic filters: `+` matches one level and a trailing `#` matches the rest.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{Level, event};

use crate::{
    domain::{constant::adapter, error::OrchestratorError},
    port::message_bus::{MessageBusClient, MessageCallback}
};

/// Returns true when `topic` is matched by the subscription `filter`
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(expected), Some(actual)) if expected == actual => continue,
            (None, None) => return true,
            _ => return false
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryMessageBus {
    /// filter -> subscriber id -> callback
    subscriptions: Arc<RwLock<HashMap<String, HashMap<String, MessageCallback>>>>
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscriber_count(&self, filter: &str) -> usize {
        self.subscriptions.read().await.get(filter).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl MessageBusClient for InMemoryMessageBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), OrchestratorError> {
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(OrchestratorError::Network(format!("invalid publish topic '{}'", topic)));
        }

        let callbacks: Vec<MessageCallback> = self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .flat_map(|(_, subscribers)| subscribers.values().cloned())
            .collect();

        event!(Level::DEBUG, event = adapter::MESSAGE_PUBLISHED, topic = %topic, receivers = callbacks.len());
        for callback in callbacks {
            callback(topic, payload);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
        callback: MessageCallback
    ) -> Result<(), OrchestratorError> {
        if topic.is_empty() {
            return Err(OrchestratorError::Configuration("subscribe topic must not be empty".to_string()));
        }
        self.subscriptions
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .insert(subscriber_id.to_string(), callback);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> Result<(), OrchestratorError> {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(subscribers) = subscriptions.get_mut(topic) {
            subscribers.remove(subscriber_id);
            if subscribers.is_empty() {
                subscriptions.remove(topic);
            }
        }
        Ok(())
    }
}
