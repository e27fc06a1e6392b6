use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::error::OrchestratorError;

/// Callback receiving `(topic, payload)` for each delivered message
pub type MessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Port for the external message-bus client tasks publish to and wait on
#[async_trait]
pub trait MessageBusClient: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), OrchestratorError>;

    /// Subscribe; subscribing again with the same `subscriber_id` replaces the callback
    async fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
        callback: MessageCallback
    ) -> Result<(), OrchestratorError>;

    async fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> Result<(), OrchestratorError>;
}
