use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{
    completion::{TaskCompletionEvent, Topic},
    error::OrchestratorError
};

/// Delivery callback; returns false once the subscriber can no longer accept messages
pub type TopicSink = Arc<dyn Fn(TaskCompletionEvent) -> bool + Send + Sync>;

/// Identifies one subscription so it can be removed again
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub topic:         Topic,
    pub subscriber_id: String
}

/// Port for the topic bus used by the completion notification protocol
///
/// Delivery is at-least-once and ordered per producer; consumers must be idempotent.
#[async_trait]
pub trait TopicBus: Send + Sync {
    async fn publish(&self, topic: &Topic, event: TaskCompletionEvent) -> Result<(), OrchestratorError>;

    /// Subscribe `subscriber_id` to `topic`; anything buffered for the topic is delivered first
    async fn subscribe(
        &self,
        topic: &Topic,
        subscriber_id: &str,
        sink: TopicSink
    ) -> Result<SubscriptionHandle, OrchestratorError>;

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), OrchestratorError>;
}
