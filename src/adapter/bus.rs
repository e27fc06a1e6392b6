//! In-process topic bus with a per-topic backlog

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{Level, event};

use crate::{
    domain::{
        completion::{TaskCompletionEvent, Topic},
        constant::adapter,
        error::OrchestratorError
    },
    port::bus::{SubscriptionHandle, TopicBus, TopicSink}
};

#[derive(Default)]
struct TopicState {
    subscribers: HashMap<Topic, Vec<(String, TopicSink)>>,
    /// Events published while nobody was listening, in publish order
    backlog:     HashMap<Topic, VecDeque<TaskCompletionEvent>>
}

/// Events kept per topic while nobody subscribes
pub const DEFAULT_BACKLOG_LIMIT: usize = 1024;

/// At-least-once bus: events for a topic without a live subscriber wait for the next subscribe
///
/// Each backlog holds at most `backlog_limit` events; past that the oldest is dropped.
#[derive(Clone)]
pub struct InMemoryTopicBus {
    state:         Arc<Mutex<TopicState>>,
    backlog_limit: usize
}

impl Default for InMemoryTopicBus {
    fn default() -> Self {
        Self::with_backlog_limit(DEFAULT_BACKLOG_LIMIT)
    }
}

impl InMemoryTopicBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backlog_limit(backlog_limit: usize) -> Self {
        Self { state: Arc::new(Mutex::new(TopicState::default())), backlog_limit: backlog_limit.max(1) }
    }

    /// Events waiting for a subscriber on `topic`
    pub async fn backlog_len(&self, topic: &Topic) -> usize {
        self.state.lock().await.backlog.get(topic).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl TopicBus for InMemoryTopicBus {
    async fn publish(&self, topic: &Topic, event: TaskCompletionEvent) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;

        let mut delivered = false;
        if let Some(subscribers) = state.subscribers.get_mut(topic) {
            subscribers.retain(|(_, sink)| {
                let accepted = sink(event.clone());
                delivered |= accepted;
                accepted
            });
            if subscribers.is_empty() {
                state.subscribers.remove(topic);
            }
        }

        if delivered {
            event!(Level::DEBUG, event = adapter::TOPIC_PUBLISHED, topic = %topic, task_id = %event.task_id);
        } else {
            event!(Level::DEBUG, event = adapter::TOPIC_BUFFERED, topic = %topic, task_id = %event.task_id);
            let backlog = state.backlog.entry(topic.clone()).or_default();
            backlog.push_back(event);
            if backlog.len() > self.backlog_limit
                && let Some(dropped) = backlog.pop_front()
            {
                event!(Level::WARN, event = adapter::TOPIC_BACKLOG_OVERFLOW, topic = %topic,
                       task_id = %dropped.task_id, limit = self.backlog_limit);
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        subscriber_id: &str,
        sink: TopicSink
    ) -> Result<SubscriptionHandle, OrchestratorError> {
        let mut state = self.state.lock().await;

        if let Some(mut backlog) = state.backlog.remove(topic) {
            let buffered = backlog.len();
            while let Some(pending) = backlog.pop_front() {
                if !sink(pending.clone()) {
                    backlog.push_front(pending);
                    break;
                }
            }
            event!(
                Level::DEBUG,
                event = adapter::TOPIC_BACKLOG_DRAINED,
                topic = %topic,
                delivered = buffered - backlog.len()
            );
            if !backlog.is_empty() {
                state.backlog.insert(topic.clone(), backlog);
                return Err(OrchestratorError::Actor(format!("subscriber {} rejected buffered events", subscriber_id)));
            }
        }

        let subscribers = state.subscribers.entry(topic.clone()).or_default();
        subscribers.retain(|(id, _)| id != subscriber_id);
        subscribers.push((subscriber_id.to_string(), sink));

        Ok(SubscriptionHandle { topic: topic.clone(), subscriber_id: subscriber_id.to_string() })
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;
        if let Some(subscribers) = state.subscribers.get_mut(&handle.topic) {
            subscribers.retain(|(id, _)| id != &handle.subscriber_id);
            if subscribers.is_empty() {
                state.subscribers.remove(&handle.topic);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::domain::task::TaskStatus;

    fn collecting_sink() -> (TopicSink, Arc<StdMutex<Vec<String>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: TopicSink = Arc::new(move |event: TaskCompletionEvent| {
            sink_seen.lock().unwrap().push(event.task_id);
            true
        });
        (sink, seen)
    }

    fn completion(task_id: &str) -> TaskCompletionEvent {
        TaskCompletionEvent::new(task_id, "wf", TaskStatus::Completed, None)
    }

    #[tokio::test]
    async fn test_events_without_subscriber_are_buffered_in_order() {
        let bus = InMemoryTopicBus::new();
        let topic = Topic::task_completion("wf");

        bus.publish(&topic, completion("a")).await.unwrap();
        bus.publish(&topic, completion("b")).await.unwrap();
        assert_eq!(bus.backlog_len(&topic).await, 2);

        let (sink, seen) = collecting_sink();
        bus.subscribe(&topic, "workflow-wf", sink).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(bus.backlog_len(&topic).await, 0);

        bus.publish(&topic, completion("c")).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unsubscribe_resumes_buffering() {
        let bus = InMemoryTopicBus::new();
        let topic = Topic::task_completion("wf");
        let (sink, seen) = collecting_sink();

        let handle = bus.subscribe(&topic, "workflow-wf", sink).await.unwrap();
        bus.unsubscribe(&handle).await.unwrap();
        bus.publish(&topic, completion("a")).await.unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.backlog_len(&topic).await, 1);
    }

    #[tokio::test]
    async fn test_dead_subscriber_is_dropped_and_event_kept() {
        let bus = InMemoryTopicBus::new();
        let topic = Topic::task_completion("wf");
        let dead: TopicSink = Arc::new(|_| false);

        bus.subscribe(&topic, "workflow-wf", dead).await.unwrap();
        bus.publish(&topic, completion("a")).await.unwrap();
        assert_eq!(bus.backlog_len(&topic).await, 1);

        let (sink, seen) = collecting_sink();
        bus.subscribe(&topic, "workflow-wf", sink).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_backlog_drops_oldest_past_limit() {
        let bus = InMemoryTopicBus::with_backlog_limit(2);
        let topic = Topic::task_completion("wf");

        for task_id in ["a", "b", "c"] {
            bus.publish(&topic, completion(task_id)).await.unwrap();
        }
        assert_eq!(bus.backlog_len(&topic).await, 2);

        let (sink, seen) = collecting_sink();
        bus.subscribe(&topic, "workflow-wf", sink).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = InMemoryTopicBus::new();
        let (sink, seen) = collecting_sink();
        bus.subscribe(&Topic::task_completion("one"), "workflow-one", sink).await.unwrap();

        bus.publish(&Topic::task_completion("two"), completion("x")).await.unwrap();
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.backlog_len(&Topic::task_completion("two")).await, 1);
    }
}
