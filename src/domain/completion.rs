//! Completion notification carried on the topic bus

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::task::TaskStatus;

/// Topic namespace workflows subscribe under
pub const TASK_COMPLETION_NAMESPACE: &str = "TaskCompletion";

/// A topic on the bus, addressed by namespace and key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub namespace: String,
    pub key:       String
}

impl Topic {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), key: key.into() }
    }

    /// Channel a workflow receives its tasks' completions on
    pub fn task_completion(workflow_id: &str) -> Self {
        Self::new(TASK_COMPLETION_NAMESPACE, workflow_id)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.key)
    }
}

/// Immutable "I finished" message from a task to its owning workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompletionEvent {
    pub event_id:     String,
    pub task_id:      String,
    pub workflow_id:  String,
    pub status:       TaskStatus,
    pub result:       Option<String>,
    pub completed_at: DateTime<Utc>
}

impl TaskCompletionEvent {
    pub fn new(task_id: &str, workflow_id: &str, status: TaskStatus, result: Option<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            workflow_id: workflow_id.to_string(),
            status,
            result,
            completed_at: Utc::now()
        }
    }

    pub fn topic(&self) -> Topic {
        Topic::task_completion(&self.workflow_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_addressed_to_owning_workflow() {
        let event = TaskCompletionEvent::new("t1", "wf-9", TaskStatus::Completed, Some("ok".into()));
        assert_eq!(event.topic(), Topic::task_completion("wf-9"));
        assert_eq!(event.topic().to_string(), "TaskCompletion/wf-9");
    }
}
