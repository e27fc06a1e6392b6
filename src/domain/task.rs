//! Task domain types
//!
//! A task is a single durable unit of work. It is owned and mutated exclusively by its task
//! actor; everything here is plain data plus the transition rules that do not need I/O.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{error::OrchestratorError, retry::RetryLimit};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    /// Suspended until a message arrives on the subscribed topic
    WaitingForMqtt,
    /// Suspended until an external controller calls back
    WaitingForController,
    Paused
}

impl TaskStatus {
    pub fn is_waiting(self) -> bool {
        matches!(self, TaskStatus::WaitingForMqtt | TaskStatus::WaitingForController)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn is_pausable(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::WaitingForMqtt | TaskStatus::WaitingForController)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Running => "Running",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
            TaskStatus::WaitingForMqtt => "WaitingForMqtt",
            TaskStatus::WaitingForController => "WaitingForController",
            TaskStatus::Paused => "Paused"
        };
        write!(f, "{}", name)
    }
}

/// Message published before the task proceeds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    pub topic:   String,
    pub payload: String
}

/// HTTP call made before the task proceeds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCallConfig {
    pub url:     String,
    #[serde(default = "default_http_method")]
    pub method:  String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body:    Option<String>
}

fn default_http_method() -> String {
    "GET".to_string()
}

/// Side-effect and retry configuration applied to a task before it runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub publish:             Option<PublishConfig>,
    #[serde(default)]
    pub http:                Option<HttpCallConfig>,
    #[serde(default)]
    pub subscribe_topic:     Option<String>,
    #[serde(default)]
    pub wait_for_controller: bool,
    #[serde(default)]
    pub max_retries:         Option<u32>,
    #[serde(default)]
    pub max_publish_retries: Option<i32>,
    #[serde(default)]
    pub max_http_retries:    Option<i32>
}

/// Input received from the outside world while the task was suspended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalInput {
    Message { topic: String, payload: String },
    ControllerCall { data: String }
}

impl fmt::Display for ExternalInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalInput::Message { topic, payload } => write!(f, "message on {}: {}", topic, payload),
            ExternalInput::ControllerCall { data } => write!(f, "controller call: {}", data)
        }
    }
}

/// Durable state of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id:              String,
    pub name:                 String,
    pub workflow_id:          Option<String>,
    pub status:               TaskStatus,
    pub parameters:           HashMap<String, String>,
    pub retry_count:          u32,
    pub max_retries:          u32,
    pub publish_retry_count:  u32,
    pub max_publish_retries:  RetryLimit,
    pub http_retry_count:     u32,
    pub max_http_retries:     RetryLimit,
    pub publish:              Option<PublishConfig>,
    pub http:                 Option<HttpCallConfig>,
    pub subscribe_topic:      Option<String>,
    pub wait_for_controller:  bool,
    pub result:               Option<String>,
    pub error_message:        Option<String>,
    pub external_input:       Option<ExternalInput>,
    /// Monotonic; once set the task never runs again
    pub is_stopped:           bool,
    pub waiting_state:        Option<TaskStatus>,
    /// An accepted external input still awaits its `continue` timer
    pub pending_continuation: bool,
    pub waiting_since:        Option<DateTime<Utc>>,
    pub created_at:           DateTime<Utc>,
    pub updated_at:           DateTime<Utc>
}

impl Task {
    pub fn new(task_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id:              task_id.into(),
            name:                 String::new(),
            workflow_id:          None,
            status:               TaskStatus::Pending,
            parameters:           HashMap::new(),
            retry_count:          0,
            max_retries:          DEFAULT_MAX_RETRIES,
            publish_retry_count:  0,
            max_publish_retries:  RetryLimit::UNLIMITED,
            http_retry_count:     0,
            max_http_retries:     RetryLimit::UNLIMITED,
            publish:              None,
            http:                 None,
            subscribe_topic:      None,
            wait_for_controller:  false,
            result:               None,
            error_message:        None,
            external_input:       None,
            is_stopped:           false,
            waiting_state:        None,
            pending_continuation: false,
            waiting_since:        None,
            created_at:           now,
            updated_at:           now
        }
    }

    /// Reset to a freshly created task; ownership and the stop flag survive
    pub fn create(
        &mut self,
        name: &str,
        parameters: HashMap<String, String>,
        default_max_retries: u32
    ) -> Result<(), OrchestratorError> {
        if name.trim().is_empty() {
            return Err(OrchestratorError::Configuration("task name must not be empty".to_string()));
        }

        self.name = name.to_string();
        self.parameters = parameters;
        self.status = TaskStatus::Pending;
        self.retry_count = 0;
        self.max_retries = default_max_retries;
        self.publish_retry_count = 0;
        self.http_retry_count = 0;
        self.result = None;
        self.error_message = None;
        self.external_input = None;
        self.waiting_state = None;
        self.pending_continuation = false;
        self.waiting_since = None;
        self.touch();
        Ok(())
    }

    pub fn configure(&mut self, config: TaskConfig) -> Result<(), OrchestratorError> {
        if !matches!(self.status, TaskStatus::Pending | TaskStatus::Completed | TaskStatus::Failed) {
            return Err(OrchestratorError::illegal("configure", self.status));
        }

        let max_publish_retries = match config.max_publish_retries {
            Some(raw) => RetryLimit::from_raw(raw).ok_or_else(|| {
                OrchestratorError::Configuration(format!("max_publish_retries must be >= -1, got {}", raw))
            })?,
            None => self.max_publish_retries
        };
        let max_http_retries = match config.max_http_retries {
            Some(raw) => RetryLimit::from_raw(raw).ok_or_else(|| {
                OrchestratorError::Configuration(format!("max_http_retries must be >= -1, got {}", raw))
            })?,
            None => self.max_http_retries
        };
        if let Some(publish) = &config.publish
            && publish.topic.trim().is_empty()
        {
            return Err(OrchestratorError::Configuration("publish topic must not be empty".to_string()));
        }
        if let Some(http) = &config.http
            && http.url.trim().is_empty()
        {
            return Err(OrchestratorError::Configuration("http url must not be empty".to_string()));
        }

        self.publish = config.publish;
        self.http = config.http;
        self.subscribe_topic = config.subscribe_topic.filter(|topic| !topic.trim().is_empty());
        self.wait_for_controller = config.wait_for_controller;
        if let Some(max_retries) = config.max_retries {
            self.max_retries = max_retries;
        }
        self.max_publish_retries = max_publish_retries;
        self.max_http_retries = max_http_retries;
        self.touch();
        Ok(())
    }

    pub fn is_owned_by(&self, workflow_id: &str) -> bool {
        self.workflow_id.as_deref() == Some(workflow_id)
    }

    pub fn ensure_executable(&self) -> Result<(), OrchestratorError> {
        if self.is_stopped {
            return Err(OrchestratorError::Unexecutable(format!("task {} has been stopped", self.task_id)));
        }
        if self.workflow_id.is_none() {
            return Err(OrchestratorError::Unexecutable(format!("task {} is not owned by a workflow", self.task_id)));
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), OrchestratorError> {
        if !self.status.is_pausable() {
            return Err(OrchestratorError::illegal("pause", self.status));
        }
        self.waiting_state = Some(self.status);
        self.status = TaskStatus::Paused;
        self.touch();
        Ok(())
    }

    /// Restores the status saved by `pause` and returns it
    pub fn resume(&mut self) -> Result<TaskStatus, OrchestratorError> {
        if self.status != TaskStatus::Paused {
            return Err(OrchestratorError::illegal("resume", self.status));
        }
        self.status = self.waiting_state.take().unwrap_or(TaskStatus::Running);
        self.touch();
        Ok(self.status)
    }

    pub fn stop(&mut self) {
        self.is_stopped = true;
        self.status = TaskStatus::Failed;
        self.waiting_state = None;
        self.pending_continuation = false;
        self.error_message = Some("task was stopped".to_string());
        self.touch();
    }

    /// Whether the task is (or, once resumed, will be) waiting on the subscribed topic
    pub fn awaits_message(&self) -> bool {
        self.status == TaskStatus::WaitingForMqtt
            || (self.status == TaskStatus::Paused && self.waiting_state == Some(TaskStatus::WaitingForMqtt))
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
