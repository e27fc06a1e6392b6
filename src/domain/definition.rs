//! Declarative workflow definitions loaded from YAML
//!
//! A definition describes the tasks to create and the workflow that owns them.
//!
//! # Example YAML structure
//! ```yaml
//! workflow:
//!   id: nightly-report
//!   name: Nightly report
//!   type: Serial
//!   schedule:
//!     interval_ms: 86400000
//!     is_looped: true
//! tasks:
//!   - id: notify
//!     name: Notify start
//!     publish:
//!       topic: reports/started
//!       payload: "{}"
//!   - id: approve
//!     name: Wait for approval
//!     wait_for_controller: true
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{
    error::OrchestratorError,
    task::{HttpCallConfig, PublishConfig, TaskConfig},
    workflow::WorkflowType
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow: WorkflowSpec,
    #[serde(default)]
    pub tasks:    Vec<TaskSpec>
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub id:       String,
    pub name:     String,
    #[serde(rename = "type", default)]
    pub kind:     WorkflowType,
    #[serde(default)]
    pub parent:   Option<String>,
    #[serde(default)]
    pub schedule: Option<ScheduleSpec>
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub interval_ms: u64,
    #[serde(default)]
    pub is_looped:   bool,
    #[serde(default)]
    pub loop_count:  u32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id:                  String,
    pub name:                String,
    #[serde(default)]
    pub parameters:          HashMap<String, String>,
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

impl TaskSpec {
    pub fn config(&self) -> TaskConfig {
        TaskConfig {
            publish:             self.publish.clone(),
            http:                self.http.clone(),
            subscribe_topic:     self.subscribe_topic.clone(),
            wait_for_controller: self.wait_for_controller,
            max_retries:         self.max_retries,
            max_publish_retries: self.max_publish_retries,
            max_http_retries:    self.max_http_retries
        }
    }
}

impl WorkflowDefinition {
    /// Parse a definition from YAML content
    pub fn from_yaml(yaml_content: &str) -> Result<Self, OrchestratorError> {
        let definition: WorkflowDefinition = serde_yaml::from_str(yaml_content)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|task| task.id.clone()).collect()
    }

    fn validate(&self) -> Result<(), OrchestratorError> {
        if self.workflow.id.trim().is_empty() {
            return Err(OrchestratorError::Configuration("workflow id must not be empty".to_string()));
        }
        if let Some(task) = self.tasks.iter().find(|task| task.id.trim().is_empty()) {
            return Err(OrchestratorError::Configuration(format!("task '{}' has an empty id", task.name)));
        }
        Ok(())
    }
}
