//! # Taskflow
//!
//! A durable task and workflow orchestrator built on actors.
//!
//! This crate provides functionality to:
//! - Run tasks that publish messages, call HTTP endpoints and wait for external events
//! - Sequence tasks in serial, parallel and nested workflows
//! - Suspend on external input and resume from durable state after a restart
//! - Re-run workflows on durable schedules

// Public API modules
pub mod actor;
pub mod adapter;
pub mod cli;
pub mod config;
pub mod context;
pub mod domain;
pub mod port;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use actor::{Runtime, SystemHealth};
pub use cli::{TaskflowCli, TaskflowCommand};
pub use context::AppContext;
pub use domain::{
    definition::WorkflowDefinition,
    error::OrchestratorError,
    task::{Task, TaskConfig, TaskStatus},
    workflow::{Workflow, WorkflowStatus, WorkflowType}
};

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_parse_door_access_yaml() {
        let yaml_content = fs::read_to_string("resource/door_access.yaml").expect("Failed to read YAML file");

        let definition = WorkflowDefinition::from_yaml(&yaml_content).expect("Failed to parse YAML");

        assert_eq!(definition.workflow.id, "door-access");
        assert_eq!(definition.workflow.kind, WorkflowType::Serial);
        assert_eq!(definition.task_ids(), vec!["announce", "approve", "unlock"]);

        let announce = definition.tasks[0].config();
        assert_eq!(announce.publish.as_ref().map(|publish| publish.topic.as_str()), Some("doors/3/requests"));
        assert_eq!(definition.tasks[0].parameters.get("door").map(String::as_str), Some("3"));

        assert!(definition.tasks[1].config().wait_for_controller);
        assert_eq!(definition.tasks[2].config().max_publish_retries, Some(5));
    }
}
