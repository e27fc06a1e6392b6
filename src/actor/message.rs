//! Typed messages for actor communication

use std::collections::HashMap;

use ractor::{Message, RpcReplyPort};

use crate::domain::{
    completion::TaskCompletionEvent,
    error::OrchestratorError,
    task::{ExternalInput, Task, TaskConfig, TaskStatus},
    workflow::{Workflow, WorkflowType}
};

pub type Reply<T> = RpcReplyPort<Result<T, OrchestratorError>>;

/// Messages for Task actors (one per task id)
#[derive(Debug)]
pub enum TaskMessage {
    Create { name: String, parameters: HashMap<String, String>, reply: Reply<Task> },
    Configure { config: TaskConfig, reply: Reply<Task> },
    SetWorkflow { workflow_id: Option<String>, reply: Reply<()> },
    /// Run the configured stages; replies with the status the task ended up in
    Execute { reply: Reply<TaskStatus> },
    Pause { reply: Reply<()> },
    Resume { reply: Reply<()> },
    Stop { reply: Reply<()> },
    GetState { reply: RpcReplyPort<Task> },
    /// Message-bus delivery or controller callback; replies whether it was accepted
    External { input: ExternalInput, reply: Option<Reply<bool>> },
    OnTimer { name: String }
}

/// Messages for Workflow actors (one per workflow id)
#[derive(Debug)]
pub enum WorkflowMessage {
    Create {
        name:               String,
        workflow_type:      WorkflowType,
        task_ids:           Vec<String>,
        parent_workflow_id: Option<String>,
        reply:              Reply<Workflow>
    },
    AddTask { task_id: String, reply: Reply<()> },
    Start { reply: Reply<()> },
    Pause { reply: Reply<()> },
    Resume { reply: Reply<()> },
    Stop { reply: Reply<()> },
    GetState { reply: RpcReplyPort<Workflow> },
    GetTasks { reply: Reply<Vec<Task>> },
    Schedule { interval_ms: u64, is_looped: bool, loop_count: u32, reply: Reply<()> },
    SetSchedule { interval_ms: u64, reply: Reply<()> },
    Unschedule { reply: Reply<()> },
    /// Run the type-specific step function
    Step,
    /// Re-read the awaited tasks after (re)activation
    Recheck,
    TaskCompleted(TaskCompletionEvent),
    OnTimer { name: String }
}

/// System health information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemHealth {
    pub active_tasks:     usize,
    pub active_workflows: usize,
    pub armed_timers:     usize,
    pub uptime_seconds:   u64
}

// Implement Message trait for Ractor
impl Message for TaskMessage {}
impl Message for WorkflowMessage {}
