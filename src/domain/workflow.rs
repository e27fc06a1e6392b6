//! Workflow domain types
//!
//! A workflow owns an ordered list of task ids and drives them according to its type.
//! The execution history is append-only: entries are only ever pushed through `record`.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{error::OrchestratorError, task::TaskStatus};

/// Orchestration strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WorkflowType {
    /// One task at a time, in insertion order
    #[default]
    Serial,
    /// Every task dispatched in one pass; completes once none are waiting
    Parallel,
    /// Serial execution of a workflow that belongs to a parent workflow
    Nested
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowType::Serial => "Serial",
            WorkflowType::Parallel => "Parallel",
            WorkflowType::Nested => "Nested"
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle status of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WorkflowStatus {
    #[default]
    Created,
    Running,
    Completed,
    Failed,
    Paused,
    Stopped,
    /// Suspended until the awaited task(s) report completion
    WaitingForTask
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Stopped)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowStatus::Created => "Created",
            WorkflowStatus::Running => "Running",
            WorkflowStatus::Completed => "Completed",
            WorkflowStatus::Failed => "Failed",
            WorkflowStatus::Paused => "Paused",
            WorkflowStatus::Stopped => "Stopped",
            WorkflowStatus::WaitingForTask => "WaitingForTask"
        };
        write!(f, "{}", name)
    }
}

/// What a history entry is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryKind {
    Created,
    TaskAdded,
    Started,
    TaskDispatched,
    TaskOutcome,
    TaskSkipped,
    Suspended,
    Completed,
    Failed,
    Paused,
    Resumed,
    Stopped,
    Interrupted,
    ControlFailed,
    Scheduled,
    Unscheduled,
    ScheduledRun
}

/// One immutable audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp:   DateTime<Utc>,
    pub kind:        HistoryKind,
    pub task_id:     Option<String>,
    pub task_status: Option<TaskStatus>,
    pub detail:      String
}

/// Periodic re-run configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSchedule {
    pub interval_ms: u64,
    pub is_looped:   bool,
    /// Number of scheduled runs before the schedule retires itself; 0 is unbounded
    pub loop_count:  u32,
    pub runs:        u32
}

impl WorkflowSchedule {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn is_exhausted(&self) -> bool {
        if self.is_looped { self.loop_count > 0 && self.runs >= self.loop_count } else { self.runs >= 1 }
    }
}

/// Durable state of one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id:        String,
    pub name:               String,
    pub workflow_type:      WorkflowType,
    pub status:             WorkflowStatus,
    pub task_ids:           Vec<String>,
    pub current_task_index: usize,
    pub parent_workflow_id: Option<String>,
    pub schedule:           Option<WorkflowSchedule>,
    /// Status saved by `pause`
    pub waiting_state:      Option<WorkflowStatus>,
    /// Task ids the workflow is currently suspended on
    pub awaiting:           Vec<String>,
    execution_history:      Vec<HistoryEntry>,
    pub created_at:         DateTime<Utc>,
    pub updated_at:         DateTime<Utc>,
    pub completed_at:       Option<DateTime<Utc>>
}

impl Workflow {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id:        workflow_id.into(),
            name:               String::new(),
            workflow_type:      WorkflowType::Serial,
            status:             WorkflowStatus::Created,
            task_ids:           Vec::new(),
            current_task_index: 0,
            parent_workflow_id: None,
            schedule:           None,
            waiting_state:      None,
            awaiting:           Vec::new(),
            execution_history:  Vec::new(),
            created_at:         now,
            updated_at:         now,
            completed_at:       None
        }
    }

    pub fn create(
        &mut self,
        name: &str,
        workflow_type: WorkflowType,
        task_ids: Vec<String>,
        parent_workflow_id: Option<String>
    ) -> Result<(), OrchestratorError> {
        if name.trim().is_empty() {
            return Err(OrchestratorError::Configuration("workflow name must not be empty".to_string()));
        }
        if matches!(self.status, WorkflowStatus::Running | WorkflowStatus::WaitingForTask) {
            return Err(OrchestratorError::illegal("create", self.status));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(duplicate) = task_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(OrchestratorError::Configuration(format!("task {} listed more than once", duplicate)));
        }

        self.name = name.to_string();
        self.workflow_type = workflow_type;
        self.task_ids = task_ids;
        self.parent_workflow_id = parent_workflow_id;
        self.status = WorkflowStatus::Created;
        self.current_task_index = 0;
        self.waiting_state = None;
        self.awaiting.clear();
        self.completed_at = None;
        self.record(HistoryKind::Created, None, None, format!("{} workflow '{}' created", workflow_type, name));
        Ok(())
    }

    pub fn add_task(&mut self, task_id: &str) -> Result<(), OrchestratorError> {
        if matches!(self.status, WorkflowStatus::Running | WorkflowStatus::WaitingForTask) {
            return Err(OrchestratorError::illegal("add a task", self.status));
        }
        if task_id.trim().is_empty() {
            return Err(OrchestratorError::Configuration("task id must not be empty".to_string()));
        }
        if self.task_ids.iter().any(|id| id == task_id) {
            return Err(OrchestratorError::Configuration(format!("task {} already belongs to workflow", task_id)));
        }
        self.task_ids.push(task_id.to_string());
        self.record(HistoryKind::TaskAdded, Some(task_id), None, "task added");
        Ok(())
    }

    /// Enter the status a start leads to and return it
    ///
    /// A paused workflow picks up where it was paused, keeping its awaited tasks.
    pub fn begin_start(&mut self) -> Result<WorkflowStatus, OrchestratorError> {
        if self.status == WorkflowStatus::Paused {
            return self.resume();
        }
        if !matches!(self.status, WorkflowStatus::Created | WorkflowStatus::Stopped) {
            return Err(OrchestratorError::illegal("start", self.status));
        }
        self.status = WorkflowStatus::Running;
        self.waiting_state = None;
        self.awaiting.clear();
        self.completed_at = None;
        self.record(HistoryKind::Started, None, None, format!("started at task index {}", self.current_task_index));
        Ok(self.status)
    }

    pub fn pause(&mut self) -> Result<(), OrchestratorError> {
        if !matches!(self.status, WorkflowStatus::Running | WorkflowStatus::WaitingForTask) {
            return Err(OrchestratorError::illegal("pause", self.status));
        }
        self.waiting_state = Some(self.status);
        self.status = WorkflowStatus::Paused;
        self.record(HistoryKind::Paused, None, None, "paused");
        Ok(())
    }

    /// Restores the status saved by `pause` and returns it
    pub fn resume(&mut self) -> Result<WorkflowStatus, OrchestratorError> {
        if self.status != WorkflowStatus::Paused {
            return Err(OrchestratorError::illegal("resume", self.status));
        }
        self.status = self.waiting_state.take().unwrap_or(WorkflowStatus::Running);
        self.record(HistoryKind::Resumed, None, None, format!("resumed into {}", self.status));
        Ok(self.status)
    }

    pub fn stop(&mut self) -> Result<(), OrchestratorError> {
        if self.status.is_terminal() {
            return Err(OrchestratorError::illegal("stop", self.status));
        }
        self.status = WorkflowStatus::Stopped;
        self.waiting_state = None;
        self.awaiting.clear();
        self.record(HistoryKind::Stopped, None, None, "stopped");
        Ok(())
    }

    pub fn suspend_on(&mut self, task_ids: Vec<String>) {
        self.status = WorkflowStatus::WaitingForTask;
        let detail = format!("waiting for {}", task_ids.join(", "));
        self.awaiting = task_ids;
        self.record(HistoryKind::Suspended, None, None, detail);
    }

    /// Leave `WaitingForTask` so the step loop can continue
    pub fn wake(&mut self) {
        self.status = WorkflowStatus::Running;
        self.awaiting.clear();
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self) {
        self.status = WorkflowStatus::Completed;
        self.awaiting.clear();
        self.completed_at = Some(Utc::now());
        self.record(HistoryKind::Completed, None, None, "completed");
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = WorkflowStatus::Failed;
        self.awaiting.clear();
        self.completed_at = Some(Utc::now());
        self.record(HistoryKind::Failed, None, None, reason);
    }

    /// Back to `Created` at the first task, ready for a scheduled re-run
    pub fn reset_for_rerun(&mut self) {
        self.status = WorkflowStatus::Created;
        self.current_task_index = 0;
        self.waiting_state = None;
        self.awaiting.clear();
        self.completed_at = None;
    }

    /// The task a serial or nested workflow is positioned on, if any
    pub fn current_task(&self) -> Option<&str> {
        self.task_ids.get(self.current_task_index).map(String::as_str)
    }

    pub fn advance(&mut self) {
        self.current_task_index = (self.current_task_index + 1).min(self.task_ids.len());
    }

    pub fn record(
        &mut self,
        kind: HistoryKind,
        task_id: Option<&str>,
        task_status: Option<TaskStatus>,
        detail: impl Into<String>
    ) {
        let now = Utc::now();
        self.execution_history.push(HistoryEntry {
            timestamp: now,
            kind,
            task_id: task_id.map(str::to_string),
            task_status,
            detail: detail.into()
        });
        self.updated_at = now;
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.execution_history
    }
}
