//! Runtime - owns the directory, the reminder service and the delivery dispatcher
//!
//! This is the surface external callers use. Every operation addresses an actor by id; the
//! directory activates it from durable state on first use.

use std::{collections::HashMap, sync::Arc, time::Instant};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{Level, event};

use crate::{
    actor::{
        directory::{Delivery, Directory},
        message::{SystemHealth, TaskMessage, WorkflowMessage}
    },
    adapter::timer::{ReminderService, TickSink},
    context::AppContext,
    domain::{
        constant::runtime,
        error::OrchestratorError,
        task::{ExternalInput, Task, TaskConfig, TaskStatus},
        workflow::{Workflow, WorkflowType}
    },
    port::timer::ActorId
};

pub struct Runtime {
    directory:  Arc<Directory>,
    reminders:  Arc<ReminderService>,
    dispatcher: JoinHandle<()>,
    started_at: Instant
}

async fn dispatch(directory: Arc<Directory>, mut deliveries: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = deliveries.recv().await {
        let description = format!("{:?}", delivery);
        if let Err(e) = directory.route(delivery).await {
            event!(Level::WARN, event = runtime::DELIVERY_FAILED, delivery = %description, error = %e);
        }
    }
}

impl Runtime {
    /// Wire the services together and re-arm every persisted reminder
    pub async fn start(context: AppContext) -> Result<Self, OrchestratorError> {
        let (sender, receiver) = mpsc::unbounded_channel();

        let ticks = sender.clone();
        let sink: TickSink = Arc::new(move |tick| ticks.send(Delivery::Timer(tick)).is_ok());
        let reminders = Arc::new(ReminderService::new(context.store.clone(), sink));

        let directory = Directory::new(context, reminders.clone(), sender);
        let dispatcher = tokio::spawn(dispatch(directory.clone(), receiver));

        let recovered = reminders.recover().await?;
        event!(Level::INFO, event = runtime::REMINDERS_RECOVERED, count = recovered);
        event!(Level::INFO, event = runtime::RUNTIME_STARTED);

        Ok(Self { directory, reminders, dispatcher, started_at: Instant::now() })
    }

    pub fn context(&self) -> &AppContext {
        &self.directory.context
    }

    fn call_timeout(&self) -> Option<std::time::Duration> {
        Some(self.directory.context.settings.timing.call_timeout())
    }

    // Tasks

    pub async fn create_task(
        &self,
        task_id: &str,
        name: &str,
        parameters: HashMap<String, String>
    ) -> Result<Task, OrchestratorError> {
        let name = name.to_string();
        self.directory
            .call_task(task_id, self.call_timeout(), |reply| TaskMessage::Create { name, parameters, reply })
            .await?
    }

    pub async fn configure_task(&self, task_id: &str, config: TaskConfig) -> Result<Task, OrchestratorError> {
        self.directory.call_task(task_id, self.call_timeout(), |reply| TaskMessage::Configure { config, reply }).await?
    }

    pub async fn set_task_workflow(&self, task_id: &str, workflow_id: Option<String>) -> Result<(), OrchestratorError> {
        self.directory.set_task_workflow(task_id, workflow_id).await
    }

    /// Run the task to completion, suspension or final failure
    pub async fn execute_task(&self, task_id: &str) -> Result<TaskStatus, OrchestratorError> {
        self.directory.execute_task(task_id).await
    }

    pub async fn pause_task(&self, task_id: &str) -> Result<(), OrchestratorError> {
        self.directory.pause_task(task_id).await
    }

    pub async fn resume_task(&self, task_id: &str) -> Result<(), OrchestratorError> {
        self.directory.resume_task(task_id).await
    }

    pub async fn stop_task(&self, task_id: &str) -> Result<(), OrchestratorError> {
        self.directory.stop_task(task_id).await
    }

    pub async fn task_state(&self, task_id: &str) -> Result<Task, OrchestratorError> {
        self.directory.task_state(task_id).await
    }

    /// Hand a message-bus delivery to a task; true when the task accepted it
    pub async fn send_message(&self, task_id: &str, topic: &str, payload: &str) -> Result<bool, OrchestratorError> {
        let input = ExternalInput::Message { topic: topic.to_string(), payload: payload.to_string() };
        self.directory.external_input(task_id, input).await
    }

    /// Controller callback for a task waiting on one; true when the task accepted it
    pub async fn call_controller(&self, task_id: &str, data: &str) -> Result<bool, OrchestratorError> {
        let input = ExternalInput::ControllerCall { data: data.to_string() };
        self.directory.external_input(task_id, input).await
    }

    // Workflows

    pub async fn create_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        workflow_type: WorkflowType,
        task_ids: Vec<String>,
        parent_workflow_id: Option<String>
    ) -> Result<Workflow, OrchestratorError> {
        let name = name.to_string();
        self.directory
            .call_workflow(workflow_id, self.call_timeout(), |reply| WorkflowMessage::Create {
                name,
                workflow_type,
                task_ids,
                parent_workflow_id,
                reply
            })
            .await?
    }

    pub async fn add_task(&self, workflow_id: &str, task_id: &str) -> Result<(), OrchestratorError> {
        let task_id = task_id.to_string();
        self.directory
            .call_workflow(workflow_id, self.call_timeout(), |reply| WorkflowMessage::AddTask { task_id, reply })
            .await?
    }

    /// Replies once the workflow is Running; the tasks run afterwards
    pub async fn start_workflow(&self, workflow_id: &str) -> Result<(), OrchestratorError> {
        self.directory.call_workflow(workflow_id, self.call_timeout(), |reply| WorkflowMessage::Start { reply }).await?
    }

    pub async fn pause_workflow(&self, workflow_id: &str) -> Result<(), OrchestratorError> {
        self.directory.call_workflow(workflow_id, self.call_timeout(), |reply| WorkflowMessage::Pause { reply }).await?
    }

    pub async fn resume_workflow(&self, workflow_id: &str) -> Result<(), OrchestratorError> {
        self.directory.call_workflow(workflow_id, self.call_timeout(), |reply| WorkflowMessage::Resume { reply }).await?
    }

    pub async fn stop_workflow(&self, workflow_id: &str) -> Result<(), OrchestratorError> {
        self.directory.stop_workflow(workflow_id).await
    }

    pub async fn workflow_state(&self, workflow_id: &str) -> Result<Workflow, OrchestratorError> {
        self.directory.call_workflow(workflow_id, self.call_timeout(), |reply| WorkflowMessage::GetState { reply }).await
    }

    pub async fn workflow_tasks(&self, workflow_id: &str) -> Result<Vec<Task>, OrchestratorError> {
        self.directory.call_workflow(workflow_id, self.call_timeout(), |reply| WorkflowMessage::GetTasks { reply }).await?
    }

    pub async fn schedule_workflow(
        &self,
        workflow_id: &str,
        interval_ms: u64,
        is_looped: bool,
        loop_count: u32
    ) -> Result<(), OrchestratorError> {
        self.directory
            .call_workflow(workflow_id, self.call_timeout(), |reply| WorkflowMessage::Schedule {
                interval_ms,
                is_looped,
                loop_count,
                reply
            })
            .await?
    }

    pub async fn set_schedule(&self, workflow_id: &str, interval_ms: u64) -> Result<(), OrchestratorError> {
        self.directory
            .call_workflow(workflow_id, self.call_timeout(), |reply| WorkflowMessage::SetSchedule { interval_ms, reply })
            .await?
    }

    pub async fn unschedule(&self, workflow_id: &str) -> Result<(), OrchestratorError> {
        self.directory
            .call_workflow(workflow_id, self.call_timeout(), |reply| WorkflowMessage::Unschedule { reply })
            .await?
    }

    /// Ids of every workflow with durable state
    pub async fn workflow_ids(&self) -> Result<Vec<String>, OrchestratorError> {
        let prefix = ActorId::Workflow(String::new()).state_key();
        let keys = self.directory.context.store.keys(&prefix).await?;
        Ok(keys.into_iter().filter_map(|key| key.strip_prefix(&prefix).map(str::to_string)).collect())
    }

    // Lifecycle

    pub async fn deactivate_task(&self, task_id: &str) {
        self.directory.deactivate_task(task_id).await;
    }

    pub async fn deactivate_workflow(&self, workflow_id: &str) {
        self.directory.deactivate_workflow(workflow_id).await;
    }

    pub async fn health(&self) -> SystemHealth {
        let (active_tasks, active_workflows) = self.directory.active_counts().await;
        SystemHealth {
            active_tasks,
            active_workflows,
            armed_timers: self.reminders.armed_count().await,
            uptime_seconds: self.started_at.elapsed().as_secs()
        }
    }

    /// Stop every actor; durable state and reminders are left for the next start
    pub async fn shutdown(self) {
        self.reminders.shutdown().await;
        self.dispatcher.abort();
        self.directory.deactivate_all().await;
        event!(Level::INFO, event = runtime::RUNTIME_SHUTDOWN, uptime_seconds = self.started_at.elapsed().as_secs());
    }
}
