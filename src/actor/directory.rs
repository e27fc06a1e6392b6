//! Actor directory: one live actor per task or workflow id, activated on demand
//!
//! Activation loads the actor's durable state; deactivation stops the actor and leaves the state,
//! timers and buffered completions behind for the next activation. Everything that must reach an
//! actor without a caller waiting on it (timer ticks, message-bus deliveries, completion wake-ups)
//! goes through the delivery channel so the target is activated first.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration
};

use ractor::{
    Actor, ActorRef, ActorStatus, Message, RpcReplyPort,
    rpc::{CallResult, call}
};
use tokio::{
    sync::{RwLock, mpsc},
    task::JoinHandle
};
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

use crate::{
    actor::{
        message::{TaskMessage, WorkflowMessage},
        task::{TaskActor, TaskArguments},
        workflow::{WorkflowActor, WorkflowArguments}
    },
    context::AppContext,
    domain::{
        completion::TaskCompletionEvent,
        constant::runtime,
        error::OrchestratorError,
        task::{ExternalInput, Task, TaskStatus}
    },
    port::timer::{ActorId, DurableTimer, TimerTick}
};

/// Work routed to an actor by id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Timer(TimerTick),
    ExternalMessage { task_id: String, topic: String, payload: String },
    /// Make sure the actor is live; used so workflows pick up buffered completions
    Activate(ActorId)
}

/// Out-of-band stop flag for a workflow's step loop; replaced with a fresh token on every start
#[derive(Clone, Default)]
pub struct StopSignal(Arc<Mutex<CancellationToken>>);

impl StopSignal {
    pub fn token(&self) -> CancellationToken {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn trigger(&self) {
        self.token().cancel();
    }

    pub fn reset(&self) {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = CancellationToken::new();
    }
}

struct TaskEntry {
    actor:  ActorRef<TaskMessage>,
    handle: JoinHandle<()>,
    cancel: CancellationToken
}

struct WorkflowEntry {
    actor:  ActorRef<WorkflowMessage>,
    handle: JoinHandle<()>,
    stop:   StopSignal
}

fn is_live(status: ActorStatus) -> bool {
    !matches!(status, ActorStatus::Stopping | ActorStatus::Stopped)
}

async fn call_actor<M, T, F>(
    actor: &ActorRef<M>,
    target: &str,
    timeout: Option<Duration>,
    build: F
) -> Result<T, OrchestratorError>
where
    M: Message,
    T: Send + 'static,
    F: FnOnce(RpcReplyPort<T>) -> M
{
    match call(actor, build, timeout).await {
        Ok(CallResult::Success(value)) => Ok(value),
        Ok(CallResult::Timeout) => Err(OrchestratorError::Timeout(format!("call to {}", target))),
        Ok(CallResult::SenderError) => Err(OrchestratorError::Actor(format!("{} dropped the reply", target))),
        Err(e) => Err(OrchestratorError::Actor(format!("failed to reach {}: {}", target, e)))
    }
}

pub struct Directory {
    pub context: AppContext,
    pub timers:  Arc<dyn DurableTimer>,
    deliveries:  mpsc::UnboundedSender<Delivery>,
    tasks:       RwLock<HashMap<String, TaskEntry>>,
    workflows:   RwLock<HashMap<String, WorkflowEntry>>
}

impl Directory {
    pub fn new(
        context: AppContext,
        timers: Arc<dyn DurableTimer>,
        deliveries: mpsc::UnboundedSender<Delivery>
    ) -> Arc<Self> {
        Arc::new(Self {
            context,
            timers,
            deliveries,
            tasks: RwLock::new(HashMap::new()),
            workflows: RwLock::new(HashMap::new())
        })
    }

    fn call_timeout(&self) -> Option<Duration> {
        Some(self.context.settings.timing.call_timeout())
    }

    pub fn delivery_sender(&self) -> mpsc::UnboundedSender<Delivery> {
        self.deliveries.clone()
    }

    /// Queue a delivery for the dispatcher; false once the runtime is shut down
    pub fn deliver(&self, delivery: Delivery) -> bool {
        self.deliveries.send(delivery).is_ok()
    }

    // Activation

    async fn activate_task(
        self: &Arc<Self>,
        task_id: &str
    ) -> Result<(ActorRef<TaskMessage>, CancellationToken), OrchestratorError> {
        if let Some(entry) = self.tasks.read().await.get(task_id)
            && is_live(entry.actor.get_status())
        {
            return Ok((entry.actor.clone(), entry.cancel.clone()));
        }

        let mut tasks = self.tasks.write().await;
        if let Some(entry) = tasks.get(task_id)
            && is_live(entry.actor.get_status())
        {
            return Ok((entry.actor.clone(), entry.cancel.clone()));
        }

        let cancel = CancellationToken::new();
        let arguments =
            TaskArguments { task_id: task_id.to_string(), directory: self.clone(), cancel: cancel.clone() };
        let (actor, handle) = Actor::spawn(None, TaskActor, arguments).await.inspect_err(|e| {
            event!(Level::ERROR, event = runtime::ACTOR_ACTIVATION_FAILED, task_id = %task_id, error = %e);
        })?;

        event!(Level::DEBUG, event = runtime::ACTOR_ACTIVATED, task_id = %task_id);
        tasks.insert(task_id.to_string(), TaskEntry { actor: actor.clone(), handle, cancel: cancel.clone() });
        Ok((actor, cancel))
    }

    async fn activate_workflow(
        self: &Arc<Self>,
        workflow_id: &str
    ) -> Result<(ActorRef<WorkflowMessage>, StopSignal), OrchestratorError> {
        if let Some(entry) = self.workflows.read().await.get(workflow_id)
            && is_live(entry.actor.get_status())
        {
            return Ok((entry.actor.clone(), entry.stop.clone()));
        }

        let mut workflows = self.workflows.write().await;
        if let Some(entry) = workflows.get(workflow_id)
            && is_live(entry.actor.get_status())
        {
            return Ok((entry.actor.clone(), entry.stop.clone()));
        }

        let stop = StopSignal::default();
        let arguments =
            WorkflowArguments { workflow_id: workflow_id.to_string(), directory: self.clone(), stop: stop.clone() };
        let (actor, handle) = Actor::spawn(None, WorkflowActor, arguments).await.inspect_err(|e| {
            event!(Level::ERROR, event = runtime::ACTOR_ACTIVATION_FAILED, workflow_id = %workflow_id, error = %e);
        })?;

        event!(Level::DEBUG, event = runtime::ACTOR_ACTIVATED, workflow_id = %workflow_id);
        workflows.insert(workflow_id.to_string(), WorkflowEntry { actor: actor.clone(), handle, stop: stop.clone() });
        Ok((actor, stop))
    }

    pub async fn task_actor(self: &Arc<Self>, task_id: &str) -> Result<ActorRef<TaskMessage>, OrchestratorError> {
        Ok(self.activate_task(task_id).await?.0)
    }

    pub async fn workflow_actor(
        self: &Arc<Self>,
        workflow_id: &str
    ) -> Result<ActorRef<WorkflowMessage>, OrchestratorError> {
        Ok(self.activate_workflow(workflow_id).await?.0)
    }

    /// Stop the task's actor; its durable state and timers stay
    pub async fn deactivate_task(&self, task_id: &str) {
        let entry = self.tasks.write().await.remove(task_id);
        if let Some(entry) = entry {
            entry.actor.stop(None);
            if let Err(e) = entry.handle.await {
                event!(Level::WARN, event = runtime::ACTOR_DEACTIVATED, task_id = %task_id, error = %e);
            }
            event!(Level::DEBUG, event = runtime::ACTOR_DEACTIVATED, task_id = %task_id);
        }
    }

    /// Stop the workflow's actor; completions published meanwhile are buffered on the bus
    pub async fn deactivate_workflow(&self, workflow_id: &str) {
        let entry = self.workflows.write().await.remove(workflow_id);
        if let Some(entry) = entry {
            entry.actor.stop(None);
            if let Err(e) = entry.handle.await {
                event!(Level::WARN, event = runtime::ACTOR_DEACTIVATED, workflow_id = %workflow_id, error = %e);
            }
            event!(Level::DEBUG, event = runtime::ACTOR_DEACTIVATED, workflow_id = %workflow_id);
        }
    }

    pub async fn deactivate_all(&self) {
        let task_ids: Vec<String> = self.tasks.read().await.keys().cloned().collect();
        for task_id in task_ids {
            self.deactivate_task(&task_id).await;
        }
        let workflow_ids: Vec<String> = self.workflows.read().await.keys().cloned().collect();
        for workflow_id in workflow_ids {
            self.deactivate_workflow(&workflow_id).await;
        }
    }

    pub async fn active_counts(&self) -> (usize, usize) {
        (self.tasks.read().await.len(), self.workflows.read().await.len())
    }

    // Typed calls

    pub async fn call_task<T, F>(
        self: &Arc<Self>,
        task_id: &str,
        timeout: Option<Duration>,
        build: F
    ) -> Result<T, OrchestratorError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> TaskMessage
    {
        let actor = self.task_actor(task_id).await?;
        call_actor(&actor, &ActorId::Task(task_id.to_string()).to_string(), timeout, build).await
    }

    pub async fn call_workflow<T, F>(
        self: &Arc<Self>,
        workflow_id: &str,
        timeout: Option<Duration>,
        build: F
    ) -> Result<T, OrchestratorError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> WorkflowMessage
    {
        let actor = self.workflow_actor(workflow_id).await?;
        call_actor(&actor, &ActorId::Workflow(workflow_id.to_string()).to_string(), timeout, build).await
    }

    pub async fn task_state(self: &Arc<Self>, task_id: &str) -> Result<Task, OrchestratorError> {
        self.call_task(task_id, self.call_timeout(), |reply| TaskMessage::GetState { reply }).await
    }

    /// Last persisted state of a task, read without going through its (possibly busy) actor
    pub async fn stored_task(&self, task_id: &str) -> Result<Option<Task>, OrchestratorError> {
        let key = ActorId::Task(task_id.to_string()).state_key();
        match self.context.store.load(&key).await? {
            Some(blob) => Ok(Some(serde_json::from_slice(&blob.data)?)),
            None => Ok(None)
        }
    }

    /// Execute has no call timeout: retry loops are bounded by Stop, not by the caller
    pub async fn execute_task(self: &Arc<Self>, task_id: &str) -> Result<TaskStatus, OrchestratorError> {
        self.call_task(task_id, None, |reply| TaskMessage::Execute { reply }).await?
    }

    pub async fn set_task_workflow(
        self: &Arc<Self>,
        task_id: &str,
        workflow_id: Option<String>
    ) -> Result<(), OrchestratorError> {
        self.call_task(task_id, self.call_timeout(), |reply| TaskMessage::SetWorkflow { workflow_id, reply }).await?
    }

    pub async fn pause_task(self: &Arc<Self>, task_id: &str) -> Result<(), OrchestratorError> {
        self.call_task(task_id, self.call_timeout(), |reply| TaskMessage::Pause { reply }).await?
    }

    pub async fn resume_task(self: &Arc<Self>, task_id: &str) -> Result<(), OrchestratorError> {
        self.call_task(task_id, self.call_timeout(), |reply| TaskMessage::Resume { reply }).await?
    }

    /// Cancel the task's token first so a running retry loop yields, then queue the Stop
    pub async fn stop_task(self: &Arc<Self>, task_id: &str) -> Result<(), OrchestratorError> {
        let (actor, cancel) = self.activate_task(task_id).await?;
        cancel.cancel();
        call_actor(&actor, &ActorId::Task(task_id.to_string()).to_string(), self.call_timeout(), |reply| {
            TaskMessage::Stop { reply }
        })
        .await?
    }

    pub async fn external_input(
        self: &Arc<Self>,
        task_id: &str,
        input: ExternalInput
    ) -> Result<bool, OrchestratorError> {
        self.call_task(task_id, self.call_timeout(), |reply| TaskMessage::External { input, reply: Some(reply) })
            .await?
    }

    /// Trigger the workflow's stop signal so an in-flight step loop yields, then queue the Stop
    pub async fn stop_workflow(self: &Arc<Self>, workflow_id: &str) -> Result<(), OrchestratorError> {
        let (actor, stop) = self.activate_workflow(workflow_id).await?;
        stop.trigger();
        call_actor(&actor, &ActorId::Workflow(workflow_id.to_string()).to_string(), self.call_timeout(), |reply| {
            WorkflowMessage::Stop { reply }
        })
        .await?
    }

    // Notifications and routing

    /// Publish the task's terminal outcome to its owning workflow's completion topic
    pub async fn notify_completion(&self, task: &Task) -> Result<(), OrchestratorError> {
        let Some(workflow_id) = task.workflow_id.as_deref() else {
            return Ok(());
        };

        // Nothing would ever drain the topic of a workflow that was never stored
        let owner = ActorId::Workflow(workflow_id.to_string());
        if self.context.store.load(&owner.state_key()).await?.is_none() {
            event!(Level::DEBUG, event = runtime::COMPLETION_DROPPED, task_id = %task.task_id,
                   workflow_id = %workflow_id);
            return Ok(());
        }

        let detail = task.result.clone().or_else(|| task.error_message.clone());
        let completion = TaskCompletionEvent::new(&task.task_id, workflow_id, task.status, detail);
        self.context.topics.publish(&completion.topic(), completion).await?;
        self.deliver(Delivery::Activate(owner));
        Ok(())
    }

    /// Activate the delivery's target and hand it over
    pub async fn route(self: &Arc<Self>, delivery: Delivery) -> Result<(), OrchestratorError> {
        event!(Level::TRACE, event = runtime::DELIVERY_ROUTED, delivery = ?delivery);
        match delivery {
            Delivery::Timer(TimerTick { owner: ActorId::Task(task_id), name }) => self
                .task_actor(&task_id)
                .await?
                .cast(TaskMessage::OnTimer { name })
                .map_err(|e| OrchestratorError::Actor(e.to_string())),
            Delivery::Timer(TimerTick { owner: ActorId::Workflow(workflow_id), name }) => self
                .workflow_actor(&workflow_id)
                .await?
                .cast(WorkflowMessage::OnTimer { name })
                .map_err(|e| OrchestratorError::Actor(e.to_string())),
            Delivery::ExternalMessage { task_id, topic, payload } => self
                .task_actor(&task_id)
                .await?
                .cast(TaskMessage::External { input: ExternalInput::Message { topic, payload }, reply: None })
                .map_err(|e| OrchestratorError::Actor(e.to_string())),
            Delivery::Activate(owner) => {
                // Only wake actors that exist durably
                if self.context.store.load(&owner.state_key()).await?.is_none() {
                    return Ok(());
                }
                match owner {
                    ActorId::Task(task_id) => self.task_actor(&task_id).await.map(|_| ()),
                    ActorId::Workflow(workflow_id) => self.workflow_actor(&workflow_id).await.map(|_| ())
                }
            }
        }
    }
}
