//! Task Actor - owns one task and runs its execution state machine
//!
//! Execute runs the configured stages in order (publish, HTTP call, then either suspend on a
//! topic or controller, or do the work inline). Side-effect stages retry with exponential
//! backoff and their own counters; a failed attempt fails the task, notifies its workflow and is
//! retried as a whole while `retry_count < max_retries`. A suspended task only completes through
//! the continuation protocol: an accepted external input arms the one-shot `continue` timer and
//! the timer completes the task.

use std::{collections::HashMap, future::Future, sync::Arc};

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

use crate::{
    actor::{
        cell::StateCell,
        directory::{Delivery, Directory},
        message::TaskMessage,
        respond
    },
    adapter::message_bus::topic_matches,
    domain::{
        constant::{task_actor, timer},
        error::OrchestratorError,
        retry::RetryLimit,
        task::{ExternalInput, Task, TaskConfig, TaskStatus}
    },
    port::{
        http::HttpRequest,
        message_bus::MessageCallback,
        timer::{ActorId, TimerHandle}
    }
};

pub struct TaskArguments {
    pub task_id:   String,
    pub directory: Arc<Directory>,
    /// Cancelled out of band by Stop so a running retry loop yields
    pub cancel:    CancellationToken
}

pub struct TaskState {
    task:      Task,
    cell:      StateCell<Task>,
    directory: Arc<Directory>,
    cancel:    CancellationToken
}

impl TaskState {
    fn owner(&self) -> ActorId {
        ActorId::Task(self.task.task_id.clone())
    }

    fn timer(&self, name: &str) -> TimerHandle {
        TimerHandle { owner: self.owner(), name: name.to_string() }
    }

    async fn persist(&mut self) -> Result<(), OrchestratorError> {
        self.task.touch();
        self.cell.save(&self.task).await
    }

    /// Persist a command's changes, restoring `snapshot` if the write fails
    async fn commit(&mut self, snapshot: Task) -> Result<(), OrchestratorError> {
        if let Err(e) = self.persist().await {
            event!(Level::ERROR, event = task_actor::PERSIST_FAILED, task_id = %self.task.task_id, error = %e);
            self.task = snapshot;
            return Err(e);
        }
        Ok(())
    }

    async fn notify(&self) {
        if let Err(e) = self.directory.notify_completion(&self.task).await {
            event!(Level::ERROR, event = task_actor::NOTIFICATION_FAILED, task_id = %self.task.task_id, error = %e);
        }
    }
}

/// Side-effect stages with independent counters and limits
#[derive(Debug, Clone, Copy)]
enum SideEffect {
    Publish,
    Http
}

impl SideEffect {
    fn name(self) -> &'static str {
        match self {
            SideEffect::Publish => "publish",
            SideEffect::Http => "http call"
        }
    }

    fn counter(self, task: &mut Task) -> &mut u32 {
        match self {
            SideEffect::Publish => &mut task.publish_retry_count,
            SideEffect::Http => &mut task.http_retry_count
        }
    }

    fn limit(self, task: &Task) -> RetryLimit {
        match self {
            SideEffect::Publish => task.max_publish_retries,
            SideEffect::Http => task.max_http_retries
        }
    }
}

pub struct TaskActor;

#[async_trait::async_trait]
impl Actor for TaskActor {
    type Arguments = TaskArguments;
    type Msg = TaskMessage;
    type State = TaskState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments
    ) -> Result<Self::State, ActorProcessingErr> {
        let key = ActorId::Task(args.task_id.clone()).state_key();
        let (cell, stored) = StateCell::load(args.directory.context.store.clone(), key).await?;
        let task = stored.unwrap_or_else(|| Task::new(args.task_id.clone()));

        if task.is_stopped {
            args.cancel.cancel();
        }

        event!(Level::DEBUG, event = task_actor::TASK_ACTIVATED, task_id = %task.task_id, status = %task.status);
        Ok(TaskState { task, cell, directory: args.directory, cancel: args.cancel })
    }

    async fn post_start(&self, _myself: ActorRef<Self::Msg>, state: &mut Self::State) -> Result<(), ActorProcessingErr> {
        // Broker subscriptions do not survive a restart; re-establish while waiting on a topic
        if state.task.awaits_message()
            && let Err(e) = self.subscribe(state).await
        {
            event!(Level::WARN, event = task_actor::TASK_ACTIVATED, task_id = %state.task.task_id, error = %e);
        }
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State
    ) -> Result<(), ActorProcessingErr> {
        match message {
            TaskMessage::Create { name, parameters, reply } => {
                respond(reply, self.create(state, name, parameters).await)
            }
            TaskMessage::Configure { config, reply } => respond(reply, self.configure(state, config).await),
            TaskMessage::SetWorkflow { workflow_id, reply } => {
                respond(reply, self.set_workflow(state, workflow_id).await)
            }
            TaskMessage::Execute { reply } => respond(reply, self.execute(state).await),
            TaskMessage::Pause { reply } => respond(reply, self.pause(state).await),
            TaskMessage::Resume { reply } => respond(reply, self.resume(state).await),
            TaskMessage::Stop { reply } => respond(reply, self.stop(state).await),
            TaskMessage::GetState { reply } => respond(reply, state.task.clone()),
            TaskMessage::External { input, reply } => {
                let accepted = self.accept_external(state, input).await;
                match reply {
                    Some(reply) => respond(reply, accepted),
                    None => {
                        if let Err(e) = accepted {
                            event!(Level::ERROR, event = task_actor::EXTERNAL_IGNORED,
                                   task_id = %state.task.task_id, error = %e);
                        }
                    }
                }
            }
            TaskMessage::OnTimer { name } => self.on_timer(state, &name).await
        }
        Ok(())
    }
}

impl TaskActor {
    async fn create(
        &self,
        state: &mut TaskState,
        name: String,
        parameters: HashMap<String, String>
    ) -> Result<Task, OrchestratorError> {
        let snapshot = state.task.clone();
        let default_max_retries = state.directory.context.settings.retry.default_max_retries;
        state.task.create(&name, parameters, default_max_retries)?;
        state.commit(snapshot.clone()).await?;

        // Recreating a suspended task abandons whatever it was waiting for
        if snapshot.status.is_waiting() || snapshot.status == TaskStatus::Paused || snapshot.pending_continuation {
            self.release(state).await;
        }

        event!(Level::INFO, event = task_actor::TASK_CREATED, task_id = %state.task.task_id, name = %name);
        Ok(state.task.clone())
    }

    async fn configure(&self, state: &mut TaskState, config: TaskConfig) -> Result<Task, OrchestratorError> {
        let snapshot = state.task.clone();
        state.task.configure(config)?;
        state.commit(snapshot).await?;

        event!(
            Level::DEBUG,
            event = task_actor::TASK_CONFIGURED,
            task_id = %state.task.task_id,
            publish = state.task.publish.is_some(),
            http = state.task.http.is_some(),
            subscribe_topic = ?state.task.subscribe_topic,
            wait_for_controller = state.task.wait_for_controller
        );
        Ok(state.task.clone())
    }

    async fn set_workflow(&self, state: &mut TaskState, workflow_id: Option<String>) -> Result<(), OrchestratorError> {
        let snapshot = state.task.clone();
        state.task.workflow_id = workflow_id;
        state.commit(snapshot).await?;

        event!(Level::DEBUG, event = task_actor::TASK_OWNER_CHANGED,
               task_id = %state.task.task_id, workflow_id = ?state.task.workflow_id);
        Ok(())
    }

    /// General retry loop around single attempts
    async fn execute(&self, state: &mut TaskState) -> Result<TaskStatus, OrchestratorError> {
        state.task.ensure_executable()?;
        if !matches!(state.task.status, TaskStatus::Pending | TaskStatus::Completed | TaskStatus::Failed) {
            return Err(OrchestratorError::illegal("execute", state.task.status));
        }

        state.task.retry_count = 0;
        loop {
            if state.cancel.is_cancelled() {
                event!(Level::INFO, event = task_actor::EXECUTION_CANCELLED, task_id = %state.task.task_id);
                return Err(OrchestratorError::Cancelled(format!("task {} was stopped", state.task.task_id)));
            }

            event!(Level::DEBUG, event = task_actor::EXECUTION_STARTED,
                   task_id = %state.task.task_id, attempt = state.task.retry_count + 1);

            match self.attempt(state).await {
                Ok(status) => return Ok(status),
                Err(e) if e.is_cancelled() => {
                    event!(Level::INFO, event = task_actor::EXECUTION_CANCELLED, task_id = %state.task.task_id);
                    return Err(e);
                }
                Err(e) => {
                    let reason = e.to_string();
                    state.task.status = TaskStatus::Failed;
                    state.task.error_message = Some(reason.clone());
                    state.persist().await?;
                    state.notify().await;

                    event!(Level::WARN, event = task_actor::EXECUTION_FAILED, task_id = %state.task.task_id,
                           attempt = state.task.retry_count + 1, error = %reason);

                    if state.task.retry_count < state.task.max_retries {
                        state.task.retry_count += 1;
                        state.persist().await?;
                        event!(Level::INFO, event = task_actor::EXECUTION_RETRY, task_id = %state.task.task_id,
                               retry_count = state.task.retry_count, max_retries = state.task.max_retries);
                        continue;
                    }

                    return Err(OrchestratorError::TaskFailed {
                        task_id:  state.task.task_id.clone(),
                        attempts: state.task.retry_count + 1,
                        reason
                    });
                }
            }
        }
    }

    /// One pass over the configured stages
    async fn attempt(&self, state: &mut TaskState) -> Result<TaskStatus, OrchestratorError> {
        state.task.status = TaskStatus::Running;
        state.task.result = None;
        state.task.error_message = None;
        state.task.external_input = None;
        state.task.pending_continuation = false;
        state.task.waiting_since = None;
        state.persist().await?;

        if let Some(publish) = state.task.publish.clone() {
            let messages = state.directory.context.messages.clone();
            self.run_side_effect(state, SideEffect::Publish, move || {
                let messages = messages.clone();
                let publish = publish.clone();
                async move { messages.publish(&publish.topic, &publish.payload).await }
            })
            .await?;
        }

        if let Some(http) = state.task.http.as_ref().map(HttpRequest::from) {
            let client = state.directory.context.http.clone();
            self.run_side_effect(state, SideEffect::Http, move || {
                let client = client.clone();
                let request = http.clone();
                async move {
                    let (method, url) = (request.method.clone(), request.url.clone());
                    let response = client.send(request).await?;
                    if response.is_success {
                        Ok(())
                    } else {
                        Err(OrchestratorError::Network(format!("{} {} returned {}", method, url, response.status_code)))
                    }
                }
            })
            .await?;
        }

        if state.task.subscribe_topic.is_some() {
            self.subscribe(state).await?;
            return self.suspend(state, TaskStatus::WaitingForMqtt).await;
        }
        if state.task.wait_for_controller {
            return self.suspend(state, TaskStatus::WaitingForController).await;
        }

        let cancel = state.cancel.clone();
        let work_delay = state.directory.context.settings.timing.work_delay();
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(OrchestratorError::Cancelled(format!("task {} was stopped", state.task.task_id)));
            }
            _ = tokio::time::sleep(work_delay) => {}
        }

        state.task.status = TaskStatus::Completed;
        state.task.result = Some(format!("Task '{}' completed at {}", state.task.name, Utc::now().to_rfc3339()));
        state.persist().await?;
        state.notify().await;

        event!(Level::INFO, event = task_actor::TASK_COMPLETED, task_id = %state.task.task_id);
        Ok(TaskStatus::Completed)
    }

    /// Retry one side effect until it succeeds, its limit is used up or the task is stopped
    async fn run_side_effect<F, Fut>(
        &self,
        state: &mut TaskState,
        effect: SideEffect,
        mut attempt: F
    ) -> Result<(), OrchestratorError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<(), OrchestratorError>> + Send
    {
        let backoff = state.directory.context.settings.retry.backoff();
        let cancel = state.cancel.clone();
        *effect.counter(&mut state.task) = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled(format!(
                    "{} of task {} abandoned by stop",
                    effect.name(),
                    state.task.task_id
                )));
            }

            let error = match attempt().await {
                Ok(()) => {
                    event!(Level::DEBUG, event = task_actor::SIDE_EFFECT_SUCCEEDED,
                           task_id = %state.task.task_id, effect = effect.name());
                    return Ok(());
                }
                Err(e) => e
            };

            let counter = effect.counter(&mut state.task);
            *counter += 1;
            let attempts = *counter;
            state.persist().await?;

            let limit = effect.limit(&state.task);
            event!(Level::WARN, event = task_actor::SIDE_EFFECT_FAILED, task_id = %state.task.task_id,
                   effect = effect.name(), attempts = attempts, limit = %limit, error = %error);

            if limit.is_exhausted(attempts) {
                return Err(OrchestratorError::SideEffectExhausted {
                    effect: effect.name(),
                    attempts,
                    last_error: error.to_string()
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(backoff.delay(attempts - 1)) => {}
            }
        }
    }

    async fn suspend(&self, state: &mut TaskState, status: TaskStatus) -> Result<TaskStatus, OrchestratorError> {
        state.task.status = status;
        state.task.waiting_since = Some(Utc::now());
        state.persist().await?;

        // Infinite patience: the liveness timer only reports, it never times the wait out
        let interval = state.directory.context.settings.timing.liveness_interval();
        if let Err(e) = state.directory.timers.arm(&state.owner(), timer::LIVENESS, interval, Some(interval)).await {
            event!(Level::WARN, event = task_actor::LIVENESS_CHECK, task_id = %state.task.task_id, error = %e);
        }

        event!(Level::INFO, event = task_actor::TASK_SUSPENDED, task_id = %state.task.task_id, status = %status);
        Ok(status)
    }

    async fn subscribe(&self, state: &TaskState) -> Result<(), OrchestratorError> {
        let Some(topic) = state.task.subscribe_topic.clone() else {
            return Ok(());
        };

        let sender = state.directory.delivery_sender();
        let task_id = state.task.task_id.clone();
        let callback: MessageCallback = Arc::new(move |topic: &str, payload: &str| {
            let delivery = Delivery::ExternalMessage {
                task_id: task_id.clone(),
                topic:   topic.to_string(),
                payload: payload.to_string()
            };
            if sender.send(delivery).is_err() {
                event!(Level::WARN, event = task_actor::EXTERNAL_IGNORED, task_id = %task_id, reason = "runtime stopped");
            }
        });

        state.directory.context.messages.subscribe(&topic, &state.owner().to_string(), callback).await
    }

    async fn unsubscribe(&self, state: &TaskState) {
        if let Some(topic) = state.task.subscribe_topic.as_deref()
            && let Err(e) = state.directory.context.messages.unsubscribe(topic, &state.owner().to_string()).await
        {
            event!(Level::WARN, event = task_actor::EXTERNAL_IGNORED, task_id = %state.task.task_id, error = %e);
        }
    }

    async fn cancel_timer(&self, state: &TaskState, name: &str) {
        if let Err(e) = state.directory.timers.cancel(&state.timer(name)).await {
            event!(Level::WARN, event = task_actor::LIVENESS_CHECK, task_id = %state.task.task_id,
                   timer = %name, error = %e);
        }
    }

    /// Drop the subscription and every timer the task may have armed
    async fn release(&self, state: &TaskState) {
        self.unsubscribe(state).await;
        self.cancel_timer(state, timer::LIVENESS).await;
        self.cancel_timer(state, timer::CONTINUE).await;
    }

    async fn accept_external(&self, state: &mut TaskState, input: ExternalInput) -> Result<bool, OrchestratorError> {
        let expected = match &input {
            ExternalInput::Message { .. } => TaskStatus::WaitingForMqtt,
            ExternalInput::ControllerCall { .. } => TaskStatus::WaitingForController
        };
        if state.task.status != expected {
            event!(Level::WARN, event = task_actor::EXTERNAL_IGNORED, task_id = %state.task.task_id,
                   status = %state.task.status, input = %input);
            return Ok(false);
        }
        if let ExternalInput::Message { topic, .. } = &input
            && let Some(filter) = state.task.subscribe_topic.as_deref()
            && !topic_matches(filter, topic)
        {
            event!(Level::WARN, event = task_actor::EXTERNAL_IGNORED, task_id = %state.task.task_id,
                   subscribed = %filter, topic = %topic);
            return Ok(false);
        }

        let snapshot = state.task.clone();
        state.task.external_input = Some(input);
        state.task.status = TaskStatus::Running;
        state.task.pending_continuation = true;
        state.task.waiting_since = None;
        state.commit(snapshot).await?;

        self.unsubscribe(state).await;
        self.cancel_timer(state, timer::LIVENESS).await;
        self.arm_continuation(state).await?;

        event!(Level::INFO, event = task_actor::EXTERNAL_ACCEPTED, task_id = %state.task.task_id);
        Ok(true)
    }

    async fn arm_continuation(&self, state: &TaskState) -> Result<(), OrchestratorError> {
        let delay = state.directory.context.settings.timing.continuation_delay();
        state.directory.timers.arm(&state.owner(), timer::CONTINUE, delay, None).await.map(|_| ())
    }

    async fn on_timer(&self, state: &mut TaskState, name: &str) {
        match name {
            timer::CONTINUE => self.continue_after_external(state).await,
            timer::LIVENESS => self.check_liveness(state).await,
            other => {
                event!(Level::WARN, event = task_actor::LIVENESS_CHECK, task_id = %state.task.task_id,
                       timer = %other, message = "unknown timer");
                self.cancel_timer(state, other).await;
            }
        }
    }

    async fn continue_after_external(&self, state: &mut TaskState) {
        if state.task.status.is_waiting() {
            event!(Level::WARN, event = task_actor::CONTINUE_SKIPPED, task_id = %state.task.task_id,
                   status = %state.task.status);
            return;
        }
        if state.task.status == TaskStatus::Paused {
            // Kept pending; Resume re-arms the timer
            event!(Level::DEBUG, event = task_actor::CONTINUE_SKIPPED, task_id = %state.task.task_id, status = "Paused");
            return;
        }
        if !state.task.pending_continuation {
            event!(Level::DEBUG, event = task_actor::CONTINUE_SKIPPED, task_id = %state.task.task_id,
                   status = %state.task.status, message = "nothing pending");
            return;
        }

        let snapshot = state.task.clone();
        let input = state.task.external_input.as_ref().map(ToString::to_string).unwrap_or_default();
        state.task.pending_continuation = false;
        state.task.status = TaskStatus::Completed;
        state.task.result = Some(format!("Task '{}' completed after {}", state.task.name, input));
        if state.commit(snapshot).await.is_err() {
            if let Err(e) = self.arm_continuation(state).await {
                event!(Level::ERROR, event = task_actor::CONTINUE_SKIPPED, task_id = %state.task.task_id, error = %e);
            }
            return;
        }

        state.notify().await;
        event!(Level::INFO, event = task_actor::TASK_COMPLETED, task_id = %state.task.task_id);
    }

    async fn check_liveness(&self, state: &mut TaskState) {
        let waiting = state.task.status.is_waiting()
            || (state.task.status == TaskStatus::Paused && state.task.waiting_state.is_some_and(TaskStatus::is_waiting));
        if !waiting {
            self.cancel_timer(state, timer::LIVENESS).await;
            return;
        }

        let waited_secs = state.task.waiting_since.map(|since| (Utc::now() - since).num_seconds()).unwrap_or_default();
        event!(Level::DEBUG, event = task_actor::LIVENESS_CHECK, task_id = %state.task.task_id,
               status = %state.task.status, waited_secs = waited_secs);
    }

    async fn pause(&self, state: &mut TaskState) -> Result<(), OrchestratorError> {
        let snapshot = state.task.clone();
        state.task.pause()?;
        state.commit(snapshot).await?;

        event!(Level::INFO, event = task_actor::TASK_PAUSED, task_id = %state.task.task_id,
               saved = ?state.task.waiting_state);
        Ok(())
    }

    async fn resume(&self, state: &mut TaskState) -> Result<(), OrchestratorError> {
        let snapshot = state.task.clone();
        let restored = state.task.resume()?;
        state.commit(snapshot).await?;

        if restored == TaskStatus::Running && state.task.pending_continuation {
            self.arm_continuation(state).await?;
        } else if state.task.awaits_message() {
            self.subscribe(state).await?;
        }

        event!(Level::INFO, event = task_actor::TASK_RESUMED, task_id = %state.task.task_id, status = %restored);
        Ok(())
    }

    async fn stop(&self, state: &mut TaskState) -> Result<(), OrchestratorError> {
        state.cancel.cancel();
        state.task.stop();
        self.release(state).await;
        state.persist().await?;
        state.notify().await;

        event!(Level::INFO, event = task_actor::TASK_STOPPED, task_id = %state.task.task_id);
        Ok(())
    }
}
