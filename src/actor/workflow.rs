//! Workflow Actor - sequences tasks and reacts to their completions
//!
//! Serial and nested workflows execute one task at a time and suspend on the first task that
//! waits for external input. Parallel workflows dispatch every task in one pass and complete
//! once nothing is waiting anymore. Completions arrive on the workflow's topic; on reactivation
//! the awaited tasks are re-read so nothing published while the actor was down is lost.

use std::{fmt, sync::Arc};

use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

use crate::{
    actor::{
        cell::StateCell,
        directory::{Directory, StopSignal},
        message::WorkflowMessage,
        respond
    },
    domain::{
        completion::{TaskCompletionEvent, Topic},
        constant::{timer, workflow_actor},
        error::OrchestratorError,
        task::{Task, TaskStatus},
        workflow::{HistoryKind, Workflow, WorkflowSchedule, WorkflowStatus, WorkflowType}
    },
    port::{
        bus::{SubscriptionHandle, TopicSink},
        timer::{ActorId, TimerHandle}
    }
};

pub struct WorkflowArguments {
    pub workflow_id: String,
    pub directory:   Arc<Directory>,
    pub stop:        StopSignal
}

pub struct WorkflowState {
    workflow:     Workflow,
    cell:         StateCell<Workflow>,
    directory:    Arc<Directory>,
    stop:         StopSignal,
    subscription: Option<SubscriptionHandle>
}

impl WorkflowState {
    fn id(&self) -> &str {
        &self.workflow.workflow_id
    }

    fn owner(&self) -> ActorId {
        ActorId::Workflow(self.workflow.workflow_id.clone())
    }

    fn schedule_timer(&self) -> TimerHandle {
        TimerHandle { owner: self.owner(), name: timer::SCHEDULE.to_string() }
    }

    async fn persist(&mut self) -> Result<(), OrchestratorError> {
        self.cell.save(&self.workflow).await
    }

    async fn commit(&mut self, snapshot: Workflow) -> Result<(), OrchestratorError> {
        if let Err(e) = self.persist().await {
            self.workflow = snapshot;
            return Err(e);
        }
        Ok(())
    }

    fn skip(&mut self, task_id: &str, reason: &str) {
        event!(Level::INFO, event = workflow_actor::TASK_SKIPPED, workflow_id = %self.id(), task_id = %task_id,
               reason = %reason);
        self.workflow.record(HistoryKind::TaskSkipped, Some(task_id), None, reason);
    }

    fn control_failed(&mut self, task_id: &str, detail: String) {
        event!(Level::WARN, event = workflow_actor::CONTROL_FAILED, workflow_id = %self.id(), task_id = %task_id,
               detail = %detail);
        self.workflow.record(HistoryKind::ControlFailed, Some(task_id), None, detail);
    }
}

/// Lifecycle operation fanned out to the owned tasks
#[derive(Debug, Clone, Copy)]
enum Control {
    Pause,
    Resume,
    Stop
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Control::Pause => "pause",
            Control::Resume => "resume",
            Control::Stop => "stop"
        };
        write!(f, "{}", name)
    }
}

fn unfinished(status: TaskStatus) -> bool {
    status.is_waiting() || matches!(status, TaskStatus::Running | TaskStatus::Paused)
}

pub struct WorkflowActor;

#[async_trait::async_trait]
impl Actor for WorkflowActor {
    type Arguments = WorkflowArguments;
    type Msg = WorkflowMessage;
    type State = WorkflowState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments
    ) -> Result<Self::State, ActorProcessingErr> {
        let key = ActorId::Workflow(args.workflow_id.clone()).state_key();
        let (cell, stored) = StateCell::load(args.directory.context.store.clone(), key).await?;
        let workflow = stored.unwrap_or_else(|| Workflow::new(args.workflow_id.clone()));

        event!(Level::DEBUG, event = workflow_actor::WORKFLOW_ACTIVATED, workflow_id = %workflow.workflow_id,
               status = %workflow.status);
        Ok(WorkflowState { workflow, cell, directory: args.directory, stop: args.stop, subscription: None })
    }

    async fn post_start(&self, myself: ActorRef<Self::Msg>, state: &mut Self::State) -> Result<(), ActorProcessingErr> {
        let topic = Topic::task_completion(state.id());
        let actor = myself.clone();
        let sink: TopicSink = Arc::new(move |completion| actor.cast(WorkflowMessage::TaskCompleted(completion)).is_ok());

        match state.directory.context.topics.subscribe(&topic, &state.owner().to_string(), sink).await {
            Ok(handle) => state.subscription = Some(handle),
            Err(e) => {
                event!(Level::WARN, event = workflow_actor::SUBSCRIPTION_FAILED, workflow_id = %state.id(),
                       error = %e);
            }
        }

        // Pick up where the previous activation left off
        let next = match state.workflow.status {
            WorkflowStatus::WaitingForTask => Some(WorkflowMessage::Recheck),
            WorkflowStatus::Running => Some(WorkflowMessage::Step),
            _ => None
        };
        if let Some(next) = next {
            myself.cast(next).map_err(|e| OrchestratorError::Actor(e.to_string()))?;
        }
        Ok(())
    }

    async fn post_stop(&self, _myself: ActorRef<Self::Msg>, state: &mut Self::State) -> Result<(), ActorProcessingErr> {
        if let Some(handle) = state.subscription.take()
            && let Err(e) = state.directory.context.topics.unsubscribe(&handle).await
        {
            event!(Level::WARN, event = workflow_actor::SUBSCRIPTION_FAILED, workflow_id = %state.id(), error = %e);
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkflowMessage::Create { name, workflow_type, task_ids, parent_workflow_id, reply } => {
                respond(reply, self.create(state, name, workflow_type, task_ids, parent_workflow_id).await)
            }
            WorkflowMessage::AddTask { task_id, reply } => respond(reply, self.add_task(state, task_id).await),
            WorkflowMessage::Start { reply } => respond(reply, self.start(&myself, state).await),
            WorkflowMessage::Pause { reply } => respond(reply, self.pause(state).await),
            WorkflowMessage::Resume { reply } => respond(reply, self.resume(&myself, state).await),
            WorkflowMessage::Stop { reply } => respond(reply, self.stop(state).await),
            WorkflowMessage::GetState { reply } => respond(reply, state.workflow.clone()),
            WorkflowMessage::GetTasks { reply } => respond(reply, self.tasks(state).await),
            WorkflowMessage::Schedule { interval_ms, is_looped, loop_count, reply } => {
                let schedule = WorkflowSchedule { interval_ms, is_looped, loop_count, runs: 0 };
                respond(reply, self.schedule(state, schedule).await)
            }
            WorkflowMessage::SetSchedule { interval_ms, reply } => {
                respond(reply, self.set_schedule(state, interval_ms).await)
            }
            WorkflowMessage::Unschedule { reply } => respond(reply, self.unschedule(state, "unscheduled").await),
            WorkflowMessage::Step => {
                if let Err(e) = self.step(state).await {
                    event!(Level::ERROR, event = workflow_actor::WORKFLOW_FAILED, workflow_id = %state.id(),
                           error = %e);
                }
            }
            WorkflowMessage::Recheck => self.recheck(&myself, state).await,
            WorkflowMessage::TaskCompleted(completion) => self.on_completion(&myself, state, completion).await,
            WorkflowMessage::OnTimer { name } => {
                if name == timer::SCHEDULE {
                    self.on_schedule_tick(&myself, state).await;
                } else {
                    event!(Level::WARN, event = workflow_actor::SCHEDULE_TICK, workflow_id = %state.id(),
                           timer = %name, message = "unknown timer");
                }
            }
        }
        Ok(())
    }
}

impl WorkflowActor {
    async fn create(
        &self,
        state: &mut WorkflowState,
        name: String,
        workflow_type: WorkflowType,
        task_ids: Vec<String>,
        parent_workflow_id: Option<String>
    ) -> Result<Workflow, OrchestratorError> {
        let snapshot = state.workflow.clone();
        state.workflow.create(&name, workflow_type, task_ids.clone(), parent_workflow_id)?;
        state.commit(snapshot).await?;

        event!(Level::INFO, event = workflow_actor::WORKFLOW_CREATED, workflow_id = %state.id(), name = %name,
               workflow_type = %workflow_type, tasks = task_ids.len());

        self.claim(state, &task_ids).await;
        Ok(state.workflow.clone())
    }

    async fn add_task(&self, state: &mut WorkflowState, task_id: String) -> Result<(), OrchestratorError> {
        let snapshot = state.workflow.clone();
        state.workflow.add_task(&task_id)?;
        state.commit(snapshot).await?;

        self.claim(state, std::slice::from_ref(&task_id)).await;
        Ok(())
    }

    /// Record this workflow as the owner of `task_ids`
    async fn claim(&self, state: &mut WorkflowState, task_ids: &[String]) {
        let mut failed = false;
        for task_id in task_ids {
            if let Err(e) = state.directory.set_task_workflow(task_id, Some(state.id().to_string())).await {
                state.control_failed(task_id, format!("claim failed: {}", e));
                failed = true;
            }
        }
        if failed && let Err(e) = state.persist().await {
            event!(Level::ERROR, event = workflow_actor::CONTROL_FAILED, workflow_id = %state.id(), error = %e);
        }
    }

    async fn start(&self, myself: &ActorRef<WorkflowMessage>, state: &mut WorkflowState) -> Result<(), OrchestratorError> {
        // The tasks were paused with the workflow and have to be resumed along with it
        if state.workflow.status == WorkflowStatus::Paused {
            return self.resume(myself, state).await;
        }

        let snapshot = state.workflow.clone();
        state.workflow.begin_start()?;
        state.commit(snapshot).await?;
        state.stop.reset();

        event!(Level::INFO, event = workflow_actor::WORKFLOW_STARTED, workflow_id = %state.id(),
               workflow_type = %state.workflow.workflow_type);

        // The step runs as the actor's next turn so Start replies as soon as the workflow is Running
        myself.cast(WorkflowMessage::Step).map_err(|e| OrchestratorError::Actor(e.to_string()))
    }

    async fn step(&self, state: &mut WorkflowState) -> Result<(), OrchestratorError> {
        if state.workflow.status != WorkflowStatus::Running {
            return Ok(());
        }

        let token = state.stop.token();
        match state.workflow.workflow_type {
            WorkflowType::Parallel => self.step_parallel(state, &token).await,
            WorkflowType::Serial | WorkflowType::Nested => self.step_serial(state, &token).await
        }
    }

    async fn interrupt(&self, state: &mut WorkflowState) -> Result<(), OrchestratorError> {
        let current = state.workflow.current_task().map(str::to_string);
        state.workflow.record(HistoryKind::Interrupted, current.as_deref(), None, "stop requested");
        event!(Level::INFO, event = workflow_actor::WORKFLOW_INTERRUPTED, workflow_id = %state.id());
        state.persist().await
    }

    async fn fail(&self, state: &mut WorkflowState, reason: String) -> Result<(), OrchestratorError> {
        event!(Level::WARN, event = workflow_actor::WORKFLOW_FAILED, workflow_id = %state.id(), reason = %reason);
        state.workflow.fail(reason);
        state.persist().await
    }

    /// Execute `task_id`, yielding `None` if the stop signal fires first
    async fn dispatch(
        &self,
        state: &mut WorkflowState,
        token: &CancellationToken,
        task: &Task
    ) -> Result<Option<Result<TaskStatus, OrchestratorError>>, OrchestratorError> {
        state.workflow.record(HistoryKind::TaskDispatched, Some(&task.task_id), Some(task.status), "executing");
        state.persist().await?;
        event!(Level::DEBUG, event = workflow_actor::TASK_DISPATCHED, workflow_id = %state.id(),
               task_id = %task.task_id);

        let directory = state.directory.clone();
        let outcome = tokio::select! {
            _ = token.cancelled() => None,
            outcome = directory.execute_task(&task.task_id) => Some(outcome)
        };
        Ok(outcome)
    }

    async fn step_serial(&self, state: &mut WorkflowState, token: &CancellationToken) -> Result<(), OrchestratorError> {
        loop {
            if token.is_cancelled() {
                return self.interrupt(state).await;
            }

            let Some(task_id) = state.workflow.current_task().map(str::to_string) else {
                state.workflow.complete();
                state.persist().await?;
                event!(Level::INFO, event = workflow_actor::WORKFLOW_COMPLETED, workflow_id = %state.id());
                return Ok(());
            };

            let task = match state.directory.task_state(&task_id).await {
                Ok(task) => task,
                Err(e) => return self.fail(state, format!("could not read task {}: {}", task_id, e)).await
            };
            if !task.is_owned_by(state.id()) {
                state.skip(&task_id, "owned by another workflow");
                state.workflow.advance();
                state.persist().await?;
                continue;
            }

            let Some(outcome) = self.dispatch(state, token, &task).await? else {
                return self.interrupt(state).await;
            };

            match outcome {
                Ok(status) if status.is_waiting() => {
                    state.workflow.record(HistoryKind::TaskOutcome, Some(&task_id), Some(status), "waiting");
                    state.workflow.suspend_on(vec![task_id.clone()]);
                    state.persist().await?;
                    event!(Level::INFO, event = workflow_actor::WORKFLOW_SUSPENDED, workflow_id = %state.id(),
                           task_id = %task_id, task_status = %status);
                    return Ok(());
                }
                Ok(TaskStatus::Completed) => {
                    state.workflow.record(HistoryKind::TaskOutcome, Some(&task_id), Some(TaskStatus::Completed),
                                          "completed");
                    state.workflow.advance();
                    state.persist().await?;
                }
                Ok(status) => {
                    state.workflow.record(HistoryKind::TaskOutcome, Some(&task_id), Some(status), "unexpected status");
                    return self.fail(state, format!("task {} ended {}", task_id, status)).await;
                }
                Err(OrchestratorError::Unexecutable(reason)) => {
                    state.skip(&task_id, &reason);
                    state.workflow.advance();
                    state.persist().await?;
                }
                Err(e) => {
                    state.workflow.record(HistoryKind::TaskOutcome, Some(&task_id), Some(TaskStatus::Failed),
                                          e.to_string());
                    return self.fail(state, format!("task {} failed: {}", task_id, e)).await;
                }
            }
        }
    }

    async fn step_parallel(&self, state: &mut WorkflowState, token: &CancellationToken) -> Result<(), OrchestratorError> {
        let mut waiting = Vec::new();

        for task_id in state.workflow.task_ids.clone() {
            if token.is_cancelled() {
                return self.interrupt(state).await;
            }

            let task = match state.directory.task_state(&task_id).await {
                Ok(task) => task,
                Err(e) => {
                    state.control_failed(&task_id, format!("could not read task: {}", e));
                    continue;
                }
            };
            if !task.is_owned_by(state.id()) {
                state.skip(&task_id, "owned by another workflow");
                continue;
            }

            let Some(outcome) = self.dispatch(state, token, &task).await? else {
                return self.interrupt(state).await;
            };

            match outcome {
                Ok(status) => {
                    state.workflow.record(HistoryKind::TaskOutcome, Some(&task_id), Some(status), status.to_string());
                    if status.is_waiting() {
                        waiting.push(task_id);
                    }
                }
                Err(e) => {
                    // The task may still be suspended from an earlier dispatch
                    let current = state.directory.task_state(&task_id).await.ok().map(|task| task.status);
                    state.workflow.record(HistoryKind::TaskOutcome, Some(&task_id), current, e.to_string());
                    if current.is_some_and(TaskStatus::is_waiting) {
                        waiting.push(task_id);
                    }
                }
            }
            state.persist().await?;
        }

        if !waiting.is_empty() {
            event!(Level::INFO, event = workflow_actor::WORKFLOW_SUSPENDED, workflow_id = %state.id(),
                   waiting = waiting.len());
            state.workflow.suspend_on(waiting);
            return state.persist().await;
        }
        self.finish_parallel(state).await
    }

    /// Record every owned task's final status and complete
    async fn finish_parallel(&self, state: &mut WorkflowState) -> Result<(), OrchestratorError> {
        for task_id in state.workflow.task_ids.clone() {
            match state.directory.task_state(&task_id).await {
                Ok(task) if task.is_owned_by(state.id()) => {
                    state.workflow.record(HistoryKind::TaskOutcome, Some(&task_id), Some(task.status), "final status");
                }
                Ok(_) => {}
                Err(e) => state.control_failed(&task_id, format!("could not read task: {}", e))
            }
        }

        state.workflow.complete();
        state.persist().await?;
        event!(Level::INFO, event = workflow_actor::WORKFLOW_COMPLETED, workflow_id = %state.id());
        Ok(())
    }

    async fn on_completion(
        &self,
        myself: &ActorRef<WorkflowMessage>,
        state: &mut WorkflowState,
        completion: TaskCompletionEvent
    ) {
        event!(Level::DEBUG, event = workflow_actor::COMPLETION_RECEIVED, workflow_id = %state.id(),
               task_id = %completion.task_id, task_status = %completion.status);

        let relevant = state.workflow.status == WorkflowStatus::WaitingForTask
            && completion.workflow_id == state.workflow.workflow_id
            && state.workflow.awaiting.contains(&completion.task_id);
        if !relevant {
            // Duplicates and stale events land here; the durable task state is what counts
            event!(Level::DEBUG, event = workflow_actor::COMPLETION_IGNORED, workflow_id = %state.id(),
                   task_id = %completion.task_id, status = %state.workflow.status);
            return;
        }

        self.recheck(myself, state).await;
    }

    /// Re-read the awaited task(s) and continue if they are done
    async fn recheck(&self, myself: &ActorRef<WorkflowMessage>, state: &mut WorkflowState) {
        if state.workflow.status != WorkflowStatus::WaitingForTask {
            return;
        }

        let result = match state.workflow.workflow_type {
            WorkflowType::Parallel => self.recheck_parallel(state).await,
            WorkflowType::Serial | WorkflowType::Nested => self.recheck_serial(myself, state).await
        };
        if let Err(e) = result {
            event!(Level::ERROR, event = workflow_actor::COMPLETION_RECEIVED, workflow_id = %state.id(), error = %e);
        }
    }

    async fn recheck_serial(
        &self,
        myself: &ActorRef<WorkflowMessage>,
        state: &mut WorkflowState
    ) -> Result<(), OrchestratorError> {
        let Some(task_id) = state.workflow.current_task().map(str::to_string) else {
            state.workflow.wake();
            state.persist().await?;
            return myself.cast(WorkflowMessage::Step).map_err(|e| OrchestratorError::Actor(e.to_string()));
        };

        let task = state.directory.task_state(&task_id).await?;
        if !task.is_owned_by(state.id()) {
            state.skip(&task_id, "owned by another workflow");
        } else {
            match task.status {
                TaskStatus::Completed => {
                    let detail = task.result.clone().unwrap_or_else(|| "completed".to_string());
                    state.workflow.record(HistoryKind::TaskOutcome, Some(&task_id), Some(task.status), detail);
                }
                TaskStatus::Failed => {
                    let detail = task.error_message.clone().unwrap_or_else(|| "failed".to_string());
                    state.workflow.record(HistoryKind::TaskOutcome, Some(&task_id), Some(task.status), detail.clone());
                    return self.fail(state, format!("task {} failed: {}", task_id, detail)).await;
                }
                status => {
                    event!(Level::DEBUG, event = workflow_actor::COMPLETION_IGNORED, workflow_id = %state.id(),
                           task_id = %task_id, task_status = %status);
                    return Ok(());
                }
            }
        }

        state.workflow.advance();
        state.workflow.wake();
        state.persist().await?;
        myself.cast(WorkflowMessage::Step).map_err(|e| OrchestratorError::Actor(e.to_string()))
    }

    async fn recheck_parallel(&self, state: &mut WorkflowState) -> Result<(), OrchestratorError> {
        let mut pending = Vec::new();
        for task_id in state.workflow.task_ids.clone() {
            match state.directory.task_state(&task_id).await {
                Ok(task) if task.is_owned_by(state.id()) && unfinished(task.status) => pending.push(task_id),
                Ok(_) => {}
                Err(e) => {
                    event!(Level::WARN, event = workflow_actor::COMPLETION_RECEIVED, workflow_id = %state.id(),
                           task_id = %task_id, error = %e);
                    pending.push(task_id);
                }
            }
        }

        if pending.is_empty() {
            return self.finish_parallel(state).await;
        }
        if pending != state.workflow.awaiting {
            state.workflow.awaiting = pending;
            state.persist().await?;
        }
        Ok(())
    }

    /// Apply `control` to every owned task; failures are audited and never abort the fan-out
    async fn fan_out(&self, state: &mut WorkflowState, control: Control) {
        for task_id in state.workflow.task_ids.clone() {
            // Ownership comes from durable state so a busy task actor cannot stall the check
            let owned = match state.directory.stored_task(&task_id).await {
                Ok(task) => task.is_some_and(|task| task.is_owned_by(state.id())),
                Err(e) => {
                    state.control_failed(&task_id, format!("{} skipped, could not read task: {}", control, e));
                    continue;
                }
            };
            if !owned {
                state.skip(&task_id, "owned by another workflow");
                continue;
            }

            let result = match control {
                Control::Pause => state.directory.pause_task(&task_id).await,
                Control::Resume => state.directory.resume_task(&task_id).await,
                Control::Stop => state.directory.stop_task(&task_id).await
            };
            if let Err(e) = result {
                state.control_failed(&task_id, format!("{} failed: {}", control, e));
            }
        }
    }

    async fn pause(&self, state: &mut WorkflowState) -> Result<(), OrchestratorError> {
        state.workflow.pause()?;
        self.fan_out(state, Control::Pause).await;
        state.persist().await?;

        event!(Level::INFO, event = workflow_actor::WORKFLOW_PAUSED, workflow_id = %state.id());
        Ok(())
    }

    async fn resume(&self, myself: &ActorRef<WorkflowMessage>, state: &mut WorkflowState) -> Result<(), OrchestratorError> {
        let restored = state.workflow.resume()?;
        self.fan_out(state, Control::Resume).await;
        state.persist().await?;

        event!(Level::INFO, event = workflow_actor::WORKFLOW_RESUMED, workflow_id = %state.id(), status = %restored);
        let next = match restored {
            WorkflowStatus::WaitingForTask => Some(WorkflowMessage::Recheck),
            WorkflowStatus::Running => Some(WorkflowMessage::Step),
            _ => None
        };
        if let Some(next) = next {
            myself.cast(next).map_err(|e| OrchestratorError::Actor(e.to_string()))?;
        }
        Ok(())
    }

    async fn stop(&self, state: &mut WorkflowState) -> Result<(), OrchestratorError> {
        state.workflow.stop()?;
        self.fan_out(state, Control::Stop).await;
        state.persist().await?;

        event!(Level::INFO, event = workflow_actor::WORKFLOW_STOPPED, workflow_id = %state.id());
        Ok(())
    }

    async fn tasks(&self, state: &WorkflowState) -> Result<Vec<Task>, OrchestratorError> {
        let mut tasks = Vec::with_capacity(state.workflow.task_ids.len());
        for task_id in &state.workflow.task_ids {
            tasks.push(state.directory.task_state(task_id).await?);
        }
        Ok(tasks)
    }

    async fn schedule(&self, state: &mut WorkflowState, schedule: WorkflowSchedule) -> Result<(), OrchestratorError> {
        if schedule.interval_ms == 0 {
            return Err(OrchestratorError::Configuration("schedule interval must be positive".to_string()));
        }

        let interval = schedule.interval();
        let period = schedule.is_looped.then_some(interval);
        state.directory.timers.arm(&state.owner(), timer::SCHEDULE, interval, period).await?;

        let detail = format!(
            "every {}ms, looped: {}, loop count: {}",
            schedule.interval_ms, schedule.is_looped, schedule.loop_count
        );
        let snapshot = state.workflow.clone();
        state.workflow.schedule = Some(schedule);
        state.workflow.record(HistoryKind::Scheduled, None, None, detail);
        state.commit(snapshot).await?;

        event!(Level::INFO, event = workflow_actor::SCHEDULE_ARMED, workflow_id = %state.id(),
               interval_ms = interval.as_millis() as u64);
        Ok(())
    }

    /// Change the interval of the current schedule, or start an unbounded looped one
    async fn set_schedule(&self, state: &mut WorkflowState, interval_ms: u64) -> Result<(), OrchestratorError> {
        let schedule = match state.workflow.schedule.clone() {
            Some(current) => WorkflowSchedule { interval_ms, ..current },
            None => WorkflowSchedule { interval_ms, is_looped: true, loop_count: 0, runs: 0 }
        };
        self.schedule(state, schedule).await
    }

    async fn unschedule(&self, state: &mut WorkflowState, reason: &str) -> Result<(), OrchestratorError> {
        state.directory.timers.cancel(&state.schedule_timer()).await?;
        if state.workflow.schedule.take().is_some() {
            state.workflow.record(HistoryKind::Unscheduled, None, None, reason);
            state.persist().await?;
        }

        event!(Level::INFO, event = workflow_actor::SCHEDULE_CANCELLED, workflow_id = %state.id(), reason = %reason);
        Ok(())
    }

    async fn on_schedule_tick(&self, myself: &ActorRef<WorkflowMessage>, state: &mut WorkflowState) {
        let Some(mut schedule) = state.workflow.schedule.clone() else {
            if let Err(e) = state.directory.timers.cancel(&state.schedule_timer()).await {
                event!(Level::WARN, event = workflow_actor::SCHEDULE_CANCELLED, workflow_id = %state.id(), error = %e);
            }
            return;
        };

        let status = state.workflow.status;
        event!(Level::DEBUG, event = workflow_actor::SCHEDULE_TICK, workflow_id = %state.id(), status = %status);

        let mut started = false;
        if matches!(status, WorkflowStatus::Created | WorkflowStatus::Completed | WorkflowStatus::Stopped) {
            schedule.runs += 1;
            state.workflow.reset_for_rerun();
            state.workflow.record(HistoryKind::ScheduledRun, None, None, format!("scheduled run {}", schedule.runs));
            started = state.workflow.begin_start().is_ok();
            state.stop.reset();
        }

        // A one-shot schedule retires after its tick whether or not it started a run
        let retire = !schedule.is_looped || schedule.is_exhausted();
        state.workflow.schedule = Some(schedule);
        if retire {
            if let Err(e) = self.unschedule(state, "schedule exhausted").await {
                event!(Level::ERROR, event = workflow_actor::SCHEDULE_CANCELLED, workflow_id = %state.id(),
                       error = %e);
            }
        } else if let Err(e) = state.persist().await {
            event!(Level::ERROR, event = workflow_actor::SCHEDULE_TICK, workflow_id = %state.id(), error = %e);
            return;
        }

        if started && let Err(e) = myself.cast(WorkflowMessage::Step) {
            event!(Level::ERROR, event = workflow_actor::SCHEDULE_TICK, workflow_id = %state.id(), error = %e);
        }
    }
}
