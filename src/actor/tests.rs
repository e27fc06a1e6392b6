use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::{
    actor::Runtime,
    adapter::{bus::InMemoryTopicBus, state::InMemoryStateStore},
    config::Settings,
    domain::{
        completion::Topic,
        error::OrchestratorError,
        task::{ExternalInput, HttpCallConfig, PublishConfig, Task, TaskConfig, TaskStatus},
        workflow::{HistoryKind, Workflow, WorkflowStatus, WorkflowType}
    },
    testing::{FlakyMessageBus, FlakyStateStore, ScriptedHttpClient, eventually, fast_settings, test_context}
};

fn plain() -> TaskConfig {
    TaskConfig::default()
}

fn controller() -> TaskConfig {
    TaskConfig { wait_for_controller: true, ..TaskConfig::default() }
}

fn subscriber(topic: &str) -> TaskConfig {
    TaskConfig { subscribe_topic: Some(topic.to_string()), ..TaskConfig::default() }
}

fn publisher(topic: &str) -> TaskConfig {
    TaskConfig {
        publish: Some(PublishConfig { topic: topic.to_string(), payload: "{}".to_string() }),
        ..TaskConfig::default()
    }
}

async fn start(settings: Settings) -> Runtime {
    Runtime::start(test_context(settings)).await.unwrap()
}

/// Create and configure `tasks`, then a workflow owning them
async fn setup(runtime: &Runtime, workflow_id: &str, workflow_type: WorkflowType, tasks: Vec<(&str, TaskConfig)>) {
    let mut task_ids = Vec::new();
    for (task_id, config) in tasks {
        runtime.create_task(task_id, &format!("task {}", task_id), HashMap::new()).await.unwrap();
        runtime.configure_task(task_id, config).await.unwrap();
        task_ids.push(task_id.to_string());
    }
    runtime.create_workflow(workflow_id, "test workflow", workflow_type, task_ids, None).await.unwrap();
}

async fn wait_for_workflow(runtime: &Runtime, workflow_id: &str, status: WorkflowStatus) -> Workflow {
    eventually(&format!("workflow {} to be {}", workflow_id, status), || async move {
        runtime.workflow_state(workflow_id).await.ok().filter(|workflow| workflow.status == status)
    })
    .await
}

async fn wait_for_task(runtime: &Runtime, task_id: &str, status: TaskStatus) -> Task {
    eventually(&format!("task {} to be {}", task_id, status), || async move {
        runtime.task_state(task_id).await.ok().filter(|task| task.status == status)
    })
    .await
}

fn history_count(workflow: &Workflow, kind: HistoryKind) -> usize {
    workflow.history().iter().filter(|entry| entry.kind == kind).count()
}

#[tokio::test]
async fn test_failed_task_runs_max_retries_plus_one_attempts() {
    let bus = Arc::new(FlakyMessageBus::always_failing());
    let runtime = Runtime::start(test_context(fast_settings()).with_messages(bus.clone())).await.unwrap();

    let config = TaskConfig { max_retries: Some(2), max_publish_retries: Some(1), ..publisher("alerts/out") };
    setup(&runtime, "wf", WorkflowType::Serial, vec![("t", config)]).await;

    let err = runtime.execute_task("t").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::TaskFailed { attempts: 3, .. }), "unexpected error: {}", err);

    let task = runtime.task_state("t").await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert!(task.error_message.unwrap().contains("publish"));
    assert_eq!(bus.attempts(), 3);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_unlimited_publish_retry_succeeds_on_third_attempt() {
    let bus = Arc::new(FlakyMessageBus::failing_first(2));
    let runtime = Runtime::start(test_context(fast_settings()).with_messages(bus.clone())).await.unwrap();
    setup(&runtime, "wf", WorkflowType::Serial, vec![("t", publisher("alerts/out"))]).await;

    assert_eq!(runtime.execute_task("t").await.unwrap(), TaskStatus::Completed);

    let task = runtime.task_state("t").await.unwrap();
    assert_eq!(task.publish_retry_count, 2);
    assert_eq!(task.retry_count, 0);
    assert_eq!(bus.attempts(), 3);
}

#[tokio::test]
async fn test_http_stage_retries_non_success_status() {
    let http = Arc::new(ScriptedHttpClient::with_statuses([503]));
    let runtime = Runtime::start(test_context(fast_settings()).with_http(http.clone())).await.unwrap();

    let config = TaskConfig {
        http: Some(HttpCallConfig {
            url:     "http://controller.local/api/open".to_string(),
            method:  "post".to_string(),
            headers: HashMap::new(),
            body:    Some("{\"door\":1}".to_string())
        }),
        max_http_retries: Some(3),
        ..TaskConfig::default()
    };
    setup(&runtime, "wf", WorkflowType::Serial, vec![("t", config)]).await;

    assert_eq!(runtime.execute_task("t").await.unwrap(), TaskStatus::Completed);

    let task = runtime.task_state("t").await.unwrap();
    assert_eq!(task.http_retry_count, 1);
    let requests = http.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "POST");
}

#[tokio::test]
async fn test_execute_requires_owner_and_create_requires_name() {
    let runtime = start(fast_settings()).await;

    let err = runtime.create_task("t", " ", HashMap::new()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Configuration(_)));

    runtime.create_task("t", "loose", HashMap::new()).await.unwrap();
    let err = runtime.execute_task("t").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Unexecutable(_)));
    assert_eq!(runtime.task_state("t").await.unwrap().status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_stop_cancels_unbounded_retry_loop() {
    let bus = Arc::new(FlakyMessageBus::always_failing());
    let runtime = Arc::new(Runtime::start(test_context(fast_settings()).with_messages(bus.clone())).await.unwrap());
    setup(&runtime, "wf", WorkflowType::Serial, vec![("t", publisher("alerts/out"))]).await;

    let executing = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.execute_task("t").await })
    };
    let attempts = &bus;
    eventually("a few publish attempts", || async move { (attempts.attempts() >= 2).then_some(()) }).await;

    runtime.stop_task("t").await.unwrap();
    let outcome = executing.await.unwrap();
    assert!(matches!(outcome, Err(OrchestratorError::Cancelled(_))));

    let task = runtime.task_state("t").await.unwrap();
    assert!(task.is_stopped);
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(matches!(runtime.execute_task("t").await, Err(OrchestratorError::Unexecutable(_))));
}

#[tokio::test]
async fn test_pause_resume_while_waiting_for_controller() {
    let runtime = start(fast_settings()).await;
    setup(&runtime, "wf", WorkflowType::Serial, vec![("t", controller())]).await;

    assert_eq!(runtime.execute_task("t").await.unwrap(), TaskStatus::WaitingForController);

    runtime.pause_task("t").await.unwrap();
    let task = runtime.task_state("t").await.unwrap();
    assert_eq!(task.status, TaskStatus::Paused);
    assert_eq!(task.waiting_state, Some(TaskStatus::WaitingForController));
    assert!(!runtime.call_controller("t", "too early").await.unwrap());

    runtime.resume_task("t").await.unwrap();
    assert_eq!(runtime.task_state("t").await.unwrap().status, TaskStatus::WaitingForController);
    assert!(matches!(runtime.resume_task("t").await, Err(OrchestratorError::IllegalTransition { .. })));

    assert!(runtime.call_controller("t", "approved").await.unwrap());
    let task = wait_for_task(&runtime, "t", TaskStatus::Completed).await;
    assert!(task.result.unwrap().contains("approved"));
}

#[tokio::test]
async fn test_pause_resume_while_waiting_for_message() {
    let runtime = start(fast_settings()).await;
    setup(&runtime, "wf", WorkflowType::Serial, vec![("t", subscriber("sensors/+/door"))]).await;

    assert_eq!(runtime.execute_task("t").await.unwrap(), TaskStatus::WaitingForMqtt);

    runtime.pause_task("t").await.unwrap();
    assert_eq!(runtime.task_state("t").await.unwrap().waiting_state, Some(TaskStatus::WaitingForMqtt));
    runtime.resume_task("t").await.unwrap();
    assert_eq!(runtime.task_state("t").await.unwrap().status, TaskStatus::WaitingForMqtt);

    runtime.context().messages.publish("sensors/hall/door", "open").await.unwrap();
    let task = wait_for_task(&runtime, "t", TaskStatus::Completed).await;
    assert_eq!(
        task.external_input,
        Some(ExternalInput::Message { topic: "sensors/hall/door".to_string(), payload: "open".to_string() })
    );
}

#[tokio::test]
async fn test_pause_resume_while_running_defers_continuation() {
    let mut settings = fast_settings();
    settings.timing.continuation_delay_ms = 150;
    let runtime = start(settings).await;
    setup(&runtime, "wf", WorkflowType::Serial, vec![("t", controller())]).await;

    runtime.execute_task("t").await.unwrap();
    assert!(runtime.call_controller("t", "go").await.unwrap());

    runtime.pause_task("t").await.unwrap();
    let task = runtime.task_state("t").await.unwrap();
    assert_eq!(task.waiting_state, Some(TaskStatus::Running));
    assert!(task.pending_continuation);

    // The continue timer fires while paused and must not complete the task
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(runtime.task_state("t").await.unwrap().status, TaskStatus::Paused);

    runtime.resume_task("t").await.unwrap();
    assert_eq!(runtime.task_state("t").await.unwrap().status, TaskStatus::Running);
    wait_for_task(&runtime, "t", TaskStatus::Completed).await;
}

#[tokio::test]
async fn test_external_message_ignored_unless_waiting() {
    let mut settings = fast_settings();
    settings.timing.continuation_delay_ms = 200;
    let runtime = start(settings).await;
    setup(&runtime, "wf", WorkflowType::Serial, vec![("t", subscriber("sensors/door"))]).await;

    assert!(!runtime.send_message("t", "sensors/door", "before").await.unwrap());
    runtime.execute_task("t").await.unwrap();

    assert!(!runtime.send_message("t", "sensors/window", "wrong topic").await.unwrap());
    assert!(runtime.send_message("t", "sensors/door", "first").await.unwrap());
    assert!(!runtime.send_message("t", "sensors/door", "second").await.unwrap());

    let task = runtime.task_state("t").await.unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(
        task.external_input,
        Some(ExternalInput::Message { topic: "sensors/door".to_string(), payload: "first".to_string() })
    );

    let task = wait_for_task(&runtime, "t", TaskStatus::Completed).await;
    assert!(task.result.unwrap().contains("first"));
}

#[tokio::test]
async fn test_serial_workflow_suspends_and_advances() {
    let runtime = start(fast_settings()).await;
    setup(&runtime, "wf", WorkflowType::Serial, vec![("a", plain()), ("b", controller()), ("c", plain())]).await;

    runtime.start_workflow("wf").await.unwrap();
    let workflow = wait_for_workflow(&runtime, "wf", WorkflowStatus::WaitingForTask).await;
    assert_eq!(workflow.current_task_index, 1);
    assert_eq!(workflow.awaiting, vec!["b".to_string()]);

    let tasks = runtime.workflow_tasks("wf").await.unwrap();
    let statuses: Vec<TaskStatus> = tasks.iter().map(|task| task.status).collect();
    assert_eq!(statuses, vec![TaskStatus::Completed, TaskStatus::WaitingForController, TaskStatus::Pending]);

    assert!(runtime.call_controller("b", "approved").await.unwrap());
    let workflow = wait_for_workflow(&runtime, "wf", WorkflowStatus::Completed).await;
    assert_eq!(workflow.current_task_index, 3);
    assert!(workflow.completed_at.is_some());
    assert_eq!(history_count(&workflow, HistoryKind::Suspended), 1);

    let tasks = runtime.workflow_tasks("wf").await.unwrap();
    assert!(tasks.iter().all(|task| task.status == TaskStatus::Completed));
}

#[tokio::test]
async fn test_serial_workflow_skips_foreign_task() {
    let runtime = start(fast_settings()).await;
    setup(&runtime, "wf1", WorkflowType::Serial, vec![("x", plain()), ("y", plain())]).await;
    runtime.create_workflow("wf2", "other", WorkflowType::Serial, vec!["y".to_string()], None).await.unwrap();

    runtime.start_workflow("wf1").await.unwrap();
    let workflow = wait_for_workflow(&runtime, "wf1", WorkflowStatus::Completed).await;

    let skipped: Vec<_> = workflow.history().iter().filter(|entry| entry.kind == HistoryKind::TaskSkipped).collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].task_id.as_deref(), Some("y"));
    assert_eq!(runtime.task_state("y").await.unwrap().status, TaskStatus::Pending);
    assert_eq!(runtime.task_state("x").await.unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_parallel_workflow_aggregates_suspended_and_completed() {
    let runtime = start(fast_settings()).await;
    setup(&runtime, "wf", WorkflowType::Parallel, vec![("a", subscriber("sensors/a")), ("b", plain())]).await;

    runtime.start_workflow("wf").await.unwrap();
    let workflow = wait_for_workflow(&runtime, "wf", WorkflowStatus::WaitingForTask).await;
    assert_eq!(workflow.awaiting, vec!["a".to_string()]);
    assert_eq!(runtime.task_state("b").await.unwrap().status, TaskStatus::Completed);

    runtime.context().messages.publish("sensors/a", "triggered").await.unwrap();
    let workflow = wait_for_workflow(&runtime, "wf", WorkflowStatus::Completed).await;

    let final_statuses: Vec<_> = workflow
        .history()
        .iter()
        .filter(|entry| entry.kind == HistoryKind::TaskOutcome && entry.detail == "final status")
        .map(|entry| (entry.task_id.clone().unwrap_or_default(), entry.task_status))
        .collect();
    assert_eq!(
        final_statuses,
        vec![("a".to_string(), Some(TaskStatus::Completed)), ("b".to_string(), Some(TaskStatus::Completed))]
    );
}

#[tokio::test]
async fn test_parallel_failure_does_not_fail_workflow() {
    let bus = Arc::new(FlakyMessageBus::always_failing());
    let runtime = Runtime::start(test_context(fast_settings()).with_messages(bus)).await.unwrap();

    let failing = TaskConfig { max_retries: Some(0), max_publish_retries: Some(1), ..publisher("alerts/out") };
    setup(&runtime, "wf", WorkflowType::Parallel, vec![("bad", failing), ("good", plain())]).await;

    runtime.start_workflow("wf").await.unwrap();
    wait_for_workflow(&runtime, "wf", WorkflowStatus::Completed).await;
    assert_eq!(runtime.task_state("bad").await.unwrap().status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_stop_fan_out_survives_failing_task() {
    let store = Arc::new(FlakyStateStore::default());
    let runtime = Runtime::start(test_context(fast_settings()).with_store(store.clone())).await.unwrap();
    setup(&runtime, "wf", WorkflowType::Parallel, vec![("a", controller()), ("b", controller()), ("c", controller())])
        .await;

    runtime.start_workflow("wf").await.unwrap();
    let workflow = wait_for_workflow(&runtime, "wf", WorkflowStatus::WaitingForTask).await;
    assert_eq!(workflow.awaiting.len(), 3);

    store.fail_saves_for("task/b").await;
    runtime.stop_workflow("wf").await.unwrap();

    let workflow = runtime.workflow_state("wf").await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Stopped);
    let failures: Vec<_> = workflow.history().iter().filter(|entry| entry.kind == HistoryKind::ControlFailed).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].task_id.as_deref(), Some("b"));

    for task_id in ["a", "c"] {
        let task = runtime.task_state(task_id).await.unwrap();
        assert!(task.is_stopped, "{} should be stopped", task_id);
        assert_eq!(task.status, TaskStatus::Failed);
    }
}

#[tokio::test]
async fn test_workflow_pause_and_resume_fan_out() {
    let runtime = start(fast_settings()).await;
    setup(&runtime, "wf", WorkflowType::Serial, vec![("a", controller())]).await;

    runtime.start_workflow("wf").await.unwrap();
    wait_for_workflow(&runtime, "wf", WorkflowStatus::WaitingForTask).await;

    runtime.pause_workflow("wf").await.unwrap();
    assert_eq!(runtime.workflow_state("wf").await.unwrap().status, WorkflowStatus::Paused);
    assert_eq!(runtime.task_state("a").await.unwrap().status, TaskStatus::Paused);
    assert!(matches!(runtime.pause_workflow("wf").await, Err(OrchestratorError::IllegalTransition { .. })));

    runtime.resume_workflow("wf").await.unwrap();
    assert_eq!(runtime.workflow_state("wf").await.unwrap().status, WorkflowStatus::WaitingForTask);
    assert_eq!(runtime.task_state("a").await.unwrap().status, TaskStatus::WaitingForController);

    assert!(runtime.call_controller("a", "ok").await.unwrap());
    wait_for_workflow(&runtime, "wf", WorkflowStatus::Completed).await;
}

#[tokio::test]
async fn test_completion_reactivates_deactivated_workflow() {
    let runtime = start(fast_settings()).await;
    setup(&runtime, "wf", WorkflowType::Serial, vec![("a", controller())]).await;

    runtime.start_workflow("wf").await.unwrap();
    wait_for_workflow(&runtime, "wf", WorkflowStatus::WaitingForTask).await;

    runtime.deactivate_workflow("wf").await;
    assert_eq!(runtime.health().await.active_workflows, 0);

    assert!(runtime.call_controller("a", "ok").await.unwrap());
    let rt = &runtime;
    eventually("workflow reactivation", || async move { (rt.health().await.active_workflows == 1).then_some(()) })
        .await;
    wait_for_workflow(&runtime, "wf", WorkflowStatus::Completed).await;
}

#[tokio::test]
async fn test_continuation_survives_restart() {
    let mut settings = fast_settings();
    settings.timing.continuation_delay_ms = 200;
    let store = Arc::new(InMemoryStateStore::new());

    let first = Runtime::start(test_context(settings.clone()).with_store(store.clone())).await.unwrap();
    setup(&first, "wf", WorkflowType::Serial, vec![("a", controller()), ("b", plain())]).await;
    first.start_workflow("wf").await.unwrap();
    wait_for_workflow(&first, "wf", WorkflowStatus::WaitingForTask).await;
    assert!(first.call_controller("a", "approved").await.unwrap());
    first.shutdown().await;

    let second = Runtime::start(test_context(settings).with_store(store)).await.unwrap();
    let workflow = wait_for_workflow(&second, "wf", WorkflowStatus::Completed).await;
    assert_eq!(workflow.current_task_index, 2);
    assert_eq!(second.task_state("a").await.unwrap().status, TaskStatus::Completed);
    assert_eq!(second.workflow_ids().await.unwrap(), vec!["wf".to_string()]);
}

#[tokio::test]
async fn test_looped_schedule_runs_loop_count_times() {
    let runtime = start(fast_settings()).await;
    setup(&runtime, "wf", WorkflowType::Serial, vec![("a", plain())]).await;

    runtime.schedule_workflow("wf", 60, true, 2).await.unwrap();
    let rt = &runtime;
    let workflow = eventually("two scheduled runs", || async move {
        rt.workflow_state("wf").await.ok().filter(|workflow| {
            workflow.status == WorkflowStatus::Completed
                && workflow.schedule.is_none()
                && history_count(workflow, HistoryKind::ScheduledRun) == 2
        })
    })
    .await;

    assert_eq!(history_count(&workflow, HistoryKind::Unscheduled), 1);
    assert_eq!(runtime.health().await.armed_timers, 0);
}

#[tokio::test]
async fn test_schedule_rejects_zero_interval_and_unschedule_cancels() {
    let runtime = start(fast_settings()).await;
    setup(&runtime, "wf", WorkflowType::Serial, vec![("a", plain())]).await;

    let err = runtime.schedule_workflow("wf", 0, true, 0).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Configuration(_)));

    runtime.set_schedule("wf", 60_000).await.unwrap();
    let schedule = runtime.workflow_state("wf").await.unwrap().schedule.unwrap();
    assert!(schedule.is_looped);
    assert_eq!(schedule.loop_count, 0);
    assert_eq!(runtime.health().await.armed_timers, 1);

    runtime.unschedule("wf").await.unwrap();
    assert!(runtime.workflow_state("wf").await.unwrap().schedule.is_none());
    assert_eq!(runtime.health().await.armed_timers, 0);
}

#[tokio::test]
async fn test_serial_workflow_fails_when_task_fails() {
    let bus = Arc::new(FlakyMessageBus::always_failing());
    let runtime = Runtime::start(test_context(fast_settings()).with_messages(bus)).await.unwrap();

    let failing = TaskConfig { max_retries: Some(1), max_publish_retries: Some(1), ..publisher("alerts/out") };
    setup(&runtime, "wf", WorkflowType::Serial, vec![("a", plain()), ("bad", failing), ("c", plain())]).await;

    runtime.start_workflow("wf").await.unwrap();
    let workflow = wait_for_workflow(&runtime, "wf", WorkflowStatus::Failed).await;
    assert_eq!(workflow.current_task_index, 1);
    assert!(workflow.completed_at.is_some());

    let outcome = workflow.history().iter().rev().find(|entry| entry.kind == HistoryKind::TaskOutcome).unwrap();
    assert_eq!(outcome.task_id.as_deref(), Some("bad"));
    assert_eq!(outcome.task_status, Some(TaskStatus::Failed));

    assert_eq!(runtime.task_state("bad").await.unwrap().retry_count, 1);
    assert_eq!(runtime.task_state("c").await.unwrap().status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_stop_interrupts_serial_workflow_mid_task() {
    let bus = Arc::new(FlakyMessageBus::always_failing());
    let runtime = Runtime::start(test_context(fast_settings()).with_messages(bus.clone())).await.unwrap();
    setup(&runtime, "wf", WorkflowType::Serial, vec![("a", publisher("alerts/out")), ("b", plain())]).await;

    runtime.start_workflow("wf").await.unwrap();
    let attempts = &bus;
    eventually("publish retries on the first task", || async move { (attempts.attempts() >= 2).then_some(()) })
        .await;

    runtime.stop_workflow("wf").await.unwrap();

    let workflow = runtime.workflow_state("wf").await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Stopped);
    assert_eq!(workflow.current_task_index, 0);
    assert_eq!(history_count(&workflow, HistoryKind::Interrupted), 1);

    for task_id in ["a", "b"] {
        let task = runtime.task_state(task_id).await.unwrap();
        assert!(task.is_stopped, "{} should be stopped", task_id);
        assert_eq!(task.status, TaskStatus::Failed);
    }
}

#[tokio::test]
async fn test_nested_workflow_runs_like_serial() {
    let runtime = start(fast_settings()).await;
    for (task_id, config) in [("a", plain()), ("b", controller())] {
        runtime.create_task(task_id, &format!("task {}", task_id), HashMap::new()).await.unwrap();
        runtime.configure_task(task_id, config).await.unwrap();
    }
    let task_ids = vec!["a".to_string(), "b".to_string()];
    runtime.create_workflow("child", "nested step", WorkflowType::Nested, task_ids, Some("parent".to_string()))
        .await
        .unwrap();

    runtime.start_workflow("child").await.unwrap();
    let workflow = wait_for_workflow(&runtime, "child", WorkflowStatus::WaitingForTask).await;
    assert_eq!(workflow.current_task_index, 1);
    assert_eq!(workflow.awaiting, vec!["b".to_string()]);
    assert_eq!(workflow.parent_workflow_id.as_deref(), Some("parent"));

    assert!(runtime.call_controller("b", "ok").await.unwrap());
    let workflow = wait_for_workflow(&runtime, "child", WorkflowStatus::Completed).await;
    assert_eq!(workflow.current_task_index, 2);
    assert_eq!(runtime.workflow_ids().await.unwrap(), vec!["child".to_string()]);
}

#[tokio::test]
async fn test_parallel_recheck_keeps_waiting_for_remaining_tasks() {
    let runtime = start(fast_settings()).await;
    setup(
        &runtime,
        "wf",
        WorkflowType::Parallel,
        vec![("a", subscriber("sensors/a")), ("b", subscriber("sensors/b")), ("c", plain())]
    )
    .await;

    runtime.start_workflow("wf").await.unwrap();
    let workflow = wait_for_workflow(&runtime, "wf", WorkflowStatus::WaitingForTask).await;
    assert_eq!(workflow.awaiting, vec!["a".to_string(), "b".to_string()]);

    runtime.context().messages.publish("sensors/a", "triggered").await.unwrap();
    wait_for_task(&runtime, "a", TaskStatus::Completed).await;

    let rt = &runtime;
    let workflow = eventually("awaiting narrowed to b", || async move {
        rt.workflow_state("wf").await.ok().filter(|workflow| workflow.awaiting == vec!["b".to_string()])
    })
    .await;
    assert_eq!(workflow.status, WorkflowStatus::WaitingForTask);
    assert_eq!(runtime.task_state("b").await.unwrap().status, TaskStatus::WaitingForMqtt);

    runtime.context().messages.publish("sensors/b", "triggered").await.unwrap();
    wait_for_workflow(&runtime, "wf", WorkflowStatus::Completed).await;
}

#[tokio::test]
async fn test_start_on_paused_workflow_resumes_tasks() {
    let runtime = start(fast_settings()).await;

    for (workflow_type, workflow_id, waiting, done) in
        [(WorkflowType::Serial, "serial", "s1", "s2"), (WorkflowType::Parallel, "parallel", "p1", "p2")]
    {
        setup(&runtime, workflow_id, workflow_type, vec![(waiting, controller()), (done, plain())]).await;

        runtime.start_workflow(workflow_id).await.unwrap();
        wait_for_workflow(&runtime, workflow_id, WorkflowStatus::WaitingForTask).await;
        runtime.pause_workflow(workflow_id).await.unwrap();
        assert_eq!(runtime.task_state(waiting).await.unwrap().status, TaskStatus::Paused);

        runtime.start_workflow(workflow_id).await.unwrap();
        let workflow = runtime.workflow_state(workflow_id).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::WaitingForTask, "{} after start", workflow_type);
        assert_eq!(workflow.awaiting, vec![waiting.to_string()]);
        assert_eq!(runtime.task_state(waiting).await.unwrap().status, TaskStatus::WaitingForController);

        assert!(runtime.call_controller(waiting, "ok").await.unwrap());
        wait_for_workflow(&runtime, workflow_id, WorkflowStatus::Completed).await;

        let tasks = runtime.workflow_tasks(workflow_id).await.unwrap();
        assert!(tasks.iter().all(|task| task.status == TaskStatus::Completed), "{} tasks", workflow_type);
    }
}

#[tokio::test]
async fn test_completion_for_unknown_workflow_is_not_buffered() {
    let topics = Arc::new(InMemoryTopicBus::new());
    let runtime = Runtime::start(test_context(fast_settings()).with_topics(topics.clone())).await.unwrap();

    runtime.create_task("t", "orphan", HashMap::new()).await.unwrap();
    runtime.set_task_workflow("t", Some("ghost".to_string())).await.unwrap();

    assert_eq!(runtime.execute_task("t").await.unwrap(), TaskStatus::Completed);
    assert_eq!(topics.backlog_len(&Topic::task_completion("ghost")).await, 0);
    assert!(runtime.workflow_ids().await.unwrap().is_empty());
}
