//! Structured event names for internal monitoring and debugging, plus shared timer names

/// Timer names armed on the durable timer service
pub mod timer {
    /// Periodic re-check while a task waits on the outside world
    pub const LIVENESS: &str = "liveness";
    /// One-shot wake-up that completes a task after an external event was accepted
    pub const CONTINUE: &str = "continue";
    /// Periodic workflow re-run
    pub const SCHEDULE: &str = "schedule";
}

/// Runtime (actor directory) Events
pub mod runtime {
    pub const RUNTIME_STARTED: &str = "runtime.started";
    pub const RUNTIME_SHUTDOWN: &str = "runtime.shutdown";
    pub const ACTOR_ACTIVATED: &str = "actor.activated";
    pub const ACTOR_DEACTIVATED: &str = "actor.deactivated";
    pub const ACTOR_ACTIVATION_FAILED: &str = "actor.activation_failed";
    pub const DELIVERY_ROUTED: &str = "delivery.routed";
    pub const DELIVERY_FAILED: &str = "delivery.failed";
    pub const COMPLETION_DROPPED: &str = "completion.dropped";
    pub const REMINDERS_RECOVERED: &str = "reminders.recovered";
}

/// Task Actor Events
pub mod task_actor {
    pub const TASK_ACTIVATED: &str = "task.activated";
    pub const TASK_CREATED: &str = "task.created";
    pub const TASK_CONFIGURED: &str = "task.configured";
    pub const TASK_OWNER_CHANGED: &str = "task.owner_changed";
    pub const EXECUTION_STARTED: &str = "execution.started";
    pub const EXECUTION_FAILED: &str = "execution.failed";
    pub const EXECUTION_RETRY: &str = "execution.retry";
    pub const EXECUTION_CANCELLED: &str = "execution.cancelled";
    pub const SIDE_EFFECT_FAILED: &str = "side_effect.failed";
    pub const SIDE_EFFECT_SUCCEEDED: &str = "side_effect.succeeded";
    pub const TASK_SUSPENDED: &str = "task.suspended";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const EXTERNAL_ACCEPTED: &str = "external.accepted";
    pub const EXTERNAL_IGNORED: &str = "external.ignored";
    pub const CONTINUE_SKIPPED: &str = "continue.skipped";
    pub const LIVENESS_CHECK: &str = "liveness.check";
    pub const TASK_PAUSED: &str = "task.paused";
    pub const TASK_RESUMED: &str = "task.resumed";
    pub const TASK_STOPPED: &str = "task.stopped";
    pub const NOTIFICATION_FAILED: &str = "notification.failed";
    pub const PERSIST_FAILED: &str = "persist.failed";
}

/// Workflow Actor Events
pub mod workflow_actor {
    pub const WORKFLOW_ACTIVATED: &str = "workflow.activated";
    pub const WORKFLOW_CREATED: &str = "workflow.created";
    pub const WORKFLOW_STARTED: &str = "workflow.started";
    pub const WORKFLOW_SUSPENDED: &str = "workflow.suspended";
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    pub const WORKFLOW_FAILED: &str = "workflow.failed";
    pub const WORKFLOW_PAUSED: &str = "workflow.paused";
    pub const WORKFLOW_RESUMED: &str = "workflow.resumed";
    pub const WORKFLOW_STOPPED: &str = "workflow.stopped";
    pub const WORKFLOW_INTERRUPTED: &str = "workflow.interrupted";
    pub const TASK_SKIPPED: &str = "task.skipped";
    pub const TASK_DISPATCHED: &str = "task.dispatched";
    pub const COMPLETION_RECEIVED: &str = "completion.received";
    pub const COMPLETION_IGNORED: &str = "completion.ignored";
    pub const CONTROL_FAILED: &str = "control.failed";
    pub const SCHEDULE_ARMED: &str = "schedule.armed";
    pub const SCHEDULE_TICK: &str = "schedule.tick";
    pub const SCHEDULE_CANCELLED: &str = "schedule.cancelled";
    pub const SUBSCRIPTION_FAILED: &str = "subscription.failed";
}

/// Adapter Events
pub mod adapter {
    pub const REMINDER_ARMED: &str = "reminder.armed";
    pub const REMINDER_FIRED: &str = "reminder.fired";
    pub const REMINDER_CANCELLED: &str = "reminder.cancelled";
    pub const TOPIC_PUBLISHED: &str = "topic.published";
    pub const TOPIC_BUFFERED: &str = "topic.buffered";
    pub const TOPIC_BACKLOG_DRAINED: &str = "topic.backlog_drained";
    pub const TOPIC_BACKLOG_OVERFLOW: &str = "topic.backlog_overflow";
    pub const MESSAGE_PUBLISHED: &str = "message.published";
    pub const MESSAGE_DELIVERED: &str = "message.delivered";
    pub const STATE_CONFLICT: &str = "state.conflict";
    pub const HTTP_REQUEST_SENT: &str = "http.request_sent";
}

/// Command Line Events
pub mod cli {
    pub const RUN_TIMED_OUT: &str = "run.timed_out";
}
