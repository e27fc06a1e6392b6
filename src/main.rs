//! # Taskflow CLI Application
//!
//! Runs workflow definitions against the orchestrator runtime and inspects persisted state.
//!
//! ## Usage
//!
//! ```bash
//! # Create and run the workflow described in a definition file
//! taskflow run resource/door_access.yaml
//!
//! # Keep state between invocations
//! taskflow --storage rocksdb run resource/door_access.yaml
//! taskflow --storage rocksdb list
//! taskflow --storage rocksdb inspect door-access
//! ```
//!
//! Logs go to stderr and honour `RUST_LOG`; reports are printed to stdout as JSON.

use std::{
    path::Path,
    time::{Duration, Instant}
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use taskflow::{
    AppContext, Runtime, TaskflowCli, TaskflowCommand, Workflow, WorkflowDefinition, WorkflowStatus,
    config::{LoggingSettings, load_settings},
    domain::constant::cli
};
use tracing::{Level, event};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TaskflowCli::parse();

    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(backend) = cli.storage {
        settings.storage.backend = backend;
    }
    settings.validate()?;
    init_tracing(&settings.logging);

    let context = AppContext::init(settings)?;
    let runtime = Runtime::start(context).await.context("Failed to start runtime")?;

    let result = match cli.command {
        TaskflowCommand::Run { definition, timeout_secs } => {
            run_definition(&runtime, &definition, Duration::from_secs(timeout_secs)).await
        }
        TaskflowCommand::Inspect { workflow_id } => inspect(&runtime, &workflow_id).await,
        TaskflowCommand::List => {
            for workflow_id in runtime.workflow_ids().await? {
                println!("{}", workflow_id);
            }
            Ok(())
        }
    };

    runtime.shutdown().await;
    result
}

fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_definition(runtime: &Runtime, path: &Path, timeout: Duration) -> Result<()> {
    let yaml = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let definition = WorkflowDefinition::from_yaml(&yaml)?;
    let header = &definition.workflow;

    for task in &definition.tasks {
        runtime.create_task(&task.id, &task.name, task.parameters.clone()).await?;
        runtime.configure_task(&task.id, task.config()).await?;
    }
    runtime.create_workflow(&header.id, &header.name, header.kind, definition.task_ids(), header.parent.clone()).await?;

    match &header.schedule {
        Some(schedule) => {
            runtime.schedule_workflow(&header.id, schedule.interval_ms, schedule.is_looped, schedule.loop_count).await?
        }
        None => runtime.start_workflow(&header.id).await?
    }

    // Return once the workflow settles: finished, or suspended on outside input
    let deadline = Instant::now() + timeout;
    let workflow = loop {
        let workflow = runtime.workflow_state(&header.id).await?;
        let settled = workflow.status.is_terminal() || workflow.status == WorkflowStatus::WaitingForTask;
        if settled && workflow.schedule.is_none() {
            break workflow;
        }
        if Instant::now() >= deadline {
            event!(Level::WARN, event = cli::RUN_TIMED_OUT, workflow_id = %header.id, status = %workflow.status);
            break workflow;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    print_report(runtime, &workflow).await
}

async fn inspect(runtime: &Runtime, workflow_id: &str) -> Result<()> {
    if !runtime.workflow_ids().await?.iter().any(|id| id == workflow_id) {
        bail!("Workflow '{}' not found", workflow_id);
    }
    let workflow = runtime.workflow_state(workflow_id).await?;
    print_report(runtime, &workflow).await
}

async fn print_report(runtime: &Runtime, workflow: &Workflow) -> Result<()> {
    let tasks = runtime.workflow_tasks(&workflow.workflow_id).await?;
    let report = serde_json::json!({ "workflow": workflow, "tasks": tasks });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
