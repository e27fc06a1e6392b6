//! Command-line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::adapter::state::StateStoreType;

#[derive(Parser, Debug)]
#[command(name = "taskflow", author, version, about, long_about = None)]
pub struct TaskflowCli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config:  Option<PathBuf>,
    /// Override the configured storage backend
    #[arg(long, global = true, value_enum)]
    pub storage: Option<StateStoreType>,
    /// Subcommands
    #[command(subcommand)]
    pub command: TaskflowCommand
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum TaskflowCommand {
    /// Create the tasks and workflow of a YAML definition and run it
    Run {
        /// Path to the definition file
        definition:   PathBuf,
        /// Stop waiting after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64
    },
    /// Print a persisted workflow and its tasks
    Inspect {
        /// Workflow id
        workflow_id: String
    },
    /// List persisted workflow ids
    List
}
