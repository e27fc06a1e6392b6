use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::OrchestratorError;

/// Identity of an addressable actor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorId {
    Task(String),
    Workflow(String)
}

impl ActorId {
    pub fn key(&self) -> &str {
        match self {
            ActorId::Task(id) | ActorId::Workflow(id) => id
        }
    }

    /// Key of the actor's durable state cell
    pub fn state_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorId::Task(id) => write!(f, "task/{}", id),
            ActorId::Workflow(id) => write!(f, "workflow/{}", id)
        }
    }
}

/// Handle to an armed timer; re-arming the same name on the same actor replaces it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerHandle {
    pub owner: ActorId,
    pub name:  String
}

/// A wake-up delivered to the owning actor as `OnTimer(name)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerTick {
    pub owner: ActorId,
    pub name:  String
}

/// Port for the durable timer (reminder) service
///
/// Timers outlive the actor that armed them: a tick for a deactivated actor reactivates it.
#[async_trait]
pub trait DurableTimer: Send + Sync {
    /// Arm `name` on `owner`, firing after `first_delay` and then every `period` if given
    async fn arm(
        &self,
        owner: &ActorId,
        name: &str,
        first_delay: Duration,
        period: Option<Duration>
    ) -> Result<TimerHandle, OrchestratorError>;

    /// Cancel a timer (no-op when it is not armed)
    async fn cancel(&self, handle: &TimerHandle) -> Result<(), OrchestratorError>;
}
