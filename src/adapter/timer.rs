//! Reminder service: durable timers backed by the state store
//!
//! Every armed timer is persisted as a reminder record under `reminder/<actor>/<name>` before its
//! tokio task is spawned. One-shot records are removed after they fire and periodic records stay
//! until cancelled. After a restart `recover` re-arms whatever is still on record, so a wake-up
//! armed before a crash is still delivered.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{Level, event};

use crate::{
    domain::{constant::adapter, error::OrchestratorError},
    port::{
        state::{DurableState, SaveOutcome},
        timer::{ActorId, DurableTimer, TimerHandle, TimerTick}
    }
};

pub const REMINDER_PREFIX: &str = "reminder/";

/// Receives fired ticks; returns false once nobody is listening anymore
pub type TickSink = Arc<dyn Fn(TimerTick) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ReminderRecord {
    owner:          ActorId,
    name:           String,
    generation:     String,
    armed_at:       DateTime<Utc>,
    first_delay_ms: u64,
    period_ms:      Option<u64>
}

impl ReminderRecord {
    fn key(&self) -> String {
        reminder_key(&self.owner, &self.name)
    }

    fn handle(&self) -> TimerHandle {
        TimerHandle { owner: self.owner.clone(), name: self.name.clone() }
    }

    fn period(&self) -> Option<Duration> {
        self.period_ms.map(Duration::from_millis)
    }

    /// Delay until the next due fire measured from `now`; overdue reminders fire immediately
    fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let first_due = self.armed_at + chrono::Duration::milliseconds(self.first_delay_ms as i64);
        if now < first_due {
            return (first_due - now).to_std().unwrap_or_default();
        }
        match self.period_ms {
            Some(period_ms) if period_ms > 0 => {
                let overdue_ms = (now - first_due).num_milliseconds().max(0) as u64;
                let into_period = overdue_ms % period_ms;
                if into_period == 0 { Duration::ZERO } else { Duration::from_millis(period_ms - into_period) }
            }
            _ => Duration::ZERO
        }
    }
}

fn reminder_key(owner: &ActorId, name: &str) -> String {
    format!("{}{}/{}", REMINDER_PREFIX, owner, name)
}

struct ArmedTimer {
    generation: String,
    task:       JoinHandle<()>
}

/// Durable timer service delivering ticks through a [`TickSink`]
#[derive(Clone)]
pub struct ReminderService {
    store: Arc<dyn DurableState>,
    sink:  TickSink,
    armed: Arc<Mutex<HashMap<TimerHandle, ArmedTimer>>>
}

impl ReminderService {
    pub fn new(store: Arc<dyn DurableState>, sink: TickSink) -> Self {
        Self { store, sink, armed: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Re-arm every persisted reminder; returns how many were recovered
    pub async fn recover(&self) -> Result<usize, OrchestratorError> {
        let keys = self.store.keys(REMINDER_PREFIX).await?;
        let now = Utc::now();
        let mut armed = self.armed.lock().await;
        let mut recovered = 0;

        for key in keys {
            let Some(blob) = self.store.load(&key).await? else {
                continue;
            };
            let record: ReminderRecord = match serde_json::from_slice(&blob.data) {
                Ok(record) => record,
                Err(e) => {
                    event!(Level::WARN, event = adapter::REMINDER_CANCELLED, key = %key, error = %e);
                    continue;
                }
            };

            let handle = record.handle();
            if let Some(previous) = armed.remove(&handle) {
                previous.task.abort();
            }
            let generation = record.generation.clone();
            let task = self.spawn(record.clone(), record.remaining(now));
            armed.insert(handle, ArmedTimer { generation, task });
            recovered += 1;
        }

        Ok(recovered)
    }

    /// Number of timers currently armed in this process
    pub async fn armed_count(&self) -> usize {
        self.armed.lock().await.len()
    }

    /// Stop every in-process timer task; persisted records stay for the next `recover`
    pub async fn shutdown(&self) {
        let mut armed = self.armed.lock().await;
        for (_, timer) in armed.drain() {
            timer.task.abort();
        }
    }

    fn spawn(&self, record: ReminderRecord, first_delay: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(first_delay).await;
            loop {
                event!(Level::DEBUG, event = adapter::REMINDER_FIRED, owner = %record.owner, name = %record.name);
                let tick = TimerTick { owner: record.owner.clone(), name: record.name.clone() };
                if !(service.sink)(tick) {
                    event!(
                        Level::WARN,
                        event = adapter::REMINDER_FIRED,
                        owner = %record.owner,
                        name = %record.name,
                        delivered = false
                    );
                    return;
                }
                match record.period() {
                    Some(period) => tokio::time::sleep(period).await,
                    None => break
                }
            }
            service.retire(&record).await;
        })
    }

    /// Forget a fired one-shot reminder unless it was re-armed in the meantime
    async fn retire(&self, record: &ReminderRecord) {
        let mut armed = self.armed.lock().await;
        let handle = record.handle();
        if armed.get(&handle).is_some_and(|timer| timer.generation == record.generation) {
            armed.remove(&handle);
            if let Err(e) = self.store.delete(&record.key()).await {
                event!(Level::ERROR, event = adapter::REMINDER_CANCELLED, key = %record.key(), error = %e);
            }
        }
    }

    async fn persist(&self, record: &ReminderRecord) -> Result<(), OrchestratorError> {
        let key = record.key();
        let data = serde_json::to_vec(record)?;
        // Only this service writes reminder keys, so a conflict means a stale read and one retry settles it
        for _ in 0..2 {
            let expected = self.store.load(&key).await?.map(|blob| blob.version);
            if let SaveOutcome::Saved { .. } = self.store.save(&key, data.clone(), expected).await? {
                return Ok(());
            }
        }
        Err(OrchestratorError::Conflict(key))
    }
}

#[async_trait]
impl DurableTimer for ReminderService {
    async fn arm(
        &self,
        owner: &ActorId,
        name: &str,
        first_delay: Duration,
        period: Option<Duration>
    ) -> Result<TimerHandle, OrchestratorError> {
        if period.is_some_and(|period| period.is_zero()) {
            return Err(OrchestratorError::Configuration(format!("timer {} needs a non-zero period", name)));
        }

        let record = ReminderRecord {
            owner:          owner.clone(),
            name:           name.to_string(),
            generation:     uuid::Uuid::new_v4().to_string(),
            armed_at:       Utc::now(),
            first_delay_ms: first_delay.as_millis() as u64,
            period_ms:      period.map(|period| period.as_millis() as u64)
        };

        let mut armed = self.armed.lock().await;
        self.persist(&record).await?;

        let handle = record.handle();
        if let Some(previous) = armed.remove(&handle) {
            previous.task.abort();
        }
        let generation = record.generation.clone();
        let task = self.spawn(record, first_delay);
        armed.insert(handle.clone(), ArmedTimer { generation, task });

        event!(
            Level::DEBUG,
            event = adapter::REMINDER_ARMED,
            owner = %owner,
            name = %name,
            first_delay_ms = first_delay.as_millis() as u64,
            periodic = period.is_some()
        );
        Ok(handle)
    }

    async fn cancel(&self, handle: &TimerHandle) -> Result<(), OrchestratorError> {
        let mut armed = self.armed.lock().await;
        if let Some(timer) = armed.remove(handle) {
            timer.task.abort();
        }
        self.store.delete(&reminder_key(&handle.owner, &handle.name)).await?;
        event!(Level::DEBUG, event = adapter::REMINDER_CANCELLED, owner = %handle.owner, name = %handle.name);
        Ok(())
    }
}
