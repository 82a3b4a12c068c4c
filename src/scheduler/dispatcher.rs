use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::workflow::{Execution, TriggerEvent, TriggerSource};

/// Hands executions to the worker queue without waiting for them to run.
#[derive(Clone)]
pub struct Dispatcher {
    sender: mpsc::Sender<Execution>,
    // Users with a scheduled execution that has not reached a terminal state yet.
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

#[derive(thiserror::Error)]
pub enum DispatchError {
    #[error("Trigger is malformed: {0}")]
    MalformedTrigger(String),
    #[error("Execution queue is closed.")]
    QueueClosed,
}

impl std::fmt::Debug for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

impl Dispatcher {
    pub fn new(queue_capacity: usize) -> (Dispatcher, mpsc::Receiver<Execution>) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));

        let dispatcher = Dispatcher {
            sender,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        };

        (dispatcher, receiver)
    }

    /// Queues an on-demand trigger and returns the id of the execution that will handle it.
    #[tracing::instrument(name = "Submit a newsletter trigger", skip(self))]
    pub async fn submit(&self, trigger: TriggerEvent) -> Result<Uuid, DispatchError> {
        trigger.validate().map_err(DispatchError::MalformedTrigger)?;

        let execution = Execution::new(trigger, TriggerSource::OnDemand);
        let execution_id = execution.id;
        self.enqueue(execution).await?;

        Ok(execution_id)
    }

    /// Queues the scheduled run of `user_id` for the slot due at `due_at`, unless one is already
    /// in flight for that user.
    pub async fn submit_scheduled(
        &self,
        user_id: Uuid,
        due_at: DateTime<Utc>,
    ) -> Result<Option<Uuid>, DispatchError> {
        if !self.in_flight.lock().await.insert(user_id) {
            tracing::debug!("Scheduled execution already in flight for user {}", user_id);
            return Ok(None);
        }

        let execution = Execution::scheduled(user_id, due_at);
        let execution_id = execution.id;
        if let Err(err) = self.enqueue(execution).await {
            self.in_flight.lock().await.remove(&user_id);
            return Err(err);
        }

        Ok(Some(execution_id))
    }

    /// Puts an execution back on the queue, keeping its id.
    pub async fn redeliver(&self, execution: Execution) -> Result<(), DispatchError> {
        self.enqueue(execution).await
    }

    /// Frees the in-flight claim held by a scheduled execution.
    pub async fn release(&self, execution: &Execution) {
        if execution.source != TriggerSource::Scheduled {
            return;
        }

        if let Some(user_id) = execution.trigger.user_id {
            self.in_flight.lock().await.remove(&user_id);
        }
    }

    pub async fn is_in_flight(&self, user_id: Uuid) -> bool {
        self.in_flight.lock().await.contains(&user_id)
    }

    async fn enqueue(&self, execution: Execution) -> Result<(), DispatchError> {
        self.sender
            .send(execution)
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }
}
