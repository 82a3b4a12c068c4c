use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::scheduler::dispatcher::Dispatcher;
use crate::workflow::{Execution, ExecutionOutcome, NewsletterWorkflow};

/// How failed executions are redelivered.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Exponential delay before `attempt + 1`, plus up to one base delay of jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1 << exponent);
        let base_millis = self.base_delay.as_millis() as u64;
        let jitter = if base_millis == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=base_millis)
        };

        delay + Duration::from_millis(jitter)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Consumes the execution queue, running each execution as its own task.
pub struct WorkflowWorker {
    workflow: Arc<NewsletterWorkflow>,
    dispatcher: Dispatcher,
    receiver: mpsc::Receiver<Execution>,
    permits: Arc<Semaphore>,
    retry_policy: RetryPolicy,
}

impl WorkflowWorker {
    pub fn new(
        workflow: Arc<NewsletterWorkflow>,
        dispatcher: Dispatcher,
        receiver: mpsc::Receiver<Execution>,
        max_concurrent_executions: usize,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            workflow,
            dispatcher,
            receiver,
            permits: Arc::new(Semaphore::new(max_concurrent_executions.max(1))),
            retry_policy,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        tracing::info!("Workflow worker started");

        while let Some(execution) = self.receiver.recv().await {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let workflow = self.workflow.clone();
            let dispatcher = self.dispatcher.clone();
            let retry_policy = self.retry_policy;

            tokio::spawn(async move {
                run_execution(&workflow, &dispatcher, retry_policy, execution).await;
                drop(permit);
            });
        }

        tracing::info!("Workflow worker stopped");
    }
}

async fn run_execution(
    workflow: &NewsletterWorkflow,
    dispatcher: &Dispatcher,
    retry_policy: RetryPolicy,
    execution: Execution,
) {
    match workflow.execute(&execution).await {
        Ok(ExecutionOutcome::Completed { status, .. }) => {
            tracing::info!(
                "Execution {} completed with delivery {}",
                execution.id,
                status.as_ref()
            );
            dispatcher.release(&execution).await;
        }
        Ok(ExecutionOutcome::Skipped(reason)) => {
            tracing::info!("Execution {} skipped: {}", execution.id, reason);
            dispatcher.release(&execution).await;
        }
        Err(err) if retry_policy.should_retry(execution.attempt) => {
            let delay = retry_policy.backoff(execution.attempt);
            tracing::warn!(
                "Execution {} failed on attempt {}, retrying in {:?}: {:?}",
                execution.id,
                execution.attempt,
                delay,
                err
            );

            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;

                let retry = execution.next_attempt();
                if let Err(err) = dispatcher.redeliver(retry).await {
                    tracing::error!("Failed to redeliver execution {}: {:?}", execution.id, err);
                    dispatcher.release(&execution).await;
                }
            });
        }
        Err(err) => {
            tracing::error!(
                "Execution {} abandoned after {} attempts: {:?}",
                execution.id,
                execution.attempt,
                err
            );
            dispatcher.release(&execution).await;
        }
    }
}
