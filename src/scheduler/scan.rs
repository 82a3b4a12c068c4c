use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::scheduler::dispatcher::{DispatchError, Dispatcher};
use crate::store::{NewsletterStore, StoreError};

#[derive(thiserror::Error)]
pub enum ScanError {
    #[error("Failed to load users due for a newsletter.")]
    Store(#[from] StoreError),
    #[error("Failed to dispatch a scheduled newsletter.")]
    Dispatch(#[from] DispatchError),
}

impl std::fmt::Debug for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

/// Submits one scheduled execution per due user and returns how many were submitted.
#[tracing::instrument(name = "Scan for due newsletters", skip(store, dispatcher))]
pub async fn scan_due_users(
    store: &dyn NewsletterStore,
    dispatcher: &Dispatcher,
    now: DateTime<Utc>,
    batch_size: i64,
) -> Result<usize, ScanError> {
    let mut submitted = 0;

    for due_user in store.due_users(now, batch_size).await? {
        if dispatcher
            .submit_scheduled(due_user.user_id, due_user.next_send_at)
            .await?
            .is_some()
        {
            submitted += 1;
        }
    }

    Ok(submitted)
}

pub fn spawn_scan_loop(
    store: Arc<dyn NewsletterStore>,
    dispatcher: Dispatcher,
    scan_interval: Duration,
    batch_size: i64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Newsletter scan loop started (every {:?})", scan_interval);

        let mut interval = tokio::time::interval(scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match scan_due_users(store.as_ref(), &dispatcher, Utc::now(), batch_size).await {
                Ok(submitted) => {
                    tracing::info!("Submitted {} scheduled newsletter executions", submitted)
                }
                Err(err) => tracing::error!("Newsletter scan failed: {:?}", err),
            }
        }
    })
}
