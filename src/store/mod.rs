use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::delivery::{Delivery, NewDelivery};
use crate::domain::issue::{Issue, NewIssue};
use crate::domain::preference::{DueUser, Preference, PreferenceUpdate};
use crate::domain::user::{NewUser, User};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Typed access to users, their preferences and the newsletter history.
#[async_trait]
pub trait NewsletterStore: Send + Sync {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn get_user_by_external_id(&self, external_id: &str)
        -> Result<Option<User>, StoreError>;

    /// Creates the user for `external_id` if absent, otherwise refreshes email and name.
    async fn upsert_user(&self, new_user: &NewUser) -> Result<User, StoreError>;

    async fn get_preference(&self, user_id: Uuid) -> Result<Option<Preference>, StoreError>;

    /// Replaces every preference field, creating the row if needed.
    async fn save_preference(&self, preference: &Preference) -> Result<(), StoreError>;

    async fn update_preference(
        &self,
        user_id: Uuid,
        update: &PreferenceUpdate,
    ) -> Result<(), StoreError>;

    async fn create_issue(&self, new_issue: &NewIssue) -> Result<Issue, StoreError>;

    async fn create_delivery(&self, new_delivery: &NewDelivery) -> Result<Delivery, StoreError>;

    /// Users with an email whose newsletter is not paused and whose `next_send_at` is strictly
    /// before `now`, oldest first.
    async fn due_users(&self, now: DateTime<Utc>, limit: i64)
        -> Result<Vec<DueUser>, StoreError>;
}

#[derive(thiserror::Error)]
pub enum StoreError {
    #[error("Failed to execute a database query.")]
    Database(#[from] sqlx::Error),
    #[error("Failed to (de)serialize issue metadata.")]
    Metadata(#[from] serde_json::Error),
    #[error("Stored row is not valid: {0}")]
    InvalidRow(String),
    #[error("No preference stored for user {0}.")]
    PreferenceNotFound(Uuid),
}

impl std::fmt::Debug for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}
