use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::delivery::{Delivery, NewDelivery};
use crate::domain::issue::{Issue, NewIssue};
use crate::domain::preference::{DueUser, Preference, PreferenceUpdate};
use crate::domain::user::{NewUser, User};
use crate::store::{NewsletterStore, StoreError};

/// Process-local store, used for local runs without Postgres and by the test suite.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    preferences: HashMap<Uuid, Preference>,
    issues: Vec<Issue>,
    deliveries: Vec<Delivery>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a user as-is, bypassing upsert validation.
    pub async fn insert_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn issues(&self) -> Vec<Issue> {
        self.state.lock().await.issues.clone()
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.state.lock().await.deliveries.clone()
    }
}

#[async_trait]
impl NewsletterStore for InMemoryStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn get_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;

        Ok(state
            .users
            .values()
            .find(|user| user.external_id == external_id)
            .cloned())
    }

    async fn upsert_user(&self, new_user: &NewUser) -> Result<User, StoreError> {
        let mut state = self.state.lock().await;
        let email = Some(new_user.email.as_ref().to_string());
        let name = new_user.name.as_ref().map(|name| name.as_ref().to_string());

        if let Some(user) = state
            .users
            .values_mut()
            .find(|user| user.external_id == new_user.external_id)
        {
            user.email = email;
            if name.is_some() {
                user.name = name;
            }
            return Ok(user.clone());
        }

        let user = User {
            id: Uuid::new_v4(),
            external_id: new_user.external_id.clone(),
            email,
            name,
        };
        state.users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn get_preference(&self, user_id: Uuid) -> Result<Option<Preference>, StoreError> {
        Ok(self.state.lock().await.preferences.get(&user_id).cloned())
    }

    async fn save_preference(&self, preference: &Preference) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .preferences
            .insert(preference.user_id, preference.clone());

        Ok(())
    }

    async fn update_preference(
        &self,
        user_id: Uuid,
        update: &PreferenceUpdate,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let preference = state
            .preferences
            .get_mut(&user_id)
            .ok_or(StoreError::PreferenceNotFound(user_id))?;

        if let Some(last_sent_at) = update.last_sent_at {
            preference.last_sent_at = Some(last_sent_at);
        }
        if let Some(next_send_at) = update.next_send_at {
            preference.next_send_at = Some(next_send_at);
        }

        Ok(())
    }

    async fn create_issue(&self, new_issue: &NewIssue) -> Result<Issue, StoreError> {
        let issue = Issue {
            id: Uuid::new_v4(),
            subject: new_issue.subject.clone(),
            topics: new_issue.topics.clone(),
            html: new_issue.html.clone(),
            metadata: new_issue.metadata.clone(),
            created_at: Utc::now(),
        };
        self.state.lock().await.issues.push(issue.clone());

        Ok(issue)
    }

    async fn create_delivery(&self, new_delivery: &NewDelivery) -> Result<Delivery, StoreError> {
        let delivery = Delivery {
            id: Uuid::new_v4(),
            user_id: new_delivery.user_id,
            issue_id: new_delivery.issue_id,
            status: new_delivery.status,
            error: new_delivery.error.clone(),
            subject: new_delivery.subject.clone(),
            to_email: new_delivery.to_email.clone(),
            to_name: new_delivery.to_name.clone(),
            topics: new_delivery.topics.clone(),
            sent_at: new_delivery.sent_at,
        };
        self.state.lock().await.deliveries.push(delivery.clone());

        Ok(delivery)
    }

    async fn due_users(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DueUser>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<(DateTime<Utc>, Uuid)> = state
            .preferences
            .values()
            .filter(|preference| !preference.paused)
            .filter(|preference| {
                state
                    .users
                    .get(&preference.user_id)
                    .and_then(User::deliverable_email)
                    .is_some()
            })
            .filter_map(|preference| {
                preference
                    .next_send_at
                    .filter(|next_send_at| *next_send_at < now)
                    .map(|next_send_at| (next_send_at, preference.user_id))
            })
            .collect();
        due.sort();

        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(next_send_at, user_id)| DueUser {
                user_id,
                next_send_at,
            })
            .collect())
    }
}
