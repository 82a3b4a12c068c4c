use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::domain::delivery::{Delivery, NewDelivery};
use crate::domain::delivery_status::DeliveryStatus;
use crate::domain::frequency::Frequency;
use crate::domain::issue::{Issue, IssueMetadata, NewIssue};
use crate::domain::preference::{DueUser, Preference, PreferenceUpdate};
use crate::domain::user::{NewUser, User};
use crate::store::{NewsletterStore, StoreError};

pub struct PostgresStore {
    db_pool: PgPool,
}

impl PostgresStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl NewsletterStore for PostgresStore {
    #[tracing::instrument(name = "Fetch a user by id", skip(self))]
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, external_id, email, name
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    #[tracing::instrument(name = "Fetch a user by external id", skip(self))]
    async fn get_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, external_id, email, name
            FROM users
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.db_pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    #[tracing::instrument(
        name = "Upsert a user",
        skip(self, new_user),
        fields(external_id = %new_user.external_id)
    )]
    async fn upsert_user(&self, new_user: &NewUser) -> Result<User, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (id, external_id, email, name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (external_id) DO UPDATE
            SET email = EXCLUDED.email,
                name = COALESCE(EXCLUDED.name, users.name),
                updated_at = EXCLUDED.updated_at
            RETURNING id, external_id, email, name
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new_user.external_id)
        .bind(new_user.email.as_ref())
        .bind(new_user.name.as_ref().map(|name| name.as_ref().to_string()))
        .bind(Utc::now())
        .fetch_one(&self.db_pool)
        .await?;

        user_from_row(row)
    }

    #[tracing::instrument(name = "Fetch user preferences", skip(self))]
    async fn get_preference(&self, user_id: Uuid) -> Result<Option<Preference>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, topics, paused, frequency, last_sent_at, next_send_at
            FROM preferences
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await?;

        row.map(preference_from_row).transpose()
    }

    #[tracing::instrument(
        name = "Save user preferences",
        skip(self, preference),
        fields(user_id = %preference.user_id)
    )]
    async fn save_preference(&self, preference: &Preference) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO preferences (user_id, topics, paused, frequency, last_sent_at, next_send_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE
            SET topics = EXCLUDED.topics,
                paused = EXCLUDED.paused,
                frequency = EXCLUDED.frequency,
                last_sent_at = EXCLUDED.last_sent_at,
                next_send_at = EXCLUDED.next_send_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(preference.user_id)
        .bind(&preference.topics)
        .bind(preference.paused)
        .bind(preference.frequency.map(|frequency| frequency.as_ref().to_string()))
        .bind(preference.last_sent_at)
        .bind(preference.next_send_at)
        .bind(Utc::now())
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(name = "Update the preference schedule", skip(self))]
    async fn update_preference(
        &self,
        user_id: Uuid,
        update: &PreferenceUpdate,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE preferences
            SET last_sent_at = COALESCE($2, last_sent_at),
                next_send_at = COALESCE($3, next_send_at),
                updated_at = $4
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(update.last_sent_at)
        .bind(update.next_send_at)
        .bind(Utc::now())
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::PreferenceNotFound(user_id));
        }

        Ok(())
    }

    #[tracing::instrument(
        name = "Insert a new issue into the database",
        skip(self, new_issue),
        fields(subject = %new_issue.subject)
    )]
    async fn create_issue(&self, new_issue: &NewIssue) -> Result<Issue, StoreError> {
        let meta_json = serde_json::to_string(&new_issue.metadata)?;
        let row = sqlx::query(
            r#"
            INSERT INTO issues (id, subject, topics, html, meta_json, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, subject, topics, html, meta_json, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new_issue.subject)
        .bind(&new_issue.topics)
        .bind(&new_issue.html)
        .bind(meta_json)
        .bind(Utc::now())
        .fetch_one(&self.db_pool)
        .await?;

        issue_from_row(row)
    }

    #[tracing::instrument(
        name = "Insert a new delivery into the database",
        skip(self, new_delivery),
        fields(
            user_id = %new_delivery.user_id,
            issue_id = %new_delivery.issue_id,
            status = %new_delivery.status.as_ref()
        )
    )]
    async fn create_delivery(&self, new_delivery: &NewDelivery) -> Result<Delivery, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO deliveries (id, user_id, issue_id, status, error, subject, to_email, to_name, topics, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, user_id, issue_id, status, error, subject, to_email, to_name, topics, sent_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_delivery.user_id)
        .bind(new_delivery.issue_id)
        .bind(new_delivery.status.as_ref())
        .bind(&new_delivery.error)
        .bind(&new_delivery.subject)
        .bind(&new_delivery.to_email)
        .bind(&new_delivery.to_name)
        .bind(&new_delivery.topics)
        .bind(new_delivery.sent_at)
        .fetch_one(&self.db_pool)
        .await?;

        delivery_from_row(row)
    }

    #[tracing::instrument(name = "Fetch users due for a newsletter", skip(self))]
    async fn due_users(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DueUser>, StoreError> {
        let due_users = sqlx::query(
            r#"
            SELECT p.user_id, p.next_send_at
            FROM preferences p
            JOIN users u ON u.id = p.user_id
            WHERE p.paused = false
              AND p.next_send_at IS NOT NULL
              AND p.next_send_at < $1
              AND COALESCE(TRIM(u.email), '') <> ''
            ORDER BY p.next_send_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .map(|row: PgRow| DueUser {
            user_id: row.get("user_id"),
            next_send_at: row.get("next_send_at"),
        })
        .fetch_all(&self.db_pool)
        .await?;

        Ok(due_users)
    }
}

fn user_from_row(row: PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
    })
}

fn preference_from_row(row: PgRow) -> Result<Preference, StoreError> {
    let frequency: Option<String> = row.try_get("frequency")?;
    let frequency = frequency.and_then(|frequency| match Frequency::parse(&frequency) {
        Ok(frequency) => Some(frequency),
        Err(err) => {
            tracing::warn!("Ignoring stored frequency: {}", err);
            None
        }
    });

    Ok(Preference {
        user_id: row.try_get("user_id")?,
        topics: row.try_get("topics")?,
        paused: row.try_get("paused")?,
        frequency,
        last_sent_at: row.try_get("last_sent_at")?,
        next_send_at: row.try_get("next_send_at")?,
    })
}

fn issue_from_row(row: PgRow) -> Result<Issue, StoreError> {
    let meta_json: String = row.try_get("meta_json")?;
    let metadata: IssueMetadata = serde_json::from_str(&meta_json)?;

    Ok(Issue {
        id: row.try_get("id")?,
        subject: row.try_get("subject")?,
        topics: row.try_get("topics")?,
        html: row.try_get("html")?,
        metadata,
        created_at: row.try_get("created_at")?,
    })
}

fn delivery_from_row(row: PgRow) -> Result<Delivery, StoreError> {
    let status = DeliveryStatus::parse(row.try_get("status")?).map_err(StoreError::InvalidRow)?;

    Ok(Delivery {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        issue_id: row.try_get("issue_id")?,
        status,
        error: row.try_get("error")?,
        subject: row.try_get("subject")?,
        to_email: row.try_get("to_email")?,
        to_name: row.try_get("to_name")?,
        topics: row.try_get("topics")?,
        sent_at: row.try_get("sent_at")?,
    })
}
