use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::article::Article;
use crate::domain::delivery::NewDelivery;
use crate::domain::delivery_status::DeliveryStatus;
use crate::domain::frequency::{next_send_time, Frequency};
use crate::domain::issue::{IssueMetadata, NewIssue, TopicsSource};
use crate::domain::preference::{Preference, PreferenceUpdate};
use crate::domain::topics::{normalize_topics, Category, DEFAULT_CATEGORIES};
use crate::domain::user::User;
use crate::email_client::EmailSender;
use crate::news_client::{ContentFetcher, NewsClientError};
use crate::render::build_newsletter_html;
use crate::store::{NewsletterStore, StoreError};
use crate::summarizer_client::{Summarizer, SummarizerError};
use crate::workflow::prompt;
use crate::workflow::steps::{self, step_key, StepCache, StepCacheError};
use crate::workflow::trigger::{
    DeliveryOutcome, Execution, ExecutionOutcome, SkipReason, TriggerEvent,
};

/// Minutes before a user whose delivery failed becomes due again.
pub const FAILED_DELIVERY_RETRY_MINUTES: i64 = 15;

/// Runs the newsletter steps for one execution.
///
/// Every step result is stored in the [`StepCache`] under the execution id before the next step
/// starts, so running the same execution again resumes after the last completed step instead of
/// repeating it.
pub struct NewsletterWorkflow {
    store: Arc<dyn NewsletterStore>,
    content_fetcher: Arc<dyn ContentFetcher>,
    summarizer: Arc<dyn Summarizer>,
    email_sender: Arc<dyn EmailSender>,
    step_cache: Arc<dyn StepCache>,
    step_timeout: Duration,
}

#[derive(thiserror::Error)]
pub enum WorkflowError {
    #[error("Failed to access the newsletter store.")]
    Store(#[from] StoreError),
    #[error("Failed to access the step cache.")]
    StepCache(#[from] StepCacheError),
    #[error("Failed to serialize a step result.")]
    StepResult(#[from] serde_json::Error),
    #[error("Failed to fetch articles: {0}")]
    Fetch(#[from] NewsClientError),
    #[error("Failed to summarize articles: {0}")]
    Summarize(#[from] SummarizerError),
    #[error("Step {0} timed out.")]
    StepTimedOut(&'static str),
}

impl std::fmt::Debug for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoadedAccount {
    preference: Option<Preference>,
    user: Option<User>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RenderedNewsletter {
    subject: String,
    html: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordedDelivery {
    delivery_id: Uuid,
    sent_at: DateTime<Utc>,
}

struct TopicsSelection {
    snapshot: Option<String>,
    categories: Vec<Category>,
    source: TopicsSource,
}

impl NewsletterWorkflow {
    pub fn new(
        store: Arc<dyn NewsletterStore>,
        content_fetcher: Arc<dyn ContentFetcher>,
        summarizer: Arc<dyn Summarizer>,
        email_sender: Arc<dyn EmailSender>,
        step_cache: Arc<dyn StepCache>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            store,
            content_fetcher,
            summarizer,
            email_sender,
            step_cache,
            step_timeout,
        }
    }

    #[tracing::instrument(
        name = "Execute newsletter workflow",
        skip(self, execution),
        fields(
            execution_id = %execution.id,
            attempt = execution.attempt,
            source = ?execution.source
        )
    )]
    pub async fn execute(&self, execution: &Execution) -> Result<ExecutionOutcome, WorkflowError> {
        let execution_id = execution.id;
        let trigger = &execution.trigger;

        let user_id = match self
            .run_step(execution_id, steps::RESOLVE_USER, || {
                self.resolve_user(trigger)
            })
            .await?
        {
            Some(user_id) => user_id,
            None => return self.skip(execution_id, SkipReason::NoUser).await,
        };

        let account = self
            .run_step(execution_id, steps::LOAD_USER_AND_PREFERENCES, || {
                self.load_account(user_id)
            })
            .await?;
        let preference = match account.preference {
            Some(preference) => preference,
            None => return self.skip(execution_id, SkipReason::NoPreferences).await,
        };
        if preference.paused {
            return self.skip(execution_id, SkipReason::Paused).await;
        }
        let user = match account.user {
            Some(user) if user.deliverable_email().is_some() => user,
            _ => return self.skip(execution_id, SkipReason::NoEmail).await,
        };

        let topics = select_topics(&preference, trigger);

        let articles = self
            .run_step(execution_id, steps::FETCH_NEWS, || {
                self.fetch_news(&topics.categories)
            })
            .await?;

        let summary = self
            .run_step(execution_id, steps::SUMMARIZE_NEWS, || {
                self.summarize_news(&topics.categories, &articles)
            })
            .await?;

        let newsletter = self
            .run_step(execution_id, steps::RENDER, || async {
                Ok::<_, WorkflowError>(render(preference.frequency, &summary))
            })
            .await?;

        let new_issue = NewIssue {
            subject: newsletter.subject.clone(),
            topics: topics.snapshot.clone(),
            html: newsletter.html.clone(),
            metadata: IssueMetadata {
                topics: topics.categories.clone(),
                count: articles.len(),
                generated_at: Utc::now(),
                topics_source: topics.source,
                execution_id,
            },
        };
        let issue_id = self
            .run_step(execution_id, steps::CREATE_ISSUE, || {
                self.create_issue(&new_issue)
            })
            .await?;

        let delivery = self
            .run_step(execution_id, steps::SEND_EMAIL, || {
                self.send_email(&user, &newsletter)
            })
            .await?;

        let recorded = self
            .run_step(execution_id, steps::RECORD_DELIVERY, || {
                self.record_delivery(
                    &user,
                    issue_id,
                    &newsletter.subject,
                    topics.snapshot.clone(),
                    &delivery,
                )
            })
            .await?;

        self.run_step(execution_id, steps::ADVANCE_SCHEDULE, || {
            self.advance_schedule(
                user_id,
                preference.frequency,
                delivery.status,
                recorded.sent_at,
            )
        })
        .await?;

        tracing::info!(
            "Newsletter execution finished for user {} with status {}",
            user_id,
            delivery.status.as_ref()
        );

        Ok(ExecutionOutcome::Completed {
            issue_id,
            delivery_id: recorded.delivery_id,
            status: delivery.status,
        })
    }

    /// Returns the cached result of `step` for this execution, or runs it and caches the result.
    async fn run_step<T, F, Fut>(
        &self,
        execution_id: Uuid,
        step: &'static str,
        run: F,
    ) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, WorkflowError>>,
    {
        let key = step_key(execution_id, step);

        if let Some(cached) = self.step_cache.get(&key).await? {
            match serde_json::from_value(cached) {
                Ok(result) => {
                    tracing::debug!("Reusing the result of step {}", step);
                    return Ok(result);
                }
                Err(err) => tracing::warn!("Re-running step {}, cached result unreadable: {}", step, err),
            }
        }

        let result = run().await?;
        self.step_cache
            .put(&key, serde_json::to_value(&result)?)
            .await?;
        tracing::debug!("Completed step {}", step);

        Ok(result)
    }

    /// Ends the execution without side effects. The reads behind the decision are forgotten, so
    /// running the same execution again later sees the user as they are by then.
    async fn skip(
        &self,
        execution_id: Uuid,
        reason: SkipReason,
    ) -> Result<ExecutionOutcome, WorkflowError> {
        tracing::info!("Skipping newsletter execution: {}", reason);

        for step in [steps::RESOLVE_USER, steps::LOAD_USER_AND_PREFERENCES] {
            self.step_cache
                .forget(&step_key(execution_id, step))
                .await?;
        }

        Ok(ExecutionOutcome::Skipped(reason))
    }

    async fn with_timeout<T, E, Fut>(
        &self,
        step: &'static str,
        future: Fut,
    ) -> Result<T, WorkflowError>
    where
        Fut: Future<Output = Result<T, E>>,
        WorkflowError: From<E>,
    {
        match tokio::time::timeout(self.step_timeout, future).await {
            Ok(result) => result.map_err(WorkflowError::from),
            Err(_) => Err(WorkflowError::StepTimedOut(step)),
        }
    }

    async fn resolve_user(&self, trigger: &TriggerEvent) -> Result<Option<Uuid>, WorkflowError> {
        if let Some(user_id) = trigger.user_id {
            return Ok(Some(user_id));
        }

        match trigger.external_id() {
            Some(external_id) => Ok(self
                .store
                .get_user_by_external_id(external_id)
                .await?
                .map(|user| user.id)),
            None => Ok(None),
        }
    }

    async fn load_account(&self, user_id: Uuid) -> Result<LoadedAccount, WorkflowError> {
        let (preference, user) = tokio::try_join!(
            self.store.get_preference(user_id),
            self.store.get_user(user_id)
        )?;

        Ok(LoadedAccount { preference, user })
    }

    async fn fetch_news(&self, categories: &[Category]) -> Result<Vec<Article>, WorkflowError> {
        self.with_timeout(
            steps::FETCH_NEWS,
            self.content_fetcher.fetch_articles(categories),
        )
        .await
    }

    async fn summarize_news(
        &self,
        categories: &[Category],
        articles: &[Article],
    ) -> Result<String, WorkflowError> {
        let user_prompt = prompt::user_prompt(categories, articles);
        let summary = self
            .with_timeout(
                steps::SUMMARIZE_NEWS,
                self.summarizer.summarize(prompt::SYSTEM_PROMPT, &user_prompt),
            )
            .await?;

        Ok(prompt::summary_or_fallback(&summary))
    }

    async fn create_issue(&self, new_issue: &NewIssue) -> Result<Uuid, WorkflowError> {
        let issue = self.store.create_issue(new_issue).await?;

        Ok(issue.id)
    }

    /// Never fails: every problem becomes a FAILED outcome so it can be recorded.
    async fn send_email(
        &self,
        user: &User,
        newsletter: &RenderedNewsletter,
    ) -> Result<DeliveryOutcome, WorkflowError> {
        let recipient = user.deliverable_email().unwrap_or_default();

        let send = self
            .email_sender
            .send_email(recipient, &newsletter.subject, &newsletter.html);

        let outcome = match tokio::time::timeout(self.step_timeout, send).await {
            Ok(Ok(())) => DeliveryOutcome::sent(),
            Ok(Err(err)) => DeliveryOutcome::failed(err.to_string()),
            Err(_) => {
                DeliveryOutcome::failed(WorkflowError::StepTimedOut(steps::SEND_EMAIL).to_string())
            }
        };

        if let Some(error) = &outcome.error {
            tracing::error!("Failed to deliver newsletter to user {}: {}", user.id, error);
        }

        Ok(outcome)
    }

    async fn record_delivery(
        &self,
        user: &User,
        issue_id: Uuid,
        subject: &str,
        topics: Option<String>,
        outcome: &DeliveryOutcome,
    ) -> Result<RecordedDelivery, WorkflowError> {
        let sent_at = Utc::now();
        let delivery = self
            .store
            .create_delivery(&NewDelivery {
                user_id: user.id,
                issue_id,
                status: outcome.status,
                error: outcome.error.clone(),
                subject: subject.to_string(),
                to_email: non_blank(user.email.as_deref()),
                to_name: non_blank(user.name.as_deref()),
                topics,
                sent_at,
            })
            .await?;

        Ok(RecordedDelivery {
            delivery_id: delivery.id,
            sent_at: delivery.sent_at,
        })
    }

    async fn advance_schedule(
        &self,
        user_id: Uuid,
        frequency: Option<Frequency>,
        status: DeliveryStatus,
        sent_at: DateTime<Utc>,
    ) -> Result<PreferenceUpdate, WorkflowError> {
        let update = schedule_update(frequency, status, sent_at);
        self.store.update_preference(user_id, &update).await?;

        Ok(update)
    }
}

/// The saved topics are always what gets snapshotted; inline topics only steer fetching and
/// summarizing.
fn select_topics(preference: &Preference, trigger: &TriggerEvent) -> TopicsSelection {
    let snapshot = preference.topics_snapshot();
    let (source, raw) = match trigger.inline_topics() {
        Some(inline) => (TopicsSource::Inline, inline.to_string()),
        None => (
            TopicsSource::Preference,
            snapshot.clone().unwrap_or_default(),
        ),
    };

    let mut categories = normalize_topics(&raw);
    if categories.is_empty() {
        categories = DEFAULT_CATEGORIES.to_vec();
    }

    TopicsSelection {
        snapshot,
        categories,
        source,
    }
}

fn render(frequency: Option<Frequency>, summary: &str) -> RenderedNewsletter {
    let subject = prompt::subject(frequency, Utc::now());
    let html = build_newsletter_html(&subject, summary);

    RenderedNewsletter { subject, html }
}

fn schedule_update(
    frequency: Option<Frequency>,
    status: DeliveryStatus,
    sent_at: DateTime<Utc>,
) -> PreferenceUpdate {
    match status {
        DeliveryStatus::Sent => PreferenceUpdate {
            last_sent_at: Some(sent_at),
            next_send_at: Some(next_send_time(frequency, sent_at)),
        },
        DeliveryStatus::Failed => PreferenceUpdate {
            last_sent_at: None,
            next_send_at: Some(sent_at + chrono::Duration::minutes(FAILED_DELIVERY_RETRY_MINUTES)),
        },
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
}
