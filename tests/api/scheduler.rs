use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use newsletter_engine::domain::delivery::{Delivery, NewDelivery};
use newsletter_engine::domain::delivery_status::DeliveryStatus;
use newsletter_engine::domain::issue::{Issue, NewIssue};
use newsletter_engine::domain::preference::{DueUser, Preference, PreferenceUpdate};
use newsletter_engine::domain::user::{NewUser, User};
use newsletter_engine::scheduler::{
    scan_due_users, DispatchError, Dispatcher, RetryPolicy, WorkflowWorker,
};
use newsletter_engine::store::{InMemoryStore, NewsletterStore, StoreError};
use newsletter_engine::workflow::steps::{step_key, ADVANCE_SCHEDULE};
use newsletter_engine::workflow::{StepCache, TriggerEvent, TriggerSource};

use crate::helpers::{TestApp, TestUser};

/// In-memory store whose deliveries table can be taken offline.
struct DeliveryOutage {
    inner: Arc<InMemoryStore>,
    down: AtomicBool,
}

impl DeliveryOutage {
    fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(true),
        }
    }

    fn recover(&self) {
        self.down.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl NewsletterStore for DeliveryOutage {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.inner.get_user(id).await
    }

    async fn get_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        self.inner.get_user_by_external_id(external_id).await
    }

    async fn upsert_user(&self, new_user: &NewUser) -> Result<User, StoreError> {
        self.inner.upsert_user(new_user).await
    }

    async fn get_preference(&self, user_id: Uuid) -> Result<Option<Preference>, StoreError> {
        self.inner.get_preference(user_id).await
    }

    async fn save_preference(&self, preference: &Preference) -> Result<(), StoreError> {
        self.inner.save_preference(preference).await
    }

    async fn update_preference(
        &self,
        user_id: Uuid,
        update: &PreferenceUpdate,
    ) -> Result<(), StoreError> {
        self.inner.update_preference(user_id, update).await
    }

    async fn create_issue(&self, new_issue: &NewIssue) -> Result<Issue, StoreError> {
        self.inner.create_issue(new_issue).await
    }

    async fn create_delivery(&self, new_delivery: &NewDelivery) -> Result<Delivery, StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidRow(String::from(
                "deliveries are unavailable",
            )));
        }

        self.inner.create_delivery(new_delivery).await
    }

    async fn due_users(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DueUser>, StoreError> {
        self.inner.due_users(now, limit).await
    }
}

async fn wait_until_released(dispatcher: &Dispatcher, user_id: Uuid) {
    for _ in 0..100 {
        if !dispatcher.is_in_flight(user_id).await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }

    panic!("Execution for user {} was never released", user_id);
}

#[tokio::test]
async fn scan_submits_only_due_unpaused_users() {
    let test_app = TestApp::spawn_app().await;
    let due = test_app.create_user(TestUser::default()).await;
    test_app
        .create_user(TestUser {
            paused: true,
            ..TestUser::default()
        })
        .await;
    test_app
        .create_user(TestUser {
            next_send_at: Some(Utc::now() + Duration::hours(1)),
            ..TestUser::default()
        })
        .await;
    test_app
        .create_user(TestUser {
            next_send_at: None,
            ..TestUser::default()
        })
        .await;
    test_app
        .create_user(TestUser {
            email: None,
            ..TestUser::default()
        })
        .await;
    let (dispatcher, mut receiver) = Dispatcher::new(16);

    let submitted = scan_due_users(test_app.store.as_ref(), &dispatcher, Utc::now(), 100)
        .await
        .unwrap();

    assert_eq!(submitted, 1);
    let execution = receiver.recv().await.unwrap();
    assert_eq!(execution.trigger.user_id, Some(due.id));
    assert_eq!(execution.source, TriggerSource::Scheduled);
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn scan_skips_users_with_an_execution_in_flight() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app.create_user(TestUser::default()).await;
    let (dispatcher, mut receiver) = Dispatcher::new(16);

    let first = scan_due_users(test_app.store.as_ref(), &dispatcher, Utc::now(), 100)
        .await
        .unwrap();
    let second = scan_due_users(test_app.store.as_ref(), &dispatcher, Utc::now(), 100)
        .await
        .unwrap();

    assert_eq!((first, second), (1, 0));
    assert!(dispatcher.is_in_flight(user.id).await);

    let execution = receiver.recv().await.unwrap();
    dispatcher.release(&execution).await;

    let third = scan_due_users(test_app.store.as_ref(), &dispatcher, Utc::now(), 100)
        .await
        .unwrap();
    assert_eq!(third, 1);
}

#[tokio::test]
async fn scheduled_execution_runs_and_releases_the_user() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app.create_user(TestUser::default()).await;
    test_app.mount_articles().await;
    test_app.mount_summary("Summary").await;
    test_app.mount_email(200, 1).await;

    let submitted = scan_due_users(
        test_app.store.as_ref(),
        &test_app.dispatcher,
        Utc::now(),
        100,
    )
    .await
    .unwrap();
    assert_eq!(submitted, 1);

    test_app.wait_for_deliveries(1).await;
    let preference = test_app.preference(user.id).await;
    assert!(preference.next_send_at.unwrap() > Utc::now());

    wait_until_released(&test_app.dispatcher, user.id).await;
}

#[tokio::test]
async fn rescanning_an_unfinished_slot_resumes_the_same_execution() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app.create_user(TestUser::default()).await;
    test_app.mount_articles().await;
    test_app.mount_summary("Summary").await;
    test_app.mount_email(200, 1).await;
    let due = test_app.preference(user.id).await;
    let workflow = test_app.workflow();

    let (dispatcher, mut receiver) = Dispatcher::new(16);
    scan_due_users(test_app.store.as_ref(), &dispatcher, Utc::now(), 100)
        .await
        .unwrap();
    let first = receiver.recv().await.unwrap();
    workflow.execute(&first).await.unwrap();

    // The process stops before the schedule advances, then starts over with an empty queue.
    test_app
        .step_cache
        .forget(&step_key(first.id, ADVANCE_SCHEDULE))
        .await
        .unwrap();
    test_app.store.save_preference(&due).await.unwrap();
    let (restarted, mut receiver) = Dispatcher::new(16);
    scan_due_users(test_app.store.as_ref(), &restarted, Utc::now(), 100)
        .await
        .unwrap();
    let resumed = receiver.recv().await.unwrap();
    workflow.execute(&resumed).await.unwrap();

    assert_eq!(resumed.id, first.id);
    assert_eq!(test_app.store.issues().await.len(), 1);
    assert_eq!(test_app.store.deliveries().await.len(), 1);
    assert!(test_app.preference(user.id).await.next_send_at.unwrap() > Utc::now());
}

#[tokio::test]
async fn abandoned_execution_resumes_on_the_next_scan_without_resending() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app.create_user(TestUser::default()).await;
    test_app.mount_articles().await;
    test_app.mount_summary("Summary").await;
    test_app.mount_email(200, 1).await;
    let store = Arc::new(DeliveryOutage::new(test_app.store.clone()));
    let (dispatcher, receiver) = Dispatcher::new(16);
    WorkflowWorker::new(
        Arc::new(test_app.workflow_with_store(store.clone())),
        dispatcher.clone(),
        receiver,
        4,
        RetryPolicy {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(10),
        },
    )
    .spawn();

    let submitted = scan_due_users(store.as_ref(), &dispatcher, Utc::now(), 100)
        .await
        .unwrap();
    assert_eq!(submitted, 1);
    wait_until_released(&dispatcher, user.id).await;

    assert_eq!(test_app.store.issues().await.len(), 1);
    assert!(test_app.store.deliveries().await.is_empty());

    store.recover();
    let submitted = scan_due_users(store.as_ref(), &dispatcher, Utc::now(), 100)
        .await
        .unwrap();
    assert_eq!(submitted, 1);
    test_app.wait_for_deliveries(1).await;

    assert_eq!(test_app.store.issues().await.len(), 1);
    let deliveries = test_app.store.deliveries().await;
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Sent);
}

#[tokio::test]
async fn worker_redelivers_after_a_transient_failure() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app
        .create_user(TestUser {
            topics: Some(String::from("sports")),
            ..TestUser::default()
        })
        .await;
    Mock::given(method("GET"))
        .and(path("/everything"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&test_app.news_server)
        .await;
    test_app.mount_articles().await;
    test_app.mount_summary("Summary").await;
    test_app.mount_email(200, 1).await;

    test_app
        .dispatcher
        .submit(TriggerEvent::for_user(user.id))
        .await
        .unwrap();

    test_app.wait_for_deliveries(1).await;
    assert_eq!(test_app.store.issues().await.len(), 1);
    assert_eq!(
        test_app.store.deliveries().await[0].status,
        DeliveryStatus::Sent
    );
}

#[tokio::test]
async fn dispatcher_rejects_malformed_triggers() {
    let test_app = TestApp::spawn_app().await;

    let error = test_app
        .dispatcher
        .submit(TriggerEvent {
            user_id: None,
            external_id: Some(String::from("  ")),
            topics_inline: Some(String::from("ai")),
        })
        .await
        .unwrap_err();

    assert!(matches!(error, DispatchError::MalformedTrigger(_)));
}
