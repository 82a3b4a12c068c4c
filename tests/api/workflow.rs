use chrono::{Duration, NaiveTime, TimeZone, Utc};
use claim::assert_err;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use newsletter_engine::domain::delivery_status::DeliveryStatus;
use newsletter_engine::domain::frequency::{next_send_time, Frequency};
use newsletter_engine::domain::issue::TopicsSource;
use newsletter_engine::domain::topics::{Category, DEFAULT_CATEGORIES};
use newsletter_engine::store::NewsletterStore;
use newsletter_engine::workflow::steps::{step_key, ADVANCE_SCHEDULE, RECORD_DELIVERY};
use newsletter_engine::workflow::{
    Execution, ExecutionOutcome, SkipReason, StepCache, TriggerEvent, TriggerSource,
};

use crate::helpers::{TestApp, TestUser};

fn execution_for(user_id: Uuid) -> Execution {
    Execution::new(TriggerEvent::for_user(user_id), TriggerSource::OnDemand)
}

#[tokio::test]
async fn daily_newsletter_is_generated_sent_and_rescheduled() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app.create_user(TestUser::default()).await;
    test_app.mount_articles().await;
    test_app.mount_summary("## Tech\n- Chips are back").await;
    test_app.mount_email(200, 1).await;

    let outcome = test_app
        .workflow()
        .execute(&execution_for(user.id))
        .await
        .unwrap();

    let issues = test_app.store.issues().await;
    let deliveries = test_app.store.deliveries().await;
    assert_eq!(issues.len(), 1);
    assert_eq!(deliveries.len(), 1);

    let issue = &issues[0];
    let delivery = &deliveries[0];
    assert_eq!(
        outcome,
        ExecutionOutcome::Completed {
            issue_id: issue.id,
            delivery_id: delivery.id,
            status: DeliveryStatus::Sent,
        }
    );
    assert_eq!(issue.topics.as_deref(), Some("ai, sports"));
    assert!(issue.subject.starts_with("Your daily AI Newsletter — "));
    assert!(issue.html.contains("<li>Chips are back</li>"));
    assert_eq!(
        issue.metadata.topics,
        vec![Category::Technology, Category::Sports]
    );
    assert_eq!(issue.metadata.count, 2);
    assert_eq!(issue.metadata.topics_source, TopicsSource::Preference);

    assert_eq!(delivery.status, DeliveryStatus::Sent);
    assert!(delivery.error.is_none());
    assert_eq!(delivery.issue_id, issue.id);
    assert_eq!(delivery.topics.as_deref(), Some("ai, sports"));
    assert_eq!(delivery.to_email.as_deref(), Some("reader@example.com"));
    assert_eq!(delivery.subject, issue.subject);

    let preference = test_app.preference(user.id).await;
    let expected_next = Utc.from_utc_datetime(
        &(delivery.sent_at + Duration::days(1))
            .date_naive()
            .and_time(NaiveTime::from_hms_opt(14, 0, 0).unwrap()),
    );
    assert_eq!(preference.last_sent_at, Some(delivery.sent_at));
    assert_eq!(preference.next_send_at, Some(expected_next));
}

#[tokio::test]
async fn paused_preference_has_no_side_effects() {
    let test_app = TestApp::spawn_app().await;
    let next_send_at = Utc::now() - Duration::hours(2);
    let user = test_app
        .create_user(TestUser {
            paused: true,
            next_send_at: Some(next_send_at),
            ..TestUser::default()
        })
        .await;
    let before = test_app.preference(user.id).await;
    test_app.mount_email(200, 0).await;

    let outcome = test_app
        .workflow()
        .execute(&execution_for(user.id))
        .await
        .unwrap();

    assert_eq!(outcome, ExecutionOutcome::Skipped(SkipReason::Paused));
    assert!(test_app.store.issues().await.is_empty());
    assert!(test_app.store.deliveries().await.is_empty());
    assert_eq!(test_app.preference(user.id).await, before);
}

#[tokio::test]
async fn skipped_execution_sees_the_user_again_when_rerun() {
    let test_app = TestApp::spawn_app().await;
    let next_send_at = Utc::now() - Duration::hours(2);
    let user = test_app
        .create_user(TestUser {
            paused: true,
            next_send_at: Some(next_send_at),
            ..TestUser::default()
        })
        .await;
    test_app.mount_articles().await;
    test_app.mount_summary("Summary").await;
    test_app.mount_email(200, 1).await;
    let workflow = test_app.workflow();
    let execution = Execution::scheduled(user.id, next_send_at);

    let first = workflow.execute(&execution).await.unwrap();
    let mut preference = test_app.preference(user.id).await;
    preference.paused = false;
    test_app.store.save_preference(&preference).await.unwrap();
    let second = workflow.execute(&execution).await.unwrap();

    assert_eq!(first, ExecutionOutcome::Skipped(SkipReason::Paused));
    assert!(matches!(
        second,
        ExecutionOutcome::Completed {
            status: DeliveryStatus::Sent,
            ..
        }
    ));
    assert_eq!(test_app.store.issues().await.len(), 1);
}

#[tokio::test]
async fn executions_are_skipped_for_missing_user_preferences_or_email() {
    let test_app = TestApp::spawn_app().await;
    let without_email = test_app
        .create_user(TestUser {
            email: Some(String::from("   ")),
            ..TestUser::default()
        })
        .await;
    let workflow = test_app.workflow();

    let unknown_external_id = Execution::new(
        TriggerEvent::for_external_id(String::from("kp_unknown"), None),
        TriggerSource::OnDemand,
    );
    assert_eq!(
        workflow.execute(&unknown_external_id).await.unwrap(),
        ExecutionOutcome::Skipped(SkipReason::NoUser)
    );
    assert_eq!(
        workflow.execute(&execution_for(Uuid::new_v4())).await.unwrap(),
        ExecutionOutcome::Skipped(SkipReason::NoPreferences)
    );
    assert_eq!(
        workflow.execute(&execution_for(without_email.id)).await.unwrap(),
        ExecutionOutcome::Skipped(SkipReason::NoEmail)
    );
    assert!(test_app.store.issues().await.is_empty());
}

#[tokio::test]
async fn topics_snapshot_is_kept_verbatim_when_default_categories_are_used() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app
        .create_user(TestUser {
            topics: Some(String::from("  knitting, birdwatching ")),
            ..TestUser::default()
        })
        .await;
    test_app.mount_articles().await;
    test_app.mount_summary("Summary").await;
    test_app.mount_email(200, 1).await;

    test_app
        .workflow()
        .execute(&execution_for(user.id))
        .await
        .unwrap();

    let issues = test_app.store.issues().await;
    let issue = &issues[0];
    let deliveries = test_app.store.deliveries().await;
    let delivery = &deliveries[0];
    assert_eq!(issue.topics.as_deref(), Some("knitting, birdwatching"));
    assert_eq!(delivery.topics.as_deref(), Some("knitting, birdwatching"));
    assert_eq!(issue.metadata.topics, DEFAULT_CATEGORIES.to_vec());
}

#[tokio::test]
async fn blank_summary_is_replaced_by_the_fallback() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app
        .create_user(TestUser {
            frequency: Some(Frequency::Monthly),
            ..TestUser::default()
        })
        .await;
    test_app.mount_articles().await;
    test_app.mount_summary("   ").await;
    test_app.mount_email(200, 1).await;

    test_app
        .workflow()
        .execute(&execution_for(user.id))
        .await
        .unwrap();

    let issues = test_app.store.issues().await;
    let issue = &issues[0];
    assert!(issue.subject.starts_with("Your monthly AI Newsletter"));
    assert!(issue.html.contains("<p>No summary available.</p>"));
}

#[tokio::test]
async fn failed_delivery_is_recorded_and_retried_in_fifteen_minutes() {
    let test_app = TestApp::spawn_app().await;
    let last_sent_at = Utc::now() - Duration::days(2);
    let user = test_app
        .create_user(TestUser {
            last_sent_at: Some(last_sent_at),
            ..TestUser::default()
        })
        .await;
    test_app.mount_articles().await;
    test_app.mount_summary("Summary").await;
    test_app.mount_email(500, 1).await;

    let outcome = test_app
        .workflow()
        .execute(&execution_for(user.id))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        ExecutionOutcome::Completed {
            status: DeliveryStatus::Failed,
            ..
        }
    ));
    assert_eq!(test_app.store.issues().await.len(), 1);
    let deliveries = test_app.store.deliveries().await;
    let delivery = &deliveries[0];
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert!(delivery.error.is_some());

    let preference = test_app.preference(user.id).await;
    assert_eq!(preference.last_sent_at, Some(last_sent_at));
    assert_eq!(
        preference.next_send_at,
        Some(delivery.sent_at + Duration::minutes(15))
    );
}

#[tokio::test]
async fn slow_email_provider_becomes_a_failed_delivery() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app.create_user(TestUser::default()).await;
    test_app.mount_articles().await;
    test_app.mount_summary("Summary").await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(2)))
        .mount(&test_app.email_server)
        .await;

    test_app
        .workflow_with_step_timeout(std::time::Duration::from_millis(300))
        .execute(&execution_for(user.id))
        .await
        .unwrap();

    let deliveries = test_app.store.deliveries().await;
    let delivery = &deliveries[0];
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert!(delivery
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("timed out"));
}

#[tokio::test]
async fn successful_delivery_follows_the_frequency() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app
        .create_user(TestUser {
            frequency: Some(Frequency::Biweekly),
            ..TestUser::default()
        })
        .await;
    test_app.mount_articles().await;
    test_app.mount_summary("Summary").await;
    test_app.mount_email(200, 1).await;

    test_app
        .workflow()
        .execute(&execution_for(user.id))
        .await
        .unwrap();

    let deliveries = test_app.store.deliveries().await;
    let delivery = &deliveries[0];
    let preference = test_app.preference(user.id).await;
    assert_eq!(preference.last_sent_at, Some(delivery.sent_at));
    assert_eq!(
        preference.next_send_at,
        Some(next_send_time(Some(Frequency::Biweekly), delivery.sent_at))
    );
}

#[tokio::test]
async fn resumed_execution_does_not_duplicate_the_issue_or_the_email() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app.create_user(TestUser::default()).await;
    test_app.mount_articles().await;
    test_app.mount_summary("Summary").await;
    test_app.mount_email(200, 1).await;
    let workflow = test_app.workflow();
    let execution = execution_for(user.id);

    workflow.execute(&execution).await.unwrap();
    // Forget everything after the email went out, as if the process died right after sending.
    test_app
        .step_cache
        .forget(&step_key(execution.id, RECORD_DELIVERY))
        .await
        .unwrap();
    test_app
        .step_cache
        .forget(&step_key(execution.id, ADVANCE_SCHEDULE))
        .await
        .unwrap();
    workflow.execute(&execution).await.unwrap();

    let issues = test_app.store.issues().await;
    let deliveries = test_app.store.deliveries().await;
    assert_eq!(issues.len(), 1);
    assert_eq!(deliveries.len(), 2);
    assert!(deliveries
        .iter()
        .all(|delivery| delivery.issue_id == issues[0].id));
}

#[tokio::test]
async fn transient_fetch_failure_is_resumed_with_a_single_issue() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app
        .create_user(TestUser {
            topics: Some(String::from("ai")),
            ..TestUser::default()
        })
        .await;
    Mock::given(method("GET"))
        .and(path("/everything"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&test_app.news_server)
        .await;
    test_app.mount_articles().await;
    test_app.mount_summary("Summary").await;
    test_app.mount_email(200, 1).await;
    let workflow = test_app.workflow();
    let execution = execution_for(user.id);

    assert_err!(workflow.execute(&execution).await);
    assert!(test_app.store.issues().await.is_empty());

    let outcome = workflow.execute(&execution.next_attempt()).await.unwrap();

    assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
    assert_eq!(test_app.store.issues().await.len(), 1);
    assert_eq!(test_app.store.deliveries().await.len(), 1);
}

#[tokio::test]
async fn unreadable_cached_step_is_run_again() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app.create_user(TestUser::default()).await;
    test_app.mount_articles().await;
    test_app.mount_summary("Summary").await;
    test_app.mount_email(200, 1).await;
    let execution = execution_for(user.id);
    test_app
        .step_cache
        .insert_raw(
            &step_key(execution.id, "fetch-news"),
            serde_json::json!({ "not": "a list of articles" }),
        )
        .await;

    test_app.workflow().execute(&execution).await.unwrap();

    assert_eq!(test_app.store.issues().await[0].metadata.count, 2);
}
