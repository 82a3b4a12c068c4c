use newsletter_engine::domain::delivery_status::DeliveryStatus;
use newsletter_engine::domain::issue::TopicsSource;
use newsletter_engine::domain::topics::Category;
use newsletter_engine::routes::EXTERNAL_USER_ID_HEADER;
use uuid::Uuid;

use crate::helpers::{TestApp, TestUser};

#[derive(serde::Deserialize)]
struct TriggerResponse {
    ok: bool,
    event_id: Uuid,
}

#[tokio::test]
async fn trigger_queues_a_newsletter_for_the_caller() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app.create_user(TestUser::default()).await;
    test_app.mount_articles().await;
    test_app.mount_summary("Summary").await;
    test_app.mount_email(200, 1).await;

    let response = test_app
        .post_trigger(Some(&user.external_id), String::from("{}"))
        .await;

    assert_eq!(response.status().as_u16(), 200);
    let body: TriggerResponse = response.json().await.expect("Invalid response body.");
    assert!(body.ok);

    test_app.wait_for_deliveries(1).await;
    let issues = test_app.store.issues().await;
    assert_eq!(issues[0].metadata.execution_id, body.event_id);
    assert_eq!(
        test_app.store.deliveries().await[0].status,
        DeliveryStatus::Sent
    );
}

#[tokio::test]
async fn inline_topics_steer_the_content_but_not_the_snapshot() {
    let test_app = TestApp::spawn_app().await;
    let user = test_app.create_user(TestUser::default()).await;
    test_app.mount_articles().await;
    test_app.mount_summary("Summary").await;
    test_app.mount_email(200, 1).await;

    let response = test_app
        .post_trigger(
            Some(&user.external_id),
            serde_json::json!({ "topics": "health" }).to_string(),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    test_app.wait_for_deliveries(1).await;
    let issues = test_app.store.issues().await;
    assert_eq!(issues[0].metadata.topics, vec![Category::Health]);
    assert_eq!(issues[0].metadata.topics_source, TopicsSource::Inline);
    assert_eq!(issues[0].topics.as_deref(), Some("ai, sports"));
}

#[tokio::test]
async fn trigger_accepts_bodies_without_usable_topics() {
    let test_app = TestApp::spawn_app().await;
    let test_cases = vec![
        (String::new(), "empty body"),
        (String::from("not json"), "invalid json"),
        (
            serde_json::json!({ "topics": ["ai"] }).to_string(),
            "non string topics",
        ),
    ];

    for (body, description) in test_cases {
        let response = test_app.post_trigger(Some("kp_unknown"), body).await;

        assert_eq!(
            200,
            response.status().as_u16(),
            "The API did not accept the trigger when the body was {}",
            description
        );
    }
}

#[tokio::test]
async fn trigger_requires_authentication() {
    let test_app = TestApp::spawn_app().await;
    let client = reqwest::Client::new();
    let url = format!("{}/newsletters/trigger", test_app.address);

    let without_token = client
        .post(&url)
        .header(EXTERNAL_USER_ID_HEADER, "kp_123")
        .send()
        .await
        .expect("Failed to execute request.");
    let wrong_token = client
        .post(&url)
        .bearer_auth("not-the-token")
        .header(EXTERNAL_USER_ID_HEADER, "kp_123")
        .send()
        .await
        .expect("Failed to execute request.");
    let without_identity = test_app.post_trigger(None, String::from("{}")).await;

    for (response, description) in [
        (without_token, "no token"),
        (wrong_token, "a wrong token"),
        (without_identity, "no identity header"),
    ] {
        assert_eq!(
            401,
            response.status().as_u16(),
            "The API did not fail with 401 when the request had {}",
            description
        );
    }
}
