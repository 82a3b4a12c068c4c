use fake::faker::internet::en::SafeEmail;
use fake::Fake;
use newsletter_engine::store::NewsletterStore;
use uuid::Uuid;

use crate::helpers::TestApp;

#[derive(serde::Deserialize)]
struct SyncUserResponse {
    id: Uuid,
}

#[tokio::test]
async fn sync_creates_the_user_then_updates_it() {
    let test_app = TestApp::spawn_app().await;
    let first_email: String = SafeEmail().fake();

    let created = test_app
        .post_user_sync(
            "kp_sync",
            serde_json::json!({ "email": first_email, "given_name": "Ada" }),
        )
        .await;
    assert_eq!(created.status().as_u16(), 200);
    let created: SyncUserResponse = created.json().await.expect("Invalid response body.");

    let updated = test_app
        .post_user_sync(
            "kp_sync",
            serde_json::json!({
                "email": "ADA@Example.com",
                "given_name": "Ada",
                "family_name": "Lovelace"
            }),
        )
        .await;
    assert_eq!(updated.status().as_u16(), 200);
    let updated: SyncUserResponse = updated.json().await.expect("Invalid response body.");

    assert_eq!(created.id, updated.id);
    let user = test_app
        .store
        .get_user_by_external_id("kp_sync")
        .await
        .unwrap()
        .expect("User was not stored.");
    assert_eq!(user.email.as_deref(), Some("ada@example.com"));
    assert_eq!(user.name.as_deref(), Some("Ada Lovelace"));
}

#[tokio::test]
async fn sync_returns_400_when_body_is_invalid() {
    let test_app = TestApp::spawn_app().await;
    let test_cases = vec![
        (serde_json::json!({ "given_name": "Ada" }), "missing email"),
        (serde_json::json!({ "email": "not-an-email" }), "invalid email"),
        (
            serde_json::json!({ "email": "ada@example.com", "given_name": "<script>" }),
            "invalid name",
        ),
    ];

    for (invalid_body, error_message) in test_cases {
        let response = test_app.post_user_sync("kp_invalid", invalid_body).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 status when payload was {}",
            error_message
        );
    }
}

#[tokio::test]
async fn sync_requires_authentication() {
    let test_app = TestApp::spawn_app().await;

    let response = reqwest::Client::new()
        .post(format!("{}/users/sync", test_app.address))
        .json(&serde_json::json!({ "email": "ada@example.com" }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(response.status().as_u16(), 401);
}
