use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use uuid::Uuid;

use crate::routes::auth::AuthenticatedUser;
use crate::scheduler::{DispatchError, Dispatcher};
use crate::workflow::TriggerEvent;

#[derive(serde::Serialize)]
struct TriggerResponse {
    ok: bool,
    event_id: Uuid,
}

/// Queues a newsletter for the caller and answers before it is generated.
#[tracing::instrument(
    name = "Trigger a newsletter on demand",
    skip(body, dispatcher, user),
    fields(external_id = %user.external_id)
)]
pub async fn trigger_newsletter(
    user: AuthenticatedUser,
    body: web::Bytes,
    dispatcher: web::Data<Dispatcher>,
) -> Result<HttpResponse, TriggerError> {
    let topics_inline = inline_topics(&body);
    let trigger = TriggerEvent::for_external_id(user.external_id, topics_inline);

    let event_id = dispatcher.submit(trigger).await?;

    Ok(HttpResponse::Ok().json(TriggerResponse { ok: true, event_id }))
}

/// Reads `topics` from the body. Anything other than a JSON object with a string `topics` means
/// no override.
fn inline_topics(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()?
        .get("topics")?
        .as_str()
        .map(String::from)
}

#[derive(thiserror::Error)]
pub enum TriggerError {
    #[error("Failed to submit the newsletter trigger.")]
    Dispatch(#[from] DispatchError),
}

impl std::fmt::Debug for TriggerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

impl ResponseError for TriggerError {
    fn status_code(&self) -> StatusCode {
        match self {
            TriggerError::Dispatch(DispatchError::MalformedTrigger(_)) => StatusCode::BAD_REQUEST,
            TriggerError::Dispatch(DispatchError::QueueClosed) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}
