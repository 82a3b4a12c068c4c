use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::user::NewUser;
use crate::domain::user_email::UserEmail;
use crate::domain::user_name::UserName;
use crate::routes::auth::AuthenticatedUser;
use crate::store::{NewsletterStore, StoreError};

/// Profile the identity provider returned at sign-in.
#[derive(Deserialize, Debug)]
pub struct SyncUserBody {
    pub email: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

#[derive(serde::Serialize)]
struct SyncUserResponse {
    id: Uuid,
}

impl SyncUserBody {
    fn into_new_user(self, external_id: String) -> Result<NewUser, String> {
        let email = UserEmail::parse(self.email)?;
        let name = UserName::from_parts(
            self.given_name.as_deref(),
            self.family_name.as_deref(),
            email.as_ref(),
        )?;

        Ok(NewUser {
            external_id,
            email,
            name: Some(name),
        })
    }
}

/// Creates the caller's user on first sign-in and refreshes its email and name afterwards.
#[tracing::instrument(
    name = "Sync a signed in user",
    skip(body, store, user),
    fields(external_id = %user.external_id)
)]
pub async fn sync_user(
    user: AuthenticatedUser,
    body: web::Json<SyncUserBody>,
    store: web::Data<Arc<dyn NewsletterStore>>,
) -> Result<HttpResponse, SyncUserError> {
    let new_user = body
        .into_inner()
        .into_new_user(user.external_id)
        .map_err(SyncUserError::Validation)?;

    let user = store.upsert_user(&new_user).await?;

    Ok(HttpResponse::Ok().json(SyncUserResponse { id: user.id }))
}

#[derive(thiserror::Error)]
pub enum SyncUserError {
    #[error("{0}")]
    Validation(String),
    #[error("Failed to store the user.")]
    Store(#[from] StoreError),
}

impl std::fmt::Debug for SyncUserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

impl ResponseError for SyncUserError {
    fn status_code(&self) -> StatusCode {
        match self {
            SyncUserError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncUserError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
