use std::future::{ready, Ready};

use actix_web::http::StatusCode;
use actix_web::{dev, web, FromRequest, HttpRequest, HttpResponse, ResponseError};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;

/// Header the upstream identity proxy sets to the caller's external user id.
pub const EXTERNAL_USER_ID_HEADER: &str = "X-External-User-Id";

/// Token every API call must present as `Authorization: Bearer <token>`.
///
/// Presented tokens are checked through an HMAC of the token, whose verification runs in
/// constant time.
pub struct ApiToken {
    mac: Hmac<Sha256>,
    tag: Vec<u8>,
    is_empty: bool,
}

impl ApiToken {
    pub fn new(token: &Secret<String>) -> Result<Self, hmac::digest::InvalidLength> {
        let token = token.expose_secret();
        let mac = Hmac::<Sha256>::new_from_slice(token.as_bytes())?;
        let tag = mac
            .clone()
            .chain_update(token.as_bytes())
            .finalize()
            .into_bytes()
            .to_vec();

        Ok(Self {
            mac,
            tag,
            is_empty: token.is_empty(),
        })
    }

    fn verify(&self, presented: &str) -> bool {
        !self.is_empty
            && self
                .mac
                .clone()
                .chain_update(presented.as_bytes())
                .verify_slice(&self.tag)
                .is_ok()
    }
}

/// Caller identified by the upstream identity proxy.
#[derive(Debug)]
pub struct AuthenticatedUser {
    pub external_id: String,
}

#[derive(thiserror::Error)]
pub enum AuthError {
    #[error("Missing or invalid bearer token.")]
    InvalidToken,
    #[error("Missing {} header.", EXTERNAL_USER_ID_HEADER)]
    MissingIdentity,
    #[error("API token is not registered for the application.")]
    NotConfigured,
}

impl std::fmt::Debug for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidToken | AuthError::MissingIdentity => StatusCode::UNAUTHORIZED,
            AuthError::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "error": "Unauthorized" }))
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut dev::Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

fn authenticate(req: &HttpRequest) -> Result<AuthenticatedUser, AuthError> {
    // Must be registered with the application at startup
    let api_token = req
        .app_data::<web::Data<ApiToken>>()
        .ok_or(AuthError::NotConfigured)?;

    let bearer = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(AuthError::InvalidToken)?;
    if !api_token.verify(bearer) {
        tracing::warn!("Rejected request with an invalid bearer token");
        return Err(AuthError::InvalidToken);
    }

    let external_id = req
        .headers()
        .get(EXTERNAL_USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|external_id| !external_id.is_empty())
        .ok_or(AuthError::MissingIdentity)?;

    Ok(AuthenticatedUser {
        external_id: external_id.to_string(),
    })
}
