mod auth;
mod health_check;
mod trigger;
mod users;

pub use auth::{ApiToken, AuthError, AuthenticatedUser, EXTERNAL_USER_ID_HEADER};
pub use health_check::health_check;
pub use trigger::{trigger_newsletter, TriggerError};
pub use users::{sync_user, SyncUserBody, SyncUserError};
