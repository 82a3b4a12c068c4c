use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::user_email::UserEmail;
use crate::domain::user_name::UserName;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Identifier assigned by the external identity provider.
    pub external_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl User {
    /// The address a newsletter can be sent to, if the user has one.
    pub fn deliverable_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }
}

/// Fields written when a user signs in; the user is created if the external id is unknown.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub external_id: String,
    pub email: UserEmail,
    pub name: Option<UserName>,
}
