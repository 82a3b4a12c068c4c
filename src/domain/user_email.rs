use validator::validate_email;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct UserEmail(String);

impl UserEmail {
    /// Trims and lower-cases the address before validating it, so the stored value is the one
    /// the delivery provider will receive.
    pub fn parse(email: String) -> Result<UserEmail, String> {
        let email = email.trim().to_lowercase();

        if !validate_email(&email) {
            return Err(format!("{} email is not valid", email));
        }

        Ok(Self(email))
    }
}

impl AsRef<str> for UserEmail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
