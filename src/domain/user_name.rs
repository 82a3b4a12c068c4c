use unicode_segmentation::UnicodeSegmentation;

const MAX_CHAR_LENGHT: usize = 256;
const FORBIDDEN_CHARS: [char; 9] = ['/', '{', '}', '"', '>', '<', '\\', '(', ')'];

/// Display name shown in the greeting of a newsletter and stored as the recipient snapshot.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct UserName(String);

impl UserName {
    pub fn parse(name: String) -> Result<UserName, String> {
        let name = name.trim().to_string();
        let is_empty = name.is_empty();
        let is_too_long = name.graphemes(true).count() > MAX_CHAR_LENGHT;
        let contains_forbidden_chars = name.chars().any(|char| FORBIDDEN_CHARS.contains(&char));

        if is_empty || is_too_long || contains_forbidden_chars {
            return Err(format!("{} is not a valid user name", name));
        }

        Ok(Self(name))
    }

    /// Builds the display name from the identity provider's given and family names, falling
    /// back to the email address when both are missing.
    pub fn from_parts(
        given_name: Option<&str>,
        family_name: Option<&str>,
        email: &str,
    ) -> Result<UserName, String> {
        let full_name = format!(
            "{} {}",
            given_name.unwrap_or_default().trim(),
            family_name.unwrap_or_default().trim()
        );

        if full_name.trim().is_empty() {
            return Self::parse(email.to_string());
        }

        Self::parse(full_name)
    }
}

impl AsRef<str> for UserName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
