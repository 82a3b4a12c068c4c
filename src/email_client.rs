use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use std::time;

use crate::domain::user_email::UserEmail;

const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// Sends a rendered newsletter to a single recipient.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        html_content: &str,
    ) -> Result<(), EmailClientError>;
}

/// Client for a Resend compatible email API.
///
/// Sender and API key are optional so the service can start without them; sending then fails
/// with [`EmailClientError::NotConfigured`] before any request leaves the process.
pub struct EmailClient {
    http_client: Client,
    base_url: String,
    sender: Option<UserEmail>,
    api_key: Option<Secret<String>>,
}

#[derive(serde::Serialize)]
struct SendEmailBody<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
}

#[derive(serde::Deserialize)]
struct ApiErrorBody {
    name: Option<String>,
    message: Option<String>,
}

#[derive(thiserror::Error)]
pub enum EmailClientError {
    #[error("Email client not configured: {0}")]
    NotConfigured(&'static str),
    #[error("Recipient is not valid: {0}")]
    InvalidRecipient(String),
    #[error("Email API rejected the request ({status}): {message}")]
    Rejected {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("Failed to reach the email API: {0}")]
    Request(#[from] reqwest::Error),
}

impl std::fmt::Debug for EmailClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

impl EmailClient {
    pub fn new(
        base_url: String,
        sender: Option<UserEmail>,
        api_key: Option<Secret<String>>,
        timeout: Option<time::Duration>,
    ) -> Result<EmailClient, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(timeout.unwrap_or(REQUEST_TIMEOUT))
            .build()?;

        Ok(EmailClient {
            http_client,
            base_url,
            sender,
            api_key,
        })
    }
}

#[async_trait]
impl EmailSender for EmailClient {
    #[tracing::instrument(name = "Send an email", skip(self, html_content), fields(recipient = %recipient))]
    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        html_content: &str,
    ) -> Result<(), EmailClientError> {
        let api_key = self
            .api_key
            .as_ref()
            .filter(|api_key| !api_key.expose_secret().trim().is_empty())
            .ok_or(EmailClientError::NotConfigured("api key missing"))?;
        let sender = self
            .sender
            .as_ref()
            .ok_or(EmailClientError::NotConfigured("sender email missing"))?;
        let recipient =
            UserEmail::parse(recipient.to_string()).map_err(EmailClientError::InvalidRecipient)?;

        let url = format!("{}/emails", self.base_url);
        let body = SendEmailBody {
            from: sender.as_ref(),
            to: vec![recipient.as_ref()],
            subject,
            html: html_content,
        };

        let response = self
            .http_client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let message = match response.json::<ApiErrorBody>().await {
                Ok(ApiErrorBody {
                    name: Some(name),
                    message: Some(message),
                }) => format!("{} ({})", message, name),
                Ok(ApiErrorBody {
                    message: Some(message),
                    ..
                }) => message,
                Ok(ApiErrorBody {
                    name: Some(name), ..
                }) => name,
                _ => String::from("Unknown"),
            };
            tracing::error!("Email API returned {}: {}", status, message);

            return Err(EmailClientError::Rejected { status, message });
        }

        Ok(())
    }
}
