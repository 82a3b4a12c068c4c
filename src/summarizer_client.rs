use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use std::time;

const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(60);

/// Generates the newsletter body from a system instruction and a user prompt.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Returns the generated text, which may be empty when the model produced nothing usable.
    async fn summarize(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, SummarizerError>;
}

/// Client for an OpenAI compatible chat completions API.
pub struct SummarizerClient {
    http_client: Client,
    base_url: String,
    api_key: Option<Secret<String>>,
    model: String,
}

#[derive(serde::Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(serde::Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(serde::Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(serde::Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(serde::Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(thiserror::Error)]
pub enum SummarizerError {
    #[error("Summarizer not configured: {0}")]
    NotConfigured(&'static str),
    #[error("Summarizer API rejected the request ({0})")]
    Rejected(reqwest::StatusCode),
    #[error("Failed to reach the summarizer API: {0}")]
    Request(#[from] reqwest::Error),
}

impl std::fmt::Debug for SummarizerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

impl SummarizerClient {
    pub fn new(
        base_url: String,
        api_key: Option<Secret<String>>,
        model: String,
        timeout: Option<time::Duration>,
    ) -> Result<SummarizerClient, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(timeout.unwrap_or(REQUEST_TIMEOUT))
            .build()?;

        Ok(SummarizerClient {
            http_client,
            base_url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Summarizer for SummarizerClient {
    #[tracing::instrument(
        name = "Summarize articles",
        skip(self, system_prompt, user_prompt),
        fields(model = %self.model)
    )]
    async fn summarize(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, SummarizerError> {
        let api_key = self
            .api_key
            .as_ref()
            .filter(|api_key| !api_key.expose_secret().trim().is_empty())
            .ok_or(SummarizerError::NotConfigured("api key missing"))?;

        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionBody {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(SummarizerError::Rejected(status));
        }

        let completion: ChatCompletionResponse = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default();

        Ok(content.trim().to_string())
    }
}
