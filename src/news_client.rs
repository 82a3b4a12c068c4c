use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use std::time;

use crate::domain::article::Article;
use crate::domain::topics::Category;

const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(10);
const API_KEY_HEADER: &str = "X-Api-Key";
// Placeholder title the news API uses for articles taken down after indexing.
const REMOVED_TITLE: &str = "[Removed]";

/// Source of candidate articles for a newsletter.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_articles(&self, categories: &[Category])
        -> Result<Vec<Article>, NewsClientError>;
}

/// Client for a NewsAPI compatible `/everything` search endpoint.
pub struct NewsClient {
    http_client: Client,
    base_url: String,
    api_key: Option<Secret<String>>,
    articles_per_category: u16,
    max_articles: usize,
}

#[derive(serde::Deserialize)]
struct SearchResponse {
    #[serde(default)]
    articles: Vec<ApiArticle>,
}

#[derive(serde::Deserialize)]
struct ApiArticle {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
}

#[derive(serde::Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[derive(thiserror::Error)]
pub enum NewsClientError {
    #[error("News client not configured: {0}")]
    NotConfigured(&'static str),
    #[error("News API rejected the request for {category} ({status}): {message}")]
    Rejected {
        category: Category,
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("Failed to reach the news API: {0}")]
    Request(#[from] reqwest::Error),
}

impl std::fmt::Debug for NewsClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

impl NewsClient {
    pub fn new(
        base_url: String,
        api_key: Option<Secret<String>>,
        articles_per_category: u16,
        max_articles: usize,
        timeout: Option<time::Duration>,
    ) -> Result<NewsClient, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(timeout.unwrap_or(REQUEST_TIMEOUT))
            .build()?;

        Ok(NewsClient {
            http_client,
            base_url,
            api_key,
            articles_per_category,
            max_articles,
        })
    }

    async fn search(
        &self,
        api_key: &Secret<String>,
        category: Category,
    ) -> Result<Vec<Article>, NewsClientError> {
        let url = format!("{}/everything", self.base_url);
        let page_size = self.articles_per_category.to_string();

        let response = self
            .http_client
            .get(&url)
            .header(API_KEY_HEADER, api_key.expose_secret())
            .query(&[
                ("q", category.as_str()),
                ("language", "en"),
                ("sortBy", "publishedAt"),
                ("pageSize", page_size.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let message = match response.json::<ApiErrorBody>().await {
                Ok(ApiErrorBody {
                    code: Some(code),
                    message: Some(message),
                }) => format!("{} ({})", message, code),
                Ok(ApiErrorBody {
                    message: Some(message),
                    ..
                }) => message,
                _ => String::from("Unknown"),
            };

            return Err(NewsClientError::Rejected {
                category,
                status,
                message,
            });
        }

        let body: SearchResponse = response.json().await?;

        Ok(body
            .articles
            .into_iter()
            .filter_map(|article| {
                let title = article.title.filter(|title| {
                    let title = title.trim();
                    !title.is_empty() && title != REMOVED_TITLE
                })?;
                let url = article.url.filter(|url| !url.trim().is_empty())?;

                Some(Article {
                    title,
                    description: article.description,
                    url,
                })
            })
            .collect())
    }
}

#[async_trait]
impl ContentFetcher for NewsClient {
    /// Searches every category in order and returns at most `max_articles` distinct articles.
    #[tracing::instrument(name = "Fetch articles for categories", skip(self))]
    async fn fetch_articles(
        &self,
        categories: &[Category],
    ) -> Result<Vec<Article>, NewsClientError> {
        let api_key = self
            .api_key
            .as_ref()
            .filter(|api_key| !api_key.expose_secret().trim().is_empty())
            .ok_or(NewsClientError::NotConfigured("api key missing"))?;

        let mut articles: Vec<Article> = Vec::new();
        for category in categories {
            for article in self.search(api_key, *category).await? {
                if !articles.iter().any(|existing| existing.url == article.url) {
                    articles.push(article);
                }
            }
        }
        articles.truncate(self.max_articles);

        tracing::info!("Fetched {} articles", articles.len());

        Ok(articles)
    }
}
