use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::topics::Category;

/// Where the categories used to build an issue came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicsSource {
    Preference,
    Inline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueMetadata {
    /// Categories actually used for fetching and summarizing.
    pub topics: Vec<Category>,
    /// Number of articles the summary was built from.
    pub count: usize,
    pub generated_at: DateTime<Utc>,
    pub topics_source: TopicsSource,
    pub execution_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewIssue {
    pub subject: String,
    pub topics: Option<String>,
    pub html: String,
    pub metadata: IssueMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    pub subject: String,
    pub topics: Option<String>,
    pub html: String,
    pub metadata: IssueMetadata,
    pub created_at: DateTime<Utc>,
}
