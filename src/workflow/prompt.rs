use chrono::{DateTime, Utc};

use crate::domain::article::Article;
use crate::domain::frequency::Frequency;
use crate::domain::topics::{join_categories, Category};

pub const SYSTEM_PROMPT: &str = "You are an expert newsletter editor. Produce a concise, engaging, sectioned newsletter body (no HTML, plain text). Include short headers and bulleted takeaways. End with 3–5 quick links.";

/// Body used when the model returns nothing.
pub const FALLBACK_SUMMARY: &str = "No summary available.";

pub fn user_prompt(categories: &[Category], articles: &[Article]) -> String {
    let articles = articles
        .iter()
        .enumerate()
        .map(|(index, article)| {
            format!(
                "{}. {}\n{}\n{}\n",
                index + 1,
                article.title,
                article.description.as_deref().unwrap_or_default(),
                article.url
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Create a newsletter summary.\nTopics: {}\nArticles:\n{}",
        join_categories(categories),
        articles
    )
}

pub fn summary_or_fallback(summary: &str) -> String {
    match summary.trim() {
        "" => String::from(FALLBACK_SUMMARY),
        summary => summary.to_string(),
    }
}

pub fn subject(frequency: Option<Frequency>, date: DateTime<Utc>) -> String {
    format!(
        "Your {} AI Newsletter — {}",
        frequency.map(|frequency| frequency.label()).unwrap_or("daily"),
        date.format("%-m/%-d/%Y")
    )
}
