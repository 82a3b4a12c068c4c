use serde::{Deserialize, Serialize};

/// Content categories understood by the article source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Technology,
    Business,
    Politics,
    Science,
    Health,
    Sports,
    Entertainment,
    World,
}

/// Used for fetching and summarizing when a user's topics map to no known category.
pub const DEFAULT_CATEGORIES: [Category; 3] =
    [Category::Technology, Category::Business, Category::Politics];

const TOPIC_SEPARATORS: [char; 4] = [',', ';', '\n', '\r'];

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Technology => "technology",
            Category::Business => "business",
            Category::Politics => "politics",
            Category::Science => "science",
            Category::Health => "health",
            Category::Sports => "sports",
            Category::Entertainment => "entertainment",
            Category::World => "world",
        }
    }

    /// Maps a single user-written topic onto a category. The canonical name of every
    /// category maps to itself.
    pub fn from_topic(topic: &str) -> Option<Category> {
        let topic = topic
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        let category = match topic.as_str() {
            "technology" | "tech" | "ai" | "artificial intelligence" | "machine learning"
            | "ml" | "software" | "programming" | "startups" | "gadgets" | "crypto" => {
                Category::Technology
            }
            "business" | "finance" | "economy" | "economics" | "markets" | "stocks"
            | "investing" => Category::Business,
            "politics" | "policy" | "government" | "elections" => Category::Politics,
            "science" | "space" | "climate" | "research" => Category::Science,
            "health" | "medicine" | "fitness" | "wellness" => Category::Health,
            "sports" | "sport" | "football" | "soccer" | "basketball" | "tennis" | "f1" => {
                Category::Sports
            }
            "entertainment" | "movies" | "film" | "music" | "tv" | "gaming" | "culture" => {
                Category::Entertainment
            }
            "world" | "international" | "global" | "news" => Category::World,
            _ => return None,
        };

        Some(category)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turns the free-form topics a user saved into the list of known categories, in order of
/// first appearance and without duplicates. Unknown topics are dropped; an empty result is
/// left for the caller to replace with [`DEFAULT_CATEGORIES`].
pub fn normalize_topics(topics: &str) -> Vec<Category> {
    let mut categories: Vec<Category> = Vec::new();

    for category in topics
        .split(TOPIC_SEPARATORS.as_slice())
        .filter_map(Category::from_topic)
    {
        if !categories.contains(&category) {
            categories.push(category);
        }
    }

    categories
}

/// Joins categories back into the comma separated form users write topics in.
pub fn join_categories(categories: &[Category]) -> String {
    categories
        .iter()
        .map(Category::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
