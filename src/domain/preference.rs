use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::frequency::Frequency;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub user_id: Uuid,
    /// Topics exactly as the user wrote them.
    pub topics: Option<String>,
    pub paused: bool,
    /// `None` when nothing, or something unrecognised, is stored.
    pub frequency: Option<Frequency>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub next_send_at: Option<DateTime<Utc>>,
}

impl Preference {
    /// The topics captured into issues and deliveries: trimmed, and `None` when blank.
    pub fn topics_snapshot(&self) -> Option<String> {
        self.topics
            .as_deref()
            .map(str::trim)
            .filter(|topics| !topics.is_empty())
            .map(String::from)
    }
}

/// Schedule fields written after an execution. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceUpdate {
    pub last_sent_at: Option<DateTime<Utc>>,
    pub next_send_at: Option<DateTime<Utc>>,
}

/// A user whose newsletter is due, with the slot it is due for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueUser {
    pub user_id: Uuid,
    pub next_send_at: DateTime<Utc>,
}
