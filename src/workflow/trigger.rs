use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::delivery_status::DeliveryStatus;

/// Request to generate and deliver one newsletter.
///
/// At least one of `user_id` and `external_id` must be present. When both are, `user_id` wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub user_id: Option<Uuid>,
    pub external_id: Option<String>,
    /// Overrides the saved topics for fetching and summarizing this run only.
    pub topics_inline: Option<String>,
}

impl TriggerEvent {
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn for_external_id(external_id: String, topics_inline: Option<String>) -> Self {
        Self {
            user_id: None,
            external_id: Some(external_id),
            topics_inline,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.user_id.is_none() && self.external_id().is_none() {
            return Err(String::from(
                "trigger must carry either a user id or an external id",
            ));
        }

        Ok(())
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external_id
            .as_deref()
            .map(str::trim)
            .filter(|external_id| !external_id.is_empty())
    }

    pub fn inline_topics(&self) -> Option<&str> {
        self.topics_inline
            .as_deref()
            .map(str::trim)
            .filter(|topics| !topics.is_empty())
    }
}

/// Which trigger source produced an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    OnDemand,
    Scheduled,
}

// Namespace for the ids of scheduled executions.
const SCHEDULED_EXECUTION_NAMESPACE: Uuid =
    Uuid::from_u128(0x6a1f_3c52_9e0d_4b7a_8f21_d4c6_0b93_e7a5);

/// One delivery attempt of a trigger. Redeliveries keep the id so completed steps are reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub id: Uuid,
    pub trigger: TriggerEvent,
    pub source: TriggerSource,
    /// Starts at 1.
    pub attempt: u32,
}

impl Execution {
    pub fn new(trigger: TriggerEvent, source: TriggerSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            source,
            attempt: 1,
        }
    }

    /// Execution for the slot `user_id` is due at. Every scan of the same slot yields the same
    /// id, so a run interrupted by a restart or abandoned after its retries resumes from the
    /// cached steps instead of starting over.
    pub fn scheduled(user_id: Uuid, due_at: DateTime<Utc>) -> Self {
        let slot = format!(
            "{}:{}",
            user_id,
            due_at.to_rfc3339_opts(SecondsFormat::Micros, true)
        );

        Self {
            id: Uuid::new_v5(&SCHEDULED_EXECUTION_NAMESPACE, slot.as_bytes()),
            trigger: TriggerEvent::for_user(user_id),
            source: TriggerSource::Scheduled,
            attempt: 1,
        }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    NoUser,
    NoPreferences,
    Paused,
    NoEmail,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            SkipReason::NoUser => "no user",
            SkipReason::NoPreferences => "no preferences",
            SkipReason::Paused => "paused",
            SkipReason::NoEmail => "no email",
        };

        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed {
        issue_id: Uuid,
        delivery_id: Uuid,
        status: DeliveryStatus,
    },
    Skipped(SkipReason),
}

/// Result of handing a newsletter to the email provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn sent() -> Self {
        Self {
            status: DeliveryStatus::Sent,
            error: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            error: Some(error),
        }
    }
}
