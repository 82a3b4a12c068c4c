use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::delivery_status::DeliveryStatus;

#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub user_id: Uuid,
    pub issue_id: Uuid,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub subject: String,
    pub to_email: Option<String>,
    pub to_name: Option<String>,
    pub topics: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub user_id: Uuid,
    pub issue_id: Uuid,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub subject: String,
    pub to_email: Option<String>,
    pub to_name: Option<String>,
    pub topics: Option<String>,
    pub sent_at: DateTime<Utc>,
}
