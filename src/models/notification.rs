use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: String,
    pub notification_type: String, // "deposit_captured", "capture_failed", "dispute_phase", "dispute_resolved", "review_request"
    pub title: String,
    pub message: String,
    pub action_url: Option<String>,
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>, // "booking" or "dispute"
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub user_id: String,
    pub notification_ids: Option<Vec<String>>,
}
