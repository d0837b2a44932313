use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditDirection {
    Credit,
    Debit,
}

// Append-only ledger entry. Every money movement the protocol decides gets a
// trace here; the running balance lives on the user document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: String,
    pub direction: CreditDirection,
    pub amount: f64,
    pub currency: String,
    pub reason: String, // "vendor_payout", "platform_fee", "refund", "no_show_fee", "dispute_settlement"
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,
    pub created_at: DateTime<Utc>,
}
