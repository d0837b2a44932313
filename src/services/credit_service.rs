// services/credit_service.rs
//
// Credit/points ledger: an append-only entry per movement plus a running
// balance on the user document. Treated as atomic by the protocol.
use chrono::Utc;
use mongodb::{
    bson::doc,
    Collection, Database,
};

use crate::errors::Result;
use crate::models::credit::{CreditDirection, CreditEntry};

/// Internal account that collects platform fees.
pub const PLATFORM_ACCOUNT: &str = "platform";

pub async fn add_credits(
    db: &Database,
    user_id: &str,
    amount: f64,
    currency: &str,
    reason: &str,
    related_entity_id: Option<String>,
    related_entity_type: Option<String>,
) -> Result<()> {
    apply(
        db,
        user_id,
        CreditDirection::Credit,
        amount,
        currency,
        reason,
        related_entity_id,
        related_entity_type,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn apply(
    db: &Database,
    user_id: &str,
    direction: CreditDirection,
    amount: f64,
    currency: &str,
    reason: &str,
    related_entity_id: Option<String>,
    related_entity_type: Option<String>,
) -> Result<()> {
    let entries: Collection<CreditEntry> = db.collection("credit_ledger");

    let entry = CreditEntry {
        id: None,
        user_id: user_id.to_string(),
        direction,
        amount,
        currency: currency.to_string(),
        reason: reason.to_string(),
        related_entity_id,
        related_entity_type,
        created_at: Utc::now(),
    };

    entries.insert_one(&entry).await?;

    let delta = match direction {
        CreditDirection::Credit => amount,
        CreditDirection::Debit => -amount,
    };

    let users: Collection<mongodb::bson::Document> = db.collection("users");
    users
        .update_one(
            doc! { "id": user_id },
            doc! { "$inc": { "credit_balance": delta } },
        )
        .upsert(true)
        .await?;

    Ok(())
}
