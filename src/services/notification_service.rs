// services/notification_service.rs
//
// Fire-and-forget notification store. Callers log and move on if an insert
// fails; a lost notification never blocks a money-moving transition.
use chrono::Utc;
use mongodb::{Collection, Database};

use crate::errors::Result;
use crate::models::notification::Notification;

pub async fn create_notification(
    db: &Database,
    user_id: &str,
    notification_type: &str,
    title: &str,
    message: &str,
    action_url: Option<String>,
    related_entity_id: Option<String>,
    related_entity_type: Option<String>,
) -> Result<()> {
    let collection: Collection<Notification> = db.collection("notifications");

    let notification = Notification {
        id: None,
        user_id: user_id.to_string(),
        notification_type: notification_type.to_string(),
        title: title.to_string(),
        message: message.to_string(),
        action_url,
        related_entity_id,
        related_entity_type,
        is_read: false,
        created_at: Utc::now(),
    };

    collection.insert_one(&notification).await?;
    Ok(())
}

/// Fire-and-forget wrapper used at transition call sites.
pub async fn notify_booking_event(
    db: &Database,
    user_id: &str,
    notification_type: &str,
    title: &str,
    message: &str,
    booking_id: &str,
) {
    if let Err(e) = create_notification(
        db,
        user_id,
        notification_type,
        title,
        message,
        Some(format!("/bookings/{}", booking_id)),
        Some(booking_id.to_string()),
        Some("booking".to_string()),
    )
    .await
    {
        tracing::warn!("Failed to create booking notification for {}: {}", user_id, e);
    }
}

pub async fn notify_dispute_event(
    db: &Database,
    user_id: &str,
    notification_type: &str,
    title: &str,
    message: &str,
    dispute_id: &str,
) {
    if let Err(e) = create_notification(
        db,
        user_id,
        notification_type,
        title,
        message,
        Some(format!("/disputes/{}", dispute_id)),
        Some(dispute_id.to_string()),
        Some("dispute".to_string()),
    )
    .await
    {
        tracing::warn!("Failed to create dispute notification for {}: {}", user_id, e);
    }
}
