use axum::{
    extract::{Path, State},
    response::Json,
};
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId},
    Collection,
};
use serde_json::json;

use crate::{
    errors::Result,
    models::notification::{MarkReadRequest, Notification},
    state::AppState,
};

// Get a user's notifications, newest first
pub async fn get_user_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Notification>>> {
    let collection: Collection<Notification> = state.db.collection("notifications");
    let filter = doc! { "user_id": &user_id };

    let cursor = collection.find(filter).await?;
    let mut notifications: Vec<Notification> = cursor.try_collect().await?;

    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    notifications.truncate(50);

    Ok(Json(notifications))
}

// Mark notifications as read
pub async fn mark_notifications_read(
    State(state): State<AppState>,
    Json(payload): Json<MarkReadRequest>,
) -> Result<Json<serde_json::Value>> {
    let collection: Collection<Notification> = state.db.collection("notifications");

    let mut filter = doc! { "user_id": &payload.user_id };

    if let Some(ids) = &payload.notification_ids {
        let object_ids: Vec<ObjectId> = ids
            .iter()
            .filter_map(|id| ObjectId::parse_str(id).ok())
            .collect();
        filter.insert("_id", doc! { "$in": object_ids });
    }

    let update = doc! { "$set": { "is_read": true } };
    let result = collection.update_many(filter, update).await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Marked {} notifications as read", result.modified_count),
        "modified_count": result.modified_count,
    })))
}
