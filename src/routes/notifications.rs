use axum::{
    routing::{get, put},
    Router,
};
use crate::{handlers::notifications::*, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/user/:user_id", get(get_user_notifications))
        .route("/read", put(mark_notifications_read))
}
