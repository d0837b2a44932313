use axum::{
    routing::{get, post},
    Router,
};
use crate::{handlers::attendance::*, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/check-in", post(check_in))
        .route("/:booking_id", get(get_attendance))
        .route("/:booking_id/qr", post(issue_qr_token))
        .route("/:booking_id/complete", post(complete_attendance))
        .route("/:booking_id/no-show", post(mark_no_show))
}
