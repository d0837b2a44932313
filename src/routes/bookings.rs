use axum::{
    routing::{get, post},
    Router,
};
use crate::{handlers::bookings::*, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_bookings).post(create_booking))
        .route("/:id", get(get_booking))
        .route("/:id/deposit", post(deposit_paid))
        .route("/:id/cash-on-site", post(cash_on_site))
        .route("/:id/schedule-capture", post(schedule_capture))
        .route("/:id/capture", post(capture_booking))
        .route("/:id/retry-capture", post(retry_capture))
        .route("/:id/cancel", post(cancel_booking))
}
