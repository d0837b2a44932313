use axum::{routing::post, Router};
use crate::{handlers::cron::*, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/captures/run", post(run_due_captures))
        .route("/disputes/advance", post(advance_due_disputes))
        .route("/bookings/auto-cancel", post(auto_cancel_stale_bookings))
}
