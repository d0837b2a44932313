use axum::{
    routing::{get, post},
    Router,
};
use crate::{handlers::disputes::*, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_disputes).post(open_dispute))
        .route("/:id", get(get_dispute))
        .route("/:id/offers", post(submit_counter_offer))
        .route("/:id/offers/:offer_id/accept", post(accept_counter_offer))
        .route("/:id/escalate", post(escalate_dispute))
        .route("/:id/proposals/:rank/accept", post(accept_proposal))
        .route("/:id/verdict/accept", post(accept_verdict))
        .route("/:id/verdict/escalate", post(escalate_external))
        .route("/:id/withdraw", post(withdraw_dispute))
}
