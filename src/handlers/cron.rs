// handlers/cron.rs
//
// Endpoints for the external scheduler. Each run takes "now" once, finds the
// work that is due, and replays the same idempotent operations the regular
// endpoints use; a failed item is logged and skipped, never retried here.
use axum::{extract::State, response::Json};
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::{bson::doc, Collection};
use serde_json::{json, Value};

use crate::{
    errors::Result,
    handlers::bookings::{apply_cancellation_effects, attempt_capture_for, persist_booking},
    handlers::disputes,
    models::booking::{Booking, CancellationReason, PaymentState},
    models::dispute::{Dispute, DisputePhase},
    services::dispute_ladder,
    services::payment_protocol,
    state::AppState,
};

// Run all captures that have come due
pub async fn run_due_captures(State(state): State<AppState>) -> Result<Json<Value>> {
    let now = Utc::now();
    let collection: Collection<Booking> = state.db.collection("bookings");

    let cursor = collection
        .find(doc! { "payment_state": PaymentState::CaptureScheduled.as_str() })
        .await?;
    let scheduled: Vec<Booking> = cursor.try_collect().await?;

    let due: Vec<Booking> = scheduled
        .into_iter()
        .filter(|b| b.capture_due_at.map(|due| due <= now).unwrap_or(false))
        .collect();

    let mut captured = 0;
    let mut failed = 0;
    let mut skipped = 0;

    for booking in due {
        let booking_hex = booking.id.map(|id| id.to_hex()).unwrap_or_default();
        match attempt_capture_for(&state, booking, now).await {
            Ok(result) if result.new_state == Some(PaymentState::FullyPaid) => captured += 1,
            Ok(result) if result.new_state == Some(PaymentState::CaptureFailed) => failed += 1,
            Ok(result) => {
                tracing::warn!("Capture skipped for {}: {}", booking_hex, result.message);
                skipped += 1;
            }
            Err(e) => {
                tracing::error!("Capture run error for {}: {}", booking_hex, e);
                skipped += 1;
            }
        }
    }

    // Sweep attempts that never settled (crashed process or lost final
    // write) into CAPTURE_FAILED so the manual retry path applies.
    let cursor = collection
        .find(doc! { "payment_state": PaymentState::CaptureAttempted.as_str() })
        .await?;
    let attempted: Vec<Booking> = cursor.try_collect().await?;

    let mut written_off = 0;
    for mut booking in attempted {
        let Some(oid) = booking.id else {
            continue;
        };

        let previous = booking.payment_state;
        let result = payment_protocol::fail_stale_capture(&mut booking, now);
        if !result.success {
            continue;
        }

        match persist_booking(&collection, oid, previous, &booking).await {
            Ok(true) => {
                tracing::warn!("⚠️ Wrote off stale capture attempt {}", oid.to_hex());
                written_off += 1;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!("Stale capture sweep error for {}: {}", oid.to_hex(), e);
            }
        }
    }

    tracing::info!(
        "⏰ Capture run: {} captured, {} failed, {} skipped, {} written off",
        captured,
        failed,
        skipped,
        written_off
    );

    Ok(Json(json!({
        "success": true,
        "captured": captured,
        "failed": failed,
        "skipped": skipped,
        "written_off": written_off,
        "timestamp": now.to_rfc3339(),
    })))
}

// Advance all disputes whose phase deadline has passed
pub async fn advance_due_disputes(State(state): State<AppState>) -> Result<Json<Value>> {
    let now = Utc::now();
    let collection: Collection<Dispute> = state.db.collection("disputes");

    let cursor = collection
        .find(doc! { "status": { "$in": ["open", "under_review"] } })
        .await?;
    let open: Vec<Dispute> = cursor.try_collect().await?;

    let expired: Vec<Dispute> = open
        .into_iter()
        .filter(|d| dispute_ladder::is_phase_expired(d, now))
        .collect();

    let mut advanced = 0;
    let mut resolved = 0;
    let mut stuck = 0;

    for dispute in expired {
        let dispute_hex = dispute.id.map(|id| id.to_hex()).unwrap_or_default();
        let phase = dispute.current_phase;

        let outcome = match phase {
            DisputePhase::Phase1 => disputes::escalate_to_mediation(&state, dispute, now).await,
            DisputePhase::Phase2 => disputes::escalate_to_binding(&state, dispute, now).await,
            DisputePhase::Phase3Pending => {
                disputes::attach_pending_verdict(&state, dispute, now).await
            }
            // Review window over: the verdict applies
            DisputePhase::Phase3Ai => disputes::apply_verdict(&state, dispute, now).await,
            // External arbitration has no automated deadline handling
            DisputePhase::Phase3External | DisputePhase::Resolved => continue,
        };

        match outcome {
            Ok(result) if result.success => {
                if result.new_phase == Some(DisputePhase::Resolved) {
                    resolved += 1;
                } else {
                    advanced += 1;
                }
            }
            Ok(result) => {
                tracing::warn!("Dispute {} not advanced: {}", dispute_hex, result.message);
                stuck += 1;
            }
            Err(e) => {
                // Generation failed; the dispute stays in its phase
                tracing::error!("Dispute {} advancement error: {}", dispute_hex, e);
                stuck += 1;
            }
        }
    }

    tracing::info!(
        "⚖️ Dispute run: {} advanced, {} resolved, {} stuck",
        advanced,
        resolved,
        stuck
    );

    Ok(Json(json!({
        "success": true,
        "advanced": advanced,
        "resolved": resolved,
        "stuck": stuck,
        "timestamp": now.to_rfc3339(),
    })))
}

// Cancel stale bookings whose start time passed without a deposit
pub async fn auto_cancel_stale_bookings(State(state): State<AppState>) -> Result<Json<Value>> {
    let now = Utc::now();
    let collection: Collection<Booking> = state.db.collection("bookings");

    let cursor = collection
        .find(doc! { "payment_state": PaymentState::PendingDeposit.as_str() })
        .await?;
    let pending: Vec<Booking> = cursor.try_collect().await?;

    let stale: Vec<Booking> = pending
        .into_iter()
        .filter(|b| b.scheduled_start <= now)
        .collect();

    let mut cancelled = 0;
    let mut skipped = 0;

    for mut booking in stale {
        let Some(oid) = booking.id else {
            skipped += 1;
            continue;
        };

        let previous = booking.payment_state;
        let result = payment_protocol::cancel(&mut booking, CancellationReason::AutoCancelled, now);
        if !result.success {
            skipped += 1;
            continue;
        }

        match persist_booking(&collection, oid, previous, &booking).await {
            Ok(true) => {
                apply_cancellation_effects(&state, &booking, &result).await;
                cancelled += 1;
            }
            Ok(false) => skipped += 1,
            Err(e) => {
                tracing::error!("Auto-cancel error for {}: {}", oid.to_hex(), e);
                skipped += 1;
            }
        }
    }

    tracing::info!("🧹 Auto-cancel run: {} cancelled, {} skipped", cancelled, skipped);

    Ok(Json(json!({
        "success": true,
        "cancelled": cancelled,
        "skipped": skipped,
        "timestamp": now.to_rfc3339(),
    })))
}
