use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId},
    Collection,
};
use validator::Validate;

use crate::{
    errors::{AppError, Result},
    models::attendance::AttendanceRecord,
    models::booking::{
        Booking, BookingQuery, BookingResponse, CancelBookingRequest, CancellationReason,
        CreateBookingRequest, DepositPaidRequest, PaymentProtocolResult, PaymentState,
    },
    services::attendance_service,
    services::credit_service::{self, PLATFORM_ACCOUNT},
    services::gateway_service::CaptureOutcome,
    services::notification_service::notify_booking_event,
    services::payment_protocol,
    state::AppState,
};

// Guarded write: the previous payment state is part of the filter, so a
// concurrent transition on the same booking loses and sees matched_count 0.
pub(crate) async fn persist_booking(
    collection: &Collection<Booking>,
    oid: ObjectId,
    previous: PaymentState,
    booking: &Booking,
) -> Result<bool> {
    let filter = doc! { "_id": oid, "payment_state": previous.as_str() };
    let result = collection.replace_one(filter, booking).await?;
    Ok(result.matched_count > 0)
}

fn concurrent_update() -> PaymentProtocolResult {
    PaymentProtocolResult::rejected("Booking was modified concurrently, please retry")
}

// Business-rule rejections mirror success into the HTTP status.
fn protocol_response(
    result: PaymentProtocolResult,
) -> (StatusCode, Json<PaymentProtocolResult>) {
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(result))
}

async fn load_booking(state: &AppState, id: &str) -> Result<(ObjectId, Booking)> {
    let collection: Collection<Booking> = state.db.collection("bookings");
    let oid = ObjectId::parse_str(id)?;
    let booking = collection
        .find_one(doc! { "_id": oid })
        .await?
        .ok_or(AppError::BookingNotFound)?;
    Ok((oid, booking))
}

// Create a new booking
pub async fn create_booking(
    State(state): State<AppState>,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>)> {
    payload.validate()?;

    if payload.scheduled_end <= payload.scheduled_start {
        return Err(AppError::invalid_data(
            "scheduled_end must be after scheduled_start",
        ));
    }

    let collection: Collection<Booking> = state.db.collection("bookings");
    let mut booking: Booking = payload.into();
    booking.id = Some(ObjectId::new());

    collection.insert_one(&booking).await?;

    tracing::info!(
        "📅 Booking created: {} - CHF {} for {}",
        booking.id.as_ref().map(|id| id.to_hex()).unwrap_or_default(),
        booking.amount,
        booking.vendor_id
    );

    Ok((StatusCode::CREATED, Json(BookingResponse::from(booking))))
}

// Get a single booking by ID
pub async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>> {
    let (_, booking) = load_booking(&state, &id).await?;
    Ok(Json(BookingResponse::from(booking)))
}

// Get all bookings with optional filtering
pub async fn get_bookings(
    State(state): State<AppState>,
    Query(query): Query<BookingQuery>,
) -> Result<Json<Vec<BookingResponse>>> {
    let collection: Collection<Booking> = state.db.collection("bookings");

    let mut filter = doc! {};
    if let Some(customer_id) = &query.customer_id {
        filter.insert("customer_id", customer_id);
    }
    if let Some(vendor_id) = &query.vendor_id {
        filter.insert("vendor_id", vendor_id);
    }
    if let Some(payment_state) = &query.payment_state {
        filter.insert("payment_state", payment_state);
    }

    let cursor = collection.find(filter).await?;
    let mut bookings: Vec<Booking> = cursor.try_collect().await?;

    bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let responses: Vec<BookingResponse> =
        bookings.into_iter().map(BookingResponse::from).collect();
    Ok(Json(responses))
}

// Record the deposit authorization reported by the PSP
pub async fn deposit_paid(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<DepositPaidRequest>,
) -> Result<(StatusCode, Json<PaymentProtocolResult>)> {
    if payload.payment_ref.is_empty() {
        return Err(AppError::invalid_data("payment_ref must not be empty"));
    }

    let (oid, mut booking) = load_booking(&state, &id).await?;
    let collection: Collection<Booking> = state.db.collection("bookings");

    let previous = booking.payment_state;
    let now = Utc::now();
    let result = payment_protocol::mark_deposit_paid(&mut booking, payload.payment_ref, now);
    if !result.success {
        return Ok(protocol_response(result));
    }

    if !persist_booking(&collection, oid, previous, &booking).await? {
        return Ok(protocol_response(concurrent_update()));
    }

    Ok(protocol_response(result))
}

// Settle the booking as cash on site
pub async fn cash_on_site(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<PaymentProtocolResult>)> {
    let (oid, mut booking) = load_booking(&state, &id).await?;
    let collection: Collection<Booking> = state.db.collection("bookings");

    let previous = booking.payment_state;
    let result = payment_protocol::mark_cash_on_site(&mut booking, Utc::now());
    if !result.success {
        return Ok(protocol_response(result));
    }

    if !persist_booking(&collection, oid, previous, &booking).await? {
        return Ok(protocol_response(concurrent_update()));
    }

    Ok(protocol_response(result))
}

// Schedule the 24h capture
pub async fn schedule_capture(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<PaymentProtocolResult>)> {
    let (oid, mut booking) = load_booking(&state, &id).await?;
    let collection: Collection<Booking> = state.db.collection("bookings");

    let previous = booking.payment_state;
    let result = payment_protocol::schedule_capture(&mut booking, Utc::now());
    if !result.success {
        return Ok(protocol_response(result));
    }

    if !persist_booking(&collection, oid, previous, &booking).await? {
        return Ok(protocol_response(concurrent_update()));
    }

    tracing::info!("⏰ Capture scheduled for booking {}", id);
    Ok(protocol_response(result))
}

// Re-schedule after a failed capture
pub async fn retry_capture(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<PaymentProtocolResult>)> {
    let (oid, mut booking) = load_booking(&state, &id).await?;
    let collection: Collection<Booking> = state.db.collection("bookings");

    let previous = booking.payment_state;
    let result = payment_protocol::retry_capture(&mut booking, Utc::now());
    if !result.success {
        return Ok(protocol_response(result));
    }

    if !persist_booking(&collection, oid, previous, &booking).await? {
        return Ok(protocol_response(concurrent_update()));
    }

    Ok(protocol_response(result))
}

// Attempt the capture now
pub async fn capture_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<PaymentProtocolResult>)> {
    let (_, booking) = load_booking(&state, &id).await?;
    let result = attempt_capture_for(&state, booking, Utc::now()).await?;
    Ok(protocol_response(result))
}

/// One full capture attempt: mark CAPTURE_ATTEMPTED (guarded), charge
/// through the PSP, settle the outcome. Shared by the capture endpoint and
/// the cron runner; a PSP failure of any kind lands in CAPTURE_FAILED and
/// waits for a manual retry.
pub(crate) async fn attempt_capture_for(
    state: &AppState,
    mut booking: Booking,
    now: chrono::DateTime<Utc>,
) -> Result<PaymentProtocolResult> {
    let collection: Collection<Booking> = state.db.collection("bookings");
    let oid = booking.id.ok_or(AppError::BookingNotFound)?;
    let booking_hex = oid.to_hex();

    let gateway = state
        .gateway
        .as_ref()
        .ok_or_else(|| AppError::service_unavailable("Payment gateway is not configured"))?
        .clone();

    let previous = booking.payment_state;
    let begun = payment_protocol::begin_capture(&mut booking, now);
    if !begun.success {
        return Ok(begun);
    }
    if !persist_booking(&collection, oid, previous, &booking).await? {
        return Ok(concurrent_update());
    }

    let payment_ref = booking
        .payment_ref
        .clone()
        .ok_or_else(|| AppError::invalid_data("Booking has no payment reference"))?;

    let outcome = match gateway
        .capture(&payment_ref, booking.amount, &booking.currency)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("PSP capture call failed for booking {}: {}", booking_hex, e);
            CaptureOutcome {
                succeeded: false,
                transaction_id: None,
                failure_reason: Some(e.to_string()),
            }
        }
    };

    let previous = booking.payment_state;
    let result = payment_protocol::complete_capture(
        &mut booking,
        outcome.succeeded,
        outcome.failure_reason,
        now,
    );
    if !result.success {
        return Ok(result);
    }
    if !persist_booking(&collection, oid, previous, &booking).await? {
        return Ok(concurrent_update());
    }

    if booking.payment_state == PaymentState::FullyPaid {
        let payout = result.vendor_payout.unwrap_or_default();
        let fee = result.platform_fee.unwrap_or_default();

        if let Err(e) = credit_service::add_credits(
            &state.db,
            &booking.vendor_id,
            payout,
            &booking.currency,
            "vendor_payout",
            Some(booking_hex.clone()),
            Some("booking".to_string()),
        )
        .await
        {
            tracing::error!("Ledger write failed for vendor payout {}: {}", booking_hex, e);
        }
        if let Err(e) = credit_service::add_credits(
            &state.db,
            PLATFORM_ACCOUNT,
            fee,
            &booking.currency,
            "platform_fee",
            Some(booking_hex.clone()),
            Some("booking".to_string()),
        )
        .await
        {
            tracing::error!("Ledger write failed for platform fee {}: {}", booking_hex, e);
        }

        notify_booking_event(
            &state.db,
            &booking.vendor_id,
            "deposit_captured",
            "Payment captured",
            &format!("CHF {:.2} has been captured for your booking", booking.amount),
            &booking_hex,
        )
        .await;
        notify_booking_event(
            &state.db,
            &booking.customer_id,
            "deposit_captured",
            "Payment completed",
            &format!("Your payment of CHF {:.2} has been finalized", booking.amount),
            &booking_hex,
        )
        .await;

        tracing::info!(
            "💰 Captured booking {} (txn {:?}): payout {} / fee {}",
            booking_hex,
            outcome.transaction_id,
            payout,
            fee
        );
    } else {
        notify_booking_event(
            &state.db,
            &booking.customer_id,
            "capture_failed",
            "Payment capture failed",
            "We could not finalize your payment. Please update your payment method.",
            &booking_hex,
        )
        .await;

        tracing::warn!("⚠️ Capture failed for booking {}", booking_hex);
    }

    Ok(result)
}

// Cancel a booking
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CancelBookingRequest>,
) -> Result<(StatusCode, Json<PaymentProtocolResult>)> {
    let (oid, mut booking) = load_booking(&state, &id).await?;
    let collection: Collection<Booking> = state.db.collection("bookings");

    // A checked-in or completed attendance record refutes a no-show claim
    if payload.reason == CancellationReason::NoShow {
        let attendance: Collection<AttendanceRecord> = state.db.collection("attendance");
        if let Some(record) = attendance.find_one(doc! { "booking_id": &id }).await? {
            if attendance_service::refutes_no_show(&record) {
                return Ok(protocol_response(PaymentProtocolResult::rejected(
                    "Attendance record shows the vendor checked in; no-show cancellation refused",
                )));
            }
        }
    }

    let previous = booking.payment_state;
    let now = Utc::now();
    let result = payment_protocol::cancel(&mut booking, payload.reason, now);
    if !result.success {
        return Ok(protocol_response(result));
    }

    if !persist_booking(&collection, oid, previous, &booking).await? {
        return Ok(protocol_response(concurrent_update()));
    }

    apply_cancellation_effects(&state, &booking, &result).await;

    tracing::info!("🛑 Booking {} cancelled ({})", id, payload.reason.as_str());
    Ok(protocol_response(result))
}

/// Money and notification side effects of a successful cancellation. The
/// state transition is already persisted; failures here are logged, never
/// compensated.
pub(crate) async fn apply_cancellation_effects(
    state: &AppState,
    booking: &Booking,
    result: &PaymentProtocolResult,
) {
    let booking_hex = booking.id.map(|id| id.to_hex()).unwrap_or_default();

    if let Some(refund) = result.customer_refund {
        if let (Some(gateway), Some(payment_ref)) = (&state.gateway, &booking.payment_ref) {
            if let Err(e) = gateway
                .refund(payment_ref, refund, &booking.currency, "booking_cancelled")
                .await
            {
                tracing::error!("PSP refund failed for booking {}: {}", booking_hex, e);
            }
        }

        if let Err(e) = credit_service::add_credits(
            &state.db,
            &booking.customer_id,
            refund,
            &booking.currency,
            "refund",
            Some(booking_hex.clone()),
            Some("booking".to_string()),
        )
        .await
        {
            tracing::error!("Ledger write failed for refund {}: {}", booking_hex, e);
        }
    }

    if let Some(fee) = result.vendor_payout {
        if let Err(e) = credit_service::add_credits(
            &state.db,
            &booking.vendor_id,
            fee,
            &booking.currency,
            "no_show_fee",
            Some(booking_hex.clone()),
            Some("booking".to_string()),
        )
        .await
        {
            tracing::error!("Ledger write failed for no-show fee {}: {}", booking_hex, e);
        }
    }

    notify_booking_event(
        &state.db,
        &booking.customer_id,
        "booking_cancelled",
        "Booking cancelled",
        &result.message,
        &booking_hex,
    )
    .await;
    notify_booking_event(
        &state.db,
        &booking.vendor_id,
        "booking_cancelled",
        "Booking cancelled",
        &result.message,
        &booking_hex,
    )
    .await;
}
