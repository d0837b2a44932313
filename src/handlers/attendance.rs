use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use mongodb::{
    bson::{doc, oid::ObjectId},
    Collection,
};
use validator::Validate;

use crate::{
    errors::{AppError, Result},
    models::attendance::{
        AttendanceRecord, AttendanceResponse, AttendanceStatus, CheckInRequest, CheckType,
        QrTokenResponse,
    },
    models::booking::Booking,
    services::attendance_service::{self, AttendanceOutcome},
    services::notification_service::notify_booking_event,
    state::AppState,
};

fn attendance_response(result: AttendanceOutcome) -> (StatusCode, Json<AttendanceOutcome>) {
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(result))
}

async fn load_booking(state: &AppState, booking_id: &str) -> Result<Booking> {
    let bookings: Collection<Booking> = state.db.collection("bookings");
    let oid = ObjectId::parse_str(booking_id)?;
    bookings
        .find_one(doc! { "_id": oid })
        .await?
        .ok_or(AppError::BookingNotFound)
}

// One record per booking; created lazily on the first attendance action.
async fn load_or_create_record(
    state: &AppState,
    booking: &Booking,
    booking_id: &str,
) -> Result<AttendanceRecord> {
    let collection: Collection<AttendanceRecord> = state.db.collection("attendance");

    if let Some(record) = collection.find_one(doc! { "booking_id": booking_id }).await? {
        return Ok(record);
    }

    let mut record =
        AttendanceRecord::new(booking_id.to_string(), booking.vendor_id.clone(), Utc::now());
    record.id = Some(ObjectId::new());
    collection.insert_one(&record).await?;
    Ok(record)
}

async fn persist_record(
    state: &AppState,
    previous: AttendanceStatus,
    record: &AttendanceRecord,
) -> Result<bool> {
    let collection: Collection<AttendanceRecord> = state.db.collection("attendance");
    let oid = record.id.ok_or(AppError::AttendanceNotFound)?;
    let filter = doc! { "_id": oid, "status": previous.as_str() };
    let result = collection.replace_one(filter, record).await?;
    Ok(result.matched_count > 0)
}

// Issue the single-use QR token for a booking
pub async fn issue_qr_token(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
) -> Result<Json<QrTokenResponse>> {
    let booking = load_booking(&state, &booking_id).await?;

    if booking.payment_state.is_terminal() && booking.cancellation_reason.is_some() {
        return Err(AppError::invalid_data(
            "Cannot issue a QR token for a cancelled booking",
        ));
    }

    let mut record = load_or_create_record(&state, &booking, &booking_id).await?;
    let previous = record.status;

    let token = attendance_service::issue_qr_token(&mut record, Utc::now())
        .map_err(|outcome| AppError::invalid_data(outcome.message))?;

    if !persist_record(&state, previous, &record).await? {
        return Err(AppError::invalid_data(
            "Attendance record was modified concurrently",
        ));
    }

    let (valid_from, valid_until) = attendance_service::qr_window(booking.scheduled_start);

    tracing::info!("🎫 QR token issued for booking {}", booking_id);
    Ok(Json(QrTokenResponse {
        booking_id,
        qr_token: token,
        valid_from,
        valid_until,
    }))
}

// Vendor check-in via QR scan, geolocation, or manual entry
pub async fn check_in(
    State(state): State<AppState>,
    Json(payload): Json<CheckInRequest>,
) -> Result<(StatusCode, Json<AttendanceOutcome>)> {
    payload.validate()?;

    let booking = load_booking(&state, &payload.booking_id).await?;
    let mut record = load_or_create_record(&state, &booking, &payload.booking_id).await?;
    let previous = record.status;
    let now = Utc::now();

    let result = match payload.check_type {
        CheckType::QrScan => {
            let token = payload
                .qr_token
                .as_deref()
                .ok_or_else(|| AppError::invalid_data("qr_token is required for QR check-in"))?;
            attendance_service::check_in_qr(&mut record, token, booking.scheduled_start, now)
        }
        CheckType::RemoteCheckin => {
            let (latitude, longitude) = match (payload.latitude, payload.longitude) {
                (Some(lat), Some(lng)) => (lat, lng),
                _ => {
                    return Err(AppError::invalid_data(
                        "latitude and longitude are required for remote check-in",
                    ))
                }
            };
            attendance_service::check_in_remote(
                &mut record,
                latitude,
                longitude,
                booking.scheduled_start,
                now,
            )
        }
        CheckType::Manual => {
            attendance_service::check_in_manual(&mut record, booking.scheduled_start, now)
        }
    };

    if !result.success {
        return Ok(attendance_response(result));
    }

    if !persist_record(&state, previous, &record).await? {
        return Ok(attendance_response(AttendanceOutcome {
            success: false,
            message: "Attendance record was modified concurrently, please retry".to_string(),
            status: None,
        }));
    }

    tracing::info!(
        "📍 Vendor checked in for booking {} (on time: {:?})",
        payload.booking_id,
        record.on_time
    );
    Ok(attendance_response(result))
}

// Mark the service as completed
pub async fn complete_attendance(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
) -> Result<(StatusCode, Json<AttendanceOutcome>)> {
    let booking = load_booking(&state, &booking_id).await?;

    let collection: Collection<AttendanceRecord> = state.db.collection("attendance");
    let mut record = collection
        .find_one(doc! { "booking_id": &booking_id })
        .await?
        .ok_or(AppError::AttendanceNotFound)?;
    let previous = record.status;

    let result = attendance_service::complete(&mut record, Utc::now());
    if !result.success {
        return Ok(attendance_response(result));
    }

    if !persist_record(&state, previous, &record).await? {
        return Ok(attendance_response(AttendanceOutcome {
            success: false,
            message: "Attendance record was modified concurrently, please retry".to_string(),
            status: None,
        }));
    }

    update_punctuality_score(&state, &record).await;

    // The customer can now be asked for a review
    notify_booking_event(
        &state.db,
        &booking.customer_id,
        "review_request",
        "How was the service?",
        "Your booking is complete. Leave a review for your vendor.",
        &booking_id,
    )
    .await;

    Ok(attendance_response(result))
}

// Mark the vendor as a no-show once the attendance window has closed
pub async fn mark_no_show(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
) -> Result<(StatusCode, Json<AttendanceOutcome>)> {
    let booking = load_booking(&state, &booking_id).await?;
    let mut record = load_or_create_record(&state, &booking, &booking_id).await?;
    let previous = record.status;

    let result =
        attendance_service::mark_no_show(&mut record, booking.scheduled_start, Utc::now());
    if !result.success {
        return Ok(attendance_response(result));
    }

    if !persist_record(&state, previous, &record).await? {
        return Ok(attendance_response(AttendanceOutcome {
            success: false,
            message: "Attendance record was modified concurrently, please retry".to_string(),
            status: None,
        }));
    }

    update_punctuality_score(&state, &record).await;

    tracing::warn!("🚫 Vendor marked as no-show for booking {}", booking_id);
    Ok(attendance_response(result))
}

// Get the attendance record for a booking
pub async fn get_attendance(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
) -> Result<Json<AttendanceResponse>> {
    let collection: Collection<AttendanceRecord> = state.db.collection("attendance");
    let record = collection
        .find_one(doc! { "booking_id": &booking_id })
        .await?
        .ok_or(AppError::AttendanceNotFound)?;

    Ok(Json(AttendanceResponse::from(record)))
}

// Vendor punctuality counters, read by profile scoring
async fn update_punctuality_score(state: &AppState, record: &AttendanceRecord) {
    let punctual: i64 = match record.on_time {
        Some(true) => 1,
        _ => 0,
    };

    let users: Collection<mongodb::bson::Document> = state.db.collection("users");
    let update = doc! {
        "$inc": { "total_jobs": 1i64, "punctual_jobs": punctual }
    };

    if let Err(e) = users
        .update_one(doc! { "id": &record.vendor_id }, update)
        .upsert(true)
        .await
    {
        tracing::warn!(
            "Failed to update punctuality score for {}: {}",
            record.vendor_id,
            e
        );
    }
}
