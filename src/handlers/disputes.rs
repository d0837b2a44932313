use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId},
    Collection,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    errors::{AppError, Result},
    models::attendance::{AttendanceRecord, AttendanceStatus},
    models::booking::Booking,
    models::dispute::{
        CounterOffer, CounterOfferRequest, Dispute, DisputeContext, DisputePhase, DisputeQuery,
        DisputeResponse, DisputeStatus, OpenDisputeRequest, Party, VerdictActionRequest,
    },
    services::credit_service,
    services::dispute_ladder::{self, DisputeActionResult},
    services::notification_service::notify_dispute_event,
    services::payment_protocol::escrow_amount,
    state::AppState,
};

// Guarded write keyed on the previous phase, same idea as the booking
// persistence: a concurrent ladder transition loses the replace.
pub(crate) async fn persist_dispute(
    collection: &Collection<Dispute>,
    oid: ObjectId,
    previous: DisputePhase,
    dispute: &Dispute,
) -> Result<bool> {
    let filter = doc! { "_id": oid, "current_phase": previous.as_str() };
    let result = collection.replace_one(filter, dispute).await?;
    Ok(result.matched_count > 0)
}

fn concurrent_update() -> DisputeActionResult {
    DisputeActionResult::rejected("Dispute was modified concurrently, please retry")
}

fn ladder_response(result: DisputeActionResult) -> (StatusCode, Json<DisputeActionResult>) {
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(result))
}

async fn load_dispute(state: &AppState, id: &str) -> Result<(ObjectId, Dispute)> {
    let collection: Collection<Dispute> = state.db.collection("disputes");
    let oid = ObjectId::parse_str(id)?;
    let dispute = collection
        .find_one(doc! { "_id": oid })
        .await?
        .ok_or(AppError::DisputeNotFound)?;
    Ok((oid, dispute))
}

/// Case signals for the proposal generator, read from the booking's
/// attendance record when one exists.
pub(crate) async fn build_context(state: &AppState, dispute: &Dispute) -> Result<DisputeContext> {
    let attendance: Collection<AttendanceRecord> = state.db.collection("attendance");
    let record = attendance
        .find_one(doc! { "booking_id": &dispute.booking_id })
        .await?;

    let (vendor_no_show, vendor_on_time) = match record {
        Some(record) => (
            Some(record.status == AttendanceStatus::NoShow),
            record.on_time,
        ),
        None => (None, None),
    };

    Ok(DisputeContext {
        escrow_amount: dispute.escrow_amount,
        reason: dispute.reason,
        vendor_no_show,
        vendor_on_time,
        counter_offer_count: dispute.counter_offers.len(),
    })
}

// Open a dispute against a booking
pub async fn open_dispute(
    State(state): State<AppState>,
    Json(payload): Json<OpenDisputeRequest>,
) -> Result<(StatusCode, Json<DisputeResponse>)> {
    payload.validate()?;

    let bookings: Collection<Booking> = state.db.collection("bookings");
    let booking_oid = ObjectId::parse_str(&payload.booking_id)?;
    let booking = bookings
        .find_one(doc! { "_id": booking_oid })
        .await?
        .ok_or(AppError::BookingNotFound)?;

    if booking.deposit_paid_at.is_none() {
        return Err(AppError::invalid_data(
            "Disputes can only be opened once a deposit has been paid",
        ));
    }

    let disputes: Collection<Dispute> = state.db.collection("disputes");

    // One live dispute per booking
    let existing = disputes
        .find_one(doc! {
            "booking_id": &payload.booking_id,
            "status": { "$in": ["open", "under_review"] },
        })
        .await?;
    if existing.is_some() {
        return Err(AppError::invalid_data(
            "A dispute is already open for this booking",
        ));
    }

    let now = Utc::now();
    let dispute = Dispute {
        id: Some(ObjectId::new()),
        booking_id: payload.booking_id.clone(),
        customer_id: booking.customer_id.clone(),
        vendor_id: booking.vendor_id.clone(),
        opened_by: payload.opened_by,
        reason: payload.reason,
        description: payload.description,
        escrow_amount: escrow_amount(booking.amount),
        currency: booking.currency.clone(),
        current_phase: DisputePhase::Phase1,
        status: DisputeStatus::Open,
        phase_deadline: dispute_ladder::initial_deadline(now),
        counter_offers: vec![],
        proposals: vec![],
        final_verdict: None,
        customer_refund: None,
        vendor_payout: None,
        resolved_at: None,
        created_at: now,
        updated_at: now,
    };

    disputes.insert_one(&dispute).await?;

    let dispute_hex = dispute.id.map(|id| id.to_hex()).unwrap_or_default();
    let respondent = match payload.opened_by {
        Party::Customer => &dispute.vendor_id,
        Party::Vendor => &dispute.customer_id,
    };
    notify_dispute_event(
        &state.db,
        respondent,
        "dispute_opened",
        "Dispute opened",
        "A dispute has been opened against one of your bookings. You have 48 hours to negotiate directly.",
        &dispute_hex,
    )
    .await;

    tracing::info!("⚖️ Dispute {} opened on booking {}", dispute_hex, payload.booking_id);
    Ok((StatusCode::CREATED, Json(DisputeResponse::from(dispute))))
}

// Get a single dispute by ID
pub async fn get_dispute(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DisputeResponse>> {
    let (_, dispute) = load_dispute(&state, &id).await?;
    Ok(Json(DisputeResponse::from(dispute)))
}

// Get all disputes with optional filtering
pub async fn get_disputes(
    State(state): State<AppState>,
    Query(query): Query<DisputeQuery>,
) -> Result<Json<Vec<DisputeResponse>>> {
    let collection: Collection<Dispute> = state.db.collection("disputes");

    let mut filter = doc! {};
    if let Some(booking_id) = &query.booking_id {
        filter.insert("booking_id", booking_id);
    }
    if let Some(customer_id) = &query.customer_id {
        filter.insert("customer_id", customer_id);
    }
    if let Some(vendor_id) = &query.vendor_id {
        filter.insert("vendor_id", vendor_id);
    }
    if let Some(status) = &query.status {
        filter.insert("status", status);
    }

    let cursor = collection.find(filter).await?;
    let mut disputes: Vec<Dispute> = cursor.try_collect().await?;

    disputes.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let responses: Vec<DisputeResponse> =
        disputes.into_iter().map(DisputeResponse::from).collect();
    Ok(Json(responses))
}

// Submit a phase-1 counter-offer
pub async fn submit_counter_offer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CounterOfferRequest>,
) -> Result<(StatusCode, Json<DisputeActionResult>)> {
    payload.validate()?;

    let (oid, mut dispute) = load_dispute(&state, &id).await?;
    let collection: Collection<Dispute> = state.db.collection("disputes");

    let now = Utc::now();
    let offer = CounterOffer {
        offer_id: Uuid::new_v4().to_string(),
        offered_by: payload.party,
        refund_percentage: payload.refund_percentage,
        note: payload.note,
        offered_at: now,
    };

    let previous = dispute.current_phase;
    let result = dispute_ladder::record_counter_offer(&mut dispute, offer, now);
    if !result.success {
        return Ok(ladder_response(result));
    }

    if !persist_dispute(&collection, oid, previous, &dispute).await? {
        return Ok(ladder_response(concurrent_update()));
    }

    let counterparty = match payload.party {
        Party::Customer => &dispute.vendor_id,
        Party::Vendor => &dispute.customer_id,
    };
    notify_dispute_event(
        &state.db,
        counterparty,
        "dispute_offer",
        "New settlement offer",
        &format!(
            "The other party proposed a {:.0}% refund of the held amount",
            payload.refund_percentage
        ),
        &id,
    )
    .await;

    Ok(ladder_response(result))
}

// Accept the other party's counter-offer
pub async fn accept_counter_offer(
    State(state): State<AppState>,
    Path((id, offer_id)): Path<(String, String)>,
    Json(payload): Json<VerdictActionRequest>,
) -> Result<(StatusCode, Json<DisputeActionResult>)> {
    let (oid, mut dispute) = load_dispute(&state, &id).await?;
    let collection: Collection<Dispute> = state.db.collection("disputes");

    let previous = dispute.current_phase;
    let result =
        dispute_ladder::accept_counter_offer(&mut dispute, &offer_id, payload.party, Utc::now());
    if !result.success {
        return Ok(ladder_response(result));
    }

    if !persist_dispute(&collection, oid, previous, &dispute).await? {
        return Ok(ladder_response(concurrent_update()));
    }

    apply_settlement(&state, &dispute).await;
    Ok(ladder_response(result))
}

// Explicitly escalate to the next phase
pub async fn escalate_dispute(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<DisputeActionResult>)> {
    let (_, dispute) = load_dispute(&state, &id).await?;
    let now = Utc::now();

    let result = match dispute.current_phase {
        DisputePhase::Phase1 => escalate_to_mediation(&state, dispute, now).await?,
        DisputePhase::Phase2 => escalate_to_binding(&state, dispute, now).await?,
        DisputePhase::Phase3Pending => attach_pending_verdict(&state, dispute, now).await?,
        other => DisputeActionResult::rejected(format!(
            "Cannot escalate a dispute in {}",
            other.as_str()
        )),
    };

    Ok(ladder_response(result))
}

// Accept one of the phase-2 mediation proposals
pub async fn accept_proposal(
    State(state): State<AppState>,
    Path((id, rank)): Path<(String, u8)>,
) -> Result<(StatusCode, Json<DisputeActionResult>)> {
    let (oid, mut dispute) = load_dispute(&state, &id).await?;
    let collection: Collection<Dispute> = state.db.collection("disputes");

    let previous = dispute.current_phase;
    let result = dispute_ladder::accept_proposal(&mut dispute, rank, Utc::now());
    if !result.success {
        return Ok(ladder_response(result));
    }

    if !persist_dispute(&collection, oid, previous, &dispute).await? {
        return Ok(ladder_response(concurrent_update()));
    }

    apply_settlement(&state, &dispute).await;
    Ok(ladder_response(result))
}

// Accept the binding verdict
pub async fn accept_verdict(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<DisputeActionResult>)> {
    let (_, dispute) = load_dispute(&state, &id).await?;
    let result = apply_verdict(&state, dispute, Utc::now()).await?;
    Ok(ladder_response(result))
}

// Escalate past the verdict to paid human arbitration
pub async fn escalate_external(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<DisputeActionResult>)> {
    let (oid, mut dispute) = load_dispute(&state, &id).await?;
    let collection: Collection<Dispute> = state.db.collection("disputes");

    let previous = dispute.current_phase;
    let result = dispute_ladder::escalate_external(&mut dispute, Utc::now());
    if !result.success {
        return Ok(ladder_response(result));
    }

    if !persist_dispute(&collection, oid, previous, &dispute).await? {
        return Ok(ladder_response(concurrent_update()));
    }

    tracing::info!("⚖️ Dispute {} escalated to external arbitration", id);
    Ok(ladder_response(result))
}

// Withdraw the dispute (opener only)
pub async fn withdraw_dispute(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<VerdictActionRequest>,
) -> Result<(StatusCode, Json<DisputeActionResult>)> {
    let (oid, mut dispute) = load_dispute(&state, &id).await?;
    let collection: Collection<Dispute> = state.db.collection("disputes");

    let previous = dispute.current_phase;
    let result = dispute_ladder::withdraw(&mut dispute, payload.party, Utc::now());
    if !result.success {
        return Ok(ladder_response(result));
    }

    if !persist_dispute(&collection, oid, previous, &dispute).await? {
        return Ok(ladder_response(concurrent_update()));
    }

    Ok(ladder_response(result))
}

/// Phase 1 → phase 2: generate the mediation proposals, advance, notify.
/// If generation fails the error propagates and the dispute stays put.
pub(crate) async fn escalate_to_mediation(
    state: &AppState,
    mut dispute: Dispute,
    now: DateTime<Utc>,
) -> Result<DisputeActionResult> {
    let collection: Collection<Dispute> = state.db.collection("disputes");
    let oid = dispute.id.ok_or(AppError::DisputeNotFound)?;

    let context = build_context(state, &dispute).await?;
    let proposals = state.proposal_generator.mediation_proposals(&context).await?;

    let previous = dispute.current_phase;
    let result = dispute_ladder::advance_to_phase2(&mut dispute, proposals, now);
    if !result.success {
        return Ok(result);
    }

    if !persist_dispute(&collection, oid, previous, &dispute).await? {
        return Ok(concurrent_update());
    }

    notify_phase_advance(state, &dispute, "Mediation proposals are ready for review").await;
    Ok(result)
}

/// Phase 2 → phase 3: enter phase_3_pending, then try to attach the verdict
/// right away. A failed generation leaves the dispute pending; the cron
/// retries on its next pass.
pub(crate) async fn escalate_to_binding(
    state: &AppState,
    mut dispute: Dispute,
    now: DateTime<Utc>,
) -> Result<DisputeActionResult> {
    let collection: Collection<Dispute> = state.db.collection("disputes");
    let oid = dispute.id.ok_or(AppError::DisputeNotFound)?;

    let previous = dispute.current_phase;
    let result = dispute_ladder::advance_to_phase3(&mut dispute, now);
    if !result.success {
        return Ok(result);
    }

    if !persist_dispute(&collection, oid, previous, &dispute).await? {
        return Ok(concurrent_update());
    }

    match attach_pending_verdict(state, dispute, now).await {
        Ok(attached) if attached.success => Ok(attached),
        Ok(_) | Err(_) => {
            tracing::warn!("Verdict generation deferred for dispute {}", oid.to_hex());
            Ok(result)
        }
    }
}

/// Generate and attach the binding verdict to a phase_3_pending dispute.
pub(crate) async fn attach_pending_verdict(
    state: &AppState,
    mut dispute: Dispute,
    now: DateTime<Utc>,
) -> Result<DisputeActionResult> {
    let collection: Collection<Dispute> = state.db.collection("disputes");
    let oid = dispute.id.ok_or(AppError::DisputeNotFound)?;

    let context = build_context(state, &dispute).await?;
    let verdict = state.proposal_generator.final_verdict(&context).await?;

    let previous = dispute.current_phase;
    let result = dispute_ladder::attach_verdict(&mut dispute, verdict, now);
    if !result.success {
        return Ok(result);
    }

    if !persist_dispute(&collection, oid, previous, &dispute).await? {
        return Ok(concurrent_update());
    }

    notify_phase_advance(state, &dispute, "A binding verdict is ready; you have 24 hours to review it").await;
    Ok(result)
}

/// Accept (or auto-apply) the binding verdict and settle.
pub(crate) async fn apply_verdict(
    state: &AppState,
    mut dispute: Dispute,
    now: DateTime<Utc>,
) -> Result<DisputeActionResult> {
    let collection: Collection<Dispute> = state.db.collection("disputes");
    let oid = dispute.id.ok_or(AppError::DisputeNotFound)?;

    let previous = dispute.current_phase;
    let result = dispute_ladder::accept_verdict(&mut dispute, now);
    if !result.success {
        return Ok(result);
    }

    if !persist_dispute(&collection, oid, previous, &dispute).await? {
        return Ok(concurrent_update());
    }

    apply_settlement(state, &dispute).await;
    Ok(result)
}

async fn notify_phase_advance(state: &AppState, dispute: &Dispute, message: &str) {
    let dispute_hex = dispute.id.map(|id| id.to_hex()).unwrap_or_default();
    for user_id in [&dispute.customer_id, &dispute.vendor_id] {
        notify_dispute_event(
            &state.db,
            user_id,
            "dispute_phase",
            "Dispute phase advanced",
            message,
            &dispute_hex,
        )
        .await;
    }
}

/// Ledger and notification side effects of a resolution. The settlement
/// splits the escrow snapshot; failures are logged, never compensated.
pub(crate) async fn apply_settlement(state: &AppState, dispute: &Dispute) {
    let dispute_hex = dispute.id.map(|id| id.to_hex()).unwrap_or_default();

    if let Some(refund) = dispute.customer_refund {
        if refund > 0.0 {
            if let Err(e) = credit_service::add_credits(
                &state.db,
                &dispute.customer_id,
                refund,
                &dispute.currency,
                "dispute_settlement",
                Some(dispute_hex.clone()),
                Some("dispute".to_string()),
            )
            .await
            {
                tracing::error!("Ledger write failed for dispute {}: {}", dispute_hex, e);
            }
        }
    }

    if let Some(payout) = dispute.vendor_payout {
        if payout > 0.0 {
            if let Err(e) = credit_service::add_credits(
                &state.db,
                &dispute.vendor_id,
                payout,
                &dispute.currency,
                "dispute_settlement",
                Some(dispute_hex.clone()),
                Some("dispute".to_string()),
            )
            .await
            {
                tracing::error!("Ledger write failed for dispute {}: {}", dispute_hex, e);
            }
        }
    }

    for user_id in [&dispute.customer_id, &dispute.vendor_id] {
        notify_dispute_event(
            &state.db,
            user_id,
            "dispute_resolved",
            "Dispute resolved",
            &format!("The dispute has been resolved ({})", dispute.status.as_str()),
            &dispute_hex,
        )
        .await;
    }

    tracing::info!(
        "⚖️ Dispute {} settled: refund {:?} / payout {:?}",
        dispute_hex,
        dispute.customer_refund,
        dispute.vendor_payout
    );
}
