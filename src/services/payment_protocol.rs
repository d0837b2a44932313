// services/payment_protocol.rs
//
// The booking payment state machine. Every transition is a pure function
// over (booking, now): the caller supplies the clock and persists the result
// with a state-guard filter, so the logic stays deterministic and two
// concurrent requests cannot double-capture or double-cancel.
use chrono::{DateTime, Duration, Utc};

use crate::models::booking::{Booking, CancellationReason, PaymentProtocolResult, PaymentState};

/// Platform keeps 10% of every captured amount.
pub const PLATFORM_FEE_RATE: f64 = 0.10;

/// 24-Hour Capture Protocol: capture is due 24h after the deposit.
pub const CAPTURE_DELAY_HOURS: i64 = 24;

/// How long a capture attempt may sit unsettled before the sweeper writes
/// it off as failed.
pub const CAPTURE_ATTEMPT_STALE_MINUTES: i64 = 30;

/// Round to centimes.
pub fn round_chf(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// The held portion of a payment: amount minus the 10% platform fee.
pub fn escrow_amount(amount: f64) -> f64 {
    round_chf(amount * (1.0 - PLATFORM_FEE_RATE))
}

pub fn mark_deposit_paid(
    booking: &mut Booking,
    payment_ref: String,
    now: DateTime<Utc>,
) -> PaymentProtocolResult {
    if booking.payment_state != PaymentState::PendingDeposit {
        return PaymentProtocolResult::rejected(format!(
            "Cannot mark deposit paid from {}",
            booking.payment_state.as_str()
        ));
    }

    booking.payment_state = PaymentState::DepositPaid;
    booking.payment_ref = Some(payment_ref);
    booking.deposit_paid_at = Some(now);
    booking.updated_at = now;

    PaymentProtocolResult::ok("Deposit recorded", PaymentState::DepositPaid)
}

pub fn mark_cash_on_site(booking: &mut Booking, now: DateTime<Utc>) -> PaymentProtocolResult {
    if booking.payment_state != PaymentState::PendingDeposit {
        return PaymentProtocolResult::rejected(format!(
            "Cannot switch to cash on site from {}",
            booking.payment_state.as_str()
        ));
    }

    booking.payment_state = PaymentState::CashOnSite;
    booking.updated_at = now;

    PaymentProtocolResult::ok("Booking settled as cash on site", PaymentState::CashOnSite)
}

/// Schedule the capture 24 hours after the deposit was paid.
pub fn schedule_capture(booking: &mut Booking, now: DateTime<Utc>) -> PaymentProtocolResult {
    if booking.payment_state != PaymentState::DepositPaid {
        return PaymentProtocolResult::rejected(format!(
            "Cannot schedule capture from {}",
            booking.payment_state.as_str()
        ));
    }

    let due_at = booking.deposit_paid_at.unwrap_or(now) + Duration::hours(CAPTURE_DELAY_HOURS);

    booking.payment_state = PaymentState::CaptureScheduled;
    booking.capture_due_at = Some(due_at);
    booking.updated_at = now;

    PaymentProtocolResult::ok(
        format!("Capture scheduled for {}", due_at.to_rfc3339()),
        PaymentState::CaptureScheduled,
    )
}

/// Manual retry after a failed capture. Re-enters CAPTURE_SCHEDULED with the
/// capture due immediately; there is no built-in backoff.
pub fn retry_capture(booking: &mut Booking, now: DateTime<Utc>) -> PaymentProtocolResult {
    if booking.payment_state != PaymentState::CaptureFailed {
        return PaymentProtocolResult::rejected(format!(
            "Cannot retry capture from {}",
            booking.payment_state.as_str()
        ));
    }

    booking.payment_state = PaymentState::CaptureScheduled;
    booking.capture_due_at = Some(now);
    booking.capture_failure_reason = None;
    booking.updated_at = now;

    PaymentProtocolResult::ok("Capture rescheduled", PaymentState::CaptureScheduled)
}

/// First half of a capture attempt. Marks the booking CAPTURE_ATTEMPTED so a
/// concurrent attempt loses the state-guard write.
pub fn begin_capture(booking: &mut Booking, now: DateTime<Utc>) -> PaymentProtocolResult {
    if booking.payment_state != PaymentState::CaptureScheduled {
        return PaymentProtocolResult::rejected(format!(
            "Cannot attempt capture from {}",
            booking.payment_state.as_str()
        ));
    }

    if let Some(due_at) = booking.capture_due_at {
        if now < due_at {
            return PaymentProtocolResult::rejected(format!(
                "Capture not due until {}",
                due_at.to_rfc3339()
            ));
        }
    }

    booking.payment_state = PaymentState::CaptureAttempted;
    booking.capture_attempted_at = Some(now);
    booking.updated_at = now;

    PaymentProtocolResult::ok("Capture attempt started", PaymentState::CaptureAttempted)
}

/// Second half of a capture attempt: settle on the gateway outcome. On
/// success the fee is derived by subtraction after rounding, so
/// vendor_payout + platform_fee always equals the booking amount.
pub fn complete_capture(
    booking: &mut Booking,
    charge_succeeded: bool,
    failure_reason: Option<String>,
    now: DateTime<Utc>,
) -> PaymentProtocolResult {
    if booking.payment_state != PaymentState::CaptureAttempted {
        return PaymentProtocolResult::rejected(format!(
            "Cannot complete capture from {}",
            booking.payment_state.as_str()
        ));
    }

    if !charge_succeeded {
        booking.payment_state = PaymentState::CaptureFailed;
        booking.capture_failure_reason = failure_reason;
        booking.updated_at = now;

        return PaymentProtocolResult {
            success: true,
            message: "Capture failed; manual retry required".to_string(),
            new_state: Some(PaymentState::CaptureFailed),
            vendor_payout: None,
            platform_fee: None,
            customer_refund: None,
        };
    }

    let vendor_payout = round_chf(booking.amount * (1.0 - PLATFORM_FEE_RATE));
    let platform_fee = round_chf(booking.amount - vendor_payout);

    booking.payment_state = PaymentState::FullyPaid;
    booking.captured_at = Some(now);
    booking.vendor_payout = Some(vendor_payout);
    booking.platform_fee = Some(platform_fee);
    booking.updated_at = now;

    PaymentProtocolResult {
        success: true,
        message: "Payment captured".to_string(),
        new_state: Some(PaymentState::FullyPaid),
        vendor_payout: Some(vendor_payout),
        platform_fee: Some(platform_fee),
        customer_refund: None,
    }
}

/// Write off a capture attempt that never settled: the process died or the
/// final write was lost between the PSP call and persistence. Lands in
/// CAPTURE_FAILED so the normal retry path applies; a booking must never
/// sit in CAPTURE_ATTEMPTED indefinitely.
pub fn fail_stale_capture(booking: &mut Booking, now: DateTime<Utc>) -> PaymentProtocolResult {
    if booking.payment_state != PaymentState::CaptureAttempted {
        return PaymentProtocolResult::rejected(format!(
            "Cannot write off a capture attempt from {}",
            booking.payment_state.as_str()
        ));
    }

    let stale_at = booking.capture_attempted_at.unwrap_or(now)
        + Duration::minutes(CAPTURE_ATTEMPT_STALE_MINUTES);
    if now < stale_at {
        return PaymentProtocolResult::rejected("Capture attempt is still in flight");
    }

    booking.payment_state = PaymentState::CaptureFailed;
    booking.capture_failure_reason =
        Some("Capture attempt interrupted before settlement".to_string());
    booking.updated_at = now;

    PaymentProtocolResult::ok(
        "Stale capture attempt marked failed",
        PaymentState::CaptureFailed,
    )
}

/// Cancel from any non-terminal state. The reason decides who bears the
/// cost: NO_SHOW and AUTO_CANCELLED apply the 50/50 default split of the
/// held amount, user/vendor requests before capture refund in full, and
/// PAYMENT_FAILED cancels with no transfer.
pub fn cancel(
    booking: &mut Booking,
    reason: CancellationReason,
    now: DateTime<Utc>,
) -> PaymentProtocolResult {
    if booking.payment_state.is_terminal() {
        return PaymentProtocolResult::rejected(format!(
            "Cannot cancel a booking in {}",
            booking.payment_state.as_str()
        ));
    }

    let deposit_held = booking.deposit_paid_at.is_some();

    let (new_state, customer_refund, vendor_payout, message) = match reason {
        CancellationReason::NoShow | CancellationReason::AutoCancelled => {
            if deposit_held {
                let refund = round_chf(booking.amount / 2.0);
                let fee = round_chf(booking.amount - refund);
                (
                    PaymentState::Cancelled,
                    Some(refund),
                    Some(fee),
                    format!(
                        "Booking cancelled ({}); 50/50 split applied",
                        reason.as_str()
                    ),
                )
            } else {
                (
                    PaymentState::Cancelled,
                    None,
                    None,
                    format!("Booking cancelled ({}); nothing held", reason.as_str()),
                )
            }
        }
        CancellationReason::UserRequested | CancellationReason::VendorRequested => {
            if deposit_held {
                (
                    PaymentState::Refunded,
                    Some(booking.amount),
                    None,
                    "Booking refunded in full".to_string(),
                )
            } else {
                (
                    PaymentState::Cancelled,
                    None,
                    None,
                    "Booking cancelled before deposit".to_string(),
                )
            }
        }
        CancellationReason::PaymentFailed => (
            PaymentState::Cancelled,
            None,
            None,
            "Booking cancelled after payment failure".to_string(),
        ),
    };

    booking.payment_state = new_state;
    booking.cancellation_reason = Some(reason);
    booking.cancelled_at = Some(now);
    booking.customer_refund = customer_refund;
    booking.vendor_payout = vendor_payout;
    booking.updated_at = now;

    PaymentProtocolResult {
        success: true,
        message,
        new_state: Some(new_state),
        vendor_payout,
        platform_fee: None,
        customer_refund,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap()
    }

    fn booking(amount: f64) -> Booking {
        let now = base_time();
        Booking {
            id: None,
            customer_id: "cust-1".to_string(),
            vendor_id: "vend-1".to_string(),
            service_id: "svc-1".to_string(),
            scheduled_start: now + Duration::days(3),
            scheduled_end: now + Duration::days(3) + Duration::hours(2),
            amount,
            currency: "CHF".to_string(),
            payment_state: PaymentState::PendingDeposit,
            payment_ref: None,
            capture_due_at: None,
            deposit_paid_at: None,
            capture_attempted_at: None,
            captured_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            capture_failure_reason: None,
            vendor_payout: None,
            platform_fee: None,
            customer_refund: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn paid_booking(amount: f64) -> Booking {
        let mut b = booking(amount);
        let res = mark_deposit_paid(&mut b, "auth-123".to_string(), base_time());
        assert!(res.success);
        b
    }

    #[test]
    fn full_capture_flow_200_chf() {
        let mut b = paid_booking(200.0);

        let res = schedule_capture(&mut b, base_time());
        assert!(res.success);
        assert_eq!(b.payment_state, PaymentState::CaptureScheduled);
        assert_eq!(b.capture_due_at, Some(base_time() + Duration::hours(24)));

        // 24 hours later the capture runs
        let later = base_time() + Duration::hours(24);
        assert!(begin_capture(&mut b, later).success);
        let res = complete_capture(&mut b, true, None, later);

        assert!(res.success);
        assert_eq!(b.payment_state, PaymentState::FullyPaid);
        assert_eq!(res.vendor_payout, Some(180.0));
        assert_eq!(res.platform_fee, Some(20.0));
    }

    #[test]
    fn fee_invariant_holds_for_awkward_amounts() {
        for amount in [0.01, 0.05, 99.99, 123.45, 333.33, 1000.01] {
            let mut b = paid_booking(amount);
            schedule_capture(&mut b, base_time());
            let later = base_time() + Duration::hours(25);
            begin_capture(&mut b, later);
            let res = complete_capture(&mut b, true, None, later);

            let payout = res.vendor_payout.unwrap();
            let fee = res.platform_fee.unwrap();
            assert!(
                (payout + fee - amount).abs() < 1e-9,
                "payout {} + fee {} != amount {}",
                payout,
                fee,
                amount
            );
        }
    }

    #[test]
    fn capture_before_due_is_rejected() {
        let mut b = paid_booking(100.0);
        schedule_capture(&mut b, base_time());

        let res = begin_capture(&mut b, base_time() + Duration::hours(1));
        assert!(!res.success);
        assert_eq!(b.payment_state, PaymentState::CaptureScheduled);
    }

    #[test]
    fn capture_from_pending_deposit_is_rejected() {
        let mut b = booking(100.0);
        let res = begin_capture(&mut b, base_time());
        assert!(!res.success);
        assert_eq!(b.payment_state, PaymentState::PendingDeposit);
    }

    #[test]
    fn schedule_capture_rejected_when_cancelled() {
        let mut b = paid_booking(100.0);
        cancel(&mut b, CancellationReason::UserRequested, base_time());
        let res = schedule_capture(&mut b, base_time());
        assert!(!res.success);
        assert_eq!(b.payment_state, PaymentState::Refunded);
    }

    #[test]
    fn failed_capture_can_be_retried() {
        let mut b = paid_booking(100.0);
        schedule_capture(&mut b, base_time());
        let later = base_time() + Duration::hours(24);
        begin_capture(&mut b, later);
        let res = complete_capture(&mut b, false, Some("card declined".to_string()), later);
        assert!(res.success);
        assert_eq!(b.payment_state, PaymentState::CaptureFailed);
        assert_eq!(b.capture_failure_reason.as_deref(), Some("card declined"));

        let res = retry_capture(&mut b, later + Duration::hours(2));
        assert!(res.success);
        assert_eq!(b.payment_state, PaymentState::CaptureScheduled);
        assert_eq!(b.capture_due_at, Some(later + Duration::hours(2)));
    }

    #[test]
    fn interrupted_capture_attempt_can_be_written_off_and_retried() {
        let mut b = paid_booking(100.0);
        schedule_capture(&mut b, base_time());
        let attempt_time = base_time() + Duration::hours(24);
        begin_capture(&mut b, attempt_time);
        assert_eq!(b.payment_state, PaymentState::CaptureAttempted);

        // A live attempt is left alone
        let res = fail_stale_capture(&mut b, attempt_time + Duration::minutes(5));
        assert!(!res.success);
        assert_eq!(b.payment_state, PaymentState::CaptureAttempted);

        // Past the staleness threshold it is written off as failed
        let swept = attempt_time + Duration::minutes(CAPTURE_ATTEMPT_STALE_MINUTES + 1);
        let res = fail_stale_capture(&mut b, swept);
        assert!(res.success);
        assert_eq!(b.payment_state, PaymentState::CaptureFailed);
        assert!(b.capture_failure_reason.is_some());

        // and the normal retry path re-enters the schedule
        let res = retry_capture(&mut b, swept + Duration::hours(1));
        assert!(res.success);
        assert_eq!(b.payment_state, PaymentState::CaptureScheduled);
    }

    #[test]
    fn write_off_only_applies_to_attempted_captures() {
        let mut b = paid_booking(100.0);
        schedule_capture(&mut b, base_time());

        let res = fail_stale_capture(&mut b, base_time() + Duration::days(1));
        assert!(!res.success);
        assert_eq!(b.payment_state, PaymentState::CaptureScheduled);
    }

    #[test]
    fn no_show_cancellation_splits_fifty_fifty() {
        let mut b = paid_booking(100.0);
        let res = cancel(&mut b, CancellationReason::NoShow, base_time());

        assert!(res.success);
        assert_eq!(b.payment_state, PaymentState::Cancelled);
        assert_eq!(res.customer_refund, Some(50.0));
        assert_eq!(res.vendor_payout, Some(50.0));
    }

    #[test]
    fn split_halves_add_up_with_odd_centimes() {
        let mut b = paid_booking(99.99);
        let res = cancel(&mut b, CancellationReason::AutoCancelled, base_time());

        let refund = res.customer_refund.unwrap();
        let fee = res.vendor_payout.unwrap();
        assert!((refund + fee - 99.99).abs() < 1e-9);
    }

    #[test]
    fn user_cancellation_before_capture_refunds_in_full() {
        let mut b = paid_booking(250.0);
        schedule_capture(&mut b, base_time());
        let res = cancel(&mut b, CancellationReason::UserRequested, base_time());

        assert!(res.success);
        assert_eq!(b.payment_state, PaymentState::Refunded);
        assert_eq!(res.customer_refund, Some(250.0));
        assert_eq!(res.vendor_payout, None);
    }

    #[test]
    fn payment_failed_cancellation_moves_no_money() {
        let mut b = paid_booking(250.0);
        let res = cancel(&mut b, CancellationReason::PaymentFailed, base_time());

        assert!(res.success);
        assert_eq!(b.payment_state, PaymentState::Cancelled);
        assert_eq!(res.customer_refund, None);
        assert_eq!(res.vendor_payout, None);
    }

    #[test]
    fn cancel_after_refund_is_rejected() {
        let mut b = paid_booking(100.0);
        cancel(&mut b, CancellationReason::UserRequested, base_time());
        assert_eq!(b.payment_state, PaymentState::Refunded);

        let res = cancel(&mut b, CancellationReason::NoShow, base_time());
        assert!(!res.success);
        assert_eq!(b.payment_state, PaymentState::Refunded);
        assert_eq!(b.cancellation_reason, Some(CancellationReason::UserRequested));
    }

    #[test]
    fn cancel_after_full_payment_is_rejected() {
        let mut b = paid_booking(100.0);
        schedule_capture(&mut b, base_time());
        let later = base_time() + Duration::hours(24);
        begin_capture(&mut b, later);
        complete_capture(&mut b, true, None, later);

        let res = cancel(&mut b, CancellationReason::UserRequested, later);
        assert!(!res.success);
        assert_eq!(b.payment_state, PaymentState::FullyPaid);
    }

    #[test]
    fn cash_on_site_only_from_pending_deposit() {
        let mut b = booking(80.0);
        assert!(mark_cash_on_site(&mut b, base_time()).success);
        assert_eq!(b.payment_state, PaymentState::CashOnSite);

        let mut b = paid_booking(80.0);
        assert!(!mark_cash_on_site(&mut b, base_time()).success);
    }

    #[test]
    fn escrow_is_amount_net_of_fee() {
        assert_eq!(escrow_amount(300.0), 270.0);
        assert_eq!(escrow_amount(100.0), 90.0);
    }
}
