// services/attendance_service.rs
//
// Proof of attendance. Produces the facts (checked in, on time, completed,
// no-show) that the cancellation rules and dispute heuristics read; no money
// moves here.
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::attendance::{AttendanceRecord, AttendanceStatus, CheckType};

/// QR tokens open 2 hours before the booking start.
pub const QR_VALID_BEFORE_HOURS: i64 = 2;
/// QR tokens stay valid for 1 hour after the booking start.
pub const QR_VALID_AFTER_HOURS: i64 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttendanceStatus>,
}

impl AttendanceOutcome {
    fn ok(message: impl Into<String>, status: AttendanceStatus) -> Self {
        AttendanceOutcome {
            success: true,
            message: message.into(),
            status: Some(status),
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        AttendanceOutcome {
            success: false,
            message: message.into(),
            status: None,
        }
    }
}

pub fn qr_window(booking_start: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        booking_start - Duration::hours(QR_VALID_BEFORE_HOURS),
        booking_start + Duration::hours(QR_VALID_AFTER_HOURS),
    )
}

pub fn qr_window_contains(booking_start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let (valid_from, valid_until) = qr_window(booking_start);
    valid_from <= now && now <= valid_until
}

/// Issue (or reissue) the single-use QR token. Once a token has been spent
/// the record is checked in and no further token is needed.
pub fn issue_qr_token(record: &mut AttendanceRecord, now: DateTime<Utc>) -> Result<String, AttendanceOutcome> {
    if record.status != AttendanceStatus::Pending {
        return Err(AttendanceOutcome::rejected(format!(
            "Cannot issue a QR token for a record in {}",
            record.status.as_str()
        )));
    }

    let token = Uuid::new_v4().to_string();
    record.qr_token = Some(token.clone());
    record.qr_token_used = false;
    record.qr_issued_at = Some(now);
    record.updated_at = now;

    Ok(token)
}

/// QR check-in: the token must match, be unspent, and be presented inside
/// the validity window around the booking start.
pub fn check_in_qr(
    record: &mut AttendanceRecord,
    token: &str,
    booking_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AttendanceOutcome {
    if record.status != AttendanceStatus::Pending {
        return AttendanceOutcome::rejected(format!(
            "Cannot check in from {}",
            record.status.as_str()
        ));
    }

    match &record.qr_token {
        Some(expected) if expected == token => {}
        Some(_) => return AttendanceOutcome::rejected("QR token does not match"),
        None => return AttendanceOutcome::rejected("No QR token issued for this booking"),
    }

    if record.qr_token_used {
        return AttendanceOutcome::rejected("QR token already used");
    }

    if !qr_window_contains(booking_start, now) {
        let (valid_from, valid_until) = qr_window(booking_start);
        return AttendanceOutcome::rejected(format!(
            "QR token only valid between {} and {}",
            valid_from.to_rfc3339(),
            valid_until.to_rfc3339()
        ));
    }

    record.status = AttendanceStatus::CheckedIn;
    record.check_type = Some(CheckType::QrScan);
    record.qr_token_used = true;
    record.checked_in_at = Some(now);
    record.on_time = Some(now <= booking_start);
    record.updated_at = now;

    AttendanceOutcome::ok("Checked in via QR scan", AttendanceStatus::CheckedIn)
}

/// Geolocation check-in. Same validity window as the QR path; the reported
/// position is stored as-is, verification is out of scope.
pub fn check_in_remote(
    record: &mut AttendanceRecord,
    latitude: f64,
    longitude: f64,
    booking_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AttendanceOutcome {
    if record.status != AttendanceStatus::Pending {
        return AttendanceOutcome::rejected(format!(
            "Cannot check in from {}",
            record.status.as_str()
        ));
    }

    if !qr_window_contains(booking_start, now) {
        return AttendanceOutcome::rejected("Remote check-in outside the attendance window");
    }

    record.status = AttendanceStatus::CheckedIn;
    record.check_type = Some(CheckType::RemoteCheckin);
    record.latitude = Some(latitude);
    record.longitude = Some(longitude);
    record.checked_in_at = Some(now);
    record.on_time = Some(now <= booking_start);
    record.updated_at = now;

    AttendanceOutcome::ok("Checked in remotely", AttendanceStatus::CheckedIn)
}

/// Manual check-in recorded by support; not time-boxed.
pub fn check_in_manual(
    record: &mut AttendanceRecord,
    booking_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AttendanceOutcome {
    if record.status != AttendanceStatus::Pending {
        return AttendanceOutcome::rejected(format!(
            "Cannot check in from {}",
            record.status.as_str()
        ));
    }

    record.status = AttendanceStatus::CheckedIn;
    record.check_type = Some(CheckType::Manual);
    record.checked_in_at = Some(now);
    record.on_time = Some(now <= booking_start);
    record.updated_at = now;

    AttendanceOutcome::ok("Checked in manually", AttendanceStatus::CheckedIn)
}

pub fn complete(record: &mut AttendanceRecord, now: DateTime<Utc>) -> AttendanceOutcome {
    if record.status != AttendanceStatus::CheckedIn {
        return AttendanceOutcome::rejected(format!(
            "Cannot complete a record in {}",
            record.status.as_str()
        ));
    }

    record.status = AttendanceStatus::Completed;
    record.completed_at = Some(now);
    record.updated_at = now;

    AttendanceOutcome::ok("Service completed", AttendanceStatus::Completed)
}

/// Mark the vendor as a no-show. Only once the attendance window has closed
/// without a check-in.
pub fn mark_no_show(
    record: &mut AttendanceRecord,
    booking_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AttendanceOutcome {
    if record.status != AttendanceStatus::Pending {
        return AttendanceOutcome::rejected(format!(
            "Cannot mark no-show from {}",
            record.status.as_str()
        ));
    }

    let (_, window_end) = qr_window(booking_start);
    if now <= window_end {
        return AttendanceOutcome::rejected("Attendance window is still open");
    }

    record.status = AttendanceStatus::NoShow;
    record.no_show_at = Some(now);
    record.on_time = Some(false);
    record.updated_at = now;

    AttendanceOutcome::ok("Vendor marked as no-show", AttendanceStatus::NoShow)
}

/// A checked-in or completed record refutes a no-show claim.
pub fn refutes_no_show(record: &AttendanceRecord) -> bool {
    matches!(
        record.status,
        AttendanceStatus::CheckedIn | AttendanceStatus::Completed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 14, 0, 0).unwrap()
    }

    fn record() -> AttendanceRecord {
        AttendanceRecord::new(
            "665f000000000000000000aa".to_string(),
            "vend-1".to_string(),
            start() - Duration::days(1),
        )
    }

    fn record_with_token(now: DateTime<Utc>) -> (AttendanceRecord, String) {
        let mut r = record();
        let token = issue_qr_token(&mut r, now).unwrap();
        (r, token)
    }

    #[test]
    fn qr_check_in_succeeds_inside_the_window() {
        // Exactly the window edges count as inside
        for offset in [
            -Duration::hours(2),
            Duration::zero(),
            Duration::hours(1),
        ] {
            let now = start() + offset;
            let (mut r, token) = record_with_token(now - Duration::minutes(5));
            let res = check_in_qr(&mut r, &token, start(), now);
            assert!(res.success, "offset {:?} should be valid", offset);
            assert_eq!(r.status, AttendanceStatus::CheckedIn);
        }
    }

    #[test]
    fn qr_check_in_fails_outside_the_window() {
        for offset in [
            -Duration::hours(2) - Duration::seconds(1),
            Duration::hours(1) + Duration::seconds(1),
            Duration::hours(5),
        ] {
            let now = start() + offset;
            let (mut r, token) = record_with_token(start() - Duration::hours(3));
            let res = check_in_qr(&mut r, &token, start(), now);
            assert!(!res.success, "offset {:?} should be rejected", offset);
            assert_eq!(r.status, AttendanceStatus::Pending);
        }
    }

    #[test]
    fn qr_token_is_single_use() {
        let now = start() - Duration::hours(1);
        let (mut r, token) = record_with_token(now);
        assert!(check_in_qr(&mut r, &token, start(), now).success);

        // Force the record back to try a replay
        r.status = AttendanceStatus::Pending;
        let res = check_in_qr(&mut r, &token, start(), now + Duration::minutes(5));
        assert!(!res.success);
        assert!(res.message.contains("already used"));
    }

    #[test]
    fn wrong_token_is_rejected() {
        let now = start() - Duration::hours(1);
        let (mut r, _token) = record_with_token(now);
        let res = check_in_qr(&mut r, "not-the-token", start(), now);
        assert!(!res.success);
        assert_eq!(r.status, AttendanceStatus::Pending);
    }

    #[test]
    fn punctuality_follows_the_scheduled_start() {
        let early = start() - Duration::minutes(30);
        let (mut r, token) = record_with_token(early);
        check_in_qr(&mut r, &token, start(), early);
        assert_eq!(r.on_time, Some(true));

        let late = start() + Duration::minutes(30);
        let (mut r, token) = record_with_token(start() - Duration::hours(1));
        check_in_qr(&mut r, &token, start(), late);
        assert_eq!(r.on_time, Some(false));
    }

    #[test]
    fn remote_check_in_records_the_position() {
        let now = start() - Duration::minutes(10);
        let mut r = record();
        let res = check_in_remote(&mut r, 47.3769, 8.5417, start(), now);
        assert!(res.success);
        assert_eq!(r.check_type, Some(CheckType::RemoteCheckin));
        assert_eq!(r.latitude, Some(47.3769));
    }

    #[test]
    fn completion_requires_a_check_in() {
        let mut r = record();
        assert!(!complete(&mut r, start()).success);

        check_in_manual(&mut r, start(), start());
        let res = complete(&mut r, start() + Duration::hours(2));
        assert!(res.success);
        assert_eq!(r.status, AttendanceStatus::Completed);
    }

    #[test]
    fn no_show_only_after_the_window_closes() {
        let mut r = record();
        let too_early = start() + Duration::minutes(30);
        assert!(!mark_no_show(&mut r, start(), too_early).success);

        let after_window = start() + Duration::hours(2);
        let res = mark_no_show(&mut r, start(), after_window);
        assert!(res.success);
        assert_eq!(r.status, AttendanceStatus::NoShow);
        assert_eq!(r.on_time, Some(false));
    }

    #[test]
    fn checked_in_record_refutes_a_no_show_claim() {
        let mut r = record();
        assert!(!refutes_no_show(&r));

        check_in_manual(&mut r, start(), start());
        assert!(refutes_no_show(&r));

        complete(&mut r, start() + Duration::hours(1));
        assert!(refutes_no_show(&r));
    }
}
