use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckType {
    QrScan,
    RemoteCheckin,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Pending,
    CheckedIn,
    Completed,
    NoShow,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Pending => "PENDING",
            AttendanceStatus::CheckedIn => "CHECKED_IN",
            AttendanceStatus::Completed => "COMPLETED",
            AttendanceStatus::NoShow => "NO_SHOW",
        }
    }
}

// Database model for the attendance collection (MongoDB). One record per
// booking; money never moves here, downstream logic only reads the facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub booking_id: String,
    pub vendor_id: String,

    pub status: AttendanceStatus,
    pub check_type: Option<CheckType>,

    // Single-use QR token, valid from 2h before to 1h after booking start
    pub qr_token: Option<String>,
    pub qr_token_used: bool,
    pub qr_issued_at: Option<DateTime<Utc>>,

    pub checked_in_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub no_show_at: Option<DateTime<Utc>>,

    // Checked in no later than the scheduled start
    pub on_time: Option<bool>,

    // Reported position for remote check-ins
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttendanceRecord {
    pub fn new(booking_id: String, vendor_id: String, now: DateTime<Utc>) -> Self {
        AttendanceRecord {
            id: None,
            booking_id,
            vendor_id,
            status: AttendanceStatus::Pending,
            check_type: None,
            qr_token: None,
            qr_token_used: false,
            qr_issued_at: None,
            checked_in_at: None,
            completed_at: None,
            no_show_at: None,
            on_time: None,
            latitude: None,
            longitude: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckInRequest {
    #[validate(length(min = 1))]
    pub booking_id: String,
    pub check_type: CheckType,
    pub qr_token: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct QrTokenResponse {
    pub booking_id: String,
    pub qr_token: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

// Model for attendance responses
#[derive(Debug, Serialize)]
pub struct AttendanceResponse {
    pub id: String,
    pub booking_id: String,
    pub vendor_id: String,
    pub status: AttendanceStatus,
    pub check_type: Option<CheckType>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub no_show_at: Option<DateTime<Utc>>,
    pub on_time: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AttendanceRecord> for AttendanceResponse {
    fn from(record: AttendanceRecord) -> Self {
        AttendanceResponse {
            id: record.id.map(|id| id.to_hex()).unwrap_or_default(),
            booking_id: record.booking_id,
            vendor_id: record.vendor_id,
            status: record.status,
            check_type: record.check_type,
            checked_in_at: record.checked_in_at,
            completed_at: record.completed_at,
            no_show_at: record.no_show_at,
            on_time: record.on_time,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
