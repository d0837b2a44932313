use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

// Payment lifecycle of a booking. Forward-only except cancellation/refund,
// which are reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    PendingDeposit,
    DepositPaid,
    CaptureScheduled,
    CaptureAttempted,
    FullyPaid,
    CaptureFailed,
    CashOnSite,
    Cancelled,
    Refunded,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::PendingDeposit => "PENDING_DEPOSIT",
            PaymentState::DepositPaid => "DEPOSIT_PAID",
            PaymentState::CaptureScheduled => "CAPTURE_SCHEDULED",
            PaymentState::CaptureAttempted => "CAPTURE_ATTEMPTED",
            PaymentState::FullyPaid => "FULLY_PAID",
            PaymentState::CaptureFailed => "CAPTURE_FAILED",
            PaymentState::CashOnSite => "CASH_ON_SITE",
            PaymentState::Cancelled => "CANCELLED",
            PaymentState::Refunded => "REFUNDED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentState::FullyPaid
                | PaymentState::CashOnSite
                | PaymentState::Cancelled
                | PaymentState::Refunded
        )
    }
}

// Why a booking was cancelled; drives who bears the financial consequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationReason {
    UserRequested,
    VendorRequested,
    NoShow,
    AutoCancelled,
    PaymentFailed,
}

impl CancellationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationReason::UserRequested => "USER_REQUESTED",
            CancellationReason::VendorRequested => "VENDOR_REQUESTED",
            CancellationReason::NoShow => "NO_SHOW",
            CancellationReason::AutoCancelled => "AUTO_CANCELLED",
            CancellationReason::PaymentFailed => "PAYMENT_FAILED",
        }
    }
}

// Database model for the bookings collection (MongoDB)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub customer_id: String,
    pub vendor_id: String,
    pub service_id: String,

    // Scheduled service window
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,

    pub amount: f64,
    pub currency: String, // "CHF"

    pub payment_state: PaymentState,

    // Gateway authorization reference, set once the deposit is paid
    pub payment_ref: Option<String>,

    // Transition timestamps
    pub capture_due_at: Option<DateTime<Utc>>,
    pub deposit_paid_at: Option<DateTime<Utc>>,
    pub capture_attempted_at: Option<DateTime<Utc>>,
    pub captured_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    pub cancellation_reason: Option<CancellationReason>,
    pub capture_failure_reason: Option<String>,

    // Settlement figures, filled at capture or cancellation
    pub vendor_payout: Option<f64>,
    pub platform_fee: Option<f64>,
    pub customer_refund: Option<f64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    #[validate(length(min = 1))]
    pub customer_id: String,
    #[validate(length(min = 1))]
    pub vendor_id: String,
    #[validate(length(min = 1))]
    pub service_id: String,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    #[validate(range(min = 0.01))]
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "CHF".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CancelBookingRequest {
    pub reason: CancellationReason,
}

#[derive(Debug, Deserialize)]
pub struct DepositPaidRequest {
    pub payment_ref: String,
}

#[derive(Debug, Deserialize)]
pub struct BookingQuery {
    pub customer_id: Option<String>,
    pub vendor_id: Option<String>,
    pub payment_state: Option<String>,
}

// Outcome of one protocol operation. Business-rule violations come back as
// success:false with the state untouched; only infrastructure failures
// surface as errors.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentProtocolResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_state: Option<PaymentState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_payout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_fee: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_refund: Option<f64>,
}

impl PaymentProtocolResult {
    pub fn ok(message: impl Into<String>, new_state: PaymentState) -> Self {
        PaymentProtocolResult {
            success: true,
            message: message.into(),
            new_state: Some(new_state),
            vendor_payout: None,
            platform_fee: None,
            customer_refund: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        PaymentProtocolResult {
            success: false,
            message: message.into(),
            new_state: None,
            vendor_payout: None,
            platform_fee: None,
            customer_refund: None,
        }
    }
}

// Model for booking responses
#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: String,
    pub customer_id: String,
    pub vendor_id: String,
    pub service_id: String,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub amount: f64,
    pub currency: String,
    pub payment_state: PaymentState,
    pub capture_due_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<CancellationReason>,
    pub vendor_payout: Option<f64>,
    pub platform_fee: Option<f64>,
    pub customer_refund: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        BookingResponse {
            id: booking.id.map(|id| id.to_hex()).unwrap_or_default(),
            customer_id: booking.customer_id,
            vendor_id: booking.vendor_id,
            service_id: booking.service_id,
            scheduled_start: booking.scheduled_start,
            scheduled_end: booking.scheduled_end,
            amount: booking.amount,
            currency: booking.currency,
            payment_state: booking.payment_state,
            capture_due_at: booking.capture_due_at,
            cancellation_reason: booking.cancellation_reason,
            vendor_payout: booking.vendor_payout,
            platform_fee: booking.platform_fee,
            customer_refund: booking.customer_refund,
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}

impl From<CreateBookingRequest> for Booking {
    fn from(req: CreateBookingRequest) -> Self {
        let now = Utc::now();

        Booking {
            id: None, // Will be set by MongoDB
            customer_id: req.customer_id,
            vendor_id: req.vendor_id,
            service_id: req.service_id,
            scheduled_start: req.scheduled_start,
            scheduled_end: req.scheduled_end,
            amount: req.amount,
            currency: req.currency,
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
}
