use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

// Escalation ladder phases. Variant order is the escalation order, so the
// derived Ord doubles as the monotonicity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DisputePhase {
    #[serde(rename = "phase_1")]
    Phase1,
    #[serde(rename = "phase_2")]
    Phase2,
    #[serde(rename = "phase_3_pending")]
    Phase3Pending,
    #[serde(rename = "phase_3_ai")]
    Phase3Ai,
    #[serde(rename = "phase_3_external")]
    Phase3External,
    #[serde(rename = "resolved")]
    Resolved,
}

impl DisputePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputePhase::Phase1 => "phase_1",
            DisputePhase::Phase2 => "phase_2",
            DisputePhase::Phase3Pending => "phase_3_pending",
            DisputePhase::Phase3Ai => "phase_3_ai",
            DisputePhase::Phase3External => "phase_3_external",
            DisputePhase::Resolved => "resolved",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DisputePhase::Resolved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    ResolvedCustomer,
    ResolvedVendor,
    ResolvedSplit,
    Closed,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "open",
            DisputeStatus::UnderReview => "under_review",
            DisputeStatus::ResolvedCustomer => "resolved_customer",
            DisputeStatus::ResolvedVendor => "resolved_vendor",
            DisputeStatus::ResolvedSplit => "resolved_split",
            DisputeStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeReason {
    NoShow,
    ServiceQuality,
    Billing,
    Other,
}

// Which side of the booking an action comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Customer,
    Vendor,
}

// Consensus label attached to a generated proposal. Descriptive framing of
// how far apart the panel samples were, nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusLabel {
    Unanimous,
    Majority,
    Split,
}

// One mediation option: refund percentage of the escrow snapshot, the CHF
// amounts it implies, and the panel framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionProposal {
    pub rank: u8,
    pub refund_percentage: f64,
    pub refund_amount: f64,
    pub vendor_receives: f64,
    pub confidence: f64,
    pub consensus: ConsensusLabel,
    pub rationale: String,
}

// A phase-1 negotiation offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterOffer {
    pub offer_id: String,
    pub offered_by: Party,
    pub refund_percentage: f64,
    pub note: Option<String>,
    pub offered_at: DateTime<Utc>,
}

// Database model for the disputes collection (MongoDB)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub booking_id: String,
    pub customer_id: String,
    pub vendor_id: String,
    pub opened_by: Party,

    pub reason: DisputeReason,
    pub description: String,

    // Escrow snapshot taken when the dispute was opened
    pub escrow_amount: f64,
    pub currency: String,

    pub current_phase: DisputePhase,
    pub status: DisputeStatus,
    pub phase_deadline: DateTime<Utc>,

    pub counter_offers: Vec<CounterOffer>,
    pub proposals: Vec<ResolutionProposal>,
    pub final_verdict: Option<ResolutionProposal>,

    // Settlement figures, filled on resolution
    pub customer_refund: Option<f64>,
    pub vendor_payout: Option<f64>,

    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Case signals the proposal generator reads. Attendance facts are optional
// because not every booking has a record yet.
#[derive(Debug, Clone)]
pub struct DisputeContext {
    pub escrow_amount: f64,
    pub reason: DisputeReason,
    pub vendor_no_show: Option<bool>,
    pub vendor_on_time: Option<bool>,
    pub counter_offer_count: usize,
}

#[derive(Debug, Deserialize, Validate)]
pub struct OpenDisputeRequest {
    #[validate(length(min = 1))]
    pub booking_id: String,
    pub opened_by: Party,
    pub reason: DisputeReason,
    #[validate(length(min = 10, max = 2000))]
    pub description: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CounterOfferRequest {
    pub party: Party,
    #[validate(range(min = 0.0, max = 100.0))]
    pub refund_percentage: f64,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerdictActionRequest {
    pub party: Party,
}

#[derive(Debug, Deserialize)]
pub struct DisputeQuery {
    pub booking_id: Option<String>,
    pub customer_id: Option<String>,
    pub vendor_id: Option<String>,
    pub status: Option<String>,
}

// Model for dispute responses
#[derive(Debug, Serialize)]
pub struct DisputeResponse {
    pub id: String,
    pub booking_id: String,
    pub customer_id: String,
    pub vendor_id: String,
    pub opened_by: Party,
    pub reason: DisputeReason,
    pub description: String,
    pub escrow_amount: f64,
    pub currency: String,
    pub current_phase: DisputePhase,
    pub status: DisputeStatus,
    pub phase_deadline: DateTime<Utc>,
    pub counter_offers: Vec<CounterOffer>,
    pub proposals: Vec<ResolutionProposal>,
    pub final_verdict: Option<ResolutionProposal>,
    pub customer_refund: Option<f64>,
    pub vendor_payout: Option<f64>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Dispute> for DisputeResponse {
    fn from(dispute: Dispute) -> Self {
        DisputeResponse {
            id: dispute.id.map(|id| id.to_hex()).unwrap_or_default(),
            booking_id: dispute.booking_id,
            customer_id: dispute.customer_id,
            vendor_id: dispute.vendor_id,
            opened_by: dispute.opened_by,
            reason: dispute.reason,
            description: dispute.description,
            escrow_amount: dispute.escrow_amount,
            currency: dispute.currency,
            current_phase: dispute.current_phase,
            status: dispute.status,
            phase_deadline: dispute.phase_deadline,
            counter_offers: dispute.counter_offers,
            proposals: dispute.proposals,
            final_verdict: dispute.final_verdict,
            customer_refund: dispute.customer_refund,
            vendor_payout: dispute.vendor_payout,
            resolved_at: dispute.resolved_at,
            created_at: dispute.created_at,
            updated_at: dispute.updated_at,
        }
    }
}
