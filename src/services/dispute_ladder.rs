// services/dispute_ladder.rs
//
// The three-phase escalation ladder layered on top of a booking. Phase only
// moves forward; resolution sets phase and status together and is terminal.
// Like the payment protocol, every transition is a pure function over
// (dispute, now) and the caller persists with a phase-guard filter.
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::dispute::{
    CounterOffer, Dispute, DisputePhase, DisputeStatus, Party, ResolutionProposal,
};
use crate::services::payment_protocol::round_chf;

/// Phase 1: direct negotiation window.
pub const PHASE1_WINDOW_HOURS: i64 = 48;
/// Phase 2: mediation window.
pub const PHASE2_WINDOW_HOURS: i64 = 48;
/// Phase 3: review window on the binding verdict.
pub const PHASE3_REVIEW_HOURS: i64 = 24;

/// Outcome of one ladder operation. Mirrors PaymentProtocolResult: expected
/// business-rule rejections are success:false, never errors.
#[derive(Debug, Clone, Serialize)]
pub struct DisputeActionResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_phase: Option<DisputePhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DisputeStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_refund: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_payout: Option<f64>,
}

impl DisputeActionResult {
    pub fn ok(message: impl Into<String>, phase: DisputePhase, status: DisputeStatus) -> Self {
        DisputeActionResult {
            success: true,
            message: message.into(),
            new_phase: Some(phase),
            status: Some(status),
            customer_refund: None,
            vendor_payout: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        DisputeActionResult {
            success: false,
            message: message.into(),
            new_phase: None,
            status: None,
            customer_refund: None,
            vendor_payout: None,
        }
    }
}

pub fn initial_deadline(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::hours(PHASE1_WINDOW_HOURS)
}

pub fn is_phase_expired(dispute: &Dispute, now: DateTime<Utc>) -> bool {
    !dispute.current_phase.is_terminal() && now >= dispute.phase_deadline
}

/// Record a phase-1 counter-offer inside the negotiation window.
pub fn record_counter_offer(
    dispute: &mut Dispute,
    offer: CounterOffer,
    now: DateTime<Utc>,
) -> DisputeActionResult {
    if dispute.current_phase != DisputePhase::Phase1 {
        return DisputeActionResult::rejected(format!(
            "Counter-offers are only accepted in phase_1, dispute is in {}",
            dispute.current_phase.as_str()
        ));
    }
    if now > dispute.phase_deadline {
        return DisputeActionResult::rejected("Negotiation window has closed");
    }

    dispute.counter_offers.push(offer);
    dispute.updated_at = now;

    DisputeActionResult::ok(
        "Counter-offer recorded",
        DisputePhase::Phase1,
        dispute.status,
    )
}

/// Accept the other party's counter-offer, resolving the dispute with the
/// agreed split.
pub fn accept_counter_offer(
    dispute: &mut Dispute,
    offer_id: &str,
    accepting_party: Party,
    now: DateTime<Utc>,
) -> DisputeActionResult {
    if dispute.current_phase != DisputePhase::Phase1 {
        return DisputeActionResult::rejected(format!(
            "Offers can only be accepted in phase_1, dispute is in {}",
            dispute.current_phase.as_str()
        ));
    }
    if now > dispute.phase_deadline {
        return DisputeActionResult::rejected("Negotiation window has closed");
    }

    let offer = match dispute
        .counter_offers
        .iter()
        .find(|o| o.offer_id == offer_id)
    {
        Some(offer) => offer.clone(),
        None => return DisputeActionResult::rejected("Unknown offer id"),
    };

    if offer.offered_by == accepting_party {
        return DisputeActionResult::rejected("A party cannot accept its own offer");
    }

    resolve(dispute, offer.refund_percentage, now)
}

/// Advance to phase 2 with the generated mediation proposals. Used by both
/// explicit escalation and the timeout cron.
pub fn advance_to_phase2(
    dispute: &mut Dispute,
    proposals: Vec<ResolutionProposal>,
    now: DateTime<Utc>,
) -> DisputeActionResult {
    if dispute.current_phase != DisputePhase::Phase1 {
        return DisputeActionResult::rejected(format!(
            "Cannot advance to phase_2 from {}",
            dispute.current_phase.as_str()
        ));
    }

    dispute.current_phase = DisputePhase::Phase2;
    dispute.status = DisputeStatus::UnderReview;
    dispute.proposals = proposals;
    dispute.phase_deadline = now + Duration::hours(PHASE2_WINDOW_HOURS);
    dispute.updated_at = now;

    DisputeActionResult::ok(
        "Dispute advanced to mediation",
        DisputePhase::Phase2,
        DisputeStatus::UnderReview,
    )
}

/// Accept one of the phase-2 mediation proposals.
pub fn accept_proposal(
    dispute: &mut Dispute,
    rank: u8,
    now: DateTime<Utc>,
) -> DisputeActionResult {
    if dispute.current_phase != DisputePhase::Phase2 {
        return DisputeActionResult::rejected(format!(
            "Proposals can only be accepted in phase_2, dispute is in {}",
            dispute.current_phase.as_str()
        ));
    }
    if now > dispute.phase_deadline {
        return DisputeActionResult::rejected("Mediation window has closed");
    }

    let proposal = match dispute.proposals.iter().find(|p| p.rank == rank) {
        Some(proposal) => proposal.clone(),
        None => return DisputeActionResult::rejected(format!("No proposal with rank {}", rank)),
    };

    resolve(dispute, proposal.refund_percentage, now)
}

/// Enter phase 3. The verdict is generated afterwards; until it lands the
/// dispute sits in phase_3_pending.
pub fn advance_to_phase3(dispute: &mut Dispute, now: DateTime<Utc>) -> DisputeActionResult {
    if dispute.current_phase != DisputePhase::Phase2 {
        return DisputeActionResult::rejected(format!(
            "Cannot advance to phase_3 from {}",
            dispute.current_phase.as_str()
        ));
    }

    dispute.current_phase = DisputePhase::Phase3Pending;
    dispute.status = DisputeStatus::UnderReview;
    dispute.phase_deadline = now + Duration::hours(PHASE3_REVIEW_HOURS);
    dispute.updated_at = now;

    DisputeActionResult::ok(
        "Dispute advanced to binding decision",
        DisputePhase::Phase3Pending,
        DisputeStatus::UnderReview,
    )
}

/// Attach the generated verdict and open the 24h review window. If verdict
/// generation failed upstream, the dispute simply stays in phase_3_pending.
pub fn attach_verdict(
    dispute: &mut Dispute,
    verdict: ResolutionProposal,
    now: DateTime<Utc>,
) -> DisputeActionResult {
    if dispute.current_phase != DisputePhase::Phase3Pending {
        return DisputeActionResult::rejected(format!(
            "Cannot attach a verdict in {}",
            dispute.current_phase.as_str()
        ));
    }

    dispute.current_phase = DisputePhase::Phase3Ai;
    dispute.final_verdict = Some(verdict);
    dispute.phase_deadline = now + Duration::hours(PHASE3_REVIEW_HOURS);
    dispute.updated_at = now;

    DisputeActionResult::ok(
        "Binding verdict issued for review",
        DisputePhase::Phase3Ai,
        dispute.status,
    )
}

/// Accept the binding verdict (either party, or the timeout cron once the
/// review window has passed).
pub fn accept_verdict(dispute: &mut Dispute, now: DateTime<Utc>) -> DisputeActionResult {
    if dispute.current_phase != DisputePhase::Phase3Ai {
        return DisputeActionResult::rejected(format!(
            "No verdict under review in {}",
            dispute.current_phase.as_str()
        ));
    }

    let percentage = match &dispute.final_verdict {
        Some(verdict) => verdict.refund_percentage,
        None => return DisputeActionResult::rejected("Dispute has no verdict attached"),
    };

    resolve(dispute, percentage, now)
}

/// Escalate past the generated verdict to the paid human arbitration path.
pub fn escalate_external(dispute: &mut Dispute, now: DateTime<Utc>) -> DisputeActionResult {
    if dispute.current_phase != DisputePhase::Phase3Ai {
        return DisputeActionResult::rejected(format!(
            "External escalation is only possible from phase_3_ai, dispute is in {}",
            dispute.current_phase.as_str()
        ));
    }

    dispute.current_phase = DisputePhase::Phase3External;
    dispute.status = DisputeStatus::UnderReview;
    dispute.updated_at = now;

    DisputeActionResult::ok(
        "Dispute handed to external arbitration",
        DisputePhase::Phase3External,
        DisputeStatus::UnderReview,
    )
}

/// The opener withdraws the dispute. Terminal, closes without settlement.
pub fn withdraw(dispute: &mut Dispute, party: Party, now: DateTime<Utc>) -> DisputeActionResult {
    if dispute.current_phase.is_terminal() {
        return DisputeActionResult::rejected("Dispute is already resolved");
    }
    if party != dispute.opened_by {
        return DisputeActionResult::rejected("Only the opening party can withdraw");
    }

    dispute.current_phase = DisputePhase::Resolved;
    dispute.status = DisputeStatus::Closed;
    dispute.resolved_at = Some(now);
    dispute.updated_at = now;

    DisputeActionResult::ok(
        "Dispute withdrawn",
        DisputePhase::Resolved,
        DisputeStatus::Closed,
    )
}

/// Terminal settlement: split the escrow snapshot by the refund percentage
/// and set phase and status together.
fn resolve(dispute: &mut Dispute, refund_percentage: f64, now: DateTime<Utc>) -> DisputeActionResult {
    let customer_refund = round_chf(dispute.escrow_amount * refund_percentage / 100.0);
    let vendor_payout = round_chf(dispute.escrow_amount - customer_refund);

    let status = if refund_percentage >= 99.995 {
        DisputeStatus::ResolvedCustomer
    } else if refund_percentage <= 0.005 {
        DisputeStatus::ResolvedVendor
    } else {
        DisputeStatus::ResolvedSplit
    };

    dispute.current_phase = DisputePhase::Resolved;
    dispute.status = status;
    dispute.customer_refund = Some(customer_refund);
    dispute.vendor_payout = Some(vendor_payout);
    dispute.resolved_at = Some(now);
    dispute.updated_at = now;

    DisputeActionResult {
        success: true,
        message: format!(
            "Dispute resolved: {:.1}% of the escrow refunded",
            refund_percentage
        ),
        new_phase: Some(DisputePhase::Resolved),
        status: Some(status),
        customer_refund: Some(customer_refund),
        vendor_payout: Some(vendor_payout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dispute::{ConsensusLabel, DisputeReason};
    use chrono::TimeZone;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap()
    }

    fn dispute(escrow: f64) -> Dispute {
        let now = base_time();
        Dispute {
            id: None,
            booking_id: "665f000000000000000000aa".to_string(),
            customer_id: "cust-1".to_string(),
            vendor_id: "vend-1".to_string(),
            opened_by: Party::Customer,
            reason: DisputeReason::ServiceQuality,
            description: "Work left unfinished".to_string(),
            escrow_amount: escrow,
            currency: "CHF".to_string(),
            current_phase: DisputePhase::Phase1,
            status: DisputeStatus::Open,
            phase_deadline: initial_deadline(now),
            counter_offers: vec![],
            proposals: vec![],
            final_verdict: None,
            customer_refund: None,
            vendor_payout: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn offer(id: &str, by: Party, percentage: f64) -> CounterOffer {
        CounterOffer {
            offer_id: id.to_string(),
            offered_by: by,
            refund_percentage: percentage,
            note: None,
            offered_at: base_time(),
        }
    }

    fn proposal(rank: u8, percentage: f64, escrow: f64) -> ResolutionProposal {
        ResolutionProposal {
            rank,
            refund_percentage: percentage,
            refund_amount: round_chf(escrow * percentage / 100.0),
            vendor_receives: round_chf(escrow - escrow * percentage / 100.0),
            confidence: 0.8,
            consensus: ConsensusLabel::Majority,
            rationale: "test".to_string(),
        }
    }

    #[test]
    fn offers_rejected_after_the_negotiation_window() {
        let mut d = dispute(300.0);
        let late = base_time() + Duration::hours(PHASE1_WINDOW_HOURS + 1);

        let res = record_counter_offer(&mut d, offer("o1", Party::Vendor, 40.0), late);
        assert!(!res.success);
        assert!(d.counter_offers.is_empty());
    }

    #[test]
    fn accepting_the_other_partys_offer_resolves_with_the_agreed_split() {
        let mut d = dispute(200.0);
        let now = base_time() + Duration::hours(1);
        assert!(record_counter_offer(&mut d, offer("o1", Party::Vendor, 30.0), now).success);

        let res = accept_counter_offer(&mut d, "o1", Party::Customer, now);
        assert!(res.success);
        assert_eq!(d.current_phase, DisputePhase::Resolved);
        assert_eq!(d.status, DisputeStatus::ResolvedSplit);
        assert_eq!(res.customer_refund, Some(60.0));
        assert_eq!(res.vendor_payout, Some(140.0));
    }

    #[test]
    fn offers_cannot_be_accepted_after_the_window() {
        let mut d = dispute(200.0);
        let now = base_time() + Duration::hours(1);
        assert!(record_counter_offer(&mut d, offer("o1", Party::Vendor, 30.0), now).success);

        let late = base_time() + Duration::hours(PHASE1_WINDOW_HOURS + 1);
        let res = accept_counter_offer(&mut d, "o1", Party::Customer, late);
        assert!(!res.success);
        assert_eq!(d.current_phase, DisputePhase::Phase1);
        assert!(d.customer_refund.is_none());
    }

    #[test]
    fn a_party_cannot_accept_its_own_offer() {
        let mut d = dispute(200.0);
        let now = base_time() + Duration::hours(1);
        record_counter_offer(&mut d, offer("o1", Party::Vendor, 30.0), now);

        let res = accept_counter_offer(&mut d, "o1", Party::Vendor, now);
        assert!(!res.success);
        assert_eq!(d.current_phase, DisputePhase::Phase1);
    }

    #[test]
    fn ladder_only_moves_forward() {
        let mut d = dispute(300.0);
        let mut seen = vec![d.current_phase];
        let now = base_time() + Duration::hours(49);

        assert!(advance_to_phase2(&mut d, vec![proposal(1, 75.0, 300.0)], now).success);
        seen.push(d.current_phase);

        assert!(advance_to_phase3(&mut d, now + Duration::hours(49)).success);
        seen.push(d.current_phase);

        let verdict = proposal(1, 50.0, 300.0);
        assert!(attach_verdict(&mut d, verdict, now + Duration::hours(50)).success);
        seen.push(d.current_phase);

        assert!(accept_verdict(&mut d, now + Duration::hours(51)).success);
        seen.push(d.current_phase);

        for pair in seen.windows(2) {
            assert!(pair[0] < pair[1], "phase regressed: {:?}", pair);
        }
    }

    #[test]
    fn phase2_cannot_be_entered_twice() {
        let mut d = dispute(300.0);
        let now = base_time() + Duration::hours(49);
        assert!(advance_to_phase2(&mut d, vec![], now).success);

        let res = advance_to_phase2(&mut d, vec![], now);
        assert!(!res.success);
        assert_eq!(d.current_phase, DisputePhase::Phase2);
    }

    #[test]
    fn accepting_a_mediation_proposal_settles_the_escrow() {
        let mut d = dispute(300.0);
        let now = base_time() + Duration::hours(49);
        advance_to_phase2(
            &mut d,
            vec![
                proposal(1, 75.0, 300.0),
                proposal(2, 50.0, 300.0),
                proposal(3, 25.0, 300.0),
            ],
            now,
        );

        let res = accept_proposal(&mut d, 2, now + Duration::hours(1));
        assert!(res.success);
        assert_eq!(res.customer_refund, Some(150.0));
        assert_eq!(res.vendor_payout, Some(150.0));
        assert_eq!(d.status, DisputeStatus::ResolvedSplit);
    }

    #[test]
    fn proposals_cannot_be_accepted_after_the_window() {
        let mut d = dispute(300.0);
        let now = base_time() + Duration::hours(49);
        advance_to_phase2(&mut d, vec![proposal(1, 75.0, 300.0)], now);

        let late = now + Duration::hours(PHASE2_WINDOW_HOURS + 1);
        let res = accept_proposal(&mut d, 1, late);
        assert!(!res.success);
        assert_eq!(d.current_phase, DisputePhase::Phase2);
        assert!(d.customer_refund.is_none());
    }

    #[test]
    fn verdict_timeout_applies_the_verdict() {
        let mut d = dispute(100.0);
        let now = base_time() + Duration::hours(49);
        advance_to_phase2(&mut d, vec![], now);
        advance_to_phase3(&mut d, now + Duration::hours(48));
        attach_verdict(&mut d, proposal(1, 100.0, 100.0), now + Duration::hours(48));

        let past_deadline = d.phase_deadline + Duration::hours(1);
        assert!(is_phase_expired(&d, past_deadline));

        let res = accept_verdict(&mut d, past_deadline);
        assert!(res.success);
        assert_eq!(d.status, DisputeStatus::ResolvedCustomer);
        assert_eq!(res.customer_refund, Some(100.0));
    }

    #[test]
    fn external_escalation_leaves_the_dispute_open() {
        let mut d = dispute(100.0);
        let now = base_time() + Duration::hours(49);
        advance_to_phase2(&mut d, vec![], now);
        advance_to_phase3(&mut d, now);
        attach_verdict(&mut d, proposal(1, 50.0, 100.0), now);

        let res = escalate_external(&mut d, now + Duration::hours(1));
        assert!(res.success);
        assert_eq!(d.current_phase, DisputePhase::Phase3External);
        assert_eq!(d.status, DisputeStatus::UnderReview);
        assert!(d.resolved_at.is_none());
    }

    #[test]
    fn resolution_is_terminal() {
        let mut d = dispute(200.0);
        let now = base_time() + Duration::hours(1);
        record_counter_offer(&mut d, offer("o1", Party::Vendor, 0.0), now);
        accept_counter_offer(&mut d, "o1", Party::Customer, now);
        assert_eq!(d.status, DisputeStatus::ResolvedVendor);

        assert!(!advance_to_phase2(&mut d, vec![], now).success);
        assert!(!withdraw(&mut d, Party::Customer, now).success);
        assert_eq!(d.current_phase, DisputePhase::Resolved);
    }

    #[test]
    fn only_the_opener_can_withdraw() {
        let mut d = dispute(200.0);
        let now = base_time() + Duration::hours(1);

        assert!(!withdraw(&mut d, Party::Vendor, now).success);

        let res = withdraw(&mut d, Party::Customer, now);
        assert!(res.success);
        assert_eq!(d.status, DisputeStatus::Closed);
        assert!(d.customer_refund.is_none());
    }
}
