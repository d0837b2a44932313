pub(crate) mod attendance_service;
pub(crate) mod credit_service;
pub(crate) mod dispute_ladder;
pub(crate) mod gateway_service;
pub(crate) mod notification_service;
pub(crate) mod payment_protocol;
pub(crate) mod proposal_generator;
