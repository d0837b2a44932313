use mongodb::Database;
use std::sync::Arc;

use crate::services::gateway_service::CaptureGateway;
use crate::services::proposal_generator::{ConsensusGenerator, ProposalGenerator};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub gateway: Option<Arc<CaptureGateway>>,
    pub proposal_generator: Arc<dyn ProposalGenerator>,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        AppState {
            db,
            gateway: None,
            proposal_generator: Arc::new(ConsensusGenerator),
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<CaptureGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }
}
