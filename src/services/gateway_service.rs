// services/gateway_service.rs
//
// Client for the payment service provider. Holds the capture/refund calls
// the protocol delegates to; the 24h hold itself lives with the PSP.
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::Utc;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::errors::{AppError, Result};

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct CaptureRequest {
    pub merchant_id: String,
    pub payment_ref: String,
    pub amount: String,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct CaptureResponse {
    pub status: String, // "succeeded" or "failed"
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefundRequest {
    pub merchant_id: String,
    pub payment_ref: String,
    pub amount: String,
    pub currency: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RefundResponse {
    pub status: String,
    pub refund_id: Option<String>,
}

/// Outcome of a capture call. A declined charge is a normal outcome, not an
/// error; errors mean the PSP could not be reached at all.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub succeeded: bool,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CaptureGateway {
    config: AppConfig,
    client: Client,
    cached_token: Arc<RwLock<Option<(String, chrono::DateTime<Utc>)>>>,
}

impl CaptureGateway {
    pub fn new(config: AppConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        CaptureGateway {
            config,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().unwrap();
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Requesting new PSP access token");
        let auth_string = format!(
            "{}:{}",
            self.config.psp_client_id, self.config.psp_client_secret
        );
        let encoded_auth = base64.encode(auth_string);

        let (auth_url, _, _) = self.config.get_psp_urls();

        let response = self
            .client
            .post(&auth_url)
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            error!("PSP auth failed: {} - {}", status, body);
            return Err(AppError::gateway(format!("PSP auth failed: {}", status)));
        }

        let auth_response: AuthResponse = response.json().await?;

        {
            let expiry_time = Utc::now() + chrono::Duration::seconds(auth_response.expires_in as i64);
            let mut cached = self.cached_token.write().unwrap();
            *cached = Some((auth_response.access_token.clone(), expiry_time));
        }

        Ok(auth_response.access_token)
    }

    /// Finalize a previously authorized hold into an actual charge.
    pub async fn capture(
        &self,
        payment_ref: &str,
        amount: f64,
        currency: &str,
    ) -> Result<CaptureOutcome> {
        info!("Capturing {} {} on {}", amount, currency, payment_ref);

        if amount <= 0.0 {
            return Err(AppError::invalid_data("Capture amount must be greater than 0"));
        }

        let access_token = self.get_access_token().await?;
        let (_, capture_url, _) = self.config.get_psp_urls();

        let request = CaptureRequest {
            merchant_id: self.config.psp_merchant_id.clone(),
            payment_ref: payment_ref.to_string(),
            amount: format!("{:.2}", amount),
            currency: currency.to_string(),
        };

        let response = self
            .client
            .post(&capture_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            error!("Capture call failed: {} - {}", status, body);
            return Err(AppError::gateway(format!("Capture call failed: {}", status)));
        }

        let capture_response: CaptureResponse = response.json().await?;

        Ok(CaptureOutcome {
            succeeded: capture_response.status == "succeeded",
            transaction_id: capture_response.transaction_id,
            failure_reason: capture_response.failure_reason,
        })
    }

    /// Return all or part of a held amount to the customer.
    pub async fn refund(
        &self,
        payment_ref: &str,
        amount: f64,
        currency: &str,
        reason: &str,
    ) -> Result<String> {
        info!("Refunding {} {} on {}", amount, currency, payment_ref);

        if amount <= 0.0 {
            return Err(AppError::invalid_data("Refund amount must be greater than 0"));
        }

        let access_token = self.get_access_token().await?;
        let (_, _, refund_url) = self.config.get_psp_urls();

        let request = RefundRequest {
            merchant_id: self.config.psp_merchant_id.clone(),
            payment_ref: payment_ref.to_string(),
            amount: format!("{:.2}", amount),
            currency: currency.to_string(),
            reason: reason.to_string(),
        };

        let response = self
            .client
            .post(&refund_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            error!("Refund call failed: {} - {}", status, body);
            return Err(AppError::gateway(format!("Refund call failed: {}", status)));
        }

        let refund_response: RefundResponse = response.json().await?;

        if refund_response.status != "succeeded" {
            return Err(AppError::gateway(format!(
                "Refund not accepted: {}",
                refund_response.status
            )));
        }

        Ok(refund_response.refund_id.unwrap_or_default())
    }
}
